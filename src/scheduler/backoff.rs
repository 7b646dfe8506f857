//! Empty-queue backoff.
//!
//! One empty poll earns a short pause. A second empty poll in a row switches
//! to the long pause, which holds until a poll returns messages again.

use std::time::Duration;

/// Short and long poll delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after a non-empty poll, or after the first empty one.
    pub short: Duration,
    /// Delay once the queue has been empty for consecutive polls.
    pub long: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            short: Duration::from_secs(1),
            long: Duration::from_secs(900),
        }
    }
}

impl BackoffPolicy {
    /// Creates a policy from its two delays.
    pub fn new(short: Duration, long: Duration) -> Self {
        Self { short, long }
    }

    /// Returns the next delay and the new "no messages seen" flag.
    ///
    /// | saw messages | prior flag | delay | new flag |
    /// |---|---|---|---|
    /// | yes | any | short | false |
    /// | no | false | short | true |
    /// | no | true | long | true |
    pub fn next_delay(&self, saw_messages: bool, prior_flag: bool) -> (Duration, bool) {
        match (saw_messages, prior_flag) {
            (true, _) => (self.short, false),
            (false, false) => (self.short, true),
            (false, true) => (self.long, true),
        }
    }
}

/// Per-worker backoff state, mutated only by its worker after each poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffState {
    no_messages: bool,
    delay: Duration,
}

impl BackoffState {
    /// Starting state: no empty poll seen yet, short delay.
    pub fn new(policy: &BackoffPolicy) -> Self {
        Self {
            no_messages: false,
            delay: policy.short,
        }
    }

    /// Folds one poll result into the state and returns the delay to take.
    pub fn observe(&mut self, policy: &BackoffPolicy, saw_messages: bool) -> Duration {
        let (delay, flag) = policy.next_delay(saw_messages, self.no_messages);
        self.no_messages = flag;
        self.delay = delay;
        delay
    }

    /// Delay for a poll that failed: short, with the flag left untouched.
    pub fn on_error(&mut self, policy: &BackoffPolicy) -> Duration {
        self.delay = policy.short;
        self.delay
    }

    /// Whether the last poll came back empty.
    pub fn no_messages(&self) -> bool {
        self.no_messages
    }

    /// The delay chosen after the last poll.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}
