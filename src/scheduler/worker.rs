//! A single queue worker.
//!
//! Each worker owns one queue handle, one classifier and one cache client,
//! and loops through
//!
//! ```text
//! CONNECTING → POLLING → PROCESSING(batch) → BACKOFF → POLLING → …
//! ```
//!
//! until its cancellation token fires. Messages of a batch are processed one
//! after the other. The only places a worker waits are the bounded receive
//! and the backoff pause, and both give way to cancellation.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::{BackoffPolicy, BackoffState};
use super::WorkerId;
use crate::cache::ResultCache;
use crate::classifier::Classifier;
use crate::config::RelayConfig;
use crate::error::QueueError;
use crate::metrics::{MetricsCollector, PollResult};
use crate::pipeline::{MessageOutcome, MessageProcessor};
use crate::queue::{Message, MessageQueue};

/// The adapters a worker owns exclusively.
pub struct WorkerResources {
    /// Queue handle, re-acquired every `refresh_every` polls.
    pub queue: Box<dyn MessageQueue>,
    /// Classifier, built once per worker lifetime.
    pub classifier: Box<dyn Classifier>,
    /// Result cache client.
    pub cache: Box<dyn ResultCache>,
}

/// Poll loop parameters.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Maximum messages requested per poll.
    pub batch_size: usize,
    /// Bounded wait of one poll.
    pub wait: Duration,
    /// Re-acquire the queue handle after this many polls.
    pub refresh_every: u32,
    /// Empty-queue backoff delays.
    pub backoff: BackoffPolicy,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            wait: Duration::from_secs(20),
            refresh_every: 20,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl WorkerSettings {
    /// Builds the settings from the relay configuration.
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            wait: config.wait,
            refresh_every: config.refresh_every.max(1),
            backoff: BackoffPolicy::new(config.short_backoff, config.long_backoff),
        }
    }
}

/// Where a worker is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Acquiring the queue handle and building the classifier.
    Connecting,
    /// Waiting on the queue for a batch.
    Polling,
    /// Working through a received batch.
    Processing { batch: usize },
    /// Pausing before the next poll.
    Backoff { delay: Duration },
    /// Cancelled; the loop has exited.
    Stopped,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Polling => write!(f, "polling"),
            Self::Processing { batch } => write!(f, "processing({})", batch),
            Self::Backoff { delay } => write!(f, "backoff({:?})", delay),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// What one poll cycle did.
#[derive(Debug)]
pub struct PollReport {
    /// Whether the queue handle was re-acquired before this poll.
    pub refreshed: bool,
    /// Messages received.
    pub received: usize,
    /// Per-message results, in processing order.
    pub outcomes: Vec<MessageOutcome>,
    /// The receive error, if the poll failed.
    pub error: Option<QueueError>,
    /// Pause to take before the next poll.
    pub delay: Duration,
}

/// A single worker that drains the queue through the processing pipeline.
pub struct Worker {
    /// Stable id within the pool.
    id: WorkerId,
    settings: WorkerSettings,
    processor: MessageProcessor,
    resources: WorkerResources,
    backoff: BackoffState,
    /// Polls since the queue handle was last acquired.
    polls_since_refresh: u32,
    state: WorkerState,
    metrics: MetricsCollector,
}

impl Worker {
    /// Creates a connected worker.
    pub fn new(
        id: WorkerId,
        settings: WorkerSettings,
        processor: MessageProcessor,
        resources: WorkerResources,
    ) -> Self {
        let backoff = BackoffState::new(&settings.backoff);
        Self {
            id,
            settings,
            processor,
            resources,
            backoff,
            polls_since_refresh: 0,
            state: WorkerState::Connecting,
            metrics: MetricsCollector::new(),
        }
    }

    /// Returns the worker's id.
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Returns the worker's current state.
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Returns the worker's backoff state.
    pub fn backoff(&self) -> &BackoffState {
        &self.backoff
    }

    /// Main worker loop.
    ///
    /// Polls, processes and backs off until `cancel` fires. Nothing else
    /// ends the loop: receive failures, classifier errors and cache errors
    /// are all absorbed.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(worker_id = self.id, "Worker started");

        while let Some(report) = self.poll_cycle(&cancel).await {
            self.set_state(WorkerState::Backoff {
                delay: report.delay,
            });
            if !pause(report.delay, &cancel).await {
                break;
            }
        }

        self.set_state(WorkerState::Stopped);
        info!(worker_id = self.id, "Worker stopped");
    }

    /// Runs one POLLING → PROCESSING step and decides the next delay.
    ///
    /// Returns `None` when cancelled before or during the receive.
    pub async fn poll_cycle(&mut self, cancel: &CancellationToken) -> Option<PollReport> {
        if cancel.is_cancelled() {
            return None;
        }

        let refreshed = self.refresh_if_due().await;

        self.set_state(WorkerState::Polling);
        let received = tokio::select! {
            _ = cancel.cancelled() => return None,
            result = self
                .resources
                .queue
                .receive_batch(self.settings.batch_size, self.settings.wait) => result,
        };
        self.polls_since_refresh += 1;

        match received {
            Ok(batch) => {
                let received = batch.len();
                self.metrics.record_poll(if received == 0 {
                    PollResult::Empty
                } else {
                    PollResult::Messages(received)
                });

                let outcomes = self.process_batch(batch, cancel).await;
                let delay = self.backoff.observe(&self.settings.backoff, received > 0);

                if received == 0 {
                    debug!(worker_id = self.id, delay = ?delay, "No messages available");
                }

                Some(PollReport {
                    refreshed,
                    received,
                    outcomes,
                    error: None,
                    delay,
                })
            }
            Err(e) => {
                self.metrics.record_poll(PollResult::Error);
                warn!(worker_id = self.id, error = %e, "Failed to receive messages");
                let delay = self.backoff.on_error(&self.settings.backoff);

                Some(PollReport {
                    refreshed,
                    received: 0,
                    outcomes: Vec::new(),
                    error: Some(e),
                    delay,
                })
            }
        }
    }

    /// Processes a batch in order.
    ///
    /// On cancellation the message in hand is finished; the rest stay
    /// undeleted and are redelivered by the queue.
    async fn process_batch(
        &mut self,
        batch: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Vec<MessageOutcome> {
        if batch.is_empty() {
            return Vec::new();
        }

        self.set_state(WorkerState::Processing { batch: batch.len() });

        let mut outcomes = Vec::with_capacity(batch.len());
        for message in &batch {
            if cancel.is_cancelled() {
                info!(
                    worker_id = self.id,
                    remaining = batch.len() - outcomes.len(),
                    "Cancelled mid-batch, leaving remaining messages undeleted"
                );
                break;
            }

            let outcome = self
                .processor
                .process(
                    message,
                    self.resources.classifier.as_ref(),
                    self.resources.cache.as_ref(),
                    self.resources.queue.as_ref(),
                )
                .await;

            debug!(
                worker_id = self.id,
                key = %outcome.key,
                value = %outcome.value,
                "Processed message"
            );
            outcomes.push(outcome);
        }

        outcomes
    }

    /// Re-acquires the queue handle once `refresh_every` polls have passed.
    async fn refresh_if_due(&mut self) -> bool {
        if self.polls_since_refresh < self.settings.refresh_every {
            return false;
        }
        self.polls_since_refresh = 0;

        match self.resources.queue.refresh().await {
            Ok(()) => {
                self.metrics.record_refresh(true);
                debug!(worker_id = self.id, "Refreshed queue handle");
                true
            }
            Err(e) => {
                self.metrics.record_refresh(false);
                warn!(
                    worker_id = self.id,
                    error = %e,
                    "Failed to refresh queue handle, keeping the current one"
                );
                false
            }
        }
    }

    fn set_state(&mut self, state: WorkerState) {
        if self.state != state {
            tracing::trace!(worker_id = self.id, from = %self.state, to = %state, "Worker state");
            self.state = state;
        }
    }
}

/// Sleeps for `delay` unless cancelled first. Returns `false` on cancellation.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        tokio::task::yield_now().await;
        return !cancel.is_cancelled();
    }

    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
