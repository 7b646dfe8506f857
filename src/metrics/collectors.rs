//! High-level metric recording for relay operations.
//!
//! `MetricsCollector` wraps the raw Prometheus statics with one method per
//! event. Every method is a no-op until `init_metrics()` has run, so library
//! code and tests can record freely.

use super::prometheus::{
    CACHE_WRITE_FAILURES, CLASSIFY_LATENCY, DELETE_FAILURES, LIVE_WORKERS, MESSAGES_RECEIVED,
    MESSAGES_TOTAL, POLLS_TOTAL, QUEUE_REFRESHES, WORKER_RESTARTS,
};

/// Result of a single queue poll, as recorded in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// At least one message was received.
    Messages(usize),
    /// The wait elapsed with nothing to receive.
    Empty,
    /// The receive call failed.
    Error,
}

impl PollResult {
    fn label(&self) -> &'static str {
        match self {
            Self::Messages(_) => "messages",
            Self::Empty => "empty",
            Self::Error => "error",
        }
    }
}

/// Metrics collector for recording relay operational metrics.
///
/// # Example
///
/// ```ignore
/// use classifier_relay::metrics::{init_metrics, MetricsCollector, PollResult};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
///
/// collector.record_poll(PollResult::Messages(10));
/// collector.record_message("label");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    pub fn new() -> Self {
        Self
    }

    /// Record one queue poll.
    pub fn record_poll(&self, result: PollResult) {
        if let Some(polls) = POLLS_TOTAL.get() {
            polls.with_label_values(&[result.label()]).inc();
        }

        if let (PollResult::Messages(n), Some(received)) = (result, MESSAGES_RECEIVED.get()) {
            received.inc_by(n as f64);
        }
    }

    /// Record a processed message by its cache outcome.
    pub fn record_message(&self, outcome: &str) {
        if let Some(messages) = MESSAGES_TOTAL.get() {
            messages.with_label_values(&[outcome]).inc();
        }
        tracing::trace!(outcome = outcome, "Recorded message metric");
    }

    /// Record how long a classification took.
    pub fn record_classify_latency(&self, latency_secs: f64) {
        if let Some(latency) = CLASSIFY_LATENCY.get() {
            latency.observe(latency_secs);
        }
    }

    /// Record a failed cache write.
    pub fn record_cache_failure(&self) {
        if let Some(failures) = CACHE_WRITE_FAILURES.get() {
            failures.inc();
        }
    }

    /// Record a failed queue delete.
    pub fn record_delete_failure(&self) {
        if let Some(failures) = DELETE_FAILURES.get() {
            failures.inc();
        }
    }

    /// Record a queue handle refresh.
    pub fn record_refresh(&self, success: bool) {
        if let Some(refreshes) = QUEUE_REFRESHES.get() {
            let status = if success { "ok" } else { "error" };
            refreshes.with_label_values(&[status]).inc();
        }
    }

    /// Record that a dead worker was replaced.
    pub fn record_worker_restart(&self, worker_id: usize) {
        if let Some(restarts) = WORKER_RESTARTS.get() {
            restarts
                .with_label_values(&[worker_id.to_string().as_str()])
                .inc();
        }
    }

    /// Set the number of running workers.
    pub fn set_live_workers(&self, count: usize) {
        if let Some(live) = LIVE_WORKERS.get() {
            live.set(count as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::prometheus::init_metrics;

    #[test]
    fn test_collector_without_init_does_not_panic() {
        let collector = MetricsCollector::new();
        collector.record_poll(PollResult::Empty);
        collector.record_message("label");
        collector.record_classify_latency(0.2);
        collector.record_cache_failure();
        collector.record_delete_failure();
        collector.record_refresh(true);
        collector.record_worker_restart(3);
        collector.set_live_workers(8);
    }

    #[test]
    fn test_record_poll_counts_received_messages() {
        let _ = init_metrics();
        let collector = MetricsCollector::new();

        let before = MESSAGES_RECEIVED.get().map(|c| c.get()).unwrap_or(0.0);
        collector.record_poll(PollResult::Messages(4));
        let after = MESSAGES_RECEIVED.get().map(|c| c.get()).unwrap_or(0.0);

        assert!(after - before >= 4.0);
    }

    #[test]
    fn test_worker_restart_labelled_by_id() {
        let _ = init_metrics();
        let collector = MetricsCollector::new();
        collector.record_worker_restart(42);

        let restarts = WORKER_RESTARTS
            .get()
            .map(|r| r.with_label_values(&["42"]).get())
            .unwrap_or(0.0);
        assert!(restarts >= 1.0);
    }

    #[test]
    fn test_poll_result_labels() {
        assert_eq!(PollResult::Messages(2).label(), "messages");
        assert_eq!(PollResult::Empty.label(), "empty");
        assert_eq!(PollResult::Error.label(), "error");
    }
}
