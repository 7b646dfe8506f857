//! Metrics module for Prometheus-based monitoring.
//!
//! Counts polls, processed messages by outcome, lost results, failed deletes,
//! queue refreshes and worker replacements, and tracks classification latency
//! and the number of live workers.
//!
//! # Example
//!
//! ```ignore
//! use classifier_relay::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_message("below_threshold");
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{MetricsCollector, PollResult};
pub use prometheus::{export_metrics, init_metrics, write_textfile};

pub use prometheus::{
    CACHE_WRITE_FAILURES, CLASSIFY_LATENCY, DELETE_FAILURES, LIVE_WORKERS, MESSAGES_RECEIVED,
    MESSAGES_TOTAL, POLLS_TOTAL, QUEUE_REFRESHES, REGISTRY, WORKER_RESTARTS,
};
