//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by classifier-relay and
//! provides functions for initializing, registering, and exporting them.

use std::path::Path;
use std::sync::{Mutex, OnceLock};

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

/// Global Prometheus registry for all relay metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Messages processed, labeled by cache outcome (label, below_threshold, prediction_error).
pub static MESSAGES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Polls issued, labeled by result (messages, empty, error).
pub static POLLS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Messages received from the queue.
pub static MESSAGES_RECEIVED: OnceLock<Counter> = OnceLock::new();

/// Cache writes that failed; each is a lost result.
pub static CACHE_WRITE_FAILURES: OnceLock<Counter> = OnceLock::new();

/// Queue deletes that failed.
pub static DELETE_FAILURES: OnceLock<Counter> = OnceLock::new();

/// Queue handle refreshes, labeled by status (ok, error).
pub static QUEUE_REFRESHES: OnceLock<CounterVec> = OnceLock::new();

/// Worker replacements, labeled by worker id.
pub static WORKER_RESTARTS: OnceLock<CounterVec> = OnceLock::new();

/// Workers currently running.
pub static LIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Classification latency in seconds.
pub static CLASSIFY_LATENCY: OnceLock<Histogram> = OnceLock::new();

/// Serializes initialization so every metric lands in the same registry.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Calling it again is harmless: the first set of
/// metrics stays in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    // Pipeline metrics
    let messages_total = CounterVec::new(
        Opts::new("relay_messages_total", "Messages processed by cache outcome"),
        &["outcome"],
    )?;

    let messages_received = Counter::new(
        "relay_messages_received_total",
        "Messages received from the queue",
    )?;

    let cache_write_failures = Counter::new(
        "relay_cache_write_failures_total",
        "Cache writes that failed (results lost)",
    )?;

    let delete_failures = Counter::new(
        "relay_delete_failures_total",
        "Queue deletes that failed",
    )?;

    let classify_latency = Histogram::with_opts(
        HistogramOpts::new(
            "relay_classify_latency_seconds",
            "Classification latency in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )?;

    // Queue metrics
    let polls_total = CounterVec::new(
        Opts::new("relay_polls_total", "Queue polls by result"),
        &["result"],
    )?;

    let queue_refreshes = CounterVec::new(
        Opts::new("relay_queue_refreshes_total", "Queue handle refreshes"),
        &["status"],
    )?;

    // Supervisor metrics
    let worker_restarts = CounterVec::new(
        Opts::new("relay_worker_restarts_total", "Dead workers replaced"),
        &["worker"],
    )?;

    let live_workers = Gauge::new("relay_live_workers", "Workers currently running")?;

    registry.register(Box::new(messages_total.clone()))?;
    registry.register(Box::new(messages_received.clone()))?;
    registry.register(Box::new(cache_write_failures.clone()))?;
    registry.register(Box::new(delete_failures.clone()))?;
    registry.register(Box::new(classify_latency.clone()))?;
    registry.register(Box::new(polls_total.clone()))?;
    registry.register(Box::new(queue_refreshes.clone()))?;
    registry.register(Box::new(worker_restarts.clone()))?;
    registry.register(Box::new(live_workers.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = MESSAGES_TOTAL.set(messages_total);
    let _ = MESSAGES_RECEIVED.set(messages_received);
    let _ = CACHE_WRITE_FAILURES.set(cache_write_failures);
    let _ = DELETE_FAILURES.set(delete_failures);
    let _ = CLASSIFY_LATENCY.set(classify_latency);
    let _ = POLLS_TOTAL.set(polls_total);
    let _ = QUEUE_REFRESHES.set(queue_refreshes);
    let _ = WORKER_RESTARTS.set(worker_restarts);
    let _ = LIVE_WORKERS.set(live_workers);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// Writes the current metrics to `path` for a node-exporter textfile collector.
///
/// The file is written next to its destination and renamed into place so
/// scrapers never read a partial file.
pub async fn write_textfile(path: &Path) -> std::io::Result<()> {
    let tmp = path.with_extension("prom.tmp");
    tokio::fs::write(&tmp, export_metrics()).await?;
    tokio::fs::rename(&tmp, path).await
}
