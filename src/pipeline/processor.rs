//! Per-message processing: key, classify, decide, write, delete.

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{debug, error, warn};

use super::decision::CacheValue;
use super::key::CacheKey;
use super::payload::PayloadSource;
use crate::cache::ResultCache;
use crate::classifier::{Classification, Classifier};
use crate::config::RelayConfig;
use crate::error::{panic_message, CacheError, ClassifyError, QueueError};
use crate::metrics::MetricsCollector;
use crate::queue::{Message, MessageQueue};

/// Result of every step applied to one message.
#[derive(Debug)]
pub struct MessageOutcome {
    /// Cache key derived from the classification input.
    pub key: CacheKey,
    /// Value written (or attempted) under `key`.
    pub value: CacheValue,
    /// What the classifier returned.
    pub classification: Result<Classification, ClassifyError>,
    /// Outcome of the cache write.
    pub cache_write: Result<(), CacheError>,
    /// Outcome of the queue delete.
    pub delete: Result<(), QueueError>,
}

impl MessageOutcome {
    /// Whether the value reached the cache.
    pub fn is_recorded(&self) -> bool {
        self.cache_write.is_ok()
    }

    /// Whether the message was removed from the queue.
    pub fn is_deleted(&self) -> bool {
        self.delete.is_ok()
    }
}

/// Applies the processing pipeline to individual messages.
///
/// Every message is deleted exactly once after its cache write was
/// attempted, whatever the classifier or the cache did. A failed cache write
/// loses that result; the message is not retried.
#[derive(Debug, Clone)]
pub struct MessageProcessor {
    min_probability: f64,
    key_prefix: Option<String>,
    payload_source: PayloadSource,
    classify_timeout: Option<Duration>,
    metrics: MetricsCollector,
}

impl MessageProcessor {
    /// Creates a processor with the given confidence threshold.
    pub fn new(min_probability: f64) -> Self {
        Self {
            min_probability,
            key_prefix: None,
            payload_source: PayloadSource::Raw,
            classify_timeout: None,
            metrics: MetricsCollector::new(),
        }
    }

    /// Creates a processor from the relay configuration.
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            min_probability: config.min_probability,
            key_prefix: config.key_prefix.clone(),
            payload_source: config.payload_source.clone(),
            classify_timeout: config.classify_timeout,
            metrics: MetricsCollector::new(),
        }
    }

    /// Namespaces cache keys under `prefix`.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Reads the classification input from `source`.
    pub fn with_payload_source(mut self, source: PayloadSource) -> Self {
        self.payload_source = source;
        self
    }

    /// Bounds each classification call.
    pub fn with_classify_timeout(mut self, timeout: Duration) -> Self {
        self.classify_timeout = Some(timeout);
        self
    }

    /// Returns the confidence threshold.
    pub fn min_probability(&self) -> f64 {
        self.min_probability
    }

    /// Processes one message.
    pub async fn process(
        &self,
        message: &Message,
        classifier: &dyn Classifier,
        cache: &dyn ResultCache,
        queue: &dyn MessageQueue,
    ) -> MessageOutcome {
        let prefix = self.key_prefix.as_deref();

        let (key, classification) = match self.payload_source.extract(message.payload()) {
            Ok(input) => {
                let key = CacheKey::derive(prefix, &input);
                let classification = self.classify(classifier, &input).await;
                (key, classification)
            }
            // Unreadable bodies are keyed by the raw body.
            Err(e) => (CacheKey::derive(prefix, message.payload()), Err(e)),
        };

        match &classification {
            Ok(c) => debug!(
                key = %key,
                label = %c.label,
                confidence = c.confidence,
                "Classified message"
            ),
            Err(e) => warn!(key = %key, error = %e, "Classification failed"),
        }

        let value = CacheValue::decide(&classification, self.min_probability);

        let cache_write = cache.set(key.as_str(), value.as_str()).await;
        match &cache_write {
            Ok(()) => debug!(key = %key, value = %value, "Wrote result to cache"),
            Err(e) => {
                self.metrics.record_cache_failure();
                error!(key = %key, error = %e, "Failed to write result to cache, result dropped");
            }
        }

        let delete = queue.delete(message).await;
        if let Err(e) = &delete {
            self.metrics.record_delete_failure();
            warn!(key = %key, error = %e, "Failed to delete message");
        }

        self.metrics.record_message(value.outcome());

        MessageOutcome {
            key,
            value,
            classification,
            cache_write,
            delete,
        }
    }

    async fn classify(
        &self,
        classifier: &dyn Classifier,
        input: &[u8],
    ) -> Result<Classification, ClassifyError> {
        let started = Instant::now();

        // A panicking classifier is a classification failure, not a worker crash.
        let guarded = AssertUnwindSafe(classifier.classify(input))
            .catch_unwind()
            .map(|attempt| {
                attempt.unwrap_or_else(|panic| {
                    let message = panic_message(panic.as_ref());
                    error!(panic = %message, "Classifier panicked");
                    Err(ClassifyError::Panicked(message))
                })
            });

        let result = match self.classify_timeout {
            Some(limit) => tokio::time::timeout(limit, guarded)
                .await
                .unwrap_or(Err(ClassifyError::Timeout(limit))),
            None => guarded.await,
        };

        self.metrics
            .record_classify_latency(started.elapsed().as_secs_f64());
        result
    }
}
