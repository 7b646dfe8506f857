//! Relay configuration.
//!
//! Every setting a worker or the supervisor needs is injected through
//! [`RelayConfig`]: broker and cache endpoints, the confidence threshold,
//! pool size, poll cadence and backoff durations. Values come from defaults,
//! `RELAY_*` environment variables, or CLI flags.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::pipeline::PayloadSource;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the relay: adapters, worker loop and supervisor.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    // Queue settings
    /// Redis URL of the work queue broker.
    pub redis_url: String,
    /// Name of the work queue.
    pub queue_name: String,

    // Cache settings
    /// Redis URL of the result cache.
    pub cache_url: String,
    /// Expiry for cache entries. `None` keeps entries until evicted.
    pub cache_ttl: Option<Duration>,
    /// Optional namespace prepended to every cache key.
    pub key_prefix: Option<String>,

    // Classifier settings
    /// Classification endpoint.
    pub classifier_url: String,
    /// Upper bound for one classification call. `None` waits indefinitely.
    pub classify_timeout: Option<Duration>,
    /// Minimum confidence (exclusive) for a label to be cached.
    pub min_probability: f64,
    /// Where the classification input is taken from in the message body.
    pub payload_source: PayloadSource,

    // Worker settings
    /// Number of workers in the pool.
    pub worker_count: usize,
    /// Maximum messages requested per poll.
    pub batch_size: usize,
    /// Bounded wait of one poll.
    pub wait: Duration,
    /// Re-acquire the queue handle after this many polls.
    pub refresh_every: u32,
    /// Delay after a first empty poll, or after a non-empty poll.
    pub short_backoff: Duration,
    /// Delay once the queue has looked empty for consecutive polls.
    pub long_backoff: Duration,

    // Supervisor settings
    /// Interval between liveness checks.
    pub liveness_interval: Duration,
    /// How long shutdown waits for workers to stop.
    pub shutdown_timeout: Duration,
    /// Prometheus textfile written on every liveness check.
    pub metrics_file: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            queue_name: "classify".to_string(),

            cache_url: "redis://127.0.0.1:6379".to_string(),
            cache_ttl: None,
            key_prefix: None,

            classifier_url: "http://127.0.0.1:8501/classify".to_string(),
            classify_timeout: None,
            min_probability: 0.5,
            payload_source: PayloadSource::Raw,

            worker_count: 8,
            batch_size: 10,
            wait: Duration::from_secs(20),
            refresh_every: 20,
            short_backoff: Duration::from_secs(1),
            long_backoff: Duration::from_secs(900), // 15 minutes

            liveness_interval: Duration::from_secs(300), // 5 minutes
            shutdown_timeout: Duration::from_secs(60),
            metrics_file: None,
        }
    }
}

impl RelayConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the queue broker URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Sets the queue name.
    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Sets the cache URL.
    pub fn with_cache_url(mut self, url: impl Into<String>) -> Self {
        self.cache_url = url.into();
        self
    }

    /// Sets the cache entry expiry.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Sets the cache key namespace.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Sets the classifier endpoint.
    pub fn with_classifier_url(mut self, url: impl Into<String>) -> Self {
        self.classifier_url = url.into();
        self
    }

    /// Bounds every classification call.
    pub fn with_classify_timeout(mut self, timeout: Duration) -> Self {
        self.classify_timeout = Some(timeout);
        self
    }

    /// Sets the confidence threshold.
    pub fn with_min_probability(mut self, min_probability: f64) -> Self {
        self.min_probability = min_probability;
        self
    }

    /// Sets where the classification input is read from.
    pub fn with_payload_source(mut self, source: PayloadSource) -> Self {
        self.payload_source = source;
        self
    }

    /// Sets the number of workers.
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Sets the poll batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the bounded wait of a poll.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Sets the queue handle refresh cadence, in polls.
    pub fn with_refresh_every(mut self, polls: u32) -> Self {
        self.refresh_every = polls;
        self
    }

    /// Sets the short and long backoff delays.
    pub fn with_backoff(mut self, short: Duration, long: Duration) -> Self {
        self.short_backoff = short;
        self.long_backoff = long;
        self
    }

    /// Sets the supervisor liveness interval.
    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the metrics textfile path.
    pub fn with_metrics_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.metrics_file = Some(path.into());
        self
    }

    /// Creates configuration from environment variables on top of the defaults.
    ///
    /// # Environment Variables
    ///
    /// - `RELAY_REDIS_URL`: queue broker URL (default: redis://127.0.0.1:6379)
    /// - `RELAY_QUEUE_NAME`: queue name (default: classify)
    /// - `RELAY_CACHE_URL`: cache URL (default: the broker URL)
    /// - `RELAY_CACHE_TTL_SECS`: cache entry expiry (default: none)
    /// - `RELAY_KEY_PREFIX`: cache key namespace (default: none)
    /// - `RELAY_CLASSIFIER_URL`: classifier endpoint
    /// - `RELAY_CLASSIFY_TIMEOUT_SECS`: classification timeout (default: none)
    /// - `RELAY_MIN_PROBABILITY`: confidence threshold (default: 0.5)
    /// - `RELAY_PAYLOAD_FIELD`: JSON field holding the classification input
    /// - `RELAY_WORKERS`: worker count (default: 8)
    /// - `RELAY_BATCH_SIZE`: messages per poll (default: 10)
    /// - `RELAY_WAIT_SECS`: poll wait (default: 20)
    /// - `RELAY_REFRESH_EVERY`: polls between queue refreshes (default: 20)
    /// - `RELAY_SHORT_BACKOFF_SECS`: short backoff (default: 1)
    /// - `RELAY_LONG_BACKOFF_SECS`: long backoff (default: 900)
    /// - `RELAY_LIVENESS_SECS`: liveness interval (default: 300)
    /// - `RELAY_SHUTDOWN_TIMEOUT_SECS`: shutdown timeout (default: 60)
    /// - `RELAY_METRICS_FILE`: Prometheus textfile path (default: none)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable cannot be parsed or the resulting
    /// configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("RELAY_REDIS_URL") {
            config.cache_url = val.clone();
            config.redis_url = val;
        }
        if let Ok(val) = std::env::var("RELAY_QUEUE_NAME") {
            config.queue_name = val;
        }

        if let Ok(val) = std::env::var("RELAY_CACHE_URL") {
            config.cache_url = val;
        }
        if let Ok(val) = std::env::var("RELAY_CACHE_TTL_SECS") {
            let secs: u64 = parse_env_value(&val, "RELAY_CACHE_TTL_SECS")?;
            config.cache_ttl = Some(Duration::from_secs(secs));
        }
        if let Ok(val) = std::env::var("RELAY_KEY_PREFIX") {
            config.key_prefix = Some(val);
        }

        if let Ok(val) = std::env::var("RELAY_CLASSIFIER_URL") {
            config.classifier_url = val;
        }
        if let Ok(val) = std::env::var("RELAY_CLASSIFY_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "RELAY_CLASSIFY_TIMEOUT_SECS")?;
            config.classify_timeout = Some(Duration::from_secs(secs));
        }
        if let Ok(val) = std::env::var("RELAY_MIN_PROBABILITY") {
            config.min_probability = parse_env_value(&val, "RELAY_MIN_PROBABILITY")?;
        }
        if let Ok(val) = std::env::var("RELAY_PAYLOAD_FIELD") {
            config.payload_source = PayloadSource::JsonField(val);
        }

        if let Ok(val) = std::env::var("RELAY_WORKERS") {
            config.worker_count = parse_env_value(&val, "RELAY_WORKERS")?;
        }
        if let Ok(val) = std::env::var("RELAY_BATCH_SIZE") {
            config.batch_size = parse_env_value(&val, "RELAY_BATCH_SIZE")?;
        }
        if let Ok(val) = std::env::var("RELAY_WAIT_SECS") {
            config.wait = Duration::from_secs(parse_env_value(&val, "RELAY_WAIT_SECS")?);
        }
        if let Ok(val) = std::env::var("RELAY_REFRESH_EVERY") {
            config.refresh_every = parse_env_value(&val, "RELAY_REFRESH_EVERY")?;
        }
        if let Ok(val) = std::env::var("RELAY_SHORT_BACKOFF_SECS") {
            config.short_backoff =
                Duration::from_secs(parse_env_value(&val, "RELAY_SHORT_BACKOFF_SECS")?);
        }
        if let Ok(val) = std::env::var("RELAY_LONG_BACKOFF_SECS") {
            config.long_backoff =
                Duration::from_secs(parse_env_value(&val, "RELAY_LONG_BACKOFF_SECS")?);
        }

        if let Ok(val) = std::env::var("RELAY_LIVENESS_SECS") {
            config.liveness_interval =
                Duration::from_secs(parse_env_value(&val, "RELAY_LIVENESS_SECS")?);
        }
        if let Ok(val) = std::env::var("RELAY_SHUTDOWN_TIMEOUT_SECS") {
            config.shutdown_timeout =
                Duration::from_secs(parse_env_value(&val, "RELAY_SHUTDOWN_TIMEOUT_SECS")?);
        }
        if let Ok(val) = std::env::var("RELAY_METRICS_FILE") {
            config.metrics_file = Some(PathBuf::from(val));
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_name.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "queue_name cannot be empty".to_string(),
            ));
        }

        if self.redis_url.is_empty() || self.cache_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "queue and cache URLs cannot be empty".to_string(),
            ));
        }

        if self.classifier_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "classifier_url cannot be empty".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.min_probability) {
            return Err(ConfigError::ValidationFailed(format!(
                "min_probability must be between 0.0 and 1.0, got {}",
                self.min_probability
            )));
        }

        if let PayloadSource::JsonField(field) = &self.payload_source {
            if field.is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "payload field name cannot be empty".to_string(),
                ));
            }
        }

        if self.worker_count == 0 {
            return Err(ConfigError::ValidationFailed(
                "worker_count must be greater than 0".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        if self.refresh_every == 0 {
            return Err(ConfigError::ValidationFailed(
                "refresh_every must be greater than 0".to_string(),
            ));
        }

        if self.long_backoff < self.short_backoff {
            return Err(ConfigError::ValidationFailed(format!(
                "long_backoff ({:?}) must not be shorter than short_backoff ({:?})",
                self.long_backoff, self.short_backoff
            )));
        }

        if self.liveness_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "liveness_interval must be greater than 0".to_string(),
            ));
        }

        if matches!(self.classify_timeout, Some(t) if t.is_zero()) {
            return Err(ConfigError::ValidationFailed(
                "classify_timeout must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parses an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
