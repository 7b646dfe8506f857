//! Error types for classifier-relay operations.
//!
//! Defines the error taxonomy for the external collaborators a worker talks to:
//! - Work queue receive / delete / refresh
//! - Classification requests
//! - Result cache writes
//! - Worker startup (connecting the three adapters)
//!
//! None of these terminate the process. Queue, classifier and cache errors are
//! handled per message or per poll; a `WorkerError` ends one worker, which the
//! supervisor replaces.

use std::any::Any;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to the work queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to open or re-open the broker connection.
    #[error("Queue connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// The message has already been deleted or was never in flight.
    #[error("Message not in flight: {0}")]
    NotInFlight(String),

    /// Operation timed out.
    #[error("Queue operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors that can occur while classifying a payload.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// HTTP request to the classifier failed.
    #[error("Classifier request failed: {0}")]
    RequestFailed(String),

    /// The classifier answered with a non-success status.
    #[error("Classifier error ({code}): {message}")]
    Status { code: u16, message: String },

    /// Failed to parse the classifier response.
    #[error("Failed to parse classifier response: {0}")]
    ParseError(String),

    /// The classifier returned no prediction at all.
    #[error("Classifier returned no predictions")]
    NoPrediction,

    /// Confidence outside [0, 1] or not a number.
    #[error("Invalid confidence {confidence} for label '{label}'")]
    InvalidConfidence { label: String, confidence: f64 },

    /// The classification did not finish in time.
    #[error("Classification timed out after {0:?}")]
    Timeout(Duration),

    /// The classification input could not be extracted from the message body.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The classifier panicked while handling the payload.
    #[error("Classifier panicked: {0}")]
    Panicked(String),
}

/// Errors that can occur while writing to the result cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Failed to connect to the cache.
    #[error("Cache connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Errors that end a single worker's execution.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The queue handle could not be acquired.
    #[error("Worker {worker_id} could not connect to the queue: {source}")]
    QueueConnect {
        worker_id: usize,
        #[source]
        source: QueueError,
    },

    /// The result cache could not be reached.
    #[error("Worker {worker_id} could not connect to the cache: {source}")]
    CacheConnect {
        worker_id: usize,
        #[source]
        source: CacheError,
    },

    /// The classifier could not be constructed.
    #[error("Worker {worker_id} could not build its classifier: {source}")]
    ClassifierInit {
        worker_id: usize,
        #[source]
        source: ClassifyError,
    },
}

/// Extracts the message of a panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
