//! classifier-relay: supervised worker pool that drains a work queue through
//! a classifier into a key/value result cache.
//!
//! Each message is classified once, its result (a label or a sentinel) is
//! written under the content hash of the input, and the message is deleted
//! whatever happened along the way. A supervisor keeps a fixed number of
//! workers alive and replaces any that die.

// Core modules
pub mod cache;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod scheduler;

// Re-export commonly used types
pub use config::{ConfigError, RelayConfig};
pub use error::{CacheError, ClassifyError, QueueError, WorkerError};
pub use pipeline::{CacheKey, CacheValue, MessageProcessor, BELOW_THRESHOLD, PREDICTION_ERROR};
pub use scheduler::{Supervisor, Worker, WorkerFactory};
