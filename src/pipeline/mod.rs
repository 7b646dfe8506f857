//! Message-processing pipeline.
//!
//! For each received message, in order:
//!
//! 1. derive the cache key from a SHA-256 digest of the classification input
//! 2. classify the input
//! 3. decide the cache value: the label when `confidence > min_probability`,
//!    otherwise `"prediction below threshold"`; any classifier failure gives
//!    `"prediction error"`
//! 4. write the value to the cache, overwriting any earlier value
//! 5. delete the message from the queue, whatever happened in 2–4
//!
//! ```rust,ignore
//! use classifier_relay::pipeline::MessageProcessor;
//!
//! let processor = MessageProcessor::new(0.5);
//! let outcome = processor.process(&message, &classifier, &cache, &queue).await;
//! assert!(outcome.is_deleted());
//! ```

pub mod decision;
pub mod key;
pub mod payload;
pub mod processor;

pub use decision::{CacheValue, BELOW_THRESHOLD, PREDICTION_ERROR};
pub use key::CacheKey;
pub use payload::PayloadSource;
pub use processor::{MessageOutcome, MessageProcessor};
