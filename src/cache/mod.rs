//! Result cache adapter.
//!
//! Results are written with plain overwrite semantics: one key per payload
//! hash, last write wins, nothing is ever read back by the relay.

mod redis_cache;

use async_trait::async_trait;

use crate::error::CacheError;

pub use redis_cache::RedisResultCache;

/// Key/value store receiving classification outcomes.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;
}
