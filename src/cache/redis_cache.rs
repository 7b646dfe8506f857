use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::ResultCache;
use crate::error::CacheError;

/// Redis `SET`-based result cache.
pub struct RedisResultCache {
    redis: ConnectionManager,
    ttl: Option<Duration>,
}

impl RedisResultCache {
    /// Connects to the cache.
    ///
    /// Entries expire after `ttl` when set; otherwise they persist until
    /// overwritten or evicted by the server.
    pub async fn connect(cache_url: &str, ttl: Option<Duration>) -> Result<Self, CacheError> {
        let client = redis::Client::open(cache_url)
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?;

        Ok(Self { redis, ttl })
    }

    /// Returns the configured entry expiry.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }
}

#[async_trait]
impl ResultCache for RedisResultCache {
    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = self.ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        cmd.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}
