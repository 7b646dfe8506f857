//! Worker resource construction.
//!
//! The supervisor never builds adapters itself; it asks a `WorkerFactory`
//! for a fresh set every time a worker (re)starts.

use async_trait::async_trait;
use tracing::{info, warn};

use super::worker::WorkerResources;
use super::WorkerId;
use crate::cache::RedisResultCache;
use crate::classifier::HttpClassifier;
use crate::config::RelayConfig;
use crate::error::WorkerError;
use crate::queue::RedisMessageQueue;

/// Builds the adapters owned by one worker.
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    /// Connects the queue, cache and classifier for `worker_id`.
    ///
    /// # Errors
    ///
    /// Returns a `WorkerError` naming the adapter that failed.
    async fn connect(&self, worker_id: WorkerId) -> Result<WorkerResources, WorkerError>;
}

/// Builds Redis-backed queue and cache adapters with an HTTP classifier.
#[derive(Debug, Clone)]
pub struct RedisWorkerFactory {
    config: RelayConfig,
}

impl RedisWorkerFactory {
    /// Creates a factory from the relay configuration.
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl WorkerFactory for RedisWorkerFactory {
    async fn connect(&self, worker_id: WorkerId) -> Result<WorkerResources, WorkerError> {
        let queue = RedisMessageQueue::connect(
            &self.config.redis_url,
            &self.config.queue_name,
            worker_id,
        )
        .await
        .map_err(|source| WorkerError::QueueConnect { worker_id, source })?;

        // A previous incarnation of this worker may have died holding messages.
        match queue.recover_in_flight().await {
            Ok(0) => {}
            Ok(recovered) => {
                info!(worker_id, recovered, "Recovered in-flight messages");
            }
            Err(e) => {
                warn!(worker_id, error = %e, "Failed to recover in-flight messages");
            }
        }

        let cache = RedisResultCache::connect(&self.config.cache_url, self.config.cache_ttl)
            .await
            .map_err(|source| WorkerError::CacheConnect { worker_id, source })?;

        let classifier =
            HttpClassifier::new(self.config.classifier_url.clone(), self.config.classify_timeout)
                .map_err(|source| WorkerError::ClassifierInit { worker_id, source })?;

        Ok(WorkerResources {
            queue: Box::new(queue),
            classifier: Box::new(classifier),
            cache: Box::new(cache),
        })
    }
}
