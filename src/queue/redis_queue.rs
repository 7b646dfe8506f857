//! Redis-backed work queue with per-worker in-flight lists.
//!
//! # Queue Structure
//!
//! - `{queue_name}`: main list; producers `LPUSH`, workers pop from the right
//! - `{queue_name}:inflight:{worker_id}`: messages a worker has received but
//!   not yet deleted
//!
//! Receiving moves elements atomically from the main list into the worker's
//! in-flight list (`BRPOPLPUSH` / `RPOPLPUSH`), so a worker that dies between
//! receive and delete leaves its messages recoverable. Deleting removes the
//! element from the in-flight list.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use super::{Message, MessageQueue};
use crate::error::QueueError;

/// Redis list queue bound to one worker id.
pub struct RedisMessageQueue {
    /// Broker URL, kept so the handle can be re-acquired.
    redis_url: String,
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    /// Name of the main queue.
    queue_name: String,
    /// Name of this worker's in-flight list.
    in_flight: String,
}

impl RedisMessageQueue {
    /// Connects to Redis and binds the queue to `worker_id`.
    ///
    /// Worker ids start at 1. Tooling that only enqueues or inspects the
    /// queue connects with id 0, whose in-flight list is never used.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(
        redis_url: &str,
        queue_name: &str,
        worker_id: usize,
    ) -> Result<Self, QueueError> {
        let redis = open_connection(redis_url).await?;

        Ok(Self {
            redis_url: redis_url.to_string(),
            redis,
            queue_name: queue_name.to_string(),
            in_flight: in_flight_key(queue_name, worker_id),
        })
    }

    /// Enqueues payloads at the head of the main list in a single round trip.
    pub async fn enqueue<P: AsRef<[u8]>>(&self, payloads: &[P]) -> Result<(), QueueError> {
        if payloads.is_empty() {
            return Ok(());
        }

        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        for payload in payloads {
            pipe.lpush(&self.queue_name, payload.as_ref()).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    /// Moves every message left in this worker's in-flight list back onto
    /// the main queue.
    ///
    /// Called when a worker (re)connects. Messages found here were received
    /// by a previous incarnation of the same worker id and never deleted.
    ///
    /// # Returns
    ///
    /// The number of messages handed back.
    pub async fn recover_in_flight(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let mut recovered = 0;

        loop {
            let moved: Option<Vec<u8>> = redis::cmd("RPOPLPUSH")
                .arg(&self.in_flight)
                .arg(&self.queue_name)
                .query_async(&mut conn)
                .await?;

            if moved.is_none() {
                break;
            }
            recovered += 1;
        }

        Ok(recovered)
    }

    /// Returns the number of messages waiting in the main queue.
    pub async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.queue_name).await?;
        Ok(len)
    }

    /// Returns whether the main queue is empty.
    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }

    /// Returns the number of messages in flight for `worker_id`.
    pub async fn in_flight_len_of(&self, worker_id: usize) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn
            .llen(in_flight_key(&self.queue_name, worker_id))
            .await?;
        Ok(len)
    }

    /// Returns queue statistics for a pool of `worker_count` workers.
    pub async fn stats(&self, worker_count: usize) -> Result<QueueStats, QueueError> {
        let pending = self.len().await?;
        let mut in_flight = Vec::with_capacity(worker_count);
        for worker_id in 1..=worker_count {
            in_flight.push((worker_id, self.in_flight_len_of(worker_id).await?));
        }

        Ok(QueueStats {
            queue_name: self.queue_name.clone(),
            pending,
            in_flight,
        })
    }

    /// Returns the queue name.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

#[async_trait]
impl MessageQueue for RedisMessageQueue {
    async fn receive_batch(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<Message>, QueueError> {
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.redis.clone();

        // A zero timeout would make BRPOPLPUSH block forever.
        let first: Option<Vec<u8>> = if wait.is_zero() {
            redis::cmd("RPOPLPUSH")
                .arg(&self.queue_name)
                .arg(&self.in_flight)
                .query_async(&mut conn)
                .await?
        } else {
            redis::cmd("BRPOPLPUSH")
                .arg(&self.queue_name)
                .arg(&self.in_flight)
                .arg(wait.as_secs().max(1))
                .query_async(&mut conn)
                .await?
        };

        let Some(first) = first else {
            return Ok(Vec::new());
        };

        let mut batch = vec![element_to_message(first)];

        if max_messages > 1 {
            let mut pipe = redis::pipe();
            for _ in 1..max_messages {
                pipe.cmd("RPOPLPUSH")
                    .arg(&self.queue_name)
                    .arg(&self.in_flight);
            }
            let rest: Vec<Option<Vec<u8>>> = pipe.query_async(&mut conn).await?;
            batch.extend(rest.into_iter().flatten().map(element_to_message));
        }

        debug!(queue = %self.queue_name, received = batch.len(), "Received batch");
        Ok(batch)
    }

    async fn delete(&self, message: &Message) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let removed: i64 = conn.lrem(&self.in_flight, 1, message.receipt()).await?;

        if removed == 0 {
            return Err(QueueError::NotInFlight(message.body_lossy().into_owned()));
        }
        Ok(())
    }

    async fn refresh(&mut self) -> Result<(), QueueError> {
        self.redis = open_connection(&self.redis_url).await?;
        debug!(queue = %self.queue_name, "Re-acquired queue connection");
        Ok(())
    }
}

/// Statistics about queue state.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStats {
    /// Name of the queue.
    pub queue_name: String,
    /// Messages waiting to be received.
    pub pending: usize,
    /// In-flight message count per worker id.
    pub in_flight: Vec<(usize, usize)>,
}

impl QueueStats {
    /// Returns the number of received but undeleted messages across workers.
    pub fn total_in_flight(&self) -> usize {
        self.in_flight.iter().map(|(_, n)| n).sum()
    }
}

async fn open_connection(redis_url: &str) -> Result<ConnectionManager, QueueError> {
    let client =
        redis::Client::open(redis_url).map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

    ConnectionManager::new(client)
        .await
        .map_err(|e| QueueError::ConnectionFailed(e.to_string()))
}

/// The list element is both the body and the delete token.
fn element_to_message(element: Vec<u8>) -> Message {
    Message::new(element.clone(), element)
}

fn in_flight_key(queue_name: &str, worker_id: usize) -> String {
    format!("{}:inflight:{}", queue_name, worker_id)
}
