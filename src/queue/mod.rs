//! Work queue adapter.
//!
//! A worker talks to its queue only through [`MessageQueue`]: receive a
//! bounded batch, delete each message once it has been handled, and
//! re-acquire the underlying handle when it may have gone stale.
//!
//! [`RedisMessageQueue`] is the Redis binding used by the binary. It keeps a
//! per-worker in-flight list so that messages received by a worker that died
//! before deleting them can be handed back to the queue when that worker id
//! reconnects.

mod redis_queue;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueError;

pub use redis_queue::{QueueStats, RedisMessageQueue};

/// A message received from the queue.
///
/// Owned by the worker that received it, for one receive→delete cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    body: Vec<u8>,
    receipt: Vec<u8>,
}

impl Message {
    /// Creates a message from its body and the queue-supplied delete token.
    pub fn new(body: impl Into<Vec<u8>>, receipt: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            receipt: receipt.into(),
        }
    }

    /// The raw message body.
    pub fn payload(&self) -> &[u8] {
        &self.body
    }

    /// The opaque token the queue needs to delete this message.
    pub fn receipt(&self) -> &[u8] {
        &self.receipt
    }

    /// The body as text, replacing invalid UTF-8.
    pub fn body_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Batch receive and delete primitives of a work queue.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Receives up to `max_messages`, waiting at most `wait` for the first one.
    ///
    /// An empty vector means the wait elapsed with nothing to deliver.
    async fn receive_batch(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<Message>, QueueError>;

    /// Removes a received message from the queue.
    async fn delete(&self, message: &Message) -> Result<(), QueueError>;

    /// Re-resolves the queue endpoint and replaces the connection.
    async fn refresh(&mut self) -> Result<(), QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_accessors() {
        let msg = Message::new("https://img.example/a.jpg", "receipt-1");
        assert_eq!(msg.payload(), b"https://img.example/a.jpg");
        assert_eq!(msg.receipt(), b"receipt-1");
        assert_eq!(msg.body_lossy(), "https://img.example/a.jpg");
    }

    #[test]
    fn test_body_lossy_replaces_invalid_utf8() {
        let msg = Message::new(vec![0x66, 0xff, 0x6f], vec![1]);
        assert_eq!(msg.body_lossy(), "f\u{fffd}o");
    }
}
