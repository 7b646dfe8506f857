//! In-memory queue, classifier, cache and worker factory for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use classifier_relay::cache::ResultCache;
use classifier_relay::classifier::{Classification, Classifier};
use classifier_relay::error::{CacheError, ClassifyError, QueueError, WorkerError};
use classifier_relay::queue::{Message, MessageQueue};
use classifier_relay::scheduler::{WorkerFactory, WorkerId, WorkerResources};

/// Shared broker state behind every `MemoryQueue` handle.
#[derive(Default)]
pub struct MemoryBroker {
    pending: Mutex<VecDeque<Vec<u8>>>,
    in_flight: Mutex<HashMap<u64, Vec<u8>>>,
    deleted: Mutex<Vec<Vec<u8>>>,
    next_receipt: AtomicU64,
    refreshes: AtomicUsize,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn enqueue(&self, payloads: &[&str]) {
        let mut pending = self.pending.lock().unwrap();
        for payload in payloads {
            pending.push_back(payload.as_bytes().to_vec());
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    pub fn deleted(&self) -> Vec<Vec<u8>> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted.lock().unwrap().len()
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

/// One worker's handle onto a `MemoryBroker`.
///
/// Receiving a `crash:` payload panics, taking the worker down with the
/// batch still in flight.
pub struct MemoryQueue {
    broker: Arc<MemoryBroker>,
}

impl MemoryQueue {
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn receive_batch(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<Message>, QueueError> {
        let batch: Vec<Message> = {
            let mut pending = self.broker.pending.lock().unwrap();
            let mut in_flight = self.broker.in_flight.lock().unwrap();
            let take = max_messages.min(pending.len());
            pending
                .drain(..take)
                .map(|body| {
                    let receipt = self.broker.next_receipt.fetch_add(1, Ordering::SeqCst);
                    in_flight.insert(receipt, body.clone());
                    Message::new(body, receipt.to_string())
                })
                .collect()
        };

        // Simulates a worker dying outside the pipeline, holding its batch.
        if let Some(message) = batch.iter().find(|m| m.payload().starts_with(b"crash:")) {
            panic!("worker crashed on {}", message.body_lossy());
        }

        if batch.is_empty() {
            tokio::time::sleep(wait).await;
        }
        Ok(batch)
    }

    async fn delete(&self, message: &Message) -> Result<(), QueueError> {
        let receipt: u64 = std::str::from_utf8(message.receipt())
            .ok()
            .and_then(|r| r.parse().ok())
            .ok_or_else(|| QueueError::NotInFlight(message.body_lossy().into_owned()))?;

        let body = self.broker.in_flight.lock().unwrap().remove(&receipt);
        match body {
            Some(body) => {
                self.broker.deleted.lock().unwrap().push(body);
                Ok(())
            }
            None => Err(QueueError::NotInFlight(message.body_lossy().into_owned())),
        }
    }

    async fn refresh(&mut self) -> Result<(), QueueError> {
        self.broker.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Classifies by payload prefix:
///
/// - `cat:` → `cat` at 0.9
/// - `edge:` → `edge` at exactly 0.5
/// - `low:` → `blurry` at 0.3
/// - `err:` → classifier failure
/// - `panic:` → panics inside the classifier
/// - anything else → `other` at 0.7
pub struct RuleClassifier;

#[async_trait]
impl Classifier for RuleClassifier {
    async fn classify(&self, payload: &[u8]) -> Result<Classification, ClassifyError> {
        let text = String::from_utf8_lossy(payload);
        if text.starts_with("panic:") {
            panic!("classifier crashed on {}", text);
        }
        if text.starts_with("err:") {
            return Err(ClassifyError::RequestFailed("model unavailable".to_string()));
        }

        let (label, confidence) = if text.starts_with("cat:") {
            ("cat", 0.9)
        } else if text.starts_with("edge:") {
            ("edge", 0.5)
        } else if text.starts_with("low:") {
            ("blurry", 0.3)
        } else {
            ("other", 0.7)
        };
        Classification::new(label, confidence)
    }
}

/// Key/value cache that can be switched into a failing mode.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

/// A worker's handle onto a shared `MemoryCache`.
pub struct SharedCache(pub Arc<MemoryCache>);

#[async_trait]
impl ResultCache for SharedCache {
    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.0.writes.fetch_add(1, Ordering::SeqCst);
        if self.0.failing.load(Ordering::SeqCst) {
            return Err(CacheError::ConnectionFailed("cache unreachable".to_string()));
        }
        self.0
            .entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Builds memory-backed resources and counts connects per worker id.
pub struct MemoryFactory {
    pub broker: Arc<MemoryBroker>,
    pub cache: Arc<MemoryCache>,
    connects: Mutex<HashMap<WorkerId, u32>>,
}

impl MemoryFactory {
    pub fn new(broker: Arc<MemoryBroker>, cache: Arc<MemoryCache>) -> Arc<Self> {
        Arc::new(Self {
            broker,
            cache,
            connects: Mutex::new(HashMap::new()),
        })
    }

    pub fn connects_for(&self, id: WorkerId) -> u32 {
        self.connects.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn total_connects(&self) -> u32 {
        self.connects.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl WorkerFactory for MemoryFactory {
    async fn connect(&self, worker_id: WorkerId) -> Result<WorkerResources, WorkerError> {
        *self.connects.lock().unwrap().entry(worker_id).or_insert(0) += 1;

        Ok(WorkerResources {
            queue: Box::new(MemoryQueue::new(Arc::clone(&self.broker))),
            classifier: Box::new(RuleClassifier),
            cache: Box::new(SharedCache(Arc::clone(&self.cache))),
        })
    }
}

/// Polls `condition` every 10ms until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
