//! End-to-end tests of workers and the supervisor against in-memory adapters.

mod support;

use std::sync::Arc;
use std::time::Duration;

use classifier_relay::config::RelayConfig;
use classifier_relay::pipeline::{CacheKey, MessageProcessor, BELOW_THRESHOLD, PREDICTION_ERROR};
use classifier_relay::scheduler::{
    Supervisor, Worker, WorkerFactory, WorkerResources, WorkerSettings,
};
use support::{wait_until, MemoryBroker, MemoryCache, MemoryFactory, MemoryQueue, RuleClassifier, SharedCache};
use tokio_util::sync::CancellationToken;

fn fast_config() -> RelayConfig {
    RelayConfig::new()
        .with_wait(Duration::from_millis(10))
        .with_backoff(Duration::from_millis(5), Duration::from_millis(20))
        .with_liveness_interval(Duration::from_millis(50))
        .with_shutdown_timeout(Duration::from_secs(5))
}

fn key(payload: &str) -> String {
    CacheKey::from_payload(payload.as_bytes()).as_str().to_string()
}

#[tokio::test]
async fn test_pool_classifies_and_drains_queue() {
    let broker = MemoryBroker::new();
    let cache = MemoryCache::new();
    broker.enqueue(&["cat:1", "low:2", "err:3", "edge:4", "dog:5"]);

    let factory = MemoryFactory::new(Arc::clone(&broker), Arc::clone(&cache));
    let mut supervisor = Supervisor::new(&fast_config(), factory);
    supervisor.start(2).unwrap();

    let drained = wait_until(Duration::from_secs(5), || broker.deleted_count() == 5).await;
    supervisor.shutdown().await.unwrap();

    assert!(drained, "queue was not drained");
    assert_eq!(broker.pending(), 0);
    assert_eq!(broker.in_flight(), 0);

    assert_eq!(cache.get(&key("cat:1")).as_deref(), Some("cat"));
    assert_eq!(cache.get(&key("low:2")).as_deref(), Some(BELOW_THRESHOLD));
    assert_eq!(cache.get(&key("err:3")).as_deref(), Some(PREDICTION_ERROR));
    // The threshold is exclusive.
    assert_eq!(cache.get(&key("edge:4")).as_deref(), Some(BELOW_THRESHOLD));
    assert_eq!(cache.get(&key("dog:5")).as_deref(), Some("other"));
}

#[tokio::test]
async fn test_duplicate_payloads_share_one_key() {
    let broker = MemoryBroker::new();
    let cache = MemoryCache::new();
    broker.enqueue(&["cat:same", "cat:same", "cat:same"]);

    let factory = MemoryFactory::new(Arc::clone(&broker), Arc::clone(&cache));
    let mut supervisor = Supervisor::new(&fast_config(), factory);
    supervisor.start(3).unwrap();

    let drained = wait_until(Duration::from_secs(5), || broker.deleted_count() == 3).await;
    supervisor.shutdown().await.unwrap();

    assert!(drained);
    assert_eq!(cache.writes(), 3);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_cache_outage_still_deletes_messages() {
    let broker = MemoryBroker::new();
    let cache = MemoryCache::new();
    cache.set_failing(true);
    broker.enqueue(&["cat:1", "cat:2", "err:3"]);

    let factory = MemoryFactory::new(Arc::clone(&broker), Arc::clone(&cache));
    let mut supervisor = Supervisor::new(&fast_config(), factory);
    supervisor.start(1).unwrap();

    let drained = wait_until(Duration::from_secs(5), || broker.deleted_count() == 3).await;
    supervisor.shutdown().await.unwrap();

    assert!(drained, "messages must be deleted even when results are lost");
    assert_eq!(cache.writes(), 3);
    assert_eq!(cache.len(), 0);
}

#[tokio::test]
async fn test_crashed_worker_is_replaced_under_same_id() {
    let broker = MemoryBroker::new();
    let cache = MemoryCache::new();
    broker.enqueue(&["crash:boom"]);

    let factory = MemoryFactory::new(Arc::clone(&broker), Arc::clone(&cache));
    let config = fast_config().with_liveness_interval(Duration::from_secs(3600));
    let mut supervisor = Supervisor::new(&config, Arc::clone(&factory) as Arc<dyn WorkerFactory>);
    supervisor.start(3).unwrap();

    let crashed = wait_until(Duration::from_secs(5), || supervisor.live_count() == 2).await;
    assert!(crashed, "one worker should have died");

    let replaced = supervisor.check_liveness().await;
    assert_eq!(replaced.len(), 1);
    let id = replaced[0];
    assert_eq!(supervisor.worker_ids(), vec![1, 2, 3]);
    assert_eq!(supervisor.record(id).unwrap().restarts, 1);

    // The replacement picks up new work.
    broker.enqueue(&["cat:after"]);
    let healed = wait_until(Duration::from_secs(5), || {
        supervisor.live_count() == 3 && cache.get(&key("cat:after")).is_some()
    })
    .await;
    assert!(healed);
    assert_eq!(factory.connects_for(id), 2);
    assert_eq!(factory.total_connects(), 4);

    // The dead worker's batch was never deleted.
    assert_eq!(broker.in_flight(), 1);
    assert!(cache.get(&key("crash:boom")).is_none());

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_classifier_panic_does_not_kill_worker() {
    let broker = MemoryBroker::new();
    let cache = MemoryCache::new();
    broker.enqueue(&["panic:poison", "cat:next"]);

    let factory = MemoryFactory::new(Arc::clone(&broker), Arc::clone(&cache));
    let mut supervisor = Supervisor::new(&fast_config(), Arc::clone(&factory) as Arc<dyn WorkerFactory>);
    supervisor.start(2).unwrap();

    let drained = wait_until(Duration::from_secs(5), || broker.deleted_count() == 2).await;
    assert!(drained, "the panicking message must still be deleted");
    assert_eq!(supervisor.live_count(), 2);
    assert!(supervisor.check_liveness().await.is_empty());
    supervisor.shutdown().await.unwrap();

    assert_eq!(broker.in_flight(), 0);
    assert_eq!(cache.get(&key("panic:poison")).as_deref(), Some(PREDICTION_ERROR));
    assert_eq!(cache.get(&key("cat:next")).as_deref(), Some("cat"));
    assert_eq!(factory.total_connects(), 2);
}

#[tokio::test]
async fn test_run_replaces_dead_workers_on_its_own() {
    let broker = MemoryBroker::new();
    let cache = MemoryCache::new();
    broker.enqueue(&["crash:1", "crash:2"]);

    let config = fast_config().with_batch_size(1);
    let factory = MemoryFactory::new(Arc::clone(&broker), Arc::clone(&cache));
    let mut supervisor = Supervisor::new(&config, Arc::clone(&factory) as Arc<dyn WorkerFactory>);
    supervisor.start(2).unwrap();

    let shutdown = CancellationToken::new();
    let observer = {
        let factory = Arc::clone(&factory);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let healed = wait_until(Duration::from_secs(5), || factory.total_connects() >= 4).await;
            shutdown.cancel();
            healed
        })
    };

    supervisor.run(shutdown).await.unwrap();
    assert!(observer.await.unwrap(), "both crashed workers should be replaced");
    assert!(!supervisor.is_running());
}

#[tokio::test]
async fn test_single_worker_refreshes_and_backs_off() {
    let broker = MemoryBroker::new();
    let cache = MemoryCache::new();
    broker.enqueue(&["cat:1", "cat:2", "cat:3"]);

    let settings = WorkerSettings {
        batch_size: 2,
        refresh_every: 2,
        ..WorkerSettings::from_config(&fast_config())
    };
    let mut worker = Worker::new(
        7,
        settings,
        MessageProcessor::new(0.5),
        WorkerResources {
            queue: Box::new(MemoryQueue::new(Arc::clone(&broker))),
            classifier: Box::new(RuleClassifier),
            cache: Box::new(SharedCache(Arc::clone(&cache))),
        },
    );
    let cancel = CancellationToken::new();

    let first = worker.poll_cycle(&cancel).await.unwrap();
    assert_eq!(first.received, 2);
    assert_eq!(first.delay, Duration::from_millis(5));

    let second = worker.poll_cycle(&cancel).await.unwrap();
    assert_eq!(second.received, 1);

    let third = worker.poll_cycle(&cancel).await.unwrap();
    assert!(third.refreshed);
    assert_eq!(third.received, 0);
    assert_eq!(third.delay, Duration::from_millis(5));

    let fourth = worker.poll_cycle(&cancel).await.unwrap();
    assert_eq!(fourth.delay, Duration::from_millis(20));

    assert_eq!(broker.refreshes(), 1);
    assert_eq!(broker.deleted_count(), 3);
    assert_eq!(cache.len(), 3);
}

#[tokio::test]
async fn test_key_prefix_applies_to_every_write() {
    let broker = MemoryBroker::new();
    let cache = MemoryCache::new();
    broker.enqueue(&["cat:1"]);

    let config = fast_config().with_key_prefix("ImageMatcherService");
    let factory = MemoryFactory::new(Arc::clone(&broker), Arc::clone(&cache));
    let mut supervisor = Supervisor::new(&config, factory);
    supervisor.start(1).unwrap();

    let drained = wait_until(Duration::from_secs(5), || broker.deleted_count() == 1).await;
    supervisor.shutdown().await.unwrap();

    assert!(drained);
    let prefixed = CacheKey::derive(Some("ImageMatcherService"), b"cat:1");
    assert_eq!(cache.get(prefixed.as_str()).as_deref(), Some("cat"));
    assert!(cache.get(&key("cat:1")).is_none());
}
