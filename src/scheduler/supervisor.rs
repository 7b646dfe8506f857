//! Worker supervision.
//!
//! The supervisor owns a registry of worker tasks keyed by worker id. On a
//! fixed interval it looks for tasks that have finished, for any reason,
//! and starts a replacement under the same id. It is the only component
//! that creates or replaces workers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::factory::WorkerFactory;
use super::worker::{Worker, WorkerSettings};
use super::WorkerId;
use crate::config::RelayConfig;
use crate::error::{panic_message, WorkerError};
use crate::metrics::{write_textfile, MetricsCollector};
use crate::pipeline::MessageProcessor;

/// Errors returned by the supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Workers have already been started.
    #[error("Supervisor is already running")]
    AlreadyRunning,

    /// No workers have been started.
    #[error("Supervisor is not running")]
    NotRunning,

    /// Workers did not stop in time and were aborted.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// One registry entry.
#[derive(Debug)]
pub struct WorkerRecord {
    /// Worker id, reused by every replacement.
    pub id: WorkerId,
    handle: JoinHandle<Result<(), WorkerError>>,
    /// How many times this id has been replaced.
    pub restarts: u32,
    /// When the current incarnation was spawned.
    pub started_at: Instant,
}

impl WorkerRecord {
    /// Whether the worker task is still running.
    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Starts, watches and replaces workers.
pub struct Supervisor {
    factory: Arc<dyn WorkerFactory>,
    settings: WorkerSettings,
    processor: MessageProcessor,
    liveness_interval: Duration,
    shutdown_timeout: Duration,
    metrics_file: Option<PathBuf>,
    workers: BTreeMap<WorkerId, WorkerRecord>,
    /// Parent of every worker's cancellation token.
    cancel: CancellationToken,
    metrics: MetricsCollector,
}

impl Supervisor {
    /// Creates a supervisor that builds worker adapters through `factory`.
    pub fn new(config: &RelayConfig, factory: Arc<dyn WorkerFactory>) -> Self {
        Self {
            factory,
            settings: WorkerSettings::from_config(config),
            processor: MessageProcessor::from_config(config),
            liveness_interval: config.liveness_interval,
            shutdown_timeout: config.shutdown_timeout,
            metrics_file: config.metrics_file.clone(),
            workers: BTreeMap::new(),
            cancel: CancellationToken::new(),
            metrics: MetricsCollector::new(),
        }
    }

    /// Starts workers with ids `1..=worker_count`.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::AlreadyRunning` if workers exist.
    pub fn start(&mut self, worker_count: usize) -> Result<(), SupervisorError> {
        if !self.workers.is_empty() {
            return Err(SupervisorError::AlreadyRunning);
        }
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }

        for id in 1..=worker_count {
            let handle = self.spawn_worker(id);
            self.workers.insert(
                id,
                WorkerRecord {
                    id,
                    handle,
                    restarts: 0,
                    started_at: Instant::now(),
                },
            );
        }

        self.metrics.set_live_workers(worker_count);
        info!(num_workers = worker_count, "Workers started");
        Ok(())
    }

    /// Replaces every worker whose task has finished.
    ///
    /// Each finished task is awaited to log why it ended, then a new worker
    /// is spawned under the same id. Nothing is replaced once shutdown has
    /// begun.
    ///
    /// # Returns
    ///
    /// The ids that were replaced, in ascending order.
    pub async fn check_liveness(&mut self) -> Vec<WorkerId> {
        if self.cancel.is_cancelled() {
            return Vec::new();
        }

        let dead: Vec<WorkerId> = self
            .workers
            .values()
            .filter(|record| !record.is_alive())
            .map(|record| record.id)
            .collect();

        for &id in &dead {
            let Some(record) = self.workers.remove(&id) else {
                continue;
            };

            let reason = exit_reason(record.handle.await);
            error!(
                worker_id = id,
                reason = %reason,
                "Worker {} is dead! Starting new worker",
                id
            );

            let handle = self.spawn_worker(id);
            self.workers.insert(
                id,
                WorkerRecord {
                    id,
                    handle,
                    restarts: record.restarts + 1,
                    started_at: Instant::now(),
                },
            );
            self.metrics.record_worker_restart(id);
        }

        self.metrics.set_live_workers(self.live_count());
        dead
    }

    /// Supervises until `shutdown` fires, then stops every worker.
    ///
    /// Every `liveness_interval` this checks worker liveness and, when a
    /// metrics file is configured, rewrites it.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::NotRunning` if `start` was not called, or
    /// the error from `shutdown`.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), SupervisorError> {
        if self.workers.is_empty() {
            return Err(SupervisorError::NotRunning);
        }

        let mut ticker = tokio::time::interval(self.liveness_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    let replaced = self.check_liveness().await;
                    debug!(
                        live = self.live_count(),
                        replaced = replaced.len(),
                        "Liveness check complete"
                    );
                    self.write_metrics_file().await;
                }
            }
        }

        let result = self.shutdown().await;
        self.write_metrics_file().await;
        result
    }

    /// Cancels every worker and waits up to `shutdown_timeout` for them.
    ///
    /// Workers finish the message in hand. Workers still running at the
    /// deadline are aborted.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::NotRunning` if no workers exist, or
    /// `SupervisorError::ShutdownTimeout` if some had to be aborted.
    pub async fn shutdown(&mut self) -> Result<(), SupervisorError> {
        if self.workers.is_empty() {
            return Err(SupervisorError::NotRunning);
        }

        info!(num_workers = self.workers.len(), "Initiating worker shutdown");
        self.cancel.cancel();

        let mut records: Vec<WorkerRecord> =
            std::mem::take(&mut self.workers).into_values().collect();
        let joined = tokio::time::timeout(
            self.shutdown_timeout,
            join_all(records.iter_mut().map(|record| &mut record.handle)),
        )
        .await;

        self.metrics.set_live_workers(0);

        match joined {
            Ok(results) => {
                for (record, result) in records.iter().zip(results) {
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!(worker_id = record.id, error = %e, "Worker ended with error");
                        }
                        Err(e) => {
                            error!(worker_id = record.id, error = %e, "Worker task failed during shutdown");
                        }
                    }
                }
                info!("Worker shutdown complete");
                Ok(())
            }
            Err(_) => {
                for record in &records {
                    record.handle.abort();
                }
                warn!(
                    timeout = ?self.shutdown_timeout,
                    "Workers did not stop in time, aborted"
                );
                Err(SupervisorError::ShutdownTimeout(self.shutdown_timeout))
            }
        }
    }

    /// Returns the ids in the registry.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.keys().copied().collect()
    }

    /// Returns the registry entry for `id`.
    pub fn record(&self, id: WorkerId) -> Option<&WorkerRecord> {
        self.workers.get(&id)
    }

    /// Returns the number of workers whose task is still running.
    pub fn live_count(&self) -> usize {
        self.workers.values().filter(|record| record.is_alive()).count()
    }

    /// Whether workers have been started and not shut down.
    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    fn spawn_worker(&self, id: WorkerId) -> JoinHandle<Result<(), WorkerError>> {
        let factory = Arc::clone(&self.factory);
        let settings = self.settings.clone();
        let processor = self.processor.clone();
        let cancel = self.cancel.child_token();

        tokio::spawn(
            run_worker(id, factory, settings, processor, cancel)
                .instrument(info_span!("worker", worker_id = id)),
        )
    }

    async fn write_metrics_file(&self) {
        let Some(path) = &self.metrics_file else {
            return;
        };
        if let Err(e) = write_textfile(path).await {
            warn!(path = %path.display(), error = %e, "Failed to write metrics file");
        }
    }
}

/// Connects a worker's adapters and runs it until cancelled.
async fn run_worker(
    id: WorkerId,
    factory: Arc<dyn WorkerFactory>,
    settings: WorkerSettings,
    processor: MessageProcessor,
    cancel: CancellationToken,
) -> Result<(), WorkerError> {
    let resources = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        resources = factory.connect(id) => resources?,
    };

    Worker::new(id, settings, processor, resources)
        .run(cancel)
        .await;
    Ok(())
}

fn exit_reason(result: Result<Result<(), WorkerError>, JoinError>) -> String {
    match result {
        Ok(Ok(())) => "exited".to_string(),
        Ok(Err(e)) => e.to_string(),
        Err(e) if e.is_panic() => {
            format!("panicked: {}", panic_message(e.into_panic().as_ref()))
        }
        Err(e) => e.to_string(),
    }
}
