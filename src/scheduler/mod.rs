//! Supervised worker pool.
//!
//! A fixed number of workers drain the queue concurrently. Each worker owns
//! its own queue handle, classifier and cache client; nothing mutable is
//! shared between workers. The supervisor checks the pool on an interval
//! and replaces any worker that has died under the same id.
//!
//! # Architecture
//!
//! ```text
//!                   ┌──────────────┐
//!                   │  Supervisor  │──── liveness check every interval
//!                   └──────┬───────┘
//!                          │ spawn / respawn(id)
//!        ┌─────────────────┼─────────────────┐
//!        ▼                 ▼                 ▼
//!   ┌─────────┐       ┌─────────┐       ┌─────────┐
//!   │ Worker 1│       │ Worker 2│       │ Worker N│
//!   └────┬────┘       └────┬────┘       └────┬────┘
//!        │ receive / delete │                 │
//!        └─────────────────┼─────────────────┘
//!                   ┌──────▼───────┐
//!                   │    Redis     │
//!                   │    Queue     │
//!                   └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use classifier_relay::config::RelayConfig;
//! use classifier_relay::scheduler::{RedisWorkerFactory, Supervisor};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = RelayConfig::from_env()?;
//! let factory = Arc::new(RedisWorkerFactory::new(config.clone()));
//!
//! let mut supervisor = Supervisor::new(&config, factory);
//! supervisor.start(config.worker_count)?;
//!
//! let shutdown = CancellationToken::new();
//! supervisor.run(shutdown).await?;
//! ```

pub mod backoff;
pub mod factory;
pub mod supervisor;
pub mod worker;

/// Stable worker identity; replacements reuse the id of the worker they replace.
pub type WorkerId = usize;

pub use backoff::{BackoffPolicy, BackoffState};
pub use factory::{RedisWorkerFactory, WorkerFactory};
pub use supervisor::{Supervisor, SupervisorError, WorkerRecord};
pub use worker::{PollReport, Worker, WorkerResources, WorkerSettings, WorkerState};
