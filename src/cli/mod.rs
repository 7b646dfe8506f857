//! Command-line interface for classifier-relay.
//!
//! Provides the `run` command that starts the worker pool, plus queue
//! helpers for enqueueing payloads, deriving cache keys and reading stats.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, RunArgs};
