//! CLI command definitions for classifier-relay.
//!
//! `run` starts the supervised worker pool; `enqueue`, `key` and `stats` are
//! operator helpers for feeding the queue and inspecting it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ConfigError, RelayConfig};
use crate::metrics::init_metrics;
use crate::pipeline::{CacheKey, PayloadSource};
use crate::queue::RedisMessageQueue;
use crate::scheduler::{RedisWorkerFactory, Supervisor};

/// Default Redis URL for the queue helpers.
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default queue name for the queue helpers.
const DEFAULT_QUEUE_NAME: &str = "classify";

/// Supervised queue-to-classifier-to-cache relay.
#[derive(Parser)]
#[command(name = "classifier-relay")]
#[command(about = "Drain a work queue through a classifier into a key/value cache")]
#[command(version)]
#[command(
    long_about = "classifier-relay runs a supervised pool of workers. Each worker polls the queue, classifies every message, writes the label (or a sentinel) to the cache under the SHA-256 of the input, and deletes the message.\n\nSettings come from RELAY_* environment variables; flags override them.\n\nExample usage:\n  classifier-relay run --workers 8 --classifier-url http://127.0.0.1:8501/classify"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Start the worker pool and supervise it until Ctrl-C.
    Run(RunArgs),

    /// Push payloads onto the queue (arguments, or one per stdin line).
    Enqueue(EnqueueArgs),

    /// Print the cache key each payload would be stored under.
    Key(KeyArgs),

    /// Show queue depth and per-worker in-flight counts.
    Stats(StatsArgs),
}

/// Broker connection shared by the queue helpers.
#[derive(Parser, Debug)]
pub struct QueueArgs {
    /// Redis URL of the queue broker.
    #[arg(long, env = "RELAY_REDIS_URL", default_value = DEFAULT_REDIS_URL)]
    pub redis_url: String,

    /// Name of the work queue.
    #[arg(short = 'q', long, env = "RELAY_QUEUE_NAME", default_value = DEFAULT_QUEUE_NAME)]
    pub queue_name: String,
}

/// Arguments for the run command.
///
/// Every flag overrides the matching `RELAY_*` environment variable.
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Redis URL of the queue broker (also used for the cache unless set).
    #[arg(long)]
    pub redis_url: Option<String>,

    /// Name of the work queue.
    #[arg(short = 'q', long)]
    pub queue_name: Option<String>,

    /// Redis URL of the result cache.
    #[arg(long)]
    pub cache_url: Option<String>,

    /// Expire cache entries after this many seconds.
    #[arg(long)]
    pub cache_ttl_secs: Option<u64>,

    /// Namespace prefix for cache keys.
    #[arg(long)]
    pub key_prefix: Option<String>,

    /// Classifier endpoint URL.
    #[arg(long)]
    pub classifier_url: Option<String>,

    /// Give up on a classification after this many seconds.
    #[arg(long)]
    pub classify_timeout_secs: Option<u64>,

    /// Minimum confidence for a label to be cached.
    #[arg(short = 'p', long)]
    pub min_probability: Option<f64>,

    /// JSON field of the message body holding the classification input.
    #[arg(long)]
    pub payload_field: Option<String>,

    /// Number of workers.
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum messages per poll.
    #[arg(short = 'b', long)]
    pub batch_size: Option<usize>,

    /// Seconds a poll waits for messages.
    #[arg(long)]
    pub wait_secs: Option<u64>,

    /// Polls between queue handle refreshes.
    #[arg(long)]
    pub refresh_every: Option<u32>,

    /// Seconds between liveness checks.
    #[arg(long)]
    pub liveness_secs: Option<u64>,

    /// Seconds a worker sleeps after a non-empty poll.
    #[arg(long)]
    pub short_backoff_secs: Option<u64>,

    /// Seconds a worker sleeps after an empty poll.
    #[arg(long)]
    pub long_backoff_secs: Option<u64>,

    /// Seconds to wait for workers to stop before aborting them.
    #[arg(long)]
    pub shutdown_timeout_secs: Option<u64>,

    /// Write Prometheus metrics to this file on every liveness check.
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,
}

impl RunArgs {
    /// Applies the flags over an environment-derived configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the resulting configuration is invalid.
    pub fn apply(self, mut config: RelayConfig) -> Result<RelayConfig, ConfigError> {
        let cache_follows_queue = config.cache_url == config.redis_url;

        if let Some(url) = self.redis_url {
            if cache_follows_queue && self.cache_url.is_none() {
                config.cache_url = url.clone();
            }
            config.redis_url = url;
        }
        if let Some(name) = self.queue_name {
            config.queue_name = name;
        }
        if let Some(url) = self.cache_url {
            config.cache_url = url;
        }
        if let Some(secs) = self.cache_ttl_secs {
            config.cache_ttl = Some(Duration::from_secs(secs));
        }
        if let Some(prefix) = self.key_prefix {
            config.key_prefix = Some(prefix);
        }
        if let Some(url) = self.classifier_url {
            config.classifier_url = url;
        }
        if let Some(secs) = self.classify_timeout_secs {
            config.classify_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(min) = self.min_probability {
            config.min_probability = min;
        }
        if let Some(field) = self.payload_field {
            config.payload_source = PayloadSource::JsonField(field);
        }
        if let Some(workers) = self.workers {
            config.worker_count = workers;
        }
        if let Some(size) = self.batch_size {
            config.batch_size = size;
        }
        if let Some(secs) = self.wait_secs {
            config.wait = Duration::from_secs(secs);
        }
        if let Some(polls) = self.refresh_every {
            config.refresh_every = polls;
        }
        if let Some(secs) = self.liveness_secs {
            config.liveness_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.short_backoff_secs {
            config.short_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = self.long_backoff_secs {
            config.long_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = self.shutdown_timeout_secs {
            config.shutdown_timeout = Duration::from_secs(secs);
        }
        if let Some(path) = self.metrics_file {
            config.metrics_file = Some(path);
        }

        config.validate()?;
        Ok(config)
    }
}

/// Arguments for the enqueue command.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    #[command(flatten)]
    pub queue: QueueArgs,

    /// Payloads to enqueue. Reads one payload per stdin line when omitted.
    pub payloads: Vec<String>,
}

/// Arguments for the key command.
#[derive(Parser, Debug)]
pub struct KeyArgs {
    /// Payloads (message bodies) to derive keys for.
    #[arg(required = true)]
    pub payloads: Vec<String>,

    /// Namespace prefix for cache keys.
    #[arg(long, env = "RELAY_KEY_PREFIX")]
    pub key_prefix: Option<String>,

    /// JSON field of the message body holding the classification input.
    #[arg(long, env = "RELAY_PAYLOAD_FIELD")]
    pub payload_field: Option<String>,
}

/// Arguments for the stats command.
#[derive(Parser, Debug)]
pub struct StatsArgs {
    #[command(flatten)]
    pub queue: QueueArgs,

    /// Number of worker in-flight lists to inspect.
    #[arg(short = 'w', long, env = "RELAY_WORKERS", default_value = "8")]
    pub workers: usize,

    /// Output JSON instead of a table.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_relay_command(args).await,
        Commands::Enqueue(args) => run_enqueue_command(args).await,
        Commands::Key(args) => run_key_command(args),
        Commands::Stats(args) => run_stats_command(args).await,
    }
}

async fn run_relay_command(args: RunArgs) -> anyhow::Result<()> {
    let env_config = RelayConfig::from_env().context("Invalid RELAY_* environment")?;
    let config = args
        .apply(env_config)
        .context("Invalid relay configuration")?;

    if let Err(e) = init_metrics() {
        warn!(error = %e, "Failed to initialize metrics");
    }

    info!(
        queue = %config.queue_name,
        workers = config.worker_count,
        classifier = %config.classifier_url,
        min_probability = config.min_probability,
        "Starting classifier relay"
    );

    let factory = Arc::new(RedisWorkerFactory::new(config.clone()));
    let mut supervisor = Supervisor::new(&config, factory);
    supervisor.start(config.worker_count)?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                trigger.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    supervisor
        .run(shutdown)
        .await
        .context("Worker shutdown did not complete")?;

    info!("Classifier relay stopped");
    Ok(())
}

async fn run_enqueue_command(args: EnqueueArgs) -> anyhow::Result<()> {
    let payloads = if args.payloads.is_empty() {
        read_stdin_payloads().await?
    } else {
        args.payloads
    };

    if payloads.is_empty() {
        warn!("Nothing to enqueue");
        return Ok(());
    }

    let queue = RedisMessageQueue::connect(&args.queue.redis_url, &args.queue.queue_name, 0)
        .await
        .with_context(|| format!("Failed to connect to {}", args.queue.redis_url))?;
    queue
        .enqueue(&payloads)
        .await
        .context("Failed to enqueue payloads")?;

    println!(
        "Enqueued {} message(s) on '{}'",
        payloads.len(),
        args.queue.queue_name
    );
    Ok(())
}

async fn read_stdin_payloads() -> anyhow::Result<Vec<String>> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut payloads = Vec::new();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if !line.is_empty() {
            payloads.push(line.to_string());
        }
    }
    Ok(payloads)
}

fn run_key_command(args: KeyArgs) -> anyhow::Result<()> {
    let source = args
        .payload_field
        .map(PayloadSource::JsonField)
        .unwrap_or_default();

    for payload in &args.payloads {
        println!("{}", key_for(&source, args.key_prefix.as_deref(), payload.as_bytes()));
    }
    Ok(())
}

/// Derives the key a worker would write for `body`.
fn key_for(source: &PayloadSource, prefix: Option<&str>, body: &[u8]) -> CacheKey {
    match source.extract(body) {
        Ok(input) => CacheKey::derive(prefix, &input),
        Err(e) => {
            warn!(error = %e, "Payload extraction failed, keying by the raw body");
            CacheKey::derive(prefix, body)
        }
    }
}

async fn run_stats_command(args: StatsArgs) -> anyhow::Result<()> {
    let queue = RedisMessageQueue::connect(&args.queue.redis_url, &args.queue.queue_name, 0)
        .await
        .with_context(|| format!("Failed to connect to {}", args.queue.redis_url))?;
    let stats = queue
        .stats(args.workers)
        .await
        .context("Failed to read queue statistics")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Queue:      {}", stats.queue_name);
    println!("Pending:    {}", stats.pending);
    println!("In flight:  {}", stats.total_in_flight());
    for (worker_id, count) in &stats.in_flight {
        if *count > 0 {
            println!("  worker {:>3}: {}", worker_id, count);
        }
    }
    Ok(())
}
