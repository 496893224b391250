//! CLI command definitions for queue-forge.
//!
//! Every command resolves its backend through `QueueManager`, so the same
//! flags (or `QUEUE_CONNECTION`, `REDIS_URL`, `DATABASE_URL`, `QUEUE_PREFIX`)
//! select Redis, PostgreSQL or the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tokio::signal;
use tracing::{info, warn};

use crate::config::{Connection, QueueConfig, DEFAULT_KEY_PREFIX};
use crate::jobs;
use crate::metrics;
use crate::queue::QueueManager;
use crate::worker::{StatsSnapshot, Worker, WorkerConfig, WorkerPool, WorkerPoolConfig};

/// Background job queue with Redis and PostgreSQL backends.
#[derive(Parser)]
#[command(name = "queue-forge")]
#[command(about = "Run and feed background job workers")]
#[command(version)]
#[command(
    long_about = "queue-forge runs background job workers against Redis or PostgreSQL.\n\nJobs are pushed with `dispatch` and executed by `work`; failed jobs are retried and, once exhausted, recorded in the failed store.\n\nExample usage:\n  queue-forge --redis-url redis://localhost:6379 work --queue emails\n  queue-forge dispatch emails.send --data '{\"to\":\"ada@example.com\",\"subject\":\"Hi\"}'"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Default backend: redis, database or memory.
    #[arg(short, long, env = "QUEUE_CONNECTION", global = true)]
    pub connection: Option<String>,

    /// Redis connection URL.
    #[arg(long, env = "REDIS_URL", global = true)]
    pub redis_url: Option<String>,

    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Prefix for every Redis key.
    #[arg(long, env = "QUEUE_PREFIX", default_value = DEFAULT_KEY_PREFIX, global = true)]
    pub prefix: String,

    /// Maximum pooled database connections.
    #[arg(long, default_value = "10", global = true)]
    pub database_max_connections: u32,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Process jobs from a queue until stopped.
    Work(WorkArgs),

    /// Push a job onto its queue.
    Dispatch(DispatchArgs),

    /// Print the number of entries waiting in a queue.
    Size(SizeArgs),

    /// Return entries whose reservation outlived the lease to the queue.
    Reclaim(ReclaimArgs),

    /// Create the PostgreSQL queue tables.
    Migrate,
}

/// Arguments for `queue-forge work`.
#[derive(Parser, Debug)]
pub struct WorkArgs {
    /// Connection to claim from (redis, database or memory); defaults to
    /// `--connection`.
    #[arg(value_name = "CONNECTION")]
    pub backend: Option<Connection>,

    /// Queue to process.
    #[arg(short, long, default_value = "default")]
    pub queue: String,

    /// Stop after this many jobs.
    #[arg(long)]
    pub max_jobs: Option<u64>,

    /// Stop after this many seconds.
    #[arg(long)]
    pub max_time: Option<u64>,

    /// Seconds to sleep when the queue is empty.
    #[arg(long, default_value = "3")]
    pub sleep: u64,

    /// Attempt ceiling overriding each job's own.
    #[arg(long)]
    pub max_tries: Option<u32>,

    /// Handler timeout in seconds overriding each job's own.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Reclaim reservations older than this many seconds.
    #[arg(long)]
    pub lease: Option<u64>,

    /// Number of concurrent workers in this process.
    #[arg(short, long, default_value = "1")]
    pub workers: usize,

    /// Seconds to wait for running jobs on shutdown.
    #[arg(long, default_value = "60")]
    pub shutdown_timeout: u64,

    /// Print Prometheus metrics when the workers exit.
    #[arg(long)]
    pub print_metrics: bool,
}

impl WorkArgs {
    fn worker_config(&self) -> WorkerConfig {
        let mut config = WorkerConfig::new(&self.queue).with_sleep(Duration::from_secs(self.sleep));
        if let Some(connection) = self.backend {
            config = config.with_connection(connection);
        }
        if let Some(max_jobs) = self.max_jobs {
            config = config.with_max_jobs(max_jobs);
        }
        if let Some(max_time) = self.max_time {
            config = config.with_max_time(Duration::from_secs(max_time));
        }
        if let Some(max_tries) = self.max_tries {
            config = config.with_max_tries(max_tries);
        }
        if let Some(timeout) = self.timeout {
            config = config.with_timeout(Duration::from_secs(timeout.max(1)));
        }
        if let Some(lease) = self.lease {
            config = config.with_lease(Duration::from_secs(lease));
        }
        config
    }
}

/// Arguments for `queue-forge dispatch`.
#[derive(Parser, Debug)]
pub struct DispatchArgs {
    /// Class identity of the job (e.g. emails.send).
    pub class: String,

    /// Job fields as a JSON object.
    #[arg(short, long, default_value = "{}")]
    pub data: String,

    /// Seconds before the job becomes claimable.
    #[arg(long, default_value = "0")]
    pub delay: u64,

    /// Queue overriding the job's own.
    #[arg(short, long)]
    pub queue: Option<String>,
}

/// Arguments for `queue-forge size`.
#[derive(Parser, Debug)]
pub struct SizeArgs {
    /// Queue to count.
    #[arg(short, long, default_value = "default")]
    pub queue: String,
}

/// Arguments for `queue-forge reclaim`.
#[derive(Parser, Debug)]
pub struct ReclaimArgs {
    /// Reservations older than this many seconds are reclaimed.
    #[arg(long)]
    pub lease: u64,

    /// Queue to reclaim.
    #[arg(short, long, default_value = "default")]
    pub queue: String,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = queue_config(&cli)?;

    match cli.command {
        Commands::Work(args) => run_work_command(&config, args).await,
        Commands::Dispatch(args) => run_dispatch_command(&config, args).await,
        Commands::Size(args) => run_size_command(&config, args).await,
        Commands::Reclaim(args) => run_reclaim_command(&config, args).await,
        Commands::Migrate => run_migrate_command(&config).await,
    }
}

fn queue_config(cli: &Cli) -> anyhow::Result<QueueConfig> {
    let mut config = QueueConfig::default()
        .with_key_prefix(cli.prefix.as_str())
        .with_database_max_connections(cli.database_max_connections);

    if let Some(name) = &cli.connection {
        config.default_connection = name.parse()?;
    }
    if let Some(url) = &cli.redis_url {
        config = config.with_redis_url(url.as_str());
    }
    if let Some(url) = &cli.database_url {
        config = config.with_database_url(url.as_str());
    }

    Ok(config)
}

async fn run_work_command(config: &QueueConfig, args: WorkArgs) -> anyhow::Result<()> {
    let manager = QueueManager::from_config(config).await;
    let worker_config = args.worker_config();
    let driver = manager.driver(worker_config.connection)?;
    let registry = Arc::new(jobs::registry());

    if args.print_metrics {
        metrics::init_metrics()?;
    }

    info!(
        queue = %args.queue,
        connection = %driver.connection(),
        workers = args.workers,
        jobs = ?registry.classes(),
        "Starting workers"
    );

    let depth_driver = Arc::clone(&driver);
    let stats = if args.workers > 1 {
        let pool_config = WorkerPoolConfig::new(args.workers)
            .with_shutdown_timeout(Duration::from_secs(args.shutdown_timeout))
            .with_worker(worker_config);
        let mut pool = WorkerPool::new(pool_config, driver, registry);
        pool.run_until(shutdown_signal()).await?
    } else {
        let worker = Worker::new("worker-0", driver, registry, worker_config);
        let control = worker.control();
        let watcher = tokio::spawn(async move {
            shutdown_signal().await;
            control.stop();
        });
        let stats = worker.run().await;
        watcher.abort();
        stats
    };

    print_stats(&stats);

    if args.print_metrics {
        match depth_driver.size(&args.queue).await {
            Ok(depth) => metrics::set_queue_depth(&args.queue, depth),
            Err(e) => warn!(queue = %args.queue, error = %e, "Failed to read queue depth"),
        }
        print!("{}", metrics::export_metrics());
    }
    Ok(())
}

async fn run_dispatch_command(config: &QueueConfig, args: DispatchArgs) -> anyhow::Result<()> {
    let data = match serde_json::from_str::<Value>(&args.data).context("--data is not valid JSON")? {
        Value::Object(map) => map,
        other => anyhow::bail!("--data must be a JSON object, got {}", other),
    };

    let registry = jobs::registry();
    let mut record = registry.record_for(&args.class, data)?;
    if let Some(queue) = args.queue {
        record = record.with_queue(queue);
    }

    let manager = QueueManager::from_config(config).await;
    manager.push_record(&record, args.delay).await?;

    println!(
        "Dispatched {} to queue '{}'{}",
        record.class_identity,
        record.queue,
        if args.delay > 0 {
            format!(" (available in {}s)", args.delay)
        } else {
            String::new()
        }
    );
    Ok(())
}

async fn run_size_command(config: &QueueConfig, args: SizeArgs) -> anyhow::Result<()> {
    let manager = QueueManager::from_config(config).await;
    let size = manager.size(&args.queue).await?;
    println!("{}", size);
    Ok(())
}

async fn run_reclaim_command(config: &QueueConfig, args: ReclaimArgs) -> anyhow::Result<()> {
    let manager = QueueManager::from_config(config).await;
    let reclaimed = manager
        .driver(None)?
        .reclaim(&args.queue, Duration::from_secs(args.lease))
        .await?;
    println!("Reclaimed {} job(s) from queue '{}'", reclaimed, args.queue);
    Ok(())
}

async fn run_migrate_command(config: &QueueConfig) -> anyhow::Result<()> {
    let manager = QueueManager::from_config(config).await;
    let database = manager
        .database()
        .context("migrate needs a reachable database (--database-url or DATABASE_URL)")?;

    let applied = database.run_migrations().await?;
    println!("Applied {} migration(s)", applied);
    Ok(())
}

fn print_stats(stats: &StatsSnapshot) {
    println!("Processed: {}", stats.processed);
    println!("  Completed: {}", stats.completed);
    println!("  Released:  {}", stats.released);
    println!("  Failed:    {}", stats.failed);
    println!("  Discarded: {}", stats.discarded);
    println!("  Success rate: {:.1}%", stats.success_rate());
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler, continuing without it");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, continuing without it");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, finishing current job");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        // Verify CLI definition is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_work_command_defaults() {
        let cli = Cli::try_parse_from(["queue-forge", "work"]).expect("should parse");

        match cli.command {
            Commands::Work(args) => {
                assert_eq!(args.queue, "default");
                assert_eq!(args.sleep, 3);
                assert_eq!(args.workers, 1);
                assert!(args.max_jobs.is_none());
                assert!(!args.print_metrics);
                assert!(args.backend.is_none());

                let config = args.worker_config();
                assert_eq!(config.sleep, Duration::from_secs(3));
                assert!(config.max_tries.is_none());
                assert!(config.lease.is_none());
            }
            _ => panic!("Expected Work command"),
        }
    }

    #[test]
    fn test_work_command_with_all_options() {
        let cli = Cli::try_parse_from([
            "queue-forge",
            "work",
            "--queue",
            "emails",
            "--max-jobs",
            "100",
            "--max-time",
            "3600",
            "--sleep",
            "1",
            "--max-tries",
            "5",
            "--timeout",
            "30",
            "--lease",
            "120",
            "--workers",
            "4",
            "--print-metrics",
        ])
        .expect("should parse");

        match cli.command {
            Commands::Work(args) => {
                let config = args.worker_config();
                assert_eq!(config.queue, "emails");
                assert_eq!(config.max_jobs, Some(100));
                assert_eq!(config.max_time, Some(Duration::from_secs(3600)));
                assert_eq!(config.sleep, Duration::from_secs(1));
                assert_eq!(config.max_tries, Some(5));
                assert_eq!(config.timeout, Some(Duration::from_secs(30)));
                assert_eq!(config.lease, Some(Duration::from_secs(120)));
                assert_eq!(args.workers, 4);
                assert!(args.print_metrics);
            }
            _ => panic!("Expected Work command"),
        }
    }

    #[test]
    fn test_dispatch_command() {
        let cli = Cli::try_parse_from([
            "queue-forge",
            "dispatch",
            "emails.send",
            "--data",
            r#"{"to":"ada@example.com","subject":"Hi"}"#,
            "--delay",
            "30",
        ])
        .expect("should parse");

        match cli.command {
            Commands::Dispatch(args) => {
                assert_eq!(args.class, "emails.send");
                assert_eq!(args.delay, 30);
                assert!(args.queue.is_none());
            }
            _ => panic!("Expected Dispatch command"),
        }
    }

    #[test]
    fn test_global_connection_flags() {
        let cli = Cli::try_parse_from([
            "queue-forge",
            "size",
            "--connection",
            "memory",
            "--prefix",
            "jobs",
        ])
        .expect("should parse");

        let config = queue_config(&cli).unwrap();
        assert_eq!(config.default_connection, Connection::Memory);
        assert_eq!(config.key_prefix, "jobs");
    }

    #[test]
    fn test_unknown_connection_is_rejected() {
        let cli = Cli::try_parse_from(["queue-forge", "migrate", "--connection", "mongo"])
            .expect("should parse");
        assert!(queue_config(&cli).is_err());
    }

    #[test]
    fn test_work_connection_selects_worker_backend() {
        let cli = Cli::try_parse_from([
            "queue-forge",
            "--connection",
            "redis",
            "work",
            "database",
            "--queue",
            "reports",
        ])
        .expect("should parse");

        match cli.command {
            Commands::Work(args) => {
                let config = args.worker_config();
                assert_eq!(config.connection, Some(Connection::Database));
                assert_eq!(config.queue, "reports");
            }
            _ => panic!("Expected Work command"),
        }

        assert!(Cli::try_parse_from(["queue-forge", "work", "mongo"]).is_err());
    }

    #[test]
    fn test_reclaim_requires_lease() {
        assert!(Cli::try_parse_from(["queue-forge", "reclaim"]).is_err());
    }
}
