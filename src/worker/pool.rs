//! Worker pool for running several engines against one queue.
//!
//! Each worker runs as an independent async task with its own control
//! handle; a broadcast channel fans the shutdown signal out to all of them.
//! Running several processes remains the primary way to scale; the pool is
//! for single-host deployments that prefer one process.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::config::WorkerConfig;
use super::engine::Worker;
use super::stats::{StatsSnapshot, WorkerStats};
use crate::job::JobRegistry;
use crate::queue::QueueDriver;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
    /// Settings shared by every worker in the pool.
    pub worker: WorkerConfig,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            shutdown_timeout: Duration::from_secs(60),
            worker: WorkerConfig::default(),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
            ..Default::default()
        }
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the per-worker settings.
    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }
}

/// Pool of workers sharing one driver and registry.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    driver: Arc<dyn QueueDriver>,
    registry: Arc<JobRegistry>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<WorkerStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a new worker pool.
    pub fn new(
        config: WorkerPoolConfig,
        driver: Arc<dyn QueueDriver>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        // One message is all a shutdown ever sends
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            driver,
            registry,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(WorkerStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts all workers in the pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        for i in 0..self.config.num_workers {
            let worker = Worker::new(
                format!("worker-{}", i),
                Arc::clone(&self.driver),
                Arc::clone(&self.registry),
                self.config.worker.clone(),
            )
            .with_stats(Arc::clone(&self.stats));

            let control = worker.control();
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            let handle = tokio::spawn(async move {
                let watcher = tokio::spawn(async move {
                    // Closed or lagged both mean the pool is going away
                    let _ = shutdown_rx.recv().await;
                    control.stop();
                });
                worker.run().await;
                watcher.abort();
            });

            self.worker_handles.push(handle);
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(
            num_workers = self.config.num_workers,
            queue = %self.config.worker.queue,
            "Worker pool started"
        );

        Ok(())
    }

    /// Gracefully shuts down all workers.
    ///
    /// Jobs in flight run to completion; workers that do not stop within
    /// the shutdown timeout are abandoned.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<StatsSnapshot, PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Workers that already stopped have dropped their receivers
        let _ = self.shutdown_tx.send(());

        let handles: Vec<_> = self.worker_handles.drain(..).collect();
        let result = tokio::time::timeout(self.config.shutdown_timeout, join_workers(handles)).await;
        self.is_running.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                info!("Worker pool shutdown complete");
                Ok(self.stats())
            }
            Err(_) => Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout)),
        }
    }

    /// Runs the pool until every worker stops on its own or `signal` fires.
    pub async fn run_until<F>(&mut self, signal: F) -> Result<StatsSnapshot, PoolError>
    where
        F: Future<Output = ()>,
    {
        self.start()?;

        let handles: Vec<_> = self.worker_handles.drain(..).collect();
        let all_done = join_workers(handles);
        tokio::pin!(all_done);

        tokio::select! {
            _ = &mut all_done => {
                self.is_running.store(false, Ordering::SeqCst);
                info!("All workers stopped");
                return Ok(self.stats());
            }
            _ = signal => {}
        }

        info!("Initiating worker pool shutdown");
        let _ = self.shutdown_tx.send(());
        let result = tokio::time::timeout(self.config.shutdown_timeout, all_done).await;
        self.is_running.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                info!("Worker pool shutdown complete");
                Ok(self.stats())
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.config.shutdown_timeout.as_secs(),
                    "Workers did not stop in time"
                );
                Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }
}

async fn join_workers(handles: Vec<JoinHandle<()>>) {
    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!(error = %e, "Worker task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::job::{Job, JobContext, JobRecord};
    use crate::queue::MemoryQueue;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Tick {
        n: u32,
    }

    #[async_trait]
    impl Job for Tick {
        const CLASS: &'static str = "tests.tick";

        async fn handle(&self, _ctx: &JobContext) -> Result<(), JobError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(())
        }
    }

    fn pool(queue: &Arc<MemoryQueue>, num_workers: usize, worker: WorkerConfig) -> WorkerPool {
        let driver: Arc<dyn QueueDriver> = queue.clone();
        WorkerPool::new(
            WorkerPoolConfig::new(num_workers)
                .with_shutdown_timeout(Duration::from_secs(5))
                .with_worker(worker),
            driver,
            Arc::new(JobRegistry::new().with::<Tick>()),
        )
    }

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();

        assert_eq!(config.num_workers, 4);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(60));
        assert_eq!(config.worker.queue, "default");
    }

    #[test]
    fn test_worker_pool_config_builder() {
        let config = WorkerPoolConfig::new(0)
            .with_shutdown_timeout(Duration::from_secs(10))
            .with_worker(WorkerConfig::new("emails"));

        assert_eq!(config.num_workers, 1);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(config.worker.queue, "emails");
    }

    #[test]
    fn test_pool_error_display() {
        assert_eq!(PoolError::AlreadyRunning.to_string(), "Pool is already running");
        assert_eq!(PoolError::NotRunning.to_string(), "Pool is not running");
        assert!(PoolError::ShutdownTimeout(Duration::from_secs(30))
            .to_string()
            .contains("30s"));
    }

    #[tokio::test]
    async fn test_pool_drains_queue_and_shuts_down() {
        let queue = Arc::new(MemoryQueue::new());
        for n in 0..20 {
            let payload = JobRecord::from_job(&Tick { n }).unwrap().to_payload().unwrap();
            queue.push(&payload, "default", 0).await.unwrap();
        }
        let mut pool = pool(
            &queue,
            3,
            WorkerConfig::default().with_sleep(Duration::from_millis(10)),
        );

        pool.start().unwrap();
        assert!(pool.is_running());
        assert!(matches!(pool.start(), Err(PoolError::AlreadyRunning)));

        for _ in 0..200 {
            if pool.stats().completed == 20 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stats = pool.shutdown().await.unwrap();
        assert_eq!(stats.completed, 20);
        assert_eq!(queue.size("default").await.unwrap(), 0);
        assert!(!pool.is_running());
        assert!(matches!(pool.shutdown().await, Err(PoolError::NotRunning)));
    }

    #[tokio::test]
    async fn test_run_until_returns_when_workers_finish() {
        let queue = Arc::new(MemoryQueue::new());
        let mut pool = pool(
            &queue,
            2,
            WorkerConfig::default()
                .with_sleep(Duration::from_millis(10))
                .with_max_time(Duration::from_millis(50)),
        );

        let stats = pool
            .run_until(std::future::pending::<()>())
            .await
            .unwrap();

        assert_eq!(stats.processed, 0);
        assert!(!pool.is_running());
    }

    #[tokio::test]
    async fn test_run_until_stops_on_signal() {
        let queue = Arc::new(MemoryQueue::new());
        let mut pool = pool(
            &queue,
            2,
            WorkerConfig::default().with_sleep(Duration::from_millis(10)),
        );

        let stats = pool
            .run_until(tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();

        assert_eq!(stats.processed, 0);
        assert!(!pool.is_running());
    }
}
