//! The worker engine: claims entries one at a time and drives each to its
//! terminal or retry state.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::config::WorkerConfig;
use super::stats::{JobOutcome, StatsSnapshot, WorkerStats};
use crate::error::{JobError, QueueError};
use crate::job::{DecodedJob, JobContext, JobRegistry, DEFAULT_TIMEOUT_SECONDS};
use crate::metrics;
use crate::queue::{QueueDriver, QueueEntry};

const RUNNING: u8 = 0;
const STOPPING: u8 = 1;
const STOPPED: u8 = 2;

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    /// Stop requested; the job in flight, if any, still runs to the end.
    Stopping,
    Stopped,
}

#[derive(Debug, Default)]
struct ControlState {
    state: AtomicU8,
    paused: AtomicBool,
    wake: Notify,
}

/// Cloneable handle for stopping, pausing and resuming a worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerControl {
    inner: Arc<ControlState>,
}

impl WorkerControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a graceful stop, observed between jobs.
    pub fn stop(&self) {
        let _ = self.inner.state.compare_exchange(
            RUNNING,
            STOPPING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.inner.wake.notify_waiters();
    }

    /// Suspends polling without stopping.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.wake.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopping(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) != RUNNING
    }

    pub fn state(&self) -> WorkerState {
        match self.inner.state.load(Ordering::SeqCst) {
            RUNNING => WorkerState::Running,
            STOPPING => WorkerState::Stopping,
            _ => WorkerState::Stopped,
        }
    }

    fn mark_stopped(&self) {
        self.inner.state.store(STOPPED, Ordering::SeqCst);
    }

    /// Sleeps for `duration`, waking early on stop or resume.
    async fn idle(&self, duration: Duration) {
        let woken = self.inner.wake.notified();
        if self.is_stopping() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = woken => {}
        }
    }
}

/// A single worker engine.
///
/// Processes one job at a time; run several workers (or processes) for
/// parallelism.
pub struct Worker {
    id: String,
    driver: Arc<dyn QueueDriver>,
    registry: Arc<JobRegistry>,
    config: WorkerConfig,
    control: WorkerControl,
    stats: Arc<WorkerStats>,
}

impl Worker {
    /// Creates a worker claiming from `driver`.
    pub fn new(
        id: impl Into<String>,
        driver: Arc<dyn QueueDriver>,
        registry: Arc<JobRegistry>,
        config: WorkerConfig,
    ) -> Self {
        let id = id.into();

        if let Some(connection) = config.connection {
            if connection != driver.connection() {
                warn!(
                    worker_id = %id,
                    configured = %connection,
                    serving = %driver.connection(),
                    "Worker claims from a different connection than configured"
                );
            }
        }

        if let Some(lease) = config.lease {
            let timeout = config
                .timeout
                .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS));
            if lease <= timeout {
                warn!(
                    worker_id = %id,
                    lease_secs = lease.as_secs(),
                    timeout_secs = timeout.as_secs(),
                    "Lease does not exceed the job timeout; running jobs may be reclaimed"
                );
            }
        }

        Self {
            id,
            driver,
            registry,
            config,
            control: WorkerControl::new(),
            stats: Arc::new(WorkerStats::new()),
        }
    }

    /// Records outcomes into shared counters instead of private ones.
    pub fn with_stats(mut self, stats: Arc<WorkerStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Uses an externally created control handle.
    pub fn with_control(mut self, control: WorkerControl) -> Self {
        self.control = control;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn control(&self) -> WorkerControl {
        self.control.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Main loop. Returns once a stop is requested or a limit is reached.
    pub async fn run(&self) -> StatsSnapshot {
        let started = Instant::now();
        let mut handled: u64 = 0;
        let mut last_reclaim = Instant::now();

        info!(
            worker_id = %self.id,
            queue = %self.config.queue,
            connection = %self.driver.connection(),
            "Worker started"
        );

        metrics::worker_started();

        if self.config.lease.is_some() {
            self.reclaim_expired().await;
        }

        loop {
            if self.control.is_stopping() {
                info!(worker_id = %self.id, "Worker received stop request");
                break;
            }

            if let Some(max_jobs) = self.config.max_jobs {
                if handled >= max_jobs {
                    info!(worker_id = %self.id, max_jobs = max_jobs, "Job limit reached");
                    self.control.stop();
                    break;
                }
            }

            if let Some(max_time) = self.config.max_time {
                if started.elapsed() >= max_time {
                    info!(
                        worker_id = %self.id,
                        max_time_secs = max_time.as_secs(),
                        "Time limit reached"
                    );
                    self.control.stop();
                    break;
                }
            }

            if self.control.is_paused() {
                self.control.idle(self.config.sleep).await;
                continue;
            }

            if let Some(lease) = self.config.lease {
                if last_reclaim.elapsed() >= lease {
                    self.reclaim_expired().await;
                    last_reclaim = Instant::now();
                }
            }

            match self.run_next().await {
                Ok(Some(_)) => handled += 1,
                Ok(None) => {
                    debug!(worker_id = %self.id, "No jobs available");
                    self.control.idle(self.config.sleep).await;
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to claim job");
                    self.control.idle(self.config.sleep).await;
                }
            }
        }

        metrics::worker_stopped();
        self.control.mark_stopped();
        let stats = self.stats.snapshot();
        info!(
            worker_id = %self.id,
            processed = stats.processed,
            completed = stats.completed,
            failed = stats.failed,
            "Worker stopped"
        );
        stats
    }

    /// Claims and processes at most one entry.
    ///
    /// Returns `Ok(None)` when the queue had nothing claimable.
    pub async fn run_next(&self) -> Result<Option<JobOutcome>, QueueError> {
        match self.driver.pop(&self.config.queue).await? {
            Some(entry) => Ok(Some(self.process(entry).await)),
            None => Ok(None),
        }
    }

    /// Drives a claimed entry to completion, retry, failure or discard.
    ///
    /// Never returns an error: backend failures while settling the entry
    /// are logged and the entry is left for the lease policy to recover.
    pub async fn process(&self, entry: QueueEntry) -> JobOutcome {
        let outcome = match self.registry.decode(&entry.payload) {
            Ok(decoded) => self.execute(&entry, decoded).await,
            Err(e) => {
                error!(
                    worker_id = %self.id,
                    entry_id = %entry.id,
                    error = %e,
                    "Discarding job with unrecoverable payload"
                );
                self.delete(&entry).await;
                JobOutcome::Discarded
            }
        };

        self.stats.record(outcome);
        metrics::record_outcome(&self.config.queue, outcome.as_str());
        outcome
    }

    async fn execute(&self, entry: &QueueEntry, decoded: DecodedJob) -> JobOutcome {
        let DecodedJob { record, job } = decoded;
        let max_tries = self.config.effective_max_tries(record.max_tries);
        let timeout = self.config.effective_timeout(record.timeout());
        let ctx = JobContext {
            entry_id: entry.id.clone(),
            queue: self.config.queue.clone(),
            attempts: entry.attempts,
            max_tries,
        };

        if let Some(lease) = self.config.lease {
            if timeout >= lease {
                warn!(
                    worker_id = %self.id,
                    entry_id = %entry.id,
                    class = %record.class_identity,
                    timeout_secs = timeout.as_secs(),
                    lease_secs = lease.as_secs(),
                    "Job timeout reaches the lease; it may be reclaimed while running"
                );
            }
        }

        if entry.attempts > max_tries {
            let error = JobError::MaxTriesExceeded(max_tries);
            job.on_failure(&ctx, &error).await;
            self.fail(entry, &error).await;
            return JobOutcome::Failed;
        }

        info!(
            worker_id = %self.id,
            entry_id = %entry.id,
            class = %record.class_identity,
            attempt = entry.attempts,
            "Processing job"
        );

        metrics::job_started();
        let start = Instant::now();
        let run = AssertUnwindSafe(job.run(&ctx)).catch_unwind();
        let result = match tokio::time::timeout(timeout, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(JobError::failed(format!(
                "panicked: {}",
                panic_message(&*panic)
            ))),
            Err(_) => Err(JobError::Timeout(timeout)),
        };
        let duration = start.elapsed();
        metrics::job_finished();
        metrics::record_duration(&self.config.queue, duration);

        match result {
            Ok(()) => {
                self.delete(entry).await;
                info!(
                    worker_id = %self.id,
                    entry_id = %entry.id,
                    duration_ms = duration.as_millis() as u64,
                    "Job completed successfully"
                );
                JobOutcome::Completed
            }
            Err(error) if entry.attempts < max_tries => {
                warn!(
                    worker_id = %self.id,
                    entry_id = %entry.id,
                    error = %error,
                    attempt = entry.attempts,
                    remaining_attempts = max_tries - entry.attempts,
                    "Job failed, releasing for retry"
                );
                if let Err(e) = self
                    .driver
                    .release(entry, &self.config.queue, record.retry_after_seconds)
                    .await
                {
                    error!(
                        worker_id = %self.id,
                        entry_id = %entry.id,
                        error = %e,
                        "Failed to release job"
                    );
                }
                JobOutcome::Released
            }
            Err(error) => {
                job.on_failure(&ctx, &error).await;
                self.fail(entry, &error).await;
                JobOutcome::Failed
            }
        }
    }

    /// Writes the failed record, then removes the entry from the live queue.
    async fn fail(&self, entry: &QueueEntry, error: &JobError) {
        error!(
            worker_id = %self.id,
            entry_id = %entry.id,
            attempts = entry.attempts,
            error = %error,
            "Job exhausted its attempts"
        );

        let connection = self.driver.connection();
        if let Err(e) = self
            .driver
            .mark_failed(
                connection.as_str(),
                &self.config.queue,
                &entry.payload,
                &failure_text(error),
            )
            .await
        {
            error!(
                worker_id = %self.id,
                entry_id = %entry.id,
                error = %e,
                "Failed to record failed job"
            );
        }

        self.delete(entry).await;
    }

    async fn delete(&self, entry: &QueueEntry) {
        if let Err(e) = self.driver.delete(entry, &self.config.queue).await {
            error!(
                worker_id = %self.id,
                entry_id = %entry.id,
                error = %e,
                "Failed to delete job"
            );
        }
    }

    async fn reclaim_expired(&self) {
        let Some(lease) = self.config.lease else {
            return;
        };
        match self.driver.reclaim(&self.config.queue, lease).await {
            Ok(0) => {}
            Ok(reclaimed) => info!(
                worker_id = %self.id,
                reclaimed = reclaimed,
                "Recovered jobs with expired reservations"
            ),
            Err(e) => warn!(worker_id = %self.id, error = %e, "Failed to reclaim jobs"),
        }
    }
}

/// Text stored in the failed record's exception column.
fn failure_text(error: &JobError) -> String {
    format!("{}: {}", error.kind(), error)
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
