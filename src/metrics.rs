//! Prometheus metrics for queue processing.
//!
//! Metrics are opt-in: nothing is recorded until `init_metrics` has run, so
//! library users who do not scrape pay only an `OnceLock` lookup per event.
//!
//! # Example
//!
//! ```ignore
//! use queue_forge::metrics::{init_metrics, export_metrics};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! // ... run workers ...
//! println!("{}", export_metrics());
//! ```

use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

/// Registry and collectors, created together by `init_metrics`.
pub struct QueueMetrics {
    pub registry: Registry,
    /// Processed entries, labeled by queue and outcome.
    pub jobs_total: CounterVec,
    /// Handler duration in seconds, labeled by queue.
    pub job_duration: HistogramVec,
    /// Entries waiting in a queue, labeled by queue.
    pub queue_depth: GaugeVec,
    /// Handlers currently running.
    pub jobs_in_progress: Gauge,
    /// Worker loops currently running.
    pub active_workers: Gauge,
}

impl QueueMetrics {
    fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let jobs_total = CounterVec::new(
            Opts::new("queue_forge_jobs_total", "Total number of processed queue entries"),
            &["queue", "outcome"],
        )?;

        let job_duration = HistogramVec::new(
            HistogramOpts::new(
                "queue_forge_job_duration_seconds",
                "Job handler duration in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0]),
            &["queue"],
        )?;

        let queue_depth = GaugeVec::new(
            Opts::new("queue_forge_queue_depth", "Number of entries waiting in a queue"),
            &["queue"],
        )?;

        let jobs_in_progress = Gauge::new(
            "queue_forge_jobs_in_progress",
            "Number of job handlers currently running",
        )?;

        let active_workers = Gauge::new("queue_forge_active_workers", "Number of running workers")?;

        registry.register(Box::new(jobs_total.clone()))?;
        registry.register(Box::new(job_duration.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(jobs_in_progress.clone()))?;
        registry.register(Box::new(active_workers.clone()))?;

        Ok(Self {
            registry,
            jobs_total,
            job_duration,
            queue_depth,
            jobs_in_progress,
            active_workers,
        })
    }
}

/// Process-wide metrics, set once.
pub static METRICS: OnceLock<QueueMetrics> = OnceLock::new();

/// Creates and registers every metric.
///
/// Calling it again after a successful call is a no-op. When two callers
/// race, one bundle wins and the other is dropped whole.
///
/// # Errors
///
/// Returns a `prometheus::Error` if a metric cannot be created or registered.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    if METRICS.set(QueueMetrics::new()?).is_ok() {
        tracing::info!("Prometheus metrics initialized");
    }

    Ok(())
}

/// Records the outcome of one processed entry.
pub fn record_outcome(queue: &str, outcome: &str) {
    if let Some(metrics) = METRICS.get() {
        metrics.jobs_total.with_label_values(&[queue, outcome]).inc();
    }
}

/// Records how long a handler ran.
pub fn record_duration(queue: &str, duration: Duration) {
    if let Some(metrics) = METRICS.get() {
        metrics
            .job_duration
            .with_label_values(&[queue])
            .observe(duration.as_secs_f64());
    }
}

/// Sets the observed depth of a queue.
pub fn set_queue_depth(queue: &str, depth: u64) {
    if let Some(metrics) = METRICS.get() {
        metrics.queue_depth.with_label_values(&[queue]).set(depth as f64);
    }
}

pub fn job_started() {
    if let Some(metrics) = METRICS.get() {
        metrics.jobs_in_progress.inc();
    }
}

pub fn job_finished() {
    if let Some(metrics) = METRICS.get() {
        metrics.jobs_in_progress.dec();
    }
}

pub fn worker_started() {
    if let Some(metrics) = METRICS.get() {
        metrics.active_workers.inc();
    }
}

pub fn worker_stopped() {
    if let Some(metrics) = METRICS.get() {
        metrics.active_workers.dec();
    }
}

/// Exports all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(metrics) = METRICS.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = metrics.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(METRICS.get().is_some());
    }

    #[test]
    fn test_concurrent_init_shares_one_registry() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| init_metrics().is_ok()))
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }

        record_outcome("metrics-race", "failed");
        let metrics = METRICS.get().unwrap();
        let exported = export_metrics();
        assert!(exported.contains(r#"queue="metrics-race""#));
        assert_eq!(
            metrics
                .jobs_total
                .with_label_values(&["metrics-race", "failed"])
                .get(),
            1.0
        );
    }

    #[test]
    fn test_recorded_metrics_are_exported() {
        init_metrics().unwrap();

        record_outcome("metrics-test", "completed");
        record_duration("metrics-test", Duration::from_millis(20));
        set_queue_depth("metrics-test", 4);

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("queue_forge_jobs_total"));
        assert!(metrics.contains(r#"queue="metrics-test""#));
        assert!(metrics.contains("queue_forge_queue_depth"));
    }
}
