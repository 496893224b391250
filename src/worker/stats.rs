//! Worker statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of processing one claimed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Handler succeeded; entry deleted.
    Completed,
    /// Handler failed with attempts left; entry released for retry.
    Released,
    /// Attempts exhausted; failed record written and entry deleted.
    Failed,
    /// Payload could not be decoded; entry deleted without a record.
    Discarded,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Released => "released",
            JobOutcome::Failed => "failed",
            JobOutcome::Discarded => "discarded",
        }
    }
}

/// Counters shared by every worker that records into them.
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    completed: AtomicU64,
    released: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: JobOutcome) {
        self.processed.fetch_add(1, Ordering::SeqCst);
        let counter = match outcome {
            JobOutcome::Completed => &self.completed,
            JobOutcome::Released => &self.released,
            JobOutcome::Failed => &self.failed,
            JobOutcome::Discarded => &self.discarded,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            discarded: self.discarded.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time copy of `WorkerStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub completed: u64,
    pub released: u64,
    pub failed: u64,
    pub discarded: u64,
}

impl StatsSnapshot {
    /// Returns the share of processed entries that completed, as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        (self.completed as f64 / self.processed as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_each_outcome() {
        let stats = WorkerStats::new();
        stats.record(JobOutcome::Completed);
        stats.record(JobOutcome::Completed);
        stats.record(JobOutcome::Released);
        stats.record(JobOutcome::Failed);
        stats.record(JobOutcome::Discarded);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.processed, 5);
        assert_eq!(snapshot.completed, 2);
        assert_eq!(snapshot.released, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.discarded, 1);
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(JobOutcome::Completed.as_str(), "completed");
        assert_eq!(JobOutcome::Discarded.as_str(), "discarded");
    }

    #[test]
    fn test_success_rate() {
        let snapshot = StatsSnapshot {
            processed: 4,
            completed: 3,
            failed: 1,
            ..Default::default()
        };

        assert!((snapshot.success_rate() - 75.0).abs() < 0.001);
        assert_eq!(StatsSnapshot::default().success_rate(), 0.0);
    }
}
