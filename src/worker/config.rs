//! Worker configuration.

use std::time::Duration;

use crate::config::Connection;
use crate::job::DEFAULT_QUEUE;

/// Default idle sleep between empty polls.
pub const DEFAULT_SLEEP: Duration = Duration::from_secs(3);

/// Settings for a single worker engine.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue to claim from.
    pub queue: String,
    /// Connection to claim from; `None` uses the manager's default.
    pub connection: Option<Connection>,
    /// Stop after this many claimed entries.
    pub max_jobs: Option<u64>,
    /// Stop after running this long.
    pub max_time: Option<Duration>,
    /// Sleep between polls when the queue is empty or paused.
    pub sleep: Duration,
    /// Attempt ceiling overriding every job's own.
    pub max_tries: Option<u32>,
    /// Handler deadline overriding every job's own.
    pub timeout: Option<Duration>,
    /// Reservations older than this are returned to the queue.
    pub lease: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            connection: None,
            max_jobs: None,
            max_time: None,
            sleep: DEFAULT_SLEEP,
            max_tries: None,
            timeout: None,
            lease: None,
        }
    }
}

impl WorkerConfig {
    /// Creates a configuration for the given queue.
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..Default::default()
        }
    }

    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn with_max_jobs(mut self, max_jobs: u64) -> Self {
        self.max_jobs = Some(max_jobs);
        self
    }

    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }

    pub fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    /// Overrides the attempt ceiling (at least 1).
    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = Some(max_tries.max(1));
        self
    }

    /// Overrides the handler deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enables reclaiming of reservations older than `lease`.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Returns the attempt ceiling for a job whose envelope allows `job_max_tries`.
    pub fn effective_max_tries(&self, job_max_tries: u32) -> u32 {
        self.max_tries.unwrap_or(job_max_tries).max(1)
    }

    /// Returns the handler deadline for a job whose envelope allows `job_timeout`.
    pub fn effective_timeout(&self, job_timeout: Duration) -> Duration {
        self.timeout.unwrap_or(job_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();

        assert_eq!(config.queue, "default");
        assert_eq!(config.connection, None);
        assert_eq!(config.max_jobs, None);
        assert_eq!(config.sleep, Duration::from_secs(3));
        assert_eq!(config.lease, None);
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::new("emails")
            .with_connection(Connection::Database)
            .with_max_jobs(10)
            .with_max_time(Duration::from_secs(600))
            .with_sleep(Duration::from_millis(250))
            .with_max_tries(0)
            .with_timeout(Duration::from_secs(5))
            .with_lease(Duration::from_secs(90));

        assert_eq!(config.queue, "emails");
        assert_eq!(config.connection, Some(Connection::Database));
        assert_eq!(config.max_jobs, Some(10));
        assert_eq!(config.max_time, Some(Duration::from_secs(600)));
        assert_eq!(config.sleep, Duration::from_millis(250));
        assert_eq!(config.max_tries, Some(1));
        assert_eq!(config.lease, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let plain = WorkerConfig::default();
        let overridden = WorkerConfig::default()
            .with_max_tries(5)
            .with_timeout(Duration::from_secs(2));

        assert_eq!(plain.effective_max_tries(3), 3);
        assert_eq!(plain.effective_timeout(Duration::from_secs(60)), Duration::from_secs(60));
        assert_eq!(overridden.effective_max_tries(3), 5);
        assert_eq!(
            overridden.effective_timeout(Duration::from_secs(60)),
            Duration::from_secs(2)
        );
    }
}
