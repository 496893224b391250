//! Error types for queue-forge operations.
//!
//! Two families of errors exist:
//! - `QueueError`: the storage backend or the configuration could not
//!   serve a request (push, claim, release, delete, fail, size)
//! - `JobError`: a single job could not be decoded or did not finish;
//!   the worker loop converts these into release, dead-letter or discard

use std::time::Duration;

use thiserror::Error;

/// Errors raised by queue drivers and the queue manager.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to a backend.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Database operation failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("Migration failed: {0}")]
    Migration(String),

    /// The requested connection name is not one this crate knows.
    #[error("Unknown queue connection: {0}")]
    UnknownConnection(String),

    /// No configured backend can serve the request.
    #[error("Queue connection unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid job: {0}")]
    InvalidJob(#[from] JobError),
}

/// Errors describing why a single job did not complete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    /// The handler reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The handler did not finish within its deadline.
    #[error("Job timed out after {0:?}")]
    Timeout(Duration),

    /// The entry was claimed more often than its attempt ceiling allows.
    #[error("Max tries ({0}) exceeded")]
    MaxTriesExceeded(u32),

    /// No handler is registered under the payload's class identity.
    #[error("Unknown job class '{0}'")]
    UnknownClass(String),

    /// The payload is not a valid job envelope.
    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),
}

impl JobError {
    /// Creates a handler failure from any displayable error.
    pub fn failed(message: impl std::fmt::Display) -> Self {
        JobError::Failed(message.to_string())
    }

    /// Returns whether the job identity could not be recovered from its payload.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, JobError::UnknownClass(_) | JobError::InvalidPayload(_))
    }

    /// Short name of the failure kind, stored with failed job records.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Failed(_) => "JobFailed",
            JobError::Timeout(_) => "JobTimeout",
            JobError::MaxTriesExceeded(_) => "MaxTriesExceeded",
            JobError::UnknownClass(_) => "UnknownClass",
            JobError::InvalidPayload(_) => "InvalidPayload",
        }
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        JobError::InvalidPayload(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_error_display() {
        let err = QueueError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("refused"));

        let err = QueueError::UnknownConnection("sqs".to_string());
        assert!(err.to_string().contains("sqs"));

        let err = QueueError::Unavailable("database disabled".to_string());
        assert!(err.to_string().contains("unavailable"));
    }

    #[test]
    fn test_job_error_display() {
        let err = JobError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Job timed out after 30s");

        let err = JobError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Job timed out after 250ms");

        let err = JobError::MaxTriesExceeded(3);
        assert!(err.to_string().contains('3'));

        let err = JobError::failed("smtp down");
        assert_eq!(err.to_string(), "smtp down");
    }

    #[test]
    fn test_job_error_corrupt_family() {
        assert!(JobError::UnknownClass("x".into()).is_corrupt());
        assert!(JobError::InvalidPayload("x".into()).is_corrupt());
        assert!(!JobError::Failed("x".into()).is_corrupt());
        assert!(!JobError::Timeout(Duration::from_secs(1)).is_corrupt());
        assert!(!JobError::MaxTriesExceeded(1).is_corrupt());
    }

    #[test]
    fn test_json_error_becomes_invalid_payload() {
        let err = serde_json::from_str::<serde_json::Value>("{not json")
            .map_err(JobError::from)
            .unwrap_err();
        assert!(err.is_corrupt());
        assert_eq!(err.kind(), "InvalidPayload");
    }
}
