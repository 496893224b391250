//! Job definitions.
//!
//! A job is a serde-serialisable value with an async handler. This module
//! provides:
//!
//! - `Job`: the trait application code implements
//! - `JobRecord`: the JSON envelope stored by every queue driver
//! - `JobRegistry`: maps class identities back to job types at claim time
//! - `JobContext`: what a handler knows about the claim it runs under
//!
//! # Example
//!
//! ```rust,ignore
//! use queue_forge::job::{Job, JobContext, JobRegistry};
//! use queue_forge::JobError;
//!
//! #[derive(Serialize, Deserialize)]
//! struct ResizeImage {
//!     path: String,
//!     width: u32,
//! }
//!
//! #[async_trait::async_trait]
//! impl Job for ResizeImage {
//!     const CLASS: &'static str = "images.resize";
//!
//!     fn queue(&self) -> &str {
//!         "images"
//!     }
//!
//!     async fn handle(&self, ctx: &JobContext) -> Result<(), JobError> {
//!         resize(&self.path, self.width).await.map_err(JobError::failed)
//!     }
//! }
//!
//! let mut registry = JobRegistry::new();
//! registry.register::<ResizeImage>();
//! ```

pub mod record;
pub mod registry;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::error;

use crate::error::JobError;
use crate::queue::EntryId;

pub use record::{
    JobRecord, DEFAULT_MAX_TRIES, DEFAULT_QUEUE, DEFAULT_RETRY_AFTER_SECONDS,
    DEFAULT_TIMEOUT_SECONDS,
};
pub use registry::{DecodedJob, JobRegistry};

/// A unit of deferred work.
///
/// The job's serialized fields become the envelope's `data` map, so they
/// must serialize to a JSON object (a struct with named fields).
#[async_trait]
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Class identity used to find this type again when the job is claimed.
    const CLASS: &'static str;

    /// Maximum number of times the job may be claimed.
    fn max_tries(&self) -> u32 {
        DEFAULT_MAX_TRIES
    }

    /// Seconds the handler may run before the attempt counts as failed.
    fn timeout_seconds(&self) -> u64 {
        DEFAULT_TIMEOUT_SECONDS
    }

    /// Seconds to wait before a failed attempt becomes claimable again.
    fn retry_after_seconds(&self) -> u64 {
        DEFAULT_RETRY_AFTER_SECONDS
    }

    /// Queue the job is pushed to unless the caller names another.
    fn queue(&self) -> &str {
        DEFAULT_QUEUE
    }

    /// Executes the job.
    async fn handle(&self, ctx: &JobContext) -> Result<(), JobError>;

    /// Called once when the job fails permanently.
    async fn failed(&self, ctx: &JobContext, error: &JobError) {
        error!(
            class = Self::CLASS,
            entry_id = %ctx.entry_id,
            attempts = ctx.attempts,
            error = %error,
            "Job failed permanently"
        );
    }
}

/// Object-safe view of a decoded job, produced by `JobRegistry`.
#[async_trait]
pub trait RunnableJob: Send + Sync {
    fn class_identity(&self) -> &'static str;

    /// Re-encodes the job with its own policy.
    fn to_record(&self) -> Result<JobRecord, JobError>;

    async fn run(&self, ctx: &JobContext) -> Result<(), JobError>;

    async fn on_failure(&self, ctx: &JobContext, error: &JobError);
}

#[async_trait]
impl<J: Job> RunnableJob for J {
    fn class_identity(&self) -> &'static str {
        J::CLASS
    }

    fn to_record(&self) -> Result<JobRecord, JobError> {
        JobRecord::from_job(self)
    }

    async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
        Job::handle(self, ctx).await
    }

    async fn on_failure(&self, ctx: &JobContext, error: &JobError) {
        Job::failed(self, ctx, error).await
    }
}

/// Claim metadata handed to a running job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    /// Backend identity of the claimed entry.
    pub entry_id: EntryId,
    /// Queue the entry was claimed from.
    pub queue: String,
    /// Claim count including the current one.
    pub attempts: u32,
    /// Effective attempt ceiling for this claim.
    pub max_tries: u32,
}

impl JobContext {
    /// Returns whether this is the last attempt the job will get.
    pub fn is_last_attempt(&self) -> bool {
        self.attempts >= self.max_tries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct Greeting {
        name: String,
    }

    #[async_trait]
    impl Job for Greeting {
        const CLASS: &'static str = "tests.greeting";

        async fn handle(&self, _ctx: &JobContext) -> Result<(), JobError> {
            if self.name.is_empty() {
                return Err(JobError::failed("empty name"));
            }
            Ok(())
        }
    }

    fn context(attempts: u32, max_tries: u32) -> JobContext {
        JobContext {
            entry_id: EntryId::Row(7),
            queue: "default".to_string(),
            attempts,
            max_tries,
        }
    }

    #[test]
    fn test_job_defaults() {
        let job = Greeting {
            name: "ada".to_string(),
        };

        assert_eq!(job.max_tries(), 3);
        assert_eq!(job.timeout_seconds(), 60);
        assert_eq!(job.retry_after_seconds(), 0);
        assert_eq!(job.queue(), "default");
    }

    #[tokio::test]
    async fn test_runnable_job_dispatches_to_handler() {
        let ok: Box<dyn RunnableJob> = Box::new(Greeting {
            name: "ada".to_string(),
        });
        let bad: Box<dyn RunnableJob> = Box::new(Greeting {
            name: String::new(),
        });

        assert_eq!(ok.class_identity(), "tests.greeting");
        assert_eq!(ok.to_record().unwrap().data["name"], "ada");
        assert!(ok.run(&context(1, 3)).await.is_ok());
        assert_eq!(
            bad.run(&context(1, 3)).await,
            Err(JobError::Failed("empty name".to_string()))
        );
    }

    #[test]
    fn test_job_context_last_attempt() {
        assert!(!context(1, 3).is_last_attempt());
        assert!(context(3, 3).is_last_attempt());
        assert!(context(4, 3).is_last_attempt());
    }
}
