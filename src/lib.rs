//! queue-forge: background job queue with pluggable storage backends.
//!
//! Jobs are serialized into a JSON envelope, stored by a `QueueDriver`
//! (Redis, PostgreSQL or in-process memory) and executed by `Worker`
//! engines with per-job retry, timeout and dead-lettering.

// Core modules
pub mod cli;
pub mod config;
pub mod error;
pub mod job;
pub mod jobs;
pub mod metrics;
pub mod queue;
pub mod worker;

pub use config::{Connection, QueueConfig};
pub use error::{JobError, QueueError};
pub use job::{Job, JobContext, JobRecord, JobRegistry};
pub use queue::{
    DatabaseQueue, EntryId, FailedJob, MemoryQueue, QueueDriver, QueueEntry, QueueManager,
    RedisQueue,
};
pub use worker::{Worker, WorkerConfig, WorkerControl, WorkerPool, WorkerPoolConfig};
