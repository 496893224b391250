//! Queue storage drivers.
//!
//! Every backend implements `QueueDriver`, the contract the manager pushes
//! through and the worker claims from:
//!
//! - **RedisQueue**: ready list, delayed sorted set and reserved list per
//!   queue; every transition is a Lua script so it is atomic server-side
//! - **DatabaseQueue**: PostgreSQL rows claimed with `FOR UPDATE SKIP LOCKED`
//! - **MemoryQueue**: the Redis layout kept in process memory
//! - **QueueManager**: resolves a connection name to a driver, falling back
//!   from Redis to the database when Redis is not available
//!
//! # Entry lifecycle
//!
//! ```text
//!   push ──► ready ──pop──► reserved ──delete──► gone
//!              ▲               │
//!              └───release─────┤
//!              └───reclaim─────┘ (lease expired)
//!                              └──mark_failed + delete──► failed store
//! ```
//!
//! `pop` increments `attempts` by exactly one and is the only operation that
//! changes it. `release` and `delete` act only on the claim that returned
//! the entry: once an entry has been reclaimed and claimed again, settling
//! the older claim is a no-op.

pub mod database;
pub mod manager;
pub mod memory;
pub mod migrations;
pub mod redis;
pub mod schema;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Connection;
use crate::error::QueueError;

pub use self::database::DatabaseQueue;
pub use self::manager::QueueManager;
pub use self::memory::MemoryQueue;
pub use self::migrations::MigrationRunner;
pub use self::redis::RedisQueue;

/// Backend-assigned identity of a queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryId {
    /// Monotonic row id (relational backend).
    Row(i64),
    /// `"{queue}:{micros}:{suffix}"` key (key-value backends).
    Key(String),
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryId::Row(id) => write!(f, "{}", id),
            EntryId::Key(key) => f.write_str(key),
        }
    }
}

impl From<i64> for EntryId {
    fn from(id: i64) -> Self {
        EntryId::Row(id)
    }
}

impl From<String> for EntryId {
    fn from(key: String) -> Self {
        EntryId::Key(key)
    }
}

impl From<&str> for EntryId {
    fn from(key: &str) -> Self {
        EntryId::Key(key.to_string())
    }
}

/// A claimed entry as returned by `QueueDriver::pop`.
///
/// `id` together with `attempts` identifies the claim; drivers settle an
/// entry only while that claim is the current one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    /// Serialized `JobRecord`.
    pub payload: String,
    /// Claim count, including the claim that returned this entry.
    pub attempts: u32,
}

impl QueueEntry {
    /// Claim handle for an entry known only by id, e.g. from logs.
    pub fn claim(id: impl Into<EntryId>, attempts: u32) -> Self {
        Self {
            id: id.into(),
            payload: String::new(),
            attempts,
        }
    }
}

/// A job that exhausted its attempts, kept for manual inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJob {
    /// Connection the job was running on.
    pub connection: String,
    pub queue: String,
    /// Original entry payload.
    pub payload: String,
    /// Failure kind, message and context.
    pub exception: String,
    pub failed_at: DateTime<Utc>,
}

impl FailedJob {
    pub fn new(
        connection: impl Into<String>,
        queue: impl Into<String>,
        payload: impl Into<String>,
        exception: impl Into<String>,
    ) -> Self {
        Self {
            connection: connection.into(),
            queue: queue.into(),
            payload: payload.into(),
            exception: exception.into(),
            failed_at: Utc::now(),
        }
    }
}

/// Storage contract shared by every backend.
///
/// All write paths must be atomic with respect to other workers acting on the
/// same entry; no in-process locking is assumed.
#[async_trait]
pub trait QueueDriver: Send + Sync {
    /// Connection name this driver serves.
    fn connection(&self) -> Connection;

    /// Inserts a new entry, claimable after `delay` seconds.
    async fn push(&self, payload: &str, queue: &str, delay: u64) -> Result<(), QueueError>;

    /// Inserts several immediately-ready entries.
    async fn push_bulk(&self, payloads: &[String], queue: &str) -> Result<(), QueueError> {
        for payload in payloads {
            self.push(payload, queue, 0).await?;
        }
        Ok(())
    }

    /// Claims the oldest ready entry, incrementing its attempts.
    ///
    /// Returns `Ok(None)` when nothing is claimable. Never returns the same
    /// entry to two concurrent callers.
    async fn pop(&self, queue: &str) -> Result<Option<QueueEntry>, QueueError>;

    /// Returns a reserved entry to ready after `delay` seconds, keeping its
    /// attempts.
    ///
    /// Matches on both id and attempts, so a claim superseded by a later
    /// one releases nothing.
    async fn release(
        &self,
        entry: &QueueEntry,
        queue: &str,
        delay: u64,
    ) -> Result<(), QueueError>;

    /// Removes a reserved entry for good. Deleting a missing or superseded
    /// entry is not an error.
    async fn delete(&self, entry: &QueueEntry, queue: &str) -> Result<(), QueueError>;

    /// Durably records a failed job.
    async fn mark_failed(
        &self,
        connection: &str,
        queue: &str,
        payload: &str,
        exception: &str,
    ) -> Result<(), QueueError>;

    /// Number of non-reserved entries in the queue.
    async fn size(&self, queue: &str) -> Result<u64, QueueError>;

    /// Returns entries reserved for longer than `lease` to ready.
    ///
    /// Returns the number of entries reclaimed.
    async fn reclaim(&self, queue: &str, lease: Duration) -> Result<u64, QueueError>;
}

/// Longest delay a push or release accepts (roughly a century).
const MAX_DELAY_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

/// Point in time `delay` seconds from now.
pub(crate) fn available_at(delay: u64) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(delay.min(MAX_DELAY_SECONDS) as i64)
}

/// Converts a lease into a chrono duration, saturating on overflow.
pub(crate) fn lease_duration(lease: Duration) -> chrono::Duration {
    chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX)
}

/// Generates a key-value entry id: queue name plus a high-resolution timestamp.
pub(crate) fn new_entry_key(queue: &str) -> String {
    let micros = Utc::now().timestamp_micros();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}:{}:{}", queue, micros, &suffix[..8])
}
