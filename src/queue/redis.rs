//! Redis-backed queue driver.
//!
//! # Key layout
//!
//! For a prefix `p` and queue `q`:
//!
//! - `p:queue:q`: ready list (FIFO, `RPUSH` to enqueue, head is claimed)
//! - `p:queue:q:delayed`: sorted set, member = entry JSON, score = epoch
//!   seconds at which it becomes ready
//! - `p:queue:q:reserved`: in-flight ledger of claimed entries
//! - `p:queue:q:leases`: sorted set, member = entry id, score = claim time
//! - `p:queue:failed:q`: failed job records (when no database is attached)
//!
//! Entries are stored as `{"id": "...", "payload": "...", "attempts": n}`.
//!
//! # Atomicity
//!
//! Migration, claim, release, delete and reclaim are Lua scripts. Redis runs
//! a script without interleaving other commands, so a delayed entry is moved
//! to ready by at most one worker (the move only happens when its `ZREM`
//! succeeds) and the head of the ready list is claimed by exactly one caller.

use std::sync::Arc;
use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Script};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::database::DatabaseQueue;
use super::{new_entry_key, EntryId, FailedJob, QueueDriver, QueueEntry};
use crate::config::{Connection, DEFAULT_KEY_PREFIX};
use crate::error::QueueError;

const MIGRATE_LUA: &str = include_str!("lua/migrate.lua");
const POP_LUA: &str = include_str!("lua/pop.lua");
const RELEASE_LUA: &str = include_str!("lua/release.lua");
const DELETE_LUA: &str = include_str!("lua/delete.lua");
const RECLAIM_LUA: &str = include_str!("lua/reclaim.lua");

/// Maximum delayed entries moved to ready per claim.
const MIGRATE_BATCH: usize = 100;

/// Entry stored in the Redis lists and sorted sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RedisEntry {
    id: String,
    payload: String,
    #[serde(default)]
    attempts: u32,
}

/// Key names for one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueKeys {
    ready: String,
    delayed: String,
    reserved: String,
    leases: String,
    failed: String,
}

impl QueueKeys {
    fn new(prefix: &str, queue: &str) -> Self {
        let ready = format!("{}:queue:{}", prefix, queue);
        Self {
            delayed: format!("{}:delayed", ready),
            reserved: format!("{}:reserved", ready),
            leases: format!("{}:leases", ready),
            failed: format!("{}:queue:failed:{}", prefix, queue),
            ready,
        }
    }
}

struct Scripts {
    migrate: Script,
    pop: Script,
    release: Script,
    delete: Script,
    reclaim: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            migrate: Script::new(MIGRATE_LUA),
            pop: Script::new(POP_LUA),
            release: Script::new(RELEASE_LUA),
            delete: Script::new(DELETE_LUA),
            reclaim: Script::new(RECLAIM_LUA),
        }
    }
}

/// Queue driver backed by Redis.
pub struct RedisQueue {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    prefix: String,
    scripts: Scripts,
    /// Where failed jobs go when set; otherwise a Redis list.
    failed_store: Option<Arc<DatabaseQueue>>,
}

impl RedisQueue {
    /// Connects to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `prefix` - Prefix for every key this driver touches
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, prefix: &str) -> Result<Self, QueueError> {
        let client = ::redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, prefix))
    }

    /// Creates a driver from an existing connection manager.
    pub fn from_connection(redis: ConnectionManager, prefix: &str) -> Self {
        let prefix = if prefix.is_empty() {
            DEFAULT_KEY_PREFIX
        } else {
            prefix
        };
        Self {
            redis,
            prefix: prefix.to_string(),
            scripts: Scripts::load(),
            failed_store: None,
        }
    }

    /// Records failed jobs in the database instead of a Redis list.
    pub fn with_failed_store(mut self, database: Arc<DatabaseQueue>) -> Self {
        self.failed_store = Some(database);
        self
    }

    /// Checks that the server answers.
    pub async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        ::redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    /// Moves due delayed entries to the ready list.
    ///
    /// Safe to run from any number of workers at once.
    pub async fn migrate_delayed(&self, queue: &str) -> Result<u64, QueueError> {
        let keys = self.keys(queue);
        let mut conn = self.redis.clone();

        let moved: u64 = self
            .scripts
            .migrate
            .key(&keys.delayed)
            .key(&keys.ready)
            .arg(epoch_seconds())
            .arg(MIGRATE_BATCH)
            .invoke_async(&mut conn)
            .await?;

        if moved > 0 {
            debug!(queue = %queue, moved = moved, "Migrated delayed jobs");
        }
        Ok(moved)
    }

    /// Number of entries currently reserved.
    pub async fn reserved_len(&self, queue: &str) -> Result<u64, QueueError> {
        let mut conn = self.redis.clone();
        let len: u64 = conn.llen(self.keys(queue).reserved).await?;
        Ok(len)
    }

    /// Peeks at failed job records kept in Redis, oldest first.
    pub async fn failed_jobs(&self, queue: &str, limit: usize) -> Result<Vec<FailedJob>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.clone();
        let data: Vec<String> = conn
            .lrange(self.keys(queue).failed, 0, limit as isize - 1)
            .await?;

        let failed: Result<Vec<FailedJob>, _> =
            data.iter().map(|s| serde_json::from_str(s)).collect();
        Ok(failed?)
    }

    /// Deletes every key of a queue, including its failed records.
    ///
    /// **Warning**: This permanently deletes all jobs. Use with caution.
    pub async fn clear(&self, queue: &str) -> Result<(), QueueError> {
        let keys = self.keys(queue);
        let mut conn = self.redis.clone();

        let mut pipe = ::redis::pipe();
        pipe.del(&keys.ready)
            .del(&keys.delayed)
            .del(&keys.reserved)
            .del(&keys.leases)
            .del(&keys.failed);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    /// Returns the key prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn keys(&self, queue: &str) -> QueueKeys {
        QueueKeys::new(&self.prefix, queue)
    }

    fn new_entry(queue: &str, payload: &str) -> Result<String, QueueError> {
        let entry = RedisEntry {
            id: new_entry_key(queue),
            payload: payload.to_string(),
            attempts: 0,
        };
        Ok(serde_json::to_string(&entry)?)
    }
}

#[async_trait]
impl QueueDriver for RedisQueue {
    fn connection(&self) -> Connection {
        Connection::Redis
    }

    async fn push(&self, payload: &str, queue: &str, delay: u64) -> Result<(), QueueError> {
        let keys = self.keys(queue);
        let entry = Self::new_entry(queue, payload)?;
        let mut conn = self.redis.clone();

        if delay > 0 {
            let score = epoch_seconds() + delay as f64;
            conn.zadd::<_, _, _, ()>(&keys.delayed, entry, score).await?;
        } else {
            conn.rpush::<_, _, ()>(&keys.ready, entry).await?;
        }

        debug!(queue = %queue, delay = delay, "Job pushed to Redis queue");
        Ok(())
    }

    async fn push_bulk(&self, payloads: &[String], queue: &str) -> Result<(), QueueError> {
        if payloads.is_empty() {
            return Ok(());
        }

        let entries: Result<Vec<String>, _> = payloads
            .iter()
            .map(|payload| Self::new_entry(queue, payload))
            .collect();
        let entries = entries?;

        let ready = self.keys(queue).ready;
        let mut conn = self.redis.clone();

        // Use pipeline for batch efficiency
        let mut pipe = ::redis::pipe();
        for entry in &entries {
            pipe.rpush(&ready, entry);
        }
        pipe.query_async::<_, ()>(&mut conn).await?;

        debug!(queue = %queue, count = entries.len(), "Jobs pushed to Redis queue");
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<QueueEntry>, QueueError> {
        self.migrate_delayed(queue).await?;

        let keys = self.keys(queue);
        let mut conn = self.redis.clone();

        let claimed: Option<String> = self
            .scripts
            .pop
            .key(&keys.ready)
            .key(&keys.reserved)
            .key(&keys.leases)
            .arg(epoch_seconds())
            .invoke_async(&mut conn)
            .await?;

        let Some(raw) = claimed else {
            return Ok(None);
        };
        let entry: RedisEntry = serde_json::from_str(&raw)?;

        debug!(
            queue = %queue,
            entry_id = %entry.id,
            attempt = entry.attempts,
            "Job claimed from Redis queue"
        );

        Ok(Some(QueueEntry {
            id: EntryId::Key(entry.id),
            payload: entry.payload,
            attempts: entry.attempts,
        }))
    }

    async fn release(
        &self,
        entry: &QueueEntry,
        queue: &str,
        delay: u64,
    ) -> Result<(), QueueError> {
        let keys = self.keys(queue);
        let mut conn = self.redis.clone();

        let released: i64 = self
            .scripts
            .release
            .key(&keys.reserved)
            .key(&keys.ready)
            .key(&keys.delayed)
            .key(&keys.leases)
            .arg(entry.id.to_string())
            .arg(delay)
            .arg(epoch_seconds() + delay as f64)
            .arg(entry.attempts)
            .invoke_async(&mut conn)
            .await?;

        if released == 0 {
            warn!(
                queue = %queue,
                entry_id = %entry.id,
                attempt = entry.attempts,
                "Job not found in reserved queue"
            );
        } else {
            debug!(queue = %queue, entry_id = %entry.id, delay = delay, "Job released");
        }
        Ok(())
    }

    async fn delete(&self, entry: &QueueEntry, queue: &str) -> Result<(), QueueError> {
        let keys = self.keys(queue);
        let mut conn = self.redis.clone();

        let deleted: i64 = self
            .scripts
            .delete
            .key(&keys.reserved)
            .key(&keys.leases)
            .arg(entry.id.to_string())
            .arg(entry.attempts)
            .invoke_async(&mut conn)
            .await?;

        if deleted == 0 {
            debug!(queue = %queue, entry_id = %entry.id, "Job already gone");
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        connection: &str,
        queue: &str,
        payload: &str,
        exception: &str,
    ) -> Result<(), QueueError> {
        if let Some(database) = &self.failed_store {
            return database
                .mark_failed(connection, queue, payload, exception)
                .await;
        }

        let record = FailedJob::new(connection, queue, payload, exception);
        let serialized = serde_json::to_string(&record)?;
        let mut conn = self.redis.clone();
        conn.rpush::<_, _, ()>(self.keys(queue).failed, serialized)
            .await?;

        info!(queue = %queue, "Failed job stored in Redis");
        Ok(())
    }

    async fn size(&self, queue: &str) -> Result<u64, QueueError> {
        let keys = self.keys(queue);
        let mut conn = self.redis.clone();

        let (ready, delayed): (u64, u64) = ::redis::pipe()
            .llen(&keys.ready)
            .zcard(&keys.delayed)
            .query_async(&mut conn)
            .await?;

        Ok(ready + delayed)
    }

    async fn reclaim(&self, queue: &str, lease: Duration) -> Result<u64, QueueError> {
        let keys = self.keys(queue);
        let mut conn = self.redis.clone();
        let cutoff = epoch_seconds() - lease.as_secs_f64();

        let reclaimed: u64 = self
            .scripts
            .reclaim
            .key(&keys.reserved)
            .key(&keys.ready)
            .key(&keys.leases)
            .arg(cutoff)
            .invoke_async(&mut conn)
            .await?;

        if reclaimed > 0 {
            info!(queue = %queue, reclaimed = reclaimed, "Reclaimed expired reservations");
        }
        Ok(reclaimed)
    }
}

/// Current time as fractional epoch seconds, the score unit of every set.
fn epoch_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
