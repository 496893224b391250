//! In-process queue driver.
//!
//! Mirrors the Redis layout (ready list, delayed set ordered by availability,
//! reserved list) inside one mutex, so every transition is atomic with respect
//! to other tasks sharing the driver. Useful for tests, local development and
//! single-process deployments where durability is not required.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    available_at, lease_duration, new_entry_key, EntryId, FailedJob, QueueDriver, QueueEntry,
};
use crate::config::Connection;
use crate::error::QueueError;

#[derive(Debug, Clone)]
struct StoredEntry {
    id: String,
    payload: String,
    attempts: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<StoredEntry>,
    /// Keyed by availability time, then insertion sequence.
    delayed: BTreeMap<(DateTime<Utc>, u64), StoredEntry>,
    reserved: Vec<(StoredEntry, DateTime<Utc>)>,
}

impl QueueState {
    /// Moves every due delayed entry to the tail of the ready list.
    fn migrate_due(&mut self, now: DateTime<Utc>) -> usize {
        let mut moved = 0;
        while let Some(entry) = self.delayed.first_entry() {
            if entry.key().0 > now {
                break;
            }
            self.ready.push_back(entry.remove());
            moved += 1;
        }
        moved
    }

    /// Removes the reservation made by the claim `(id, attempts)`.
    fn take_reserved(&mut self, id: &str, attempts: u32) -> Option<StoredEntry> {
        let position = self
            .reserved
            .iter()
            .position(|(entry, _)| entry.id == id && entry.attempts == attempts)?;
        Some(self.reserved.remove(position).0)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    queues: HashMap<String, QueueState>,
    failed: Vec<FailedJob>,
    sequence: u64,
}

impl MemoryState {
    fn schedule(&mut self, queue: &str, entry: StoredEntry, delay: u64) {
        self.sequence += 1;
        let sequence = self.sequence;
        let state = self.queues.entry(queue.to_string()).or_default();
        if delay > 0 {
            state.delayed.insert((available_at(delay), sequence), entry);
        } else {
            state.ready.push_back(entry);
        }
    }
}

/// Queue driver keeping all state in process memory.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
}

impl MemoryQueue {
    /// Creates an empty in-memory queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Failed job records for a queue, oldest first.
    pub async fn failed_jobs(&self, queue: &str) -> Vec<FailedJob> {
        let state = self.state.lock().await;
        state
            .failed
            .iter()
            .filter(|failed| failed.queue == queue)
            .cloned()
            .collect()
    }

    /// Number of entries currently reserved in a queue.
    pub async fn reserved_len(&self, queue: &str) -> usize {
        let state = self.state.lock().await;
        state.queues.get(queue).map_or(0, |q| q.reserved.len())
    }

    /// Number of entries still waiting on their delay.
    pub async fn delayed_len(&self, queue: &str) -> usize {
        let state = self.state.lock().await;
        state.queues.get(queue).map_or(0, |q| q.delayed.len())
    }
}

#[async_trait]
impl QueueDriver for MemoryQueue {
    fn connection(&self) -> Connection {
        Connection::Memory
    }

    async fn push(&self, payload: &str, queue: &str, delay: u64) -> Result<(), QueueError> {
        let entry = StoredEntry {
            id: new_entry_key(queue),
            payload: payload.to_string(),
            attempts: 0,
        };
        let mut state = self.state.lock().await;
        state.schedule(queue, entry, delay);
        debug!(queue = %queue, delay = delay, "Job pushed to memory queue");
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<QueueEntry>, QueueError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let Some(queue_state) = state.queues.get_mut(queue) else {
            return Ok(None);
        };

        queue_state.migrate_due(now);
        let Some(mut entry) = queue_state.ready.pop_front() else {
            return Ok(None);
        };
        entry.attempts += 1;
        queue_state.reserved.push((entry.clone(), now));

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
        let key = entry.id.to_string();
        let mut state = self.state.lock().await;
        let stored = state
            .queues
            .get_mut(queue)
            .and_then(|queue_state| queue_state.take_reserved(&key, entry.attempts));

        match stored {
            Some(stored) => {
                state.schedule(queue, stored, delay);
                debug!(queue = %queue, entry_id = %entry.id, delay = delay, "Job released");
            }
            None => debug!(
                queue = %queue,
                entry_id = %entry.id,
                attempt = entry.attempts,
                "Release of unreserved job ignored"
            ),
        }
        Ok(())
    }

    async fn delete(&self, entry: &QueueEntry, queue: &str) -> Result<(), QueueError> {
        let key = entry.id.to_string();
        let mut state = self.state.lock().await;
        if let Some(queue_state) = state.queues.get_mut(queue) {
            queue_state.take_reserved(&key, entry.attempts);
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
        let mut state = self.state.lock().await;
        state
            .failed
            .push(FailedJob::new(connection, queue, payload, exception));
        Ok(())
    }

    async fn size(&self, queue: &str) -> Result<u64, QueueError> {
        let state = self.state.lock().await;
        Ok(state
            .queues
            .get(queue)
            .map_or(0, |q| (q.ready.len() + q.delayed.len()) as u64))
    }

    async fn reclaim(&self, queue: &str, lease: Duration) -> Result<u64, QueueError> {
        let cutoff = Utc::now() - lease_duration(lease);
        let mut state = self.state.lock().await;
        let Some(queue_state) = state.queues.get_mut(queue) else {
            return Ok(0);
        };

        let (expired, live): (Vec<_>, Vec<_>) = queue_state
            .reserved
            .drain(..)
            .partition(|(_, reserved_at)| *reserved_at <= cutoff);
        queue_state.reserved = live;

        let reclaimed = expired.len() as u64;
        queue_state
            .ready
            .extend(expired.into_iter().map(|(entry, _)| entry));
        Ok(reclaimed)
    }
}
