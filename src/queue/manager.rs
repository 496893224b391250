//! Connection resolution and backend-transparent dispatch.
//!
//! `QueueManager` owns one driver per configured backend and routes every
//! push and size request to the driver for the requested connection. When
//! Redis is requested but not available the database serves instead; when
//! neither is available the request fails with `QueueError::Unavailable`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{DatabaseQueue, MemoryQueue, QueueDriver, RedisQueue};
use crate::config::{Connection, QueueConfig};
use crate::error::QueueError;
use crate::job::{Job, JobRecord};

/// Resolves connections to drivers and pushes jobs through them.
#[derive(Clone)]
pub struct QueueManager {
    default_connection: Connection,
    redis: Option<Arc<RedisQueue>>,
    database: Option<Arc<DatabaseQueue>>,
    memory: Option<Arc<MemoryQueue>>,
}

impl QueueManager {
    /// Creates a manager with no backends attached.
    pub fn new(default_connection: Connection) -> Self {
        Self {
            default_connection,
            redis: None,
            database: None,
            memory: None,
        }
    }

    /// Connects every backend the configuration names.
    ///
    /// A backend that cannot be reached is logged and left out, so the
    /// Redis-to-database fallback can take over. A Redis backend is wired to
    /// record failed jobs in the database when both are present.
    pub async fn from_config(config: &QueueConfig) -> Self {
        let mut manager = Self::new(config.default_connection);

        if let Some(url) = &config.database_url {
            match DatabaseQueue::connect(url, config.database_max_connections).await {
                Ok(database) => {
                    info!("Connected to database queue backend");
                    manager.database = Some(Arc::new(database));
                }
                Err(e) => warn!(error = %e, "Database queue backend unavailable"),
            }
        }

        if let Some(url) = &config.redis_url {
            match RedisQueue::connect(url, &config.key_prefix).await {
                Ok(redis) => {
                    info!(prefix = %config.key_prefix, "Connected to Redis queue backend");
                    let redis = match &manager.database {
                        Some(database) => redis.with_failed_store(Arc::clone(database)),
                        None => redis,
                    };
                    manager.redis = Some(Arc::new(redis));
                }
                Err(e) => warn!(error = %e, "Redis queue backend unavailable"),
            }
        }

        if config.default_connection == Connection::Memory {
            manager.memory = Some(Arc::new(MemoryQueue::new()));
        }

        manager
    }

    /// Attaches a Redis driver.
    pub fn with_redis(mut self, redis: Arc<RedisQueue>) -> Self {
        self.redis = Some(redis);
        self
    }

    /// Attaches a database driver.
    pub fn with_database(mut self, database: Arc<DatabaseQueue>) -> Self {
        self.database = Some(database);
        self
    }

    /// Attaches an in-memory driver.
    pub fn with_memory(mut self, memory: Arc<MemoryQueue>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Returns a manager sharing these drivers but defaulting to `connection`.
    pub fn on(&self, connection: Connection) -> Self {
        Self {
            default_connection: connection,
            ..self.clone()
        }
    }

    /// Returns the connection used when none is named.
    pub fn default_connection(&self) -> Connection {
        self.default_connection
    }

    /// Returns the database driver, if one is attached.
    pub fn database(&self) -> Option<&Arc<DatabaseQueue>> {
        self.database.as_ref()
    }

    /// Returns the Redis driver, if one is attached.
    pub fn redis(&self) -> Option<&Arc<RedisQueue>> {
        self.redis.as_ref()
    }

    /// Returns the in-memory driver, if one is attached.
    pub fn memory(&self) -> Option<&Arc<MemoryQueue>> {
        self.memory.as_ref()
    }

    /// Resolves a connection to a driver.
    ///
    /// `None` selects the default connection.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Unavailable` if neither the requested backend nor
    /// its fallback is attached.
    pub fn driver(&self, connection: Option<Connection>) -> Result<Arc<dyn QueueDriver>, QueueError> {
        let connection = connection.unwrap_or(self.default_connection);

        match connection {
            Connection::Redis => {
                if let Some(redis) = &self.redis {
                    return Ok(Arc::clone(redis) as Arc<dyn QueueDriver>);
                }
                match &self.database {
                    Some(database) => {
                        warn!("Redis unavailable, falling back to database queue");
                        Ok(Arc::clone(database) as Arc<dyn QueueDriver>)
                    }
                    None => Err(QueueError::Unavailable(
                        "redis is not connected and no database fallback is configured"
                            .to_string(),
                    )),
                }
            }
            Connection::Database => self
                .database
                .as_ref()
                .map(|database| Arc::clone(database) as Arc<dyn QueueDriver>)
                .ok_or_else(|| QueueError::Unavailable("database is not connected".to_string())),
            Connection::Memory => self
                .memory
                .as_ref()
                .map(|memory| Arc::clone(memory) as Arc<dyn QueueDriver>)
                .ok_or_else(|| QueueError::Unavailable("memory queue is not enabled".to_string())),
        }
    }

    /// Pushes a job for immediate execution.
    ///
    /// `queue` overrides the job's own queue.
    pub async fn push<J: Job>(&self, job: &J, queue: Option<&str>) -> Result<(), QueueError> {
        self.later(0, job, queue).await
    }

    /// Pushes a job that becomes claimable after `delay` seconds.
    pub async fn later<J: Job>(
        &self,
        delay: u64,
        job: &J,
        queue: Option<&str>,
    ) -> Result<(), QueueError> {
        let record = Self::record_for(job, queue)?;
        self.push_record(&record, delay).await
    }

    /// Pushes a pre-built envelope to the queue it names.
    pub async fn push_record(&self, record: &JobRecord, delay: u64) -> Result<(), QueueError> {
        let payload = record.to_payload()?;
        let driver = self.driver(None)?;

        driver.push(&payload, &record.queue, delay).await?;
        debug!(
            class = %record.class_identity,
            queue = %record.queue,
            delay = delay,
            "Job dispatched"
        );
        Ok(())
    }

    /// Pushes several jobs for immediate execution.
    ///
    /// Jobs are grouped by target queue; order within a queue is preserved.
    pub async fn push_bulk<J: Job>(&self, jobs: &[J], queue: Option<&str>) -> Result<(), QueueError> {
        let mut by_queue: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for job in jobs {
            let record = Self::record_for(job, queue)?;
            by_queue
                .entry(record.queue.clone())
                .or_default()
                .push(record.to_payload()?);
        }

        let driver = self.driver(None)?;
        for (queue, payloads) in &by_queue {
            driver.push_bulk(payloads, queue).await?;
            debug!(queue = %queue, count = payloads.len(), "Jobs dispatched");
        }
        Ok(())
    }

    /// Number of ready entries in a queue.
    pub async fn size(&self, queue: &str) -> Result<u64, QueueError> {
        self.driver(None)?.size(queue).await
    }

    fn record_for<J: Job>(job: &J, queue: Option<&str>) -> Result<JobRecord, QueueError> {
        let record = JobRecord::from_job(job)?;
        Ok(match queue {
            Some(queue) => record.with_queue(queue),
            None => record,
        })
    }
}
