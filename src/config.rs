//! Queue configuration.
//!
//! `QueueConfig` names the backends a process may use and which one is the
//! default. Values come from the environment (`QUEUE_CONNECTION`,
//! `REDIS_URL`, `DATABASE_URL`, `QUEUE_PREFIX`) or from the builder methods.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Default key prefix for the Redis backend.
pub const DEFAULT_KEY_PREFIX: &str = "queue-forge";

/// Default maximum number of pooled database connections.
const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Named storage backend a job can be pushed to or claimed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connection {
    /// Redis lists and sorted sets.
    Redis,
    /// PostgreSQL tables with row leasing.
    Database,
    /// In-process store with the Redis layout.
    Memory,
}

impl Connection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Connection::Redis => "redis",
            Connection::Database => "database",
            Connection::Memory => "memory",
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Connection {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Connection::Redis),
            "database" | "postgres" | "postgresql" => Ok(Connection::Database),
            "memory" => Ok(Connection::Memory),
            other => Err(QueueError::UnknownConnection(other.to_string())),
        }
    }
}

/// Backend selection and connection settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Connection used when a caller does not name one.
    pub default_connection: Connection,
    /// Redis connection URL; the Redis backend is disabled when unset.
    pub redis_url: Option<String>,
    /// PostgreSQL connection URL; the database backend is disabled when unset.
    pub database_url: Option<String>,
    /// Prefix for every Redis key.
    pub key_prefix: String,
    /// Maximum pooled database connections.
    pub database_max_connections: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_connection: Connection::Redis,
            redis_url: None,
            database_url: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            database_max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
        }
    }
}

impl QueueConfig {
    /// Creates a configuration with the given default connection.
    pub fn new(default_connection: Connection) -> Self {
        Self {
            default_connection,
            ..Default::default()
        }
    }

    /// Loads the configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::UnknownConnection` if `QUEUE_CONNECTION` names an
    /// unknown backend.
    pub fn from_env() -> Result<Self, QueueError> {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("QUEUE_CONNECTION") {
            config.default_connection = name.parse()?;
        }
        config.redis_url = non_empty_env("REDIS_URL");
        config.database_url = non_empty_env("DATABASE_URL");
        if let Some(prefix) = non_empty_env("QUEUE_PREFIX") {
            config.key_prefix = prefix;
        }

        Ok(config)
    }

    /// Sets the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    /// Sets the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Sets the Redis key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Sets the database pool size.
    pub fn with_database_max_connections(mut self, max: u32) -> Self {
        self.database_max_connections = max.max(1);
        self
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_parse() {
        assert_eq!("redis".parse::<Connection>().unwrap(), Connection::Redis);
        assert_eq!("Database".parse::<Connection>().unwrap(), Connection::Database);
        assert_eq!("postgres".parse::<Connection>().unwrap(), Connection::Database);
        assert_eq!(" memory ".parse::<Connection>().unwrap(), Connection::Memory);

        let err = "sqs".parse::<Connection>().unwrap_err();
        assert!(matches!(err, QueueError::UnknownConnection(name) if name == "sqs"));
    }

    #[test]
    fn test_connection_display_roundtrip() {
        for connection in [Connection::Redis, Connection::Database, Connection::Memory] {
            let parsed: Connection = connection.to_string().parse().unwrap();
            assert_eq!(parsed, connection);
        }
    }

    #[test]
    fn test_queue_config_default() {
        let config = QueueConfig::default();

        assert_eq!(config.default_connection, Connection::Redis);
        assert!(config.redis_url.is_none());
        assert!(config.database_url.is_none());
        assert_eq!(config.key_prefix, "queue-forge");
        assert_eq!(config.database_max_connections, 10);
    }

    #[test]
    fn test_queue_config_builder() {
        let config = QueueConfig::new(Connection::Database)
            .with_redis_url("redis://cache:6379")
            .with_database_url("postgres://app@db/app")
            .with_key_prefix("jobs")
            .with_database_max_connections(0);

        assert_eq!(config.default_connection, Connection::Database);
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.database_url.as_deref(), Some("postgres://app@db/app"));
        assert_eq!(config.key_prefix, "jobs");
        assert_eq!(config.database_max_connections, 1);
    }
}
