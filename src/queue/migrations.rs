//! Database migration helpers.
//!
//! Applies the queue schema idempotently, recording each applied part in a
//! tracking table so repeated runs are cheap. Concurrent runners serialize
//! on a transaction-scoped advisory lock.

use sqlx::{Executor, PgConnection, PgPool};
use tracing::info;

use super::schema::{self, tables};
use crate::error::QueueError;

/// Advisory lock key held while migrating.
const MIGRATION_LOCK_KEY: i64 = 0x7175_6575_655f_6667;

/// Migration runner for the queue tables.
pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    /// Creates a new migration runner.
    ///
    /// # Arguments
    ///
    /// * `pool` - PostgreSQL connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending migrations.
    ///
    /// Returns the number of parts applied by this call. Either every
    /// pending part is applied or none is.
    pub async fn run_migrations(&self) -> Result<usize, QueueError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *tx)
            .await?;
        ensure_migrations_table(&mut *tx).await?;

        let mut applied = 0;
        for (idx, statement) in schema::all_schema_statements().iter().enumerate() {
            let migration_name = migration_name(idx);

            if !is_migration_applied(&mut *tx, &migration_name).await? {
                apply_migration(&mut *tx, &migration_name, statement).await?;
                applied += 1;
            }
        }

        tx.commit().await?;

        if applied > 0 {
            info!(applied = applied, "Queue schema migrated");
        }
        Ok(applied)
    }

    /// Returns the names of applied migrations in order.
    pub async fn list_applied_migrations(&self) -> Result<Vec<String>, QueueError> {
        let mut conn = self.pool.acquire().await?;
        ensure_migrations_table(&mut *conn).await?;

        let names: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT name FROM {} ORDER BY id",
            tables::MIGRATIONS
        ))
        .fetch_all(&mut *conn)
        .await?;

        Ok(names.into_iter().map(|(name,)| name).collect())
    }
}

async fn ensure_migrations_table(conn: &mut PgConnection) -> Result<(), QueueError> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id SERIAL PRIMARY KEY,
            name VARCHAR(255) NOT NULL UNIQUE,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
        tables::MIGRATIONS
    ))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn is_migration_applied(conn: &mut PgConnection, name: &str) -> Result<bool, QueueError> {
    let result: Option<(i32,)> = sqlx::query_as(&format!(
        "SELECT id FROM {} WHERE name = $1",
        tables::MIGRATIONS
    ))
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(result.is_some())
}

async fn apply_migration(conn: &mut PgConnection, name: &str, sql: &str) -> Result<(), QueueError> {
    // Unprepared execution: the index part holds two statements
    (&mut *conn)
        .execute(sql)
        .await
        .map_err(|e| QueueError::Migration(format!("{}: {}", name, e)))?;

    sqlx::query(&format!(
        "INSERT INTO {} (name) VALUES ($1)",
        tables::MIGRATIONS
    ))
    .bind(name)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn migration_name(idx: usize) -> String {
    format!("queue_schema_v1_part_{}", idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_names_are_stable() {
        assert_eq!(migration_name(0), "queue_schema_v1_part_0");
        assert_eq!(migration_name(2), "queue_schema_v1_part_2");
    }

    #[test]
    fn test_migration_error_display() {
        let err = QueueError::Migration("part_1: syntax error".to_string());
        assert!(err.to_string().contains("syntax error"));
    }
}
