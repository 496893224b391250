//! Database schema constants for the relational queue backend.

/// SQL schema for creating the queue_jobs table.
pub const CREATE_QUEUE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS queue_jobs (
    id BIGSERIAL PRIMARY KEY,
    queue VARCHAR(255) NOT NULL DEFAULT 'default',
    payload TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    reserved_at TIMESTAMPTZ,
    available_at TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// SQL schema for creating the queue_failed_jobs table.
pub const CREATE_QUEUE_FAILED_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS queue_failed_jobs (
    id BIGSERIAL PRIMARY KEY,
    connection VARCHAR(255) NOT NULL,
    queue VARCHAR(255) NOT NULL,
    payload TEXT NOT NULL,
    exception TEXT NOT NULL,
    failed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// SQL for creating all required indexes.
pub const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS queue_jobs_queue_reserved_at_index ON queue_jobs(queue, reserved_at);
CREATE INDEX IF NOT EXISTS queue_failed_jobs_queue_index ON queue_failed_jobs(queue)
"#;

/// Returns all schema creation statements in the correct order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_QUEUE_JOBS_TABLE,
        CREATE_QUEUE_FAILED_JOBS_TABLE,
        CREATE_INDEXES,
    ]
}

/// Table names in the schema.
pub mod tables {
    /// Live entries (ready and reserved).
    pub const QUEUE_JOBS: &str = "queue_jobs";
    /// Dead-lettered jobs.
    pub const QUEUE_FAILED_JOBS: &str = "queue_failed_jobs";
    /// Applied migration parts.
    pub const MIGRATIONS: &str = "_queue_migrations";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_schema_statements_order() {
        let statements = all_schema_statements();
        assert_eq!(statements.len(), 3);
        assert!(statements[0].contains(tables::QUEUE_JOBS));
        assert!(statements[1].contains(tables::QUEUE_FAILED_JOBS));
        // Indexes should be last
        assert!(statements[2].contains("CREATE INDEX"));
    }

    #[test]
    fn test_queue_jobs_index_covers_claim_filter() {
        assert!(CREATE_INDEXES.contains("queue_jobs(queue, reserved_at)"));
        assert!(CREATE_QUEUE_JOBS_TABLE.contains("reserved_at TIMESTAMPTZ,"));
    }
}
