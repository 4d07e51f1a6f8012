//! Seen-store schema

/// SQL schema for the seen database
pub const SCHEMA_SQL: &str = r#"
-- One row per successfully stored item
CREATE TABLE IF NOT EXISTS downloads (
    job TEXT NOT NULL,
    key TEXT NOT NULL,
    size INTEGER NOT NULL,
    downloaded_at TEXT NOT NULL,
    PRIMARY KEY (job, key)
);

CREATE INDEX IF NOT EXISTS idx_downloads_job ON downloads(job);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert!(initialize_schema(&conn).is_ok());

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='downloads'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
