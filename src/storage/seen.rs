//! Seen-store implementations

use super::schema::initialize_schema;
use super::traits::{SeenStore, StorageResult};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// SQLite-backed seen-store for one job
///
/// Several worker processes may share the database file, so the connection
/// runs in WAL mode with a busy timeout.
pub struct SqliteSeenStore {
    conn: Mutex<Connection>,
    job: String,
}

impl SqliteSeenStore {
    /// Opens (or creates) the database at `path` for `job`
    pub fn open(path: &Path, job: &str) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        conn.busy_timeout(Duration::from_secs(10))?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            job: job.to_string(),
        })
    }

    /// Creates an in-memory database
    pub fn in_memory(job: &str) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            job: job.to_string(),
        })
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    /// Number of keys recorded for this job
    pub fn count(&self) -> StorageResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM downloads WHERE job = ?1",
            params![self.job],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

impl SeenStore for SqliteSeenStore {
    fn already_downloaded(&self, key: &str) -> StorageResult<bool> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT 1 FROM downloads WHERE job = ?1 AND key = ?2",
                params![self.job, key],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn record_downloaded(&self, key: &str, size: u64) -> StorageResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO downloads (job, key, size, downloaded_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(job, key) DO UPDATE SET size = excluded.size, downloaded_at = excluded.downloaded_at",
            params![self.job, key, size as i64, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

/// Per-job download totals, as `(job, count, bytes)`
///
/// Used by `--stats`; reads every job in the database.
pub fn download_counts(path: &Path) -> StorageResult<Vec<(String, u64, u64)>> {
    let conn = Connection::open(path)?;
    initialize_schema(&conn)?;

    let mut stmt = conn.prepare(
        "SELECT job, COUNT(*), COALESCE(SUM(size), 0) FROM downloads GROUP BY job ORDER BY job",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)? as u64,
            row.get::<_, i64>(2)? as u64,
        ))
    })?;

    let mut counts = Vec::new();
    for row in rows {
        counts.push(row?);
    }
    Ok(counts)
}

/// Process-local seen-store
#[derive(Debug, Default)]
pub struct MemorySeenStore {
    keys: Mutex<HashSet<String>>,
}

impl MemorySeenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already knows `keys`
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: Mutex::new(keys.into_iter().map(Into::into).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

impl SeenStore for MemorySeenStore {
    fn already_downloaded(&self, key: &str) -> StorageResult<bool> {
        Ok(self.keys.lock().contains(key))
    }

    fn record_downloaded(&self, key: &str, _size: u64) -> StorageResult<()> {
        self.keys.lock().insert(key.to_string());
        Ok(())
    }
}
