//! Storage traits and error types
//!
//! The core sees two collaborators here: a backend that persists downloaded
//! bytes, and a seen-store that remembers which keys were already collected.

use crate::adapter::Download;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Key cannot be stored as a file name: {0:?}")]
    InvalidKey(String),

    #[error("Storage backend is closed")]
    Closed,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persists downloaded items
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Stores one download
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The item was written
    /// * `Ok(false)` - The backend already holds this item and left it untouched
    async fn store(&self, download: &Download) -> StorageResult<bool>;

    /// Flushes and refuses further stores
    async fn close(&self) -> StorageResult<()>;
}

/// Remembers successfully downloaded keys across runs
///
/// Implementations are scoped to a single job.
pub trait SeenStore: Send + Sync {
    fn already_downloaded(&self, key: &str) -> StorageResult<bool>;

    fn record_downloaded(&self, key: &str, size: u64) -> StorageResult<()>;
}
