//! Storage module for downloaded files and download history
//!
//! This module handles everything that outlives a run:
//! - Writing downloaded bytes to disk
//! - Recording which keys each job has already collected
//! - Per-job download statistics for `--stats`

mod directory;
mod schema;
mod seen;
mod traits;

pub use directory::DirectoryStorage;
pub use seen::{download_counts, MemorySeenStore, SqliteSeenStore};
pub use traits::{SeenStore, StorageBackend, StorageError, StorageResult};

use crate::config::OutputConfig;
use std::path::Path;
use std::sync::Arc;

/// Opens the storage backend and seen-store configured for a job
///
/// # Arguments
///
/// * `output` - The `[output]` configuration section
/// * `job` - Job name the stores are scoped to
///
/// # Returns
///
/// * `Ok((backend, seen))` - Ready-to-use collaborators
/// * `Err(StorageError)` - The seen database could not be opened
pub fn open_job_stores(
    output: &OutputConfig,
    job: &str,
) -> StorageResult<(Arc<dyn StorageBackend>, Arc<dyn SeenStore>)> {
    let backend = DirectoryStorage::new(&output.storage_dir, job);
    let seen = SqliteSeenStore::open(Path::new(&output.seen_db), job)?;
    Ok((Arc::new(backend), Arc::new(seen)))
}
