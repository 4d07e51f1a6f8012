//! Directory storage backend

use super::traits::{StorageBackend, StorageError, StorageResult};
use crate::adapter::Download;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Writes each download to `<root>/<job>/<key>`
///
/// Files are written under a temporary name and renamed into place, so a
/// file with the final name is always complete.
pub struct DirectoryStorage {
    dir: PathBuf,
    closed: AtomicBool,
}

impl DirectoryStorage {
    pub fn new(root: impl AsRef<Path>, job: &str) -> Self {
        Self {
            dir: root.as_ref().join(job),
            closed: AtomicBool::new(false),
        }
    }

    /// Directory this job's files land in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final path for a key
    pub fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        Ok(self.dir.join(sanitize_key(key)?))
    }
}

/// Maps an item key to a single safe file name
///
/// A key that had to be rewritten gets a short hash of the raw key before
/// its extension, so `a/b` and `a_b` never share a file.
fn sanitize_key(key: &str) -> StorageResult<String> {
    let name: String = key
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    if trimmed == key {
        return Ok(key.to_string());
    }

    let tag = &hex::encode(Sha256::digest(key.as_bytes()))[..8];
    Ok(match trimmed.rfind('.') {
        Some(dot) if dot > 0 => format!("{}-{}{}", &trimmed[..dot], tag, &trimmed[dot..]),
        _ => format!("{}-{}", trimmed, tag),
    })
}

#[async_trait]
impl StorageBackend for DirectoryStorage {
    async fn store(&self, download: &Download) -> StorageResult<bool> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }

        let path = self.path_for(&download.item.key)?;
        if tokio::fs::try_exists(&path).await? {
            debug!(key = %download.item.key, "Already on disk, skipping");
            return Ok(false);
        }

        tokio::fs::create_dir_all(&self.dir).await?;

        let mut partial = path.clone().into_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        tokio::fs::write(&partial, &download.bytes).await?;
        tokio::fs::rename(&partial, &path).await?;

        let digest = hex::encode(Sha256::digest(&download.bytes));
        info!(
            key = %download.item.key,
            bytes = download.bytes.len(),
            sha256 = %digest,
            path = %path.display(),
            "Stored file"
        );
        Ok(true)
    }

    async fn close(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
