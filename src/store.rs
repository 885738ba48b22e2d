use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding: {0}")]
    Serde(#[from] serde_json::Error),
}

/// On-disk envelope for a stored paste. For bundle saves `data` holds the
/// JSON-encoded bundle as a string, so blobs are double-encoded: the
/// envelope carries storage metadata, the inner payload is the bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlob {
    pub id: String,
    pub filename: String,
    pub data: String,
}

/// Content-addressed blob storage. The opaque id is hashed into a
/// fixed-length hex name, which normalizes arbitrary identifiers into
/// filesystem-safe paths and keeps attacker-controlled input out of path
/// construction. The original id travels inside the blob.
pub struct ContentStore {
    base_dir: PathBuf,
}

impl ContentStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn blob_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(digest(id))
    }

    /// Idempotent overwrite keyed by the digest of `blob.id`.
    pub async fn write(&self, blob: &StoredBlob) -> Result<(), StoreError> {
        let path = self.blob_path(&blob.id);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        debug!(id = %blob.id, filename = %blob.filename, "storing blob");
        let json = serde_json::to_vec(blob)?;
        tokio::fs::write(&path, json).await?;
        Ok(())
    }

    /// `None` when the blob is absent or its content no longer parses.
    pub async fn read(&self, id: &str) -> Result<Option<StoredBlob>, StoreError> {
        let path = self.blob_path(id);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        Ok(serde_json::from_slice(&raw).ok())
    }

    /// Deletes every blob created before `now - max_age`, checking the
    /// cancellation token between entries. Returns the number removed.
    ///
    /// A read racing a delete surfaces as not-found, which the read path
    /// already handles; no locking is attempted.
    pub async fn delete_older_than(
        &self,
        max_age: Duration,
        cancel: &CancellationToken,
    ) -> Result<usize, StoreError> {
        let cutoff = SystemTime::now() - max_age;
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if cancel.is_cancelled() {
                break;
            }

            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            if !meta.is_file() {
                continue;
            }

            // Creation time is unsupported on some filesystems.
            let created = match meta.created().or_else(|_| meta.modified()) {
                Ok(created) => created,
                Err(_) => continue,
            };

            if created < cutoff {
                debug!(path = %entry.path().display(), "grooming stale blob");
                if tokio::fs::remove_file(entry.path()).await.is_ok() {
                    removed += 1;
                }
            }
        }

        debug!(removed, "grooming sweep complete");
        Ok(removed)
    }
}

fn digest(id: &str) -> String {
    let hashed = Sha256::digest(id.as_bytes());
    hashed.iter().map(|b| format!("{b:02x}")).collect()
}
