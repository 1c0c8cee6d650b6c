//! src/services/blob_store.rs
//!
//! BlobStore: the object-storage side of the reaper. The only operation the
//! reaper needs is delete-by-key, and deleting a key that is already gone must
//! succeed so that overlapping or retried passes are harmless.
//!
//! `LocalBlobStore` keeps payloads on disk sharded beneath
//! `root/{shard}/{shard}/{key}`, the same layout the upload side writes.

use crate::errors::{BlobError, BlobResult};
use async_trait::async_trait;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::debug;

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// What a delete actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// A bucket-style object store supporting delete-by-key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Remove the object stored under `key`. A missing object yields
    /// `DeleteOutcome::NotFound`, never an error.
    async fn delete(&self, key: &str) -> BlobResult<DeleteOutcome>;
}

/// On-disk bucket rooted at `root`.
#[derive(Clone, Debug)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject keys that could escape the bucket root.
    ///
    /// Dots inside a segment are fine (`notes..v2.txt`); a segment that is
    /// exactly `.` or `..` is not. Also rejects empty or oversized keys, a
    /// leading `/`, backslashes, and control characters.
    fn ensure_key_safe(key: &str) -> BlobResult<()> {
        let invalid = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.split('/').any(|segment| segment == "." || segment == "..")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');

        if invalid {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    /// Two-level shard identifiers for a key.
    ///
    /// First two bytes of MD5(key) as lowercase hex (00-ff).
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Full payload path for a key. Parent directories may not exist.
    pub(crate) fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.root.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Remove the directories left empty by deleting `key`: its own prefix
    /// directories, then the two shard levels. Never touches the root.
    async fn prune_key_dirs(&self, key: &str, object_path: &Path) {
        let prefix_depth = key
            .split('/')
            .filter(|segment| !segment.is_empty())
            .count()
            .saturating_sub(1);
        for dir in object_path.ancestors().skip(1).take(prefix_depth + 2) {
            if let Err(err) = fs::remove_dir(dir).await {
                if !matches!(
                    err.kind(),
                    ErrorKind::NotFound | ErrorKind::DirectoryNotEmpty
                ) {
                    debug!("stopped pruning at {}: {}", dir.display(), err);
                }
                break;
            }
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn delete(&self, key: &str) -> BlobResult<DeleteOutcome> {
        Self::ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        let outcome = match fs::remove_file(&file_path).await {
            Ok(_) => {
                debug!("removed physical file {}", file_path.display());
                DeleteOutcome::Deleted
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
                DeleteOutcome::NotFound
            }
            Err(err) => return Err(BlobError::Io(err)),
        };

        self.prune_key_dirs(key, &file_path).await;

        Ok(outcome)
    }
}
