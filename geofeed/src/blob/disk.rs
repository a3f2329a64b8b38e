//! Persistent blob tier on the local filesystem.
//!
//! Layout:
//!
//! ```text
//! <cache_dir>/blobs/
//! ├── full/
//! │   └── <sha256(url)>
//! └── thumb/
//!     └── <sha256(url)>
//! ```
//!
//! All file I/O runs on tokio's blocking pool behind a semaphore so a burst
//! of loads cannot flood the filesystem. Writes go to a temporary file that
//! is renamed into place, so readers never observe a partial blob.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::{BlobKey, BlobVariant};

/// Default maximum number of concurrent disk operations.
pub const DEFAULT_DISK_IO_LIMIT: usize = 16;

/// Subdirectory of the cache directory holding blobs.
pub const BLOBS_DIR: &str = "blobs";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Size of the persistent tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskTierStats {
    /// Blob files across both variant directories.
    pub files: u64,
    /// Total size of those files.
    pub bytes: u64,
}

/// SHA-256 addressed blob files with bounded concurrent I/O.
#[derive(Debug)]
pub struct DiskBlobTier {
    root: PathBuf,
    io_limiter: Arc<Semaphore>,
}

impl DiskBlobTier {
    /// Creates a tier rooted at `<cache_dir>/blobs`.
    pub fn new(cache_dir: impl AsRef<Path>, max_concurrent_io: usize) -> Self {
        Self {
            root: cache_dir.as_ref().join(BLOBS_DIR),
            io_limiter: Arc::new(Semaphore::new(max_concurrent_io.max(1))),
        }
    }

    pub fn with_defaults(cache_dir: impl AsRef<Path>) -> Self {
        Self::new(cache_dir, DEFAULT_DISK_IO_LIMIT)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding `key`.
    pub fn blob_path(&self, key: &BlobKey) -> PathBuf {
        let digest = Sha256::digest(key.url.as_bytes());
        self.root
            .join(key.variant.as_str())
            .join(format!("{:x}", digest))
    }

    /// Reads a blob. Missing or unreadable files are a miss.
    pub async fn get(&self, key: &BlobKey) -> Option<Bytes> {
        let path = self.blob_path(key);
        let _permit = self.io_limiter.acquire().await.ok()?;

        let result = tokio::task::spawn_blocking(move || std::fs::read(&path))
            .await
            .ok()?;
        match result {
            Ok(data) => Some(Bytes::from(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Unreadable blob file, treating as miss");
                None
            }
        }
    }

    /// Writes a blob, replacing any previous file.
    pub async fn put(&self, key: &BlobKey, data: Bytes) -> io::Result<()> {
        let path = self.blob_path(key);
        let _permit = self
            .io_limiter
            .acquire()
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
            let temp = path.with_extension(format!("tmp{}", n));
            std::fs::write(&temp, &data)?;
            std::fs::rename(&temp, &path).inspect_err(|_| {
                let _ = std::fs::remove_file(&temp);
            })
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }

    /// Removes a blob. Returns false if it was not present.
    pub async fn remove(&self, key: &BlobKey) -> io::Result<bool> {
        let path = self.blob_path(key);
        let _permit = self
            .io_limiter
            .acquire()
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        tokio::task::spawn_blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }

    /// Deletes every blob, returning what was removed.
    pub async fn clear(&self) -> io::Result<DiskTierStats> {
        let root = self.root.clone();
        let removed = tokio::task::spawn_blocking(move || -> io::Result<DiskTierStats> {
            let stats = scan(&root)?;
            match std::fs::remove_dir_all(&root) {
                Ok(()) => Ok(stats),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(stats),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

        debug!(files = removed.files, bytes = removed.bytes, "Cleared disk blob tier");
        Ok(removed)
    }

    /// Counts files and bytes currently stored.
    pub async fn stats(&self) -> io::Result<DiskTierStats> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || scan(&root))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }
}

fn scan(root: &Path) -> io::Result<DiskTierStats> {
    let mut stats = DiskTierStats::default();
    for variant in BlobVariant::ALL {
        let dir = root.join(variant.as_str());
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        for entry in entries {
            let metadata = entry?.metadata()?;
            if metadata.is_file() {
                stats.files += 1;
                stats.bytes += metadata.len();
            }
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_remove() {
        let dir = TempDir::new().unwrap();
        let tier = DiskBlobTier::with_defaults(dir.path());
        let key = BlobKey::full("https://cdn.example.com/a.jpg");

        assert!(tier.get(&key).await.is_none());
        tier.put(&key, Bytes::from_static(b"jpeg bytes")).await.unwrap();
        assert_eq!(tier.get(&key).await.unwrap(), Bytes::from_static(b"jpeg bytes"));

        assert!(tier.remove(&key).await.unwrap());
        assert!(!tier.remove(&key).await.unwrap());
        assert!(tier.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_variants_are_separate_files() {
        let dir = TempDir::new().unwrap();
        let tier = DiskBlobTier::with_defaults(dir.path());
        let url = "https://cdn.example.com/a.jpg";

        tier.put(&BlobKey::full(url), Bytes::from_static(b"big")).await.unwrap();
        assert!(tier.get(&BlobKey::thumbnail(url)).await.is_none());

        let path = tier.blob_path(&BlobKey::thumbnail(url));
        assert!(path.starts_with(dir.path().join("blobs").join("thumb")));
        assert_eq!(path.file_name().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_stats_and_clear() {
        let dir = TempDir::new().unwrap();
        let tier = DiskBlobTier::with_defaults(dir.path());

        assert_eq!(tier.stats().await.unwrap(), DiskTierStats::default());

        tier.put(&BlobKey::full("a"), Bytes::from_static(b"1234")).await.unwrap();
        tier.put(&BlobKey::thumbnail("b"), Bytes::from_static(b"12")).await.unwrap();
        let stats = tier.stats().await.unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.bytes, 6);

        let removed = tier.clear().await.unwrap();
        assert_eq!(removed, stats);
        assert_eq!(tier.stats().await.unwrap().files, 0);
    }
}
