//! The memory/disk/remote tier stack.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use super::disk::{DiskBlobTier, DiskTierStats, DEFAULT_DISK_IO_LIMIT};
use super::{BlobKey, BlobVariant};
use crate::cache::{BoundedCache, CacheStats, RemovalCause};
use crate::coalesce::{CoalescerStats, RequestCoalescer, DEFAULT_FETCH_TIMEOUT};
use crate::error::FetchResult;
use crate::remote::{retry_with_policy, BlobStore, RetryPolicy};
use crate::store::DEFAULT_RETRY_ATTEMPTS;

/// Default number of full-size assets kept in memory.
pub const DEFAULT_FULL_CAPACITY: usize = 10;

/// Default number of thumbnails kept in memory.
pub const DEFAULT_THUMBNAIL_CAPACITY: usize = 50;

/// Default byte budget of the full-size memory tier (64 MiB).
pub const DEFAULT_FULL_MAX_BYTES: u64 = 64 * 1024 * 1024;

/// Default byte budget of the thumbnail memory tier (16 MiB).
pub const DEFAULT_THUMBNAIL_MAX_BYTES: u64 = 16 * 1024 * 1024;

/// Configuration for [`MultiTierBlobCache`].
#[derive(Debug, Clone)]
pub struct BlobCacheConfig {
    pub full_capacity: usize,
    pub thumbnail_capacity: usize,
    /// Byte budget of the full-size tier; `None` bounds by count only.
    pub full_max_bytes: Option<u64>,
    /// Byte budget of the thumbnail tier; `None` bounds by count only.
    pub thumbnail_max_bytes: Option<u64>,
    /// Cache directory for the persistent tier; `None` disables it.
    pub disk_dir: Option<PathBuf>,
    pub disk_io_limit: usize,
    pub fetch_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for BlobCacheConfig {
    fn default() -> Self {
        Self {
            full_capacity: DEFAULT_FULL_CAPACITY,
            thumbnail_capacity: DEFAULT_THUMBNAIL_CAPACITY,
            full_max_bytes: Some(DEFAULT_FULL_MAX_BYTES),
            thumbnail_max_bytes: Some(DEFAULT_THUMBNAIL_MAX_BYTES),
            disk_dir: None,
            disk_io_limit: DEFAULT_DISK_IO_LIMIT,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            retry: RetryPolicy::exponential(DEFAULT_RETRY_ATTEMPTS),
        }
    }
}

impl BlobCacheConfig {
    pub fn with_full_capacity(mut self, capacity: usize) -> Self {
        self.full_capacity = capacity.max(1);
        self
    }

    pub fn with_thumbnail_capacity(mut self, capacity: usize) -> Self {
        self.thumbnail_capacity = capacity.max(1);
        self
    }

    pub fn with_full_max_bytes(mut self, max_bytes: Option<u64>) -> Self {
        self.full_max_bytes = max_bytes;
        self
    }

    pub fn with_thumbnail_max_bytes(mut self, max_bytes: Option<u64>) -> Self {
        self.thumbnail_max_bytes = max_bytes;
        self
    }

    pub fn with_disk_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.disk_dir = Some(dir.into());
        self
    }

    pub fn with_disk_io_limit(mut self, limit: usize) -> Self {
        self.disk_io_limit = limit.max(1);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Snapshot of blob cache activity.
#[derive(Debug, Clone, Default)]
pub struct BlobCacheStats {
    /// Memory tier for full-size assets.
    pub full: CacheStats,
    /// Memory tier for thumbnails.
    pub thumbnails: CacheStats,
    /// Loads answered by the persistent tier.
    pub disk_hits: u64,
    /// Persistent tier lookups that fell through to the remote store.
    pub disk_misses: u64,
    /// Remote transfers started, retries not counted separately.
    pub remote_fetches: u64,
    /// Remote transfers that failed after every retry.
    pub remote_errors: u64,
    /// Successful uploads through `store()`.
    pub uploads: u64,
    /// Memory pressure signals received.
    pub pressure_events: u64,
    /// Coalescing of loads that missed memory.
    pub fetches: CoalescerStats,
}

impl fmt::Display for BlobCacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "full:       {}", self.full)?;
        writeln!(f, "thumbnails: {}", self.thumbnails)?;
        write!(
            f,
            "disk: {} hits, {} misses; remote: {} fetches, {} errors",
            self.disk_hits, self.disk_misses, self.remote_fetches, self.remote_errors
        )
    }
}

#[derive(Default)]
struct Counters {
    disk_hits: AtomicU64,
    disk_misses: AtomicU64,
    remote_fetches: AtomicU64,
    remote_errors: AtomicU64,
    uploads: AtomicU64,
    pressure_events: AtomicU64,
}

struct BlobInner {
    full: BoundedCache<BlobKey, Bytes>,
    thumbnails: BoundedCache<BlobKey, Bytes>,
    disk: Option<DiskBlobTier>,
    remote: Arc<dyn BlobStore>,
    /// Keyed by URL so both variants of one asset share a transfer.
    fetches: RequestCoalescer<String, Bytes>,
    retry: RetryPolicy,
    counters: Counters,
}

/// Memory → disk → remote cache for blobs.
///
/// Cheap to clone; clones share every tier.
#[derive(Clone)]
pub struct MultiTierBlobCache {
    inner: Arc<BlobInner>,
}

fn memory_tier(capacity: usize, max_bytes: Option<u64>) -> BoundedCache<BlobKey, Bytes> {
    let cache = BoundedCache::new(capacity.max(1)).with_eviction_listener(
        |key: &BlobKey, bytes: &Bytes, cause: RemovalCause| {
            trace!(key = %key, bytes = bytes.len(), cause = ?cause, "Blob left memory tier");
        },
    );
    match max_bytes {
        Some(max) => cache.with_weigher(max, |_key: &BlobKey, bytes: &Bytes| bytes.len() as u64),
        None => cache,
    }
}

impl MultiTierBlobCache {
    pub fn new(remote: Arc<dyn BlobStore>, config: BlobCacheConfig) -> Self {
        let disk = config
            .disk_dir
            .as_ref()
            .map(|dir| DiskBlobTier::new(dir, config.disk_io_limit));

        let inner = BlobInner {
            full: memory_tier(config.full_capacity, config.full_max_bytes),
            thumbnails: memory_tier(config.thumbnail_capacity, config.thumbnail_max_bytes),
            disk,
            remote,
            fetches: RequestCoalescer::new(config.fetch_timeout),
            retry: config.retry,
            counters: Counters::default(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn has_disk_tier(&self) -> bool {
        self.inner.disk.is_some()
    }

    /// Loads a blob through the tiers.
    ///
    /// Concurrent loads of the same URL share one disk read and at most one
    /// remote transfer, whichever variant each caller asked for. The bytes
    /// land in the memory tier of every variant that was requested.
    pub async fn load(&self, key: &BlobKey) -> FetchResult<Bytes> {
        let memory = self.inner.memory(key.variant);
        if let Some(bytes) = memory.get(key) {
            trace!(key = %key, "Blob memory hit");
            return Ok(bytes);
        }

        let inner = Arc::clone(&self.inner);
        let owned = key.clone();
        let bytes = self
            .inner
            .fetches
            .fetch_or_join(key.url.clone(), move || async move {
                inner.load_from_lower_tiers(&owned).await
            })
            .await?;

        // Joined a flight started for the other variant.
        if !memory.contains(key) {
            memory.put(key.clone(), bytes.clone());
        }
        Ok(bytes)
    }

    /// Returns a blob only if it is in memory.
    pub fn cached(&self, key: &BlobKey) -> Option<Bytes> {
        self.inner.memory(key.variant).peek(key)
    }

    /// Uploads `bytes` under `path` and caches them under the returned key.
    pub async fn store(&self, path: &str, variant: BlobVariant, bytes: Bytes) -> FetchResult<BlobKey> {
        let remote = &self.inner.remote;
        let url = retry_with_policy(&self.inner.retry, || remote.put_blob(path, bytes.clone())).await?;
        self.inner.counters.uploads.fetch_add(1, Ordering::Relaxed);

        let key = BlobKey::new(url, variant);
        self.inner.write_disk(&key, bytes.clone()).await;
        self.inner.memory(variant).put(key.clone(), bytes);
        debug!(key = %key, "Stored blob");
        Ok(key)
    }

    /// Removes a blob from every tier, including the remote store.
    ///
    /// A blob already absent remotely is not an error.
    pub async fn evict(&self, key: &BlobKey) -> FetchResult<()> {
        self.inner.memory(key.variant).remove(key);
        if let Some(disk) = &self.inner.disk {
            disk.remove(key).await?;
        }
        match self.inner.remote.delete_blob(&key.url).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Clears both memory tiers and the persistent tier.
    pub async fn invalidate(&self) -> FetchResult<()> {
        self.inner.full.clear();
        self.inner.thumbnails.clear();
        if let Some(disk) = &self.inner.disk {
            disk.clear().await?;
        }
        info!("Blob cache invalidated");
        Ok(())
    }

    /// Memory pressure signal: drops every full-size asset from memory.
    pub fn on_memory_pressure(&self) {
        let dropped = self.inner.full.len();
        self.inner.full.clear();
        self.inner
            .counters
            .pressure_events
            .fetch_add(1, Ordering::Relaxed);
        info!(dropped, "Memory pressure, cleared full-size blob tier");
    }

    /// The application moved to the background.
    pub fn on_backgrounded(&self) {
        let dropped = self.inner.full.len();
        self.inner.full.clear();
        debug!(dropped, "Backgrounded, cleared full-size blob tier");
    }

    /// The application returned to the foreground. Nothing is pre-warmed;
    /// tiers repopulate on demand.
    pub fn on_foregrounded(&self) {
        debug!("Foregrounded");
    }

    /// Size of the persistent tier, if enabled.
    pub async fn disk_stats(&self) -> FetchResult<Option<DiskTierStats>> {
        match &self.inner.disk {
            Some(disk) => Ok(Some(disk.stats().await?)),
            None => Ok(None),
        }
    }

    pub fn stats(&self) -> BlobCacheStats {
        let c = &self.inner.counters;
        BlobCacheStats {
            full: self.inner.full.stats(),
            thumbnails: self.inner.thumbnails.stats(),
            disk_hits: c.disk_hits.load(Ordering::Relaxed),
            disk_misses: c.disk_misses.load(Ordering::Relaxed),
            remote_fetches: c.remote_fetches.load(Ordering::Relaxed),
            remote_errors: c.remote_errors.load(Ordering::Relaxed),
            uploads: c.uploads.load(Ordering::Relaxed),
            pressure_events: c.pressure_events.load(Ordering::Relaxed),
            fetches: self.inner.fetches.stats(),
        }
    }
}

impl BlobInner {
    fn memory(&self, variant: BlobVariant) -> &BoundedCache<BlobKey, Bytes> {
        match variant {
            BlobVariant::Full => &self.full,
            BlobVariant::Thumbnail => &self.thumbnails,
        }
    }

    async fn load_from_lower_tiers(&self, key: &BlobKey) -> FetchResult<Bytes> {
        if let Some(disk) = &self.disk {
            match disk.get(key).await {
                Some(bytes) => {
                    self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                    trace!(key = %key, "Blob disk hit");
                    self.memory(key.variant).put(key.clone(), bytes.clone());
                    return Ok(bytes);
                }
                None => {
                    self.counters.disk_misses.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        self.counters.remote_fetches.fetch_add(1, Ordering::Relaxed);
        let remote = &self.remote;
        let bytes = match retry_with_policy(&self.retry, || remote.get_blob(&key.url)).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.counters.remote_errors.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, error = %e, "Remote blob fetch failed");
                return Err(e);
            }
        };
        debug!(key = %key, bytes = bytes.len(), "Fetched blob from remote");

        self.write_disk(key, bytes.clone()).await;
        self.memory(key.variant).put(key.clone(), bytes.clone());
        Ok(bytes)
    }

    /// Best-effort write to the persistent tier.
    async fn write_disk(&self, key: &BlobKey, bytes: Bytes) {
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.put(key, bytes).await {
                warn!(key = %key, error = %e, "Failed to write blob to disk tier");
            }
        }
    }
}
