//! The facade the UI layer talks to.
//!
//! [`GeoFeed`] is built once with its remote collaborators injected and
//! then cloned wherever it is needed. It owns the marker store, the blob
//! cache and the feed aggregator, and forwards lifecycle signals to them.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use geofeed::remote::{InMemoryBlobStore, InMemoryStore};
//! use geofeed::service::{GeoFeed, ServiceConfig};
//!
//! let service = GeoFeed::new(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(InMemoryBlobStore::new()),
//!     ServiceConfig::default(),
//! );
//! let markers = service.query_region(&viewport).await?;
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use crate::blob::{BlobCacheConfig, BlobCacheStats, BlobKey, BlobVariant, BlobView, MultiTierBlobCache};
use crate::coord::Viewport;
use crate::error::FetchResult;
use crate::feed::{FeedAggregator, FeedConfig, FeedCursor, FeedPage, FeedStats};
use crate::remote::{BlobStore, IndexValue, RemoteStore};
use crate::store::{Marker, MarkerStore, MarkerStoreConfig, MarkerStoreStats};

/// Configuration of every component behind the facade.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub store: MarkerStoreConfig,
    pub blob: BlobCacheConfig,
    pub feed: FeedConfig,
}

impl ServiceConfig {
    pub fn with_store(mut self, store: MarkerStoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn with_blob(mut self, blob: BlobCacheConfig) -> Self {
        self.blob = blob;
        self
    }

    pub fn with_feed(mut self, feed: FeedConfig) -> Self {
        self.feed = feed;
        self
    }
}

/// Point-in-time statistics of every cache.
#[derive(Debug, Clone, Default)]
pub struct ServiceStats {
    /// Marker cache, region cache, prefetch and by-ID batching.
    pub markers: MarkerStoreStats,
    /// Every blob tier.
    pub blobs: BlobCacheStats,
    /// Feed page assembly.
    pub feed: FeedStats,
}

impl fmt::Display for ServiceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "markers:     {}", self.markers.markers)?;
        writeln!(f, "regions:     {}", self.markers.regions)?;
        writeln!(f, "by-id:       {}", self.markers.by_id)?;
        writeln!(f, "cells:       {}", self.markers.cells)?;
        writeln!(f, "feed:        {}", self.feed)?;
        write!(f, "{}", self.blobs)
    }
}

/// Lazy-loading access to markers, feed pages and images.
///
/// Cheap to clone; clones share all caches.
#[derive(Clone)]
pub struct GeoFeed {
    markers: MarkerStore,
    blobs: MultiTierBlobCache,
    feed: FeedAggregator,
}

impl GeoFeed {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        blob_store: Arc<dyn BlobStore>,
        config: ServiceConfig,
    ) -> Self {
        let markers = MarkerStore::new(Arc::clone(&remote), config.store);
        let feed = FeedAggregator::new(remote, markers.clone(), config.feed);
        let blobs = MultiTierBlobCache::new(blob_store, config.blob);
        info!(
            disk_tier = blobs.has_disk_tier(),
            "GeoFeed service created"
        );
        Self {
            markers,
            blobs,
            feed,
        }
    }

    /// Markers inside the viewport.
    pub async fn query_region(&self, viewport: &Viewport) -> FetchResult<Vec<Marker>> {
        self.markers.query_region(viewport).await
    }

    /// Markers with the given IDs, in request order. Unknown IDs are left out.
    pub async fn query_by_ids(&self, ids: &[String]) -> FetchResult<Vec<Marker>> {
        self.markers.query_by_ids(ids).await
    }

    /// Markers whose `field` equals `value`.
    pub async fn query_collection(
        &self,
        field: &str,
        value: impl Into<IndexValue>,
        limit: usize,
    ) -> FetchResult<Vec<Marker>> {
        self.markers.query_collection(field, value, limit).await
    }

    /// One page of the merged feed of `producer_ids`, with the referenced
    /// markers resolved.
    pub async fn query_feed_page(
        &self,
        producer_ids: &[String],
        cursor: Option<&FeedCursor>,
        page_size: usize,
    ) -> FetchResult<FeedPage> {
        self.feed.page(producer_ids, cursor, page_size).await
    }

    /// Blob bytes, from the first tier that has them.
    pub async fn load_blob(&self, key: &BlobKey) -> FetchResult<Bytes> {
        self.blobs.load(key).await
    }

    /// A view handle for one UI element showing `key`.
    pub fn blob_view(&self, key: BlobKey) -> BlobView {
        BlobView::new(self.blobs.clone(), key)
    }

    /// Uploads a blob and caches it locally.
    pub async fn store_blob(
        &self,
        path: &str,
        variant: BlobVariant,
        bytes: Bytes,
    ) -> FetchResult<BlobKey> {
        self.blobs.store(path, variant, bytes).await
    }

    /// Removes a blob from every tier, including the remote store.
    pub async fn evict_blob(&self, key: &BlobKey) -> FetchResult<()> {
        self.blobs.evict(key).await
    }

    /// Forgets cached markers, regions and feed pages.
    ///
    /// Called on sign-out and whenever the followed producer set changes.
    pub fn invalidate_region_cache(&self) {
        self.markers.invalidate();
        self.feed.invalidate();
        info!("Region and feed caches invalidated");
    }

    /// Clears the blob memory tiers and the persistent tier.
    pub async fn invalidate_blob_cache(&self) -> FetchResult<()> {
        self.blobs.invalidate().await
    }

    pub fn on_memory_pressure(&self) {
        self.blobs.on_memory_pressure();
    }

    pub fn on_backgrounded(&self) {
        self.blobs.on_backgrounded();
    }

    pub fn on_foregrounded(&self) {
        self.blobs.on_foregrounded();
    }

    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    pub fn blobs(&self) -> &MultiTierBlobCache {
        &self.blobs
    }

    pub fn feed(&self) -> &FeedAggregator {
        &self.feed
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            markers: self.markers.stats(),
            blobs: self.blobs.stats(),
            feed: self.feed.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedItem, DEFAULT_FEED_COLLECTION};
    use crate::remote::{InMemoryBlobStore, InMemoryStore};
    use crate::store::DEFAULT_MARKER_COLLECTION;
    use chrono::DateTime;
    use serde_json::Map;

    fn service() -> (Arc<InMemoryStore>, Arc<InMemoryBlobStore>, GeoFeed) {
        let remote = Arc::new(InMemoryStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let config = ServiceConfig::default()
            .with_store(MarkerStoreConfig::default().with_prefetch(false));
        let service = GeoFeed::new(remote.clone(), blobs.clone(), config);
        (remote, blobs, service)
    }

    #[tokio::test]
    async fn test_invalidate_region_cache_forces_fresh_feed() {
        let (remote, _blobs, service) = service();
        let marker = Marker::new("m1", 1.0, 1.0, Map::new()).unwrap();
        remote.insert(DEFAULT_MARKER_COLLECTION, marker.to_document());
        let at = DateTime::from_timestamp_millis(1).unwrap();
        remote.insert(
            DEFAULT_FEED_COLLECTION,
            FeedItem::new("p1", "alice", "m1", at).to_document(),
        );
        let producers = vec!["alice".to_string()];

        let page = service.query_feed_page(&producers, None, 10).await.unwrap();
        assert_eq!(page.markers.len(), 1);
        assert!(service.markers().cached("m1").is_some());

        service.invalidate_region_cache();
        assert!(service.markers().cached("m1").is_none());

        service.query_feed_page(&producers, None, 10).await.unwrap();
        assert_eq!(remote.call_counts().query_range, 2);
        assert_eq!(remote.call_counts().get_by_ids, 2);
    }

    #[tokio::test]
    async fn test_lifecycle_hooks_reach_blob_cache() {
        let (_remote, blobs, service) = service();
        let url = blobs.insert("a.jpg", Bytes::from_static(b"a"));
        let thumb_url = blobs.insert("a_thumb.jpg", Bytes::from_static(b"t"));

        service.load_blob(&BlobKey::full(url.as_str())).await.unwrap();
        service.load_blob(&BlobKey::thumbnail(thumb_url.as_str())).await.unwrap();

        service.on_memory_pressure();
        let stats = service.stats();
        assert_eq!(stats.blobs.full.entry_count, 0);
        assert_eq!(stats.blobs.thumbnails.entry_count, 1);
        assert_eq!(stats.blobs.pressure_events, 1);

        service.invalidate_blob_cache().await.unwrap();
        assert_eq!(service.stats().blobs.thumbnails.entry_count, 0);
    }
}
