//! Marker store: cached access to markers by ID, by region and by field.
//!
//! # Architecture
//!
//! ```text
//!                       ┌──────────────────────────────┐
//! query_by_ids ───────► │ BoundedCache<id, Marker>     │── miss ──┐
//!                       └──────────────────────────────┘          │
//!                                                                 ▼
//!                                             RequestCoalescer (chunks of ≤ max ids)
//!                                                                 │
//!                       ┌──────────────────────────────┐          ▼
//! query_region ───────► │ RegionResultCache            │    RemoteStore::get_by_ids
//!                       └──────────────┬───────────────┘
//!                                      │ miss
//!                                      ▼
//!                        covering geohash cells ──► RequestCoalescer (per cell)
//!                                                         │
//!                                                         ▼
//!                                              RemoteStore::query_range (prefix)
//!
//! query_collection ───► moka TTL cache ──► RemoteStore::query_range (exact)
//! ```
//!
//! Region queries over-fetch whole geohash cells and post-filter to the
//! exact viewport. A region is only cached when every cell scan returned
//! complete results.

mod config;
mod marker;

pub use config::{
    MarkerStoreConfig, DEFAULT_CELL_QUERY_LIMIT, DEFAULT_COLLECTION_CAPACITY,
    DEFAULT_COLLECTION_TTL, DEFAULT_MARKER_CAPACITY, DEFAULT_MARKER_COLLECTION, DEFAULT_MAX_CELLS,
    DEFAULT_RETRY_ATTEMPTS,
};
pub use marker::{Marker, FIELD_GEOHASH, FIELD_LATITUDE, FIELD_LONGITUDE};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use moka::future::Cache as MokaCache;
use tracing::{debug, trace, warn};

use crate::cache::{BoundedCache, CacheStats};
use crate::coalesce::{CoalescerStats, RequestCoalescer};
use crate::coord::{self, BoundingBox, Viewport};
use crate::error::{FetchError, FetchResult};
use crate::region::{
    adjacent_viewports, PrefetchScheduler, PrefetchStats, RegionCacheStats, RegionResultCache,
};
use crate::remote::{retry_with_policy, Document, IndexValue, RangeQuery, RemoteStore};

/// Result of scanning one geohash cell.
#[derive(Debug)]
struct CellScan {
    markers: Vec<Marker>,
    /// The scan hit its result limit, so the cell may hold more markers.
    truncated: bool,
}

/// Snapshot of marker store activity.
#[derive(Debug, Clone, Default)]
pub struct MarkerStoreStats {
    /// Individual markers cached by ID.
    pub markers: CacheStats,
    /// Cached region results.
    pub regions: RegionCacheStats,
    /// Adjacent-region prefetching.
    pub prefetch: PrefetchStats,
    /// Coalescing of by-ID fetches.
    pub by_id: CoalescerStats,
    /// Coalescing of geohash cell scans.
    pub cells: CoalescerStats,
    /// By-collection queries that reached the remote store.
    pub collection_queries: u64,
}

struct StoreInner {
    remote: Arc<dyn RemoteStore>,
    config: MarkerStoreConfig,
    markers: BoundedCache<String, Marker>,
    by_id: RequestCoalescer<String, Marker>,
    cells: RequestCoalescer<String, Arc<CellScan>>,
    regions: RegionResultCache,
    collections: MokaCache<RangeQuery, Arc<Vec<Marker>>>,
    prefetch: PrefetchScheduler,
}

/// Cached marker access over a [`RemoteStore`].
///
/// Cheap to clone; clones share every cache.
#[derive(Clone)]
pub struct MarkerStore {
    inner: Arc<StoreInner>,
}

impl MarkerStore {
    pub fn new(remote: Arc<dyn RemoteStore>, config: MarkerStoreConfig) -> Self {
        let collections = MokaCache::builder()
            .max_capacity(config.collection_capacity)
            .time_to_live(config.collection_ttl)
            .build();

        let inner = StoreInner {
            markers: BoundedCache::new(config.marker_capacity.max(1)),
            by_id: RequestCoalescer::new(config.fetch_timeout),
            cells: RequestCoalescer::new(config.fetch_timeout),
            regions: RegionResultCache::new(config.region_capacity, config.region_ttl),
            prefetch: PrefetchScheduler::new(config.prefetch_debounce),
            collections,
            remote,
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Markers inside `viewport`.
    ///
    /// Served from a covering cached region when one exists; otherwise the
    /// covering geohash cells are scanned. Either way, prefetching of the
    /// adjacent viewports is (re)scheduled.
    pub async fn query_region(&self, viewport: &Viewport) -> FetchResult<Vec<Marker>> {
        let result = match self.inner.regions.query(viewport) {
            Some(items) => items,
            None => self.inner.fetch_region(viewport).await?,
        };
        self.schedule_prefetch(viewport);
        Ok(result)
    }

    /// Markers with the given IDs, in request order.
    ///
    /// Cached markers are returned without a remote call. Missing IDs are
    /// fetched in chunks of at most the store's IDs-per-query limit,
    /// joining fetches already in flight. IDs that do not exist are left
    /// out. Any other failure fails the whole call after every chunk has
    /// settled, so successfully fetched markers are still cached.
    pub async fn query_by_ids(&self, ids: &[String]) -> FetchResult<Vec<Marker>> {
        let mut seen = HashSet::with_capacity(ids.len());
        let ids: Vec<&String> = ids.iter().filter(|id| seen.insert(*id)).collect();

        let mut found: HashMap<String, Marker> = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in &ids {
            match self.inner.markers.get(*id) {
                Some(marker) => {
                    found.insert((*id).clone(), marker);
                }
                None => missing.push((*id).clone()),
            }
        }
        trace!(
            requested = ids.len(),
            cached = found.len(),
            missing = missing.len(),
            "query_by_ids"
        );

        if !missing.is_empty() {
            let chunk_size = self.inner.max_ids_per_query();
            let remote = Arc::clone(&self.inner.remote);
            let collection = self.inner.config.collection.clone();
            let retry = self.inner.config.retry.clone();

            let results = self
                .inner
                .by_id
                .fetch_many_or_join(missing, chunk_size, move |chunk: Vec<String>| {
                    let remote = Arc::clone(&remote);
                    let collection = collection.clone();
                    let retry = retry.clone();
                    async move {
                        let docs =
                            retry_with_policy(&retry, || remote.get_by_ids(&collection, &chunk))
                                .await?;
                        Ok::<HashMap<String, Marker>, FetchError>(
                            markers_from_documents(&docs)
                                .into_iter()
                                .map(|m| (m.id.clone(), m))
                                .collect(),
                        )
                    }
                })
                .await;

            let mut first_error = None;
            for (id, result) in results {
                match result {
                    Ok(marker) => {
                        self.inner.markers.put(id.clone(), marker.clone());
                        found.insert(id, marker);
                    }
                    Err(e) if e.is_not_found() => trace!(id = %id, "Marker not found"),
                    Err(e) => {
                        debug!(id = %id, error = %e, "Marker fetch failed");
                        first_error.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        Ok(ids.into_iter().filter_map(|id| found.remove(id)).collect())
    }

    /// Markers whose `field` equals `value`, at most `limit` of them.
    ///
    /// Results are cached per query for the configured TTL; concurrent
    /// identical queries share one fetch.
    pub async fn query_collection(
        &self,
        field: &str,
        value: impl Into<IndexValue>,
        limit: usize,
    ) -> FetchResult<Vec<Marker>> {
        let query = RangeQuery::exact(self.inner.config.collection.as_str(), field, value, limit);
        let remote = Arc::clone(&self.inner.remote);
        let retry = self.inner.config.retry.clone();
        let timeout = self.inner.config.fetch_timeout;

        let scan = query.clone();
        let markers = self
            .inner
            .collections
            .try_get_with(query, async move {
                let docs = tokio::time::timeout(
                    timeout,
                    retry_with_policy(&retry, || remote.query_range(&scan)),
                )
                .await
                .map_err(|_| FetchError::Timeout { after: timeout })??;
                Ok::<_, FetchError>(Arc::new(markers_from_documents(&docs)))
            })
            .await
            .map_err(|e| (*e).clone())?;

        for marker in markers.iter() {
            self.inner.markers.put(marker.id.clone(), marker.clone());
        }
        Ok(markers.as_ref().clone())
    }

    /// A cached marker, without touching recency or the network.
    pub fn cached(&self, id: &str) -> Option<Marker> {
        self.inner.markers.peek(&id.to_string())
    }

    /// Drops every cached marker, region and collection result, and
    /// cancels pending prefetches.
    pub fn invalidate(&self) {
        self.inner.prefetch.cancel();
        self.inner.regions.invalidate();
        self.inner.markers.clear();
        self.inner.collections.invalidate_all();
        debug!("Marker store invalidated");
    }

    pub fn config(&self) -> &MarkerStoreConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> MarkerStoreStats {
        MarkerStoreStats {
            markers: self.inner.markers.stats(),
            regions: self.inner.regions.stats(),
            prefetch: self.inner.prefetch.stats(),
            by_id: self.inner.by_id.stats(),
            cells: self.inner.cells.stats(),
            collection_queries: self.inner.collections.entry_count(),
        }
    }

    fn schedule_prefetch(&self, viewport: &Viewport) {
        if !self.inner.config.prefetch {
            return;
        }
        // Weak so a pending prefetch does not keep a dropped store alive.
        let store = Arc::downgrade(&self.inner);
        self.inner.prefetch.schedule(*viewport, move |viewport| async move {
            let Some(inner) = store.upgrade() else {
                return;
            };
            for neighbor in adjacent_viewports(&viewport) {
                if inner.regions.covers(&neighbor) {
                    continue;
                }
                match inner.fetch_region(&neighbor).await {
                    Ok(items) => {
                        trace!(viewport = %neighbor, items = items.len(), "Prefetched region")
                    }
                    Err(e) => debug!(viewport = %neighbor, error = %e, "Prefetch failed"),
                }
            }
        });
    }
}

impl StoreInner {
    fn max_ids_per_query(&self) -> usize {
        self.config
            .max_ids_per_query
            .min(self.remote.max_ids_per_query())
            .max(1)
    }

    /// Precision actually scanned for `bbox`: the target precision, lowered
    /// until the covering cell count fits `max_cells`.
    fn scan_precision(&self, bbox: &BoundingBox, target: usize) -> usize {
        let mut precision = target.max(1);
        while precision > 1 && coord::covering_cell_count(bbox, precision) > self.config.max_cells {
            precision -= 1;
        }
        precision
    }

    /// Scans the cells covering `viewport`, caches the region when
    /// complete, and returns the markers inside the viewport.
    async fn fetch_region(&self, viewport: &Viewport) -> FetchResult<Vec<Marker>> {
        let bbox = viewport.bbox();
        let target = self.regions.target_precision(viewport);
        let precision = self.scan_precision(&bbox, target);
        let cells = coord::covering_cells(&bbox, precision)
            .map_err(|e| FetchError::malformed("viewport", e.to_string()))?;
        debug!(
            viewport = %viewport,
            target,
            precision,
            cells = cells.len(),
            "Fetching region"
        );

        let remote = Arc::clone(&self.remote);
        let collection = self.config.collection.clone();
        let retry = self.config.retry.clone();
        let limit = self.config.cell_query_limit;

        let scans = self
            .cells
            .fetch_many_or_join(cells.clone(), 1, move |chunk: Vec<String>| {
                let remote = Arc::clone(&remote);
                let collection = collection.clone();
                let retry = retry.clone();
                async move {
                    let mut out = HashMap::with_capacity(chunk.len());
                    for prefix in chunk {
                        let (lower, upper) = coord::prefix_range(&prefix);
                        let query =
                            RangeQuery::new(collection.as_str(), FIELD_GEOHASH, lower, upper, limit);
                        let docs = retry_with_policy(&retry, || remote.query_range(&query)).await?;
                        let scan = CellScan {
                            truncated: docs.len() >= limit,
                            markers: markers_from_documents(&docs),
                        };
                        out.insert(prefix, Arc::new(scan));
                    }
                    Ok::<_, FetchError>(out)
                }
            })
            .await;

        let mut complete = true;
        let mut covered: Option<BoundingBox> = None;
        let mut seen = HashSet::new();
        let mut all = Vec::new();

        for cell in &cells {
            let scan = match scans.get(cell) {
                Some(Ok(scan)) => scan,
                Some(Err(e)) => return Err(e.clone()),
                None => return Err(FetchError::not_found(cell.as_str())),
            };
            if scan.truncated {
                warn!(cell = %cell, limit, "Cell scan truncated, region will not be cached");
                complete = false;
            }
            let cell_bbox = coord::decode(cell)
                .map_err(|e| FetchError::malformed(cell.as_str(), e.to_string()))?
                .bbox;
            covered = Some(covered.map_or(cell_bbox, |b| b.union(&cell_bbox)));
            for marker in &scan.markers {
                if seen.insert(marker.id.clone()) {
                    all.push(marker.clone());
                }
            }
        }

        let visible: Vec<Marker> = all
            .iter()
            .filter(|m| bbox.contains_point(m.latitude, m.longitude))
            .cloned()
            .collect();
        for marker in &visible {
            self.markers.put(marker.id.clone(), marker.clone());
        }

        if let (true, Some(covered)) = (complete, covered) {
            self.regions
                .store(Viewport::from_bbox(&covered), precision, all);
        }
        Ok(visible)
    }
}

/// Converts documents to markers, dropping malformed ones.
fn markers_from_documents(docs: &[Document]) -> Vec<Marker> {
    docs.iter()
        .filter_map(|doc| match Marker::from_document(doc) {
            Ok(marker) => Some(marker),
            Err(e) => {
                warn!(id = %doc.id, error = %e, "Dropping malformed marker document");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryStore;
    use serde_json::{json, Map};
    use std::time::Duration;

    fn seed(store: &InMemoryStore, markers: &[(&str, f64, f64)]) {
        for (id, lat, lon) in markers {
            let marker = Marker::new(*id, *lat, *lon, Map::new()).unwrap();
            store.insert(DEFAULT_MARKER_COLLECTION, marker.to_document());
        }
    }

    fn no_prefetch() -> MarkerStoreConfig {
        MarkerStoreConfig::default().with_prefetch(false)
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_query_by_ids_batches_and_caches() {
        let remote = Arc::new(InMemoryStore::new());
        let points: Vec<(String, f64, f64)> = (0..25)
            .map(|i| (format!("m{}", i), 10.0 + i as f64 * 0.01, 20.0))
            .collect();
        for (id, lat, lon) in &points {
            let marker = Marker::new(id.as_str(), *lat, *lon, Map::new()).unwrap();
            remote.insert(DEFAULT_MARKER_COLLECTION, marker.to_document());
        }
        let store = MarkerStore::new(remote.clone(), no_prefetch());

        let wanted: Vec<String> = points.iter().map(|(id, _, _)| id.clone()).collect();
        let markers = store.query_by_ids(&wanted).await.unwrap();
        assert_eq!(markers.len(), 25);
        assert_eq!(markers[0].id, "m0");
        assert_eq!(markers[24].id, "m24");
        assert_eq!(remote.call_counts().get_by_ids, 3);

        // Fully cached now.
        let again = store.query_by_ids(&wanted[..5]).await.unwrap();
        assert_eq!(again.len(), 5);
        assert_eq!(remote.call_counts().get_by_ids, 3);
    }

    #[tokio::test]
    async fn test_query_by_ids_skips_unknown_and_malformed() {
        let remote = Arc::new(InMemoryStore::new());
        seed(&remote, &[("good", 1.0, 1.0)]);
        remote.insert(
            DEFAULT_MARKER_COLLECTION,
            Document::new("broken").with_field(FIELD_LATITUDE, 1.0),
        );
        let store = MarkerStore::new(remote, no_prefetch());

        let markers = store
            .query_by_ids(&ids(&["good", "broken", "ghost", "good"]))
            .await
            .unwrap();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].id, "good");
    }

    #[tokio::test]
    async fn test_query_by_ids_failure_keeps_cache_intact() {
        let remote = Arc::new(InMemoryStore::new());
        seed(&remote, &[("a", 1.0, 1.0), ("b", 2.0, 2.0)]);
        let store = MarkerStore::new(
            remote.clone(),
            no_prefetch().with_retry(crate::remote::RetryPolicy::None),
        );

        store.query_by_ids(&ids(&["a"])).await.unwrap();
        remote.fail_next(FetchError::permission_denied("denied"));
        let err = store.query_by_ids(&ids(&["a", "b"])).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::PermissionDenied);

        assert!(store.cached("a").is_some());
        assert!(store.cached("b").is_none());
    }

    #[tokio::test]
    async fn test_region_query_filters_and_caches() {
        let remote = Arc::new(InMemoryStore::new());
        seed(
            &remote,
            &[
                ("center", 40.0, -74.0),
                ("edge", 40.2, -73.8),
                ("far", 40.9, -73.0),
            ],
        );
        let store = MarkerStore::new(remote.clone(), no_prefetch());

        let vp = Viewport::new(40.0, -74.0, 0.5, 0.5);
        let mut found: Vec<String> = store
            .query_region(&vp)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        found.sort();
        assert_eq!(found, vec!["center", "edge"]);
        let scans = remote.call_counts().query_range;
        assert!(scans >= 1);

        // Same viewport again is served from the region cache.
        let again = store.query_region(&vp).await.unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(remote.call_counts().query_range, scans);
        assert_eq!(store.stats().regions.hits, 1);
    }

    #[tokio::test]
    async fn test_truncated_scan_not_cached() {
        let remote = Arc::new(InMemoryStore::new());
        seed(
            &remote,
            &[("a", 40.0, -74.0), ("b", 40.01, -74.01), ("c", 40.02, -74.02)],
        );
        let store = MarkerStore::new(remote.clone(), no_prefetch().with_cell_query_limit(2));

        let vp = Viewport::new(40.0, -74.0, 0.5, 0.5);
        store.query_region(&vp).await.unwrap();
        assert_eq!(store.stats().regions.regions, 0);
    }

    #[tokio::test]
    async fn test_scan_precision_respects_max_cells() {
        let remote = Arc::new(InMemoryStore::new());
        let store = MarkerStore::new(remote, no_prefetch().with_max_cells(4));
        let bbox = BoundingBox::new(30.0, -10.0, 50.0, 30.0);
        let precision = store.inner.scan_precision(&bbox, 4);
        assert!(coord::covering_cell_count(&bbox, precision) <= 4 || precision == 1);
    }

    #[tokio::test]
    async fn test_query_collection_cached() {
        let remote = Arc::new(InMemoryStore::new());
        for (id, owner) in [("a", "alice"), ("b", "alice"), ("c", "bob")] {
            let mut attributes = Map::new();
            attributes.insert("owner".into(), json!(owner));
            let marker = Marker::new(id, 1.0, 1.0, attributes).unwrap();
            remote.insert(DEFAULT_MARKER_COLLECTION, marker.to_document());
        }
        let store = MarkerStore::new(remote.clone(), no_prefetch());

        let mine = store.query_collection("owner", "alice", 10).await.unwrap();
        assert_eq!(mine.len(), 2);
        let again = store.query_collection("owner", "alice", 10).await.unwrap();
        assert_eq!(again, mine);
        assert_eq!(remote.call_counts().query_range, 1);

        store.invalidate();
        store.query_collection("owner", "alice", 10).await.unwrap();
        assert_eq!(remote.call_counts().query_range, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefetch_fills_adjacent_regions() {
        let remote = Arc::new(InMemoryStore::new());
        seed(&remote, &[("north", 40.5, -74.0)]);
        let store = MarkerStore::new(
            remote.clone(),
            MarkerStoreConfig::default().with_prefetch_debounce(Duration::from_millis(500)),
        );

        let vp = Viewport::new(40.0, -74.0, 0.5, 0.5);
        store.query_region(&vp).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let scans = remote.call_counts().query_range;
        let north = vp.shifted(coord::Direction::North).unwrap();
        let found = store.query_region(&north).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(remote.call_counts().query_range, scans);
        assert_eq!(store.stats().prefetch.started, 1);
    }
}
