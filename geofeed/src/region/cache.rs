//! Cache of region query results with containment-based reuse.
//!
//! A cached region is reused for a new viewport when all three hold:
//!
//! 1. `region.precision <= target precision` (it searched at least as broadly)
//! 2. the region's box fully contains the viewport's box
//! 3. the region is younger than the TTL
//!
//! Regions live in a small FIFO list. The list is scanned newest first, so
//! a fresher region wins over an older one covering the same area.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::coord::{BoundingBox, PrecisionSelector, Viewport};
use crate::store::Marker;

/// Default number of regions kept.
pub const DEFAULT_REGION_CAPACITY: usize = 20;

/// Default region time-to-live (5 minutes).
pub const DEFAULT_REGION_TTL: Duration = Duration::from_secs(300);

/// The stored result of one region query.
#[derive(Debug, Clone)]
pub struct CachedRegion {
    /// Area the items are complete for.
    pub viewport: Viewport,
    /// Geohash precision the area was searched at.
    pub precision: usize,
    pub items: Arc<Vec<Marker>>,
    pub fetched_at: Instant,
}

impl CachedRegion {
    pub fn bbox(&self) -> BoundingBox {
        self.viewport.bbox()
    }

    /// Returns true if this region is fresh and can answer a query for
    /// `bbox` at `target_precision`.
    pub fn serves(&self, bbox: &BoundingBox, target_precision: usize, ttl: Duration, now: Instant) -> bool {
        self.precision <= target_precision
            && self.bbox().contains_half_open(bbox)
            && now.saturating_duration_since(self.fetched_at) < ttl
    }

    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) >= ttl
    }
}

/// Counters for region cache activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionCacheStats {
    /// Queries answered from a covering region.
    pub hits: u64,
    /// Queries no fresh region could answer.
    pub misses: u64,
    /// Regions dropped because they outlived the TTL.
    pub expired: u64,
    /// Regions recorded after a complete fetch.
    pub stored: u64,
    /// Regions dropped by FIFO capacity or superseded by a covering region.
    pub evicted: u64,
    /// Regions currently held.
    pub regions: usize,
}

impl fmt::Display for RegionCacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} regions, {} hits, {} misses, {} expired, {} evicted",
            self.regions, self.hits, self.misses, self.expired, self.evicted
        )
    }
}

/// Bounded list of [`CachedRegion`]s.
pub struct RegionResultCache {
    regions: Mutex<VecDeque<CachedRegion>>,
    selector: PrecisionSelector,
    capacity: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    stored: AtomicU64,
    evicted: AtomicU64,
}

impl Default for RegionResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_REGION_CAPACITY, DEFAULT_REGION_TTL)
    }
}

impl RegionResultCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self::with_selector(capacity, ttl, PrecisionSelector::default())
    }

    pub fn with_selector(capacity: usize, ttl: Duration, selector: PrecisionSelector) -> Self {
        Self {
            regions: Mutex::new(VecDeque::with_capacity(capacity)),
            selector,
            capacity: capacity.max(1),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            stored: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Precision a query for `viewport` should be served at.
    pub fn target_precision(&self, viewport: &Viewport) -> usize {
        self.selector.select(viewport.span_lat)
    }

    pub fn selector(&self) -> &PrecisionSelector {
        &self.selector
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Looks up a region covering `viewport`.
    ///
    /// On a hit, returns the region's items that lie inside the viewport.
    /// `None` means the caller has to fetch.
    pub fn query(&self, viewport: &Viewport) -> Option<Vec<Marker>> {
        let target = self.target_precision(viewport);
        let bbox = viewport.bbox();

        let found = self.find(&bbox, target);
        match found {
            Some(region) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let items: Vec<Marker> = region
                    .items
                    .iter()
                    .filter(|m| bbox.contains_point(m.latitude, m.longitude))
                    .cloned()
                    .collect();
                trace!(
                    viewport = %viewport,
                    precision = region.precision,
                    target,
                    items = items.len(),
                    "Region cache hit"
                );
                Some(items)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(viewport = %viewport, target, "Region cache miss");
                None
            }
        }
    }

    /// Returns true if a fresh region covers `viewport`, without counting a
    /// hit or miss.
    pub fn covers(&self, viewport: &Viewport) -> bool {
        let target = self.target_precision(viewport);
        self.find(&viewport.bbox(), target).is_some()
    }

    fn find(&self, bbox: &BoundingBox, target: usize) -> Option<CachedRegion> {
        let now = Instant::now();
        let mut regions = self.regions.lock();
        let before = regions.len();
        regions.retain(|r| !r.is_expired(self.ttl, now));
        let dropped = before - regions.len();
        if dropped > 0 {
            self.expired.fetch_add(dropped as u64, Ordering::Relaxed);
        }
        regions
            .iter()
            .rev()
            .find(|r| r.serves(bbox, target, self.ttl, now))
            .cloned()
    }

    /// Records the result of a region fetch.
    ///
    /// Older regions that the new one covers at equal or coarser precision
    /// are superseded and dropped. When the list is full the oldest region
    /// is evicted.
    pub fn store(&self, viewport: Viewport, precision: usize, items: Vec<Marker>) {
        let region = CachedRegion {
            viewport,
            precision,
            items: Arc::new(items),
            fetched_at: Instant::now(),
        };
        let bbox = region.bbox();

        let mut regions = self.regions.lock();
        let before = regions.len();
        regions.retain(|r| !(r.precision >= precision && bbox.contains(&r.bbox())));
        let mut evicted = before - regions.len();

        while regions.len() >= self.capacity {
            regions.pop_front();
            evicted += 1;
        }
        regions.push_back(region);
        drop(regions);

        self.stored.fetch_add(1, Ordering::Relaxed);
        if evicted > 0 {
            self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
        }
        debug!(bbox = %bbox, precision, evicted, "Stored region");
    }

    /// Drops every region.
    pub fn invalidate(&self) {
        let mut regions = self.regions.lock();
        let count = regions.len();
        regions.clear();
        debug!(count, "Region cache invalidated");
    }

    /// Drops expired regions, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut regions = self.regions.lock();
        let before = regions.len();
        regions.retain(|r| !r.is_expired(self.ttl, now));
        let removed = before - regions.len();
        self.expired.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.regions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.lock().is_empty()
    }

    pub fn stats(&self) -> RegionCacheStats {
        RegionCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            regions: self.len(),
        }
    }
}
