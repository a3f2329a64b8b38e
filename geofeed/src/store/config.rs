//! Marker store configuration.

use std::time::Duration;

use crate::coalesce::DEFAULT_FETCH_TIMEOUT;
use crate::region::{DEFAULT_PREFETCH_DEBOUNCE, DEFAULT_REGION_CAPACITY, DEFAULT_REGION_TTL};
use crate::remote::{RetryPolicy, DEFAULT_MAX_IDS_PER_QUERY};

/// Default collection holding marker documents.
pub const DEFAULT_MARKER_COLLECTION: &str = "markers";

/// Default number of markers kept in memory.
pub const DEFAULT_MARKER_CAPACITY: usize = 300;

/// Default cap on geohash cells scanned for one region query.
///
/// When a viewport needs more cells at its target precision, the
/// precision is lowered until it fits.
pub const DEFAULT_MAX_CELLS: usize = 32;

/// Default result limit of a single cell scan. A scan returning this many
/// documents is treated as truncated and its region is not cached.
pub const DEFAULT_CELL_QUERY_LIMIT: usize = 500;

/// Default time-to-live of by-collection query results (1 minute).
pub const DEFAULT_COLLECTION_TTL: Duration = Duration::from_secs(60);

/// Default number of distinct by-collection queries kept.
pub const DEFAULT_COLLECTION_CAPACITY: u64 = 64;

/// Default attempts for remote calls, including the first.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Configuration for [`MarkerStore`](super::MarkerStore).
#[derive(Debug, Clone)]
pub struct MarkerStoreConfig {
    pub collection: String,
    pub marker_capacity: usize,
    pub max_cells: usize,
    pub cell_query_limit: usize,
    pub region_capacity: usize,
    pub region_ttl: Duration,
    pub prefetch: bool,
    pub prefetch_debounce: Duration,
    pub fetch_timeout: Duration,
    pub max_ids_per_query: usize,
    pub retry: RetryPolicy,
    pub collection_ttl: Duration,
    pub collection_capacity: u64,
}

impl Default for MarkerStoreConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_MARKER_COLLECTION.to_string(),
            marker_capacity: DEFAULT_MARKER_CAPACITY,
            max_cells: DEFAULT_MAX_CELLS,
            cell_query_limit: DEFAULT_CELL_QUERY_LIMIT,
            region_capacity: DEFAULT_REGION_CAPACITY,
            region_ttl: DEFAULT_REGION_TTL,
            prefetch: true,
            prefetch_debounce: DEFAULT_PREFETCH_DEBOUNCE,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_ids_per_query: DEFAULT_MAX_IDS_PER_QUERY,
            retry: RetryPolicy::exponential(DEFAULT_RETRY_ATTEMPTS),
            collection_ttl: DEFAULT_COLLECTION_TTL,
            collection_capacity: DEFAULT_COLLECTION_CAPACITY,
        }
    }
}

impl MarkerStoreConfig {
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_marker_capacity(mut self, capacity: usize) -> Self {
        self.marker_capacity = capacity.max(1);
        self
    }

    pub fn with_max_cells(mut self, max_cells: usize) -> Self {
        self.max_cells = max_cells.max(1);
        self
    }

    pub fn with_cell_query_limit(mut self, limit: usize) -> Self {
        self.cell_query_limit = limit.max(1);
        self
    }

    pub fn with_region_capacity(mut self, capacity: usize) -> Self {
        self.region_capacity = capacity.max(1);
        self
    }

    pub fn with_region_ttl(mut self, ttl: Duration) -> Self {
        self.region_ttl = ttl;
        self
    }

    /// Enables or disables adjacent-region prefetching.
    pub fn with_prefetch(mut self, enabled: bool) -> Self {
        self.prefetch = enabled;
        self
    }

    pub fn with_prefetch_debounce(mut self, debounce: Duration) -> Self {
        self.prefetch_debounce = debounce;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_max_ids_per_query(mut self, max_ids: usize) -> Self {
        self.max_ids_per_query = max_ids.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_collection_ttl(mut self, ttl: Duration) -> Self {
        self.collection_ttl = ttl;
        self
    }
}
