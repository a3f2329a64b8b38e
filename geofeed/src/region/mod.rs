//! Region query results and adjacent-region prefetching.

mod cache;
mod prefetch;

pub use cache::{
    CachedRegion, RegionCacheStats, RegionResultCache, DEFAULT_REGION_CAPACITY,
    DEFAULT_REGION_TTL,
};
pub use prefetch::{adjacent_viewports, PrefetchScheduler, PrefetchStats, DEFAULT_PREFETCH_DEBOUNCE};
