//! Point-in-time statistics for a [`BoundedCache`](super::BoundedCache).

use std::fmt;

/// Snapshot of cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries removed to honour the capacity or weight bound.
    pub evictions: u64,
    /// Current number of entries.
    pub entry_count: usize,
    /// Current total weight (bytes for blob tiers, entry count otherwise).
    pub weighted_size: u64,
    /// Configured maximum entry count.
    pub capacity: usize,
}

impl CacheStats {
    /// Returns the hit ratio in the range 0.0..=1.0, or 0.0 with no lookups.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} entries, {} hits, {} misses, {} evictions ({:.1}% hit ratio)",
            self.entry_count,
            self.capacity,
            self.hits,
            self.misses,
            self.evictions,
            self.hit_ratio() * 100.0
        )
    }
}
