//! Bounded in-memory caches.
//!
//! [`BoundedCache`] is the building block for every cache in this crate: the
//! marker cache, both blob memory tiers and the collection result cache are
//! all instances of it with different capacities.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │               BoundedCache<K, V>              │
//! │                                               │
//! │  HashMap<K, CacheEntry<V>>   (lookup)         │
//! │  BTreeMap<tick, K>           (recency order)  │
//! │  eviction listener           (release hook)   │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! The lock only guards the two index maps. Eviction listeners run after the
//! lock is released, so a listener may call back into the cache.

mod bounded;
mod stats;

pub use bounded::{BoundedCache, CacheEntry, EvictionListener, RemovalCause, Weigher};
pub use stats::CacheStats;
