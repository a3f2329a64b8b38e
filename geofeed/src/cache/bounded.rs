//! Strict least-recently-used cache with a fixed entry capacity.
//!
//! Every read bumps the entry's access tick; when an insertion pushes the
//! cache over its capacity (or over its optional weight budget), entries with
//! the oldest tick are removed first.
//!
//! The cache is internally synchronized with a `parking_lot::Mutex` that is
//! held only while the index maps are read or mutated. Nothing async ever
//! runs under the lock.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::stats::CacheStats;

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Evicted to respect the capacity or weight bound.
    Capacity,
    /// Removed by an explicit `remove()` call.
    Explicit,
    /// Overwritten by a `put()` for the same key.
    Replaced,
    /// Dropped by `clear()`.
    Cleared,
}

/// Release hook invoked for every entry that leaves the cache.
pub type EvictionListener<K, V> = Arc<dyn Fn(&K, &V, RemovalCause) + Send + Sync>;

/// Computes the weight of an entry (e.g. its size in bytes).
pub type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> u64 + Send + Sync>;

/// A cached value with its recency tick.
///
/// Owned exclusively by its [`BoundedCache`].
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached value.
    pub value: V,
    /// Logical timestamp of the last access; larger is more recent.
    pub last_access: u64,
    /// Weight charged against the weight budget.
    pub weight: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    /// tick -> key, oldest first.
    order: BTreeMap<u64, K>,
    tick: u64,
    weight: u64,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, key: &K) -> Option<&CacheEntry<V>> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(key)?;
        self.order.remove(&entry.last_access);
        entry.last_access = tick;
        self.order.insert(tick, key.clone());
        Some(entry)
    }

    fn take(&mut self, key: &K) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.last_access);
        self.weight = self.weight.saturating_sub(entry.weight);
        Some(entry)
    }

    fn pop_oldest(&mut self) -> Option<(K, CacheEntry<V>)> {
        let (_, key) = self.order.pop_first()?;
        let entry = self.entries.remove(&key)?;
        self.weight = self.weight.saturating_sub(entry.weight);
        Some((key, entry))
    }
}

/// Generic LRU cache with a fixed maximum entry count.
///
/// # Example
///
/// ```
/// use geofeed::cache::BoundedCache;
///
/// let cache = BoundedCache::new(2);
/// cache.put("a", 1);
/// cache.put("b", 2);
/// cache.get(&"a");
/// cache.put("c", 3);
///
/// assert!(cache.contains(&"a"));
/// assert!(!cache.contains(&"b"));
/// assert!(cache.contains(&"c"));
/// ```
pub struct BoundedCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
    max_weight: Option<u64>,
    weigher: Option<Weigher<K, V>>,
    listener: Option<EvictionListener<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(capacity),
                order: BTreeMap::new(),
                tick: 0,
                weight: 0,
            }),
            capacity,
            max_weight: None,
            weigher: None,
            listener: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Adds a weight budget on top of the entry capacity.
    ///
    /// Entries heavier than `max_weight` on their own are rejected by `put()`.
    pub fn with_weigher<F>(mut self, max_weight: u64, weigher: F) -> Self
    where
        F: Fn(&K, &V) -> u64 + Send + Sync + 'static,
    {
        self.max_weight = Some(max_weight);
        self.weigher = Some(Arc::new(weigher));
        self
    }

    /// Installs a release hook called for every entry that leaves the cache.
    ///
    /// The hook runs after the internal lock is released.
    pub fn with_eviction_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&K, &V, RemovalCause) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Returns the value for `key` and marks it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let value = self.inner.lock().touch(key).map(|e| e.value.clone());
        match value {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        value
    }

    /// Returns the value for `key` without touching its recency.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.inner.lock().entries.get(key).map(|e| e.value.clone())
    }

    /// Returns true if `key` is cached. Does not touch recency.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    /// Inserts or replaces `key`, evicting least recently used entries as needed.
    ///
    /// Returns `false` if the entry was rejected because its weight alone
    /// exceeds the weight budget.
    pub fn put(&self, key: K, value: V) -> bool {
        let weight = self.weigher.as_ref().map_or(1, |w| w(&key, &value));
        if let Some(max) = self.max_weight {
            if weight > max {
                trace!(weight, max, "Entry heavier than cache budget, not cached");
                return false;
            }
        }

        let mut removed = Vec::new();
        {
            let mut inner = self.inner.lock();
            if let Some(old) = inner.take(&key) {
                removed.push((key.clone(), old.value, RemovalCause::Replaced));
            }

            let tick = inner.next_tick();
            inner.order.insert(tick, key.clone());
            inner.weight += weight;
            inner.entries.insert(
                key,
                CacheEntry {
                    value,
                    last_access: tick,
                    weight,
                },
            );

            while inner.entries.len() > self.capacity
                || self.max_weight.is_some_and(|max| inner.weight > max)
            {
                match inner.pop_oldest() {
                    Some((k, e)) => removed.push((k, e.value, RemovalCause::Capacity)),
                    None => break,
                }
            }
        }

        let evicted = removed
            .iter()
            .filter(|(_, _, cause)| *cause == RemovalCause::Capacity)
            .count() as u64;
        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
        self.notify(removed);
        true
    }

    /// Removes `key`, returning its value if present.
    pub fn remove(&self, key: &K) -> Option<V> {
        let entry = self.inner.lock().take(key)?;
        if let Some(listener) = &self.listener {
            listener(key, &entry.value, RemovalCause::Explicit);
        }
        Some(entry.value)
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let drained: Vec<(K, V, RemovalCause)> = {
            let mut inner = self.inner.lock();
            inner.order.clear();
            inner.weight = 0;
            inner
                .entries
                .drain()
                .map(|(k, e)| (k, e.value, RemovalCause::Cleared))
                .collect()
        };
        self.notify(drained);
    }

    /// Keys ordered from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<K> {
        self.inner.lock().order.values().rev().cloned().collect()
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current total weight.
    pub fn weighted_size(&self) -> u64 {
        self.inner.lock().weight
    }

    /// Snapshot of hit/miss/eviction counters.
    pub fn stats(&self) -> CacheStats {
        let (entry_count, weighted_size) = {
            let inner = self.inner.lock();
            (inner.entries.len(), inner.weight)
        };
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entry_count,
            weighted_size,
            capacity: self.capacity,
        }
    }

    fn notify(&self, removed: Vec<(K, V, RemovalCause)>) {
        if let Some(listener) = &self.listener {
            for (key, value, cause) in &removed {
                listener(key, value, *cause);
            }
        }
    }
}

impl<K, V> std::fmt::Debug for BoundedCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedCache")
            .field("capacity", &self.capacity)
            .field("max_weight", &self.max_weight)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_put_and_get() {
        let cache = BoundedCache::new(4);
        cache.put("a".to_string(), 1);

        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"missing".to_string()), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_refreshed_entry_survives_eviction() {
        // capacity 2: put(A), put(B), get(A), put(C) => B evicted
        let cache = BoundedCache::new(2);
        cache.put('A', ());
        cache.put('B', ());
        cache.get(&'A');
        cache.put('C', ());

        assert!(cache.contains(&'A'));
        assert!(!cache.contains(&'B'));
        assert!(cache.contains(&'C'));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_peek_does_not_refresh() {
        let cache = BoundedCache::new(2);
        cache.put(1, "one");
        cache.put(2, "two");
        assert_eq!(cache.peek(&1), Some("one"));
        cache.put(3, "three");

        assert!(!cache.contains(&1));
        assert!(cache.contains(&2));
    }

    #[test]
    fn test_replace_keeps_single_entry() {
        let cache = BoundedCache::new(2);
        cache.put(1, "old");
        cache.put(1, "new");

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&1), Some("new"));
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = BoundedCache::new(3);
        cache.put(1, 10);
        cache.put(2, 20);

        assert_eq!(cache.remove(&1), Some(10));
        assert_eq!(cache.remove(&1), None);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.weighted_size(), 0);
    }

    #[test]
    fn test_eviction_listener_causes() {
        let causes = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&causes);
        let cache = BoundedCache::new(1)
            .with_eviction_listener(move |k: &u32, _v: &u32, cause| seen.lock().push((*k, cause)));

        cache.put(1, 1);
        cache.put(1, 2);
        cache.put(2, 2);
        cache.remove(&2);
        cache.put(3, 3);
        cache.clear();

        assert_eq!(
            *causes.lock(),
            vec![
                (1, RemovalCause::Replaced),
                (1, RemovalCause::Capacity),
                (2, RemovalCause::Explicit),
                (3, RemovalCause::Cleared),
            ]
        );
    }

    #[test]
    fn test_listener_may_reenter_cache() {
        let cache: Arc<BoundedCache<u32, u32>> = Arc::new(BoundedCache::new(1));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let reentrant = BoundedCache::new(1).with_eviction_listener({
            let cache = Arc::clone(&cache);
            move |k: &u32, v: &u32, _| {
                calls_in.fetch_add(1, Ordering::SeqCst);
                cache.put(*k, *v);
            }
        });

        reentrant.put(1, 1);
        reentrant.put(2, 2);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&1), Some(1));
    }

    #[test]
    fn test_weight_budget() {
        let cache = BoundedCache::new(10).with_weigher(100, |_k: &u8, v: &Vec<u8>| v.len() as u64);

        cache.put(1, vec![0; 40]);
        cache.put(2, vec![0; 40]);
        cache.put(3, vec![0; 40]);

        assert!(!cache.contains(&1));
        assert!(cache.contains(&2));
        assert!(cache.contains(&3));
        assert_eq!(cache.weighted_size(), 80);
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let cache = BoundedCache::new(10).with_weigher(100, |_k: &u8, v: &Vec<u8>| v.len() as u64);
        cache.put(1, vec![0; 10]);

        assert!(!cache.put(2, vec![0; 101]));
        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
    }

    #[test]
    fn test_stats() {
        let cache = BoundedCache::new(1);
        cache.put(1, 1);
        cache.get(&1);
        cache.get(&2);
        cache.put(2, 2);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.capacity, 1);
    }

    #[test]
    fn test_keys_by_recency() {
        let cache = BoundedCache::new(3);
        cache.put(1, ());
        cache.put(2, ());
        cache.put(3, ());
        cache.get(&1);

        assert_eq!(cache.keys_by_recency(), vec![1, 3, 2]);
    }

    #[test]
    #[should_panic(expected = "capacity must be > 0")]
    fn test_zero_capacity_panics() {
        let _ = BoundedCache::<u8, u8>::new(0);
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(BoundedCache::new(16));
        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200u32 {
                        cache.put(t * 1000 + i, i);
                        cache.get(&(t * 1000 + i / 2));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 16);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Put(u8),
            Get(u8),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0u8..16).prop_map(Op::Put),
                (0u8..16).prop_map(Op::Get),
            ]
        }

        proptest! {
            #[test]
            fn test_holds_most_recently_accessed_keys(
                capacity in 1usize..6,
                ops in proptest::collection::vec(op(), 0..64)
            ) {
                let cache = BoundedCache::new(capacity);
                // Reference model: most recent at the back.
                let mut model: Vec<u8> = Vec::new();

                for op in ops {
                    match op {
                        Op::Put(k) => {
                            cache.put(k, k);
                            model.retain(|x| *x != k);
                            model.push(k);
                            if model.len() > capacity {
                                model.remove(0);
                            }
                        }
                        Op::Get(k) => {
                            let hit = cache.get(&k);
                            prop_assert_eq!(hit.is_some(), model.contains(&k));
                            if hit.is_some() {
                                model.retain(|x| *x != k);
                                model.push(k);
                            }
                        }
                    }
                    prop_assert!(cache.len() <= capacity);
                }

                let mut expected: Vec<u8> = model.into_iter().rev().collect();
                let actual = cache.keys_by_recency();
                prop_assert_eq!(&actual, &expected);
                expected.sort();
                let mut sorted = actual.clone();
                sorted.sort();
                prop_assert_eq!(sorted, expected);
            }
        }
    }
}
