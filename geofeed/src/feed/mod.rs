//! Merged, paginated activity feed over a bounded set of producers.
//!
//! # Page assembly
//!
//! ```text
//! page(producers, cursor, n)
//!    │
//!    ├─► producer A ─► page cache (moka, TTL) ─miss─► query_range(A, ≤ cursor, n + 1)
//!    ├─► producer B ─► page cache (moka, TTL) ─miss─► query_range(B, ≤ cursor, n + 1)
//!    └─► ...
//!           │
//!           ▼
//!    merge: newest first, ties by (producer_id, marker_id, id)
//!           │
//!           ▼
//!    truncate to n ─► next_cursor = last kept item
//!           │
//!           ▼
//!    distinct marker IDs ─► MarkerStore::query_by_ids (one batch)
//! ```
//!
//! Each producer contributes at most `n` items, which is all a page of `n`
//! can ever need from it; the extra row only tells whether it has more.
//! The remote range bound on the timestamp is inclusive, so items sharing
//! the cursor's timestamp are filtered client-side by their full ordering
//! key.

mod config;
mod item;

pub use config::{
    FeedConfig, DEFAULT_FEED_CACHE_CAPACITY, DEFAULT_FEED_CACHE_TTL, DEFAULT_FEED_COLLECTION,
    DEFAULT_MAX_PRODUCERS, DEFAULT_PAGE_SIZE,
};
pub use item::{FeedCursor, FeedItem, FIELD_MARKER, FIELD_PRODUCER, FIELD_TIMESTAMP};

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use moka::future::Cache as MokaCache;
use tracing::{debug, trace, warn};

use crate::error::{FetchError, FetchResult};
use crate::remote::{retry_with_policy, Document, RangeQuery, RemoteStore};
use crate::store::{Marker, MarkerStore};

/// One assembled feed page.
#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    /// Where the next page starts. `None` once every producer is exhausted.
    pub next_cursor: Option<FeedCursor>,
    /// Distinct marker IDs referenced by `items`, in first-seen order.
    pub marker_ids: Vec<String>,
    /// The referenced markers that exist, in `marker_ids` order.
    pub markers: Vec<Marker>,
}

/// Feed activity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    /// Pages requested, including those served entirely from cache.
    pub pages: u64,
    /// Range queries issued to the remote store, one per producer slice
    /// and per widening.
    pub producer_queries: u64,
    /// Producers ignored for exceeding `max_producers`.
    pub dropped_producers: u64,
    /// Producer slices currently held by the page cache.
    pub cached_producer_pages: u64,
}

impl fmt::Display for FeedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pages={} producer_queries={} dropped_producers={} cached={}",
            self.pages, self.producer_queries, self.dropped_producers, self.cached_producer_pages
        )
    }
}

/// Cache key for one producer's slice of a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProducerPageKey {
    producer_id: String,
    after: Option<FeedCursor>,
    page_size: usize,
}

/// Up to `page_size` items of one producer after a cursor, newest first.
#[derive(Debug)]
struct ProducerPage {
    items: Vec<FeedItem>,
    /// The producer has no further items after these.
    exhausted: bool,
}

#[derive(Default)]
struct Counters {
    pages: AtomicU64,
    producer_queries: AtomicU64,
    dropped_producers: AtomicU64,
}

struct FeedInner {
    remote: Arc<dyn RemoteStore>,
    markers: MarkerStore,
    config: FeedConfig,
    pages: MokaCache<ProducerPageKey, Arc<ProducerPage>>,
    counters: Counters,
}

/// Builds feed pages from per-producer queries.
///
/// Cheap to clone; clones share the page cache.
#[derive(Clone)]
pub struct FeedAggregator {
    inner: Arc<FeedInner>,
}

impl FeedAggregator {
    pub fn new(remote: Arc<dyn RemoteStore>, markers: MarkerStore, config: FeedConfig) -> Self {
        let pages = MokaCache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl)
            .build();
        Self {
            inner: Arc::new(FeedInner {
                remote,
                markers,
                config,
                pages,
                counters: Counters::default(),
            }),
        }
    }

    /// Assembles the page of at most `page_size` items after `cursor`.
    ///
    /// The same producers, cursor and remote contents always produce the
    /// same items in the same order and the same `next_cursor`. Producer
    /// IDs are deduplicated; those beyond `max_producers` are ignored. Any
    /// producer query failure fails the page.
    pub async fn page(
        &self,
        producer_ids: &[String],
        cursor: Option<&FeedCursor>,
        page_size: usize,
    ) -> FetchResult<FeedPage> {
        self.inner.counters.pages.fetch_add(1, Ordering::Relaxed);
        if page_size == 0 {
            return Ok(FeedPage::default());
        }

        let producers = self.bounded_producers(producer_ids);
        let slices = join_all(
            producers
                .iter()
                .map(|producer| self.inner.producer_page(producer, cursor, page_size)),
        )
        .await;

        let mut merged = Vec::new();
        let mut exhausted = true;
        for slice in slices {
            let slice = slice?;
            exhausted &= slice.exhausted;
            merged.extend(slice.items.iter().cloned());
        }
        merged.sort_by(FeedItem::feed_order);

        let has_more = merged.len() > page_size || !exhausted;
        merged.truncate(page_size);
        let next_cursor = if has_more {
            merged.last().map(FeedItem::cursor)
        } else {
            None
        };

        let mut seen = HashSet::new();
        let marker_ids: Vec<String> = merged
            .iter()
            .filter(|item| seen.insert(item.marker_id.as_str()))
            .map(|item| item.marker_id.clone())
            .collect();
        let markers = if marker_ids.is_empty() {
            Vec::new()
        } else {
            self.inner.markers.query_by_ids(&marker_ids).await?
        };

        debug!(
            producers = producers.len(),
            items = merged.len(),
            markers = markers.len(),
            more = next_cursor.is_some(),
            "Assembled feed page"
        );
        Ok(FeedPage {
            items: merged,
            next_cursor,
            marker_ids,
            markers,
        })
    }

    /// Page using the configured page size.
    pub async fn first_page(&self, producer_ids: &[String]) -> FetchResult<FeedPage> {
        self.page(producer_ids, None, self.inner.config.page_size).await
    }

    /// Drops every cached producer page so the next request goes remote.
    pub fn invalidate(&self) {
        self.inner.pages.invalidate_all();
        debug!("Feed page cache invalidated");
    }

    pub fn config(&self) -> &FeedConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> FeedStats {
        let counters = &self.inner.counters;
        FeedStats {
            pages: counters.pages.load(Ordering::Relaxed),
            producer_queries: counters.producer_queries.load(Ordering::Relaxed),
            dropped_producers: counters.dropped_producers.load(Ordering::Relaxed),
            cached_producer_pages: self.inner.pages.entry_count(),
        }
    }

    fn bounded_producers(&self, producer_ids: &[String]) -> Vec<String> {
        let mut seen = HashSet::with_capacity(producer_ids.len());
        let mut producers: Vec<String> = producer_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        let max = self.inner.config.max_producers;
        if producers.len() > max {
            let dropped = producers.len() - max;
            warn!(
                requested = producers.len(),
                max, dropped, "Too many producers for one feed page, ignoring the rest"
            );
            self.inner
                .counters
                .dropped_producers
                .fetch_add(dropped as u64, Ordering::Relaxed);
            producers.truncate(max);
        }
        producers
    }
}

impl FeedInner {
    async fn producer_page(
        &self,
        producer: &str,
        cursor: Option<&FeedCursor>,
        page_size: usize,
    ) -> FetchResult<Arc<ProducerPage>> {
        let key = ProducerPageKey {
            producer_id: producer.to_string(),
            after: cursor.cloned(),
            page_size,
        };
        self.pages
            .try_get_with(key.clone(), self.fetch_producer_page(key))
            .await
            .map_err(|e| (*e).clone())
    }

    /// Queries one producer until the first `page_size` items after the
    /// cursor are known for certain, or the producer runs out.
    ///
    /// The query asks for one row more than needed. When the result is full,
    /// items at its oldest timestamp may have unseen siblings that sort
    /// ahead of them, so only strictly newer items count as settled. If too
    /// few are settled (ties, or already shown items at the cursor's
    /// timestamp) the limit doubles and the query repeats.
    async fn fetch_producer_page(&self, key: ProducerPageKey) -> FetchResult<Arc<ProducerPage>> {
        let upper = key
            .after
            .as_ref()
            .map_or(i64::MAX, |c| c.timestamp.timestamp_millis());
        let mut limit = key.page_size + 1;

        loop {
            let query = RangeQuery::new(
                self.config.collection.as_str(),
                FIELD_TIMESTAMP,
                i64::MIN,
                upper,
                limit,
            )
            .with_filter(FIELD_PRODUCER, key.producer_id.as_str())
            .descending();

            self.counters.producer_queries.fetch_add(1, Ordering::Relaxed);
            let timeout = self.config.fetch_timeout;
            let docs = tokio::time::timeout(
                timeout,
                retry_with_policy(&self.config.retry, || self.remote.query_range(&query)),
            )
            .await
            .map_err(|_| FetchError::Timeout { after: timeout })??;

            let full = docs.len() >= limit;
            let boundary = docs.iter().filter_map(|d| d.get_i64(FIELD_TIMESTAMP)).min();
            let mut items: Vec<FeedItem> = items_from_documents(&docs)
                .into_iter()
                .filter(|item| key.after.as_ref().map_or(true, |c| item.is_after(c)))
                .collect();
            items.sort_by(FeedItem::feed_order);

            let settled = if full {
                items
                    .iter()
                    .take_while(|item| Some(item.timestamp.timestamp_millis()) > boundary)
                    .count()
            } else {
                items.len()
            };
            if full && settled < key.page_size {
                limit = limit.saturating_mul(2);
                trace!(producer = %key.producer_id, limit, "Widening producer query");
                continue;
            }

            let exhausted = !full && items.len() <= key.page_size;
            items.truncate(key.page_size);
            trace!(
                producer = %key.producer_id,
                items = items.len(),
                exhausted,
                "Fetched producer page"
            );
            return Ok(Arc::new(ProducerPage { items, exhausted }));
        }
    }
}

fn items_from_documents(docs: &[Document]) -> Vec<FeedItem> {
    docs.iter()
        .filter_map(|doc| match FeedItem::from_document(doc) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(id = %doc.id, error = %e, "Dropping malformed feed document");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryStore;
    use crate::store::{MarkerStoreConfig, DEFAULT_MARKER_COLLECTION};
    use chrono::DateTime;
    use serde_json::Map;
    use std::time::Duration;

    fn post(id: &str, producer: &str, marker: &str, millis: i64) -> Document {
        FeedItem::new(id, producer, marker, DateTime::from_timestamp_millis(millis).unwrap())
            .to_document()
    }

    fn setup(config: FeedConfig) -> (Arc<InMemoryStore>, FeedAggregator) {
        let remote = Arc::new(InMemoryStore::new());
        for i in 0..5 {
            let marker = Marker::new(format!("m{}", i), 10.0 + i as f64, 20.0, Map::new()).unwrap();
            remote.insert(DEFAULT_MARKER_COLLECTION, marker.to_document());
        }
        let store = MarkerStore::new(remote.clone(), MarkerStoreConfig::default().with_prefetch(false));
        let feed = FeedAggregator::new(remote.clone(), store, config);
        (remote, feed)
    }

    fn producers(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn ids(page: &FeedPage) -> Vec<&str> {
        page.items.iter().map(|i| i.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_merges_newest_first_and_resolves_markers() {
        let (remote, feed) = setup(FeedConfig::default());
        remote.insert_all(
            DEFAULT_FEED_COLLECTION,
            [
                post("a1", "alice", "m1", 100),
                post("a2", "alice", "m2", 300),
                post("b1", "bob", "m1", 200),
                post("c1", "carol", "m3", 400),
            ],
        );

        let page = feed
            .page(&producers(&["alice", "bob"]), None, 10)
            .await
            .unwrap();
        assert_eq!(ids(&page), ["a2", "b1", "a1"]);
        assert_eq!(page.marker_ids, ["m2", "m1"]);
        let marker_ids: Vec<&str> = page.markers.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(marker_ids, ["m2", "m1"]);
        assert!(page.next_cursor.is_none());
        // One batch for both markers.
        assert_eq!(remote.call_counts().get_by_ids, 1);
    }

    #[tokio::test]
    async fn test_identical_queries_are_deterministic() {
        let (remote, feed) = setup(FeedConfig::default());
        remote.insert_all(
            DEFAULT_FEED_COLLECTION,
            [
                post("x", "alice", "m1", 100),
                post("y", "bob", "m1", 100),
                post("z", "bob", "m2", 100),
                post("w", "alice", "m2", 100),
            ],
        );
        let producers = producers(&["alice", "bob"]);

        let first = feed.page(&producers, None, 3).await.unwrap();
        feed.invalidate();
        let second = feed.page(&producers, None, 3).await.unwrap();

        assert_eq!(first.items, second.items);
        assert_eq!(first.next_cursor, second.next_cursor);
        assert_eq!(ids(&first), ["z", "y", "w"]);
    }

    #[tokio::test]
    async fn test_pagination_visits_every_item_once() {
        let (remote, feed) = setup(FeedConfig::default());
        let mut expected = 0;
        for producer in ["alice", "bob", "carol"] {
            for i in 0..7 {
                // Coarse timestamps force ties across producers.
                let id = format!("{}-{}", producer, i);
                remote.insert(
                    DEFAULT_FEED_COLLECTION,
                    post(&id, producer, &format!("m{}", i % 5), (i / 2) * 1000),
                );
                expected += 1;
            }
        }
        let producers = producers(&["alice", "bob", "carol"]);

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = feed.page(&producers, cursor.as_ref(), 4).await.unwrap();
            assert!(page.items.len() <= 4);
            seen.extend(page.items.iter().cloned());
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(seen.len(), expected);
        let unique: HashSet<&str> = seen.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(unique.len(), expected);
        assert!(seen
            .windows(2)
            .all(|w| FeedItem::feed_order(&w[0], &w[1]) == std::cmp::Ordering::Less));
    }

    #[tokio::test]
    async fn test_each_producer_is_capped_to_page_size() {
        let (remote, feed) = setup(FeedConfig::default());
        for i in 0..30 {
            remote.insert(
                DEFAULT_FEED_COLLECTION,
                post(&format!("p{}", i), "alice", "m0", i),
            );
        }

        let page = feed.page(&producers(&["alice"]), None, 5).await.unwrap();
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.items[0].id, "p29");
        assert_eq!(page.next_cursor.unwrap().item_id, "p25");
        assert_eq!(remote.call_counts().query_range, 1);
    }

    #[tokio::test]
    async fn test_producer_pages_are_cached_until_invalidated() {
        let (remote, feed) = setup(FeedConfig::default());
        remote.insert(DEFAULT_FEED_COLLECTION, post("a1", "alice", "m1", 1));
        let producers = producers(&["alice"]);

        feed.page(&producers, None, 10).await.unwrap();
        remote.insert(DEFAULT_FEED_COLLECTION, post("a2", "alice", "m1", 2));
        let cached = feed.page(&producers, None, 10).await.unwrap();
        assert_eq!(ids(&cached), ["a1"]);
        assert_eq!(feed.stats().producer_queries, 1);

        feed.invalidate();
        let fresh = feed.page(&producers, None, 10).await.unwrap();
        assert_eq!(ids(&fresh), ["a2", "a1"]);
        assert_eq!(feed.stats().producer_queries, 2);
    }

    #[tokio::test]
    async fn test_producer_pages_expire() {
        let config = FeedConfig::default().with_cache_ttl(Duration::from_millis(50));
        let (remote, feed) = setup(config);
        remote.insert(DEFAULT_FEED_COLLECTION, post("a1", "alice", "m1", 1));
        let producers = producers(&["alice"]);

        feed.page(&producers, None, 10).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        feed.page(&producers, None, 10).await.unwrap();
        assert_eq!(remote.call_counts().query_range, 2);
    }

    #[tokio::test]
    async fn test_extra_producers_are_dropped() {
        let config = FeedConfig::default().with_max_producers(2);
        let (remote, feed) = setup(config);
        remote.insert_all(
            DEFAULT_FEED_COLLECTION,
            [
                post("a", "alice", "m1", 1),
                post("b", "bob", "m1", 2),
                post("c", "carol", "m1", 3),
            ],
        );

        let page = feed
            .page(&producers(&["alice", "alice", "bob", "carol"]), None, 10)
            .await
            .unwrap();
        assert_eq!(ids(&page), ["b", "a"]);
        assert_eq!(feed.stats().dropped_producers, 1);
    }

    #[tokio::test]
    async fn test_producer_failure_fails_page() {
        let config = FeedConfig::default().with_retry(crate::remote::RetryPolicy::None);
        let (remote, feed) = setup(config);
        remote.insert(DEFAULT_FEED_COLLECTION, post("a", "alice", "m1", 1));
        remote.fail_next(FetchError::permission_denied("signed out"));

        let result = feed.page(&producers(&["alice"]), None, 10).await;
        assert!(matches!(result, Err(FetchError::PermissionDenied { .. })));

        // Failures are not cached.
        let page = feed.page(&producers(&["alice"]), None, 10).await.unwrap();
        assert_eq!(ids(&page), ["a"]);
    }

    #[tokio::test]
    async fn test_unknown_markers_are_left_out() {
        let (remote, feed) = setup(FeedConfig::default());
        remote.insert_all(
            DEFAULT_FEED_COLLECTION,
            [post("a", "alice", "gone", 2), post("b", "alice", "m4", 1)],
        );

        let page = feed.page(&producers(&["alice"]), None, 10).await.unwrap();
        assert_eq!(page.marker_ids, ["gone", "m4"]);
        assert_eq!(page.markers.len(), 1);
        assert_eq!(page.markers[0].id, "m4");
    }
}
