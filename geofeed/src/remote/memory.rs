//! In-process implementations of the remote interfaces.
//!
//! Both stores count every call, can simulate latency, and can be told to
//! fail the next N calls, which is what the coalescing and retry tests
//! observe.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use super::{BlobStore, BoxFuture, Document, RangeQuery, RemoteStore, DEFAULT_MAX_IDS_PER_QUERY};
use crate::error::{FetchError, FetchResult};

/// URL scheme used by [`InMemoryBlobStore`].
const MEMORY_URL_SCHEME: &str = "mem://";

/// Snapshot of calls made against an [`InMemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCallCounts {
    pub get_by_ids: u64,
    pub ids_requested: u64,
    pub query_range: u64,
}

#[derive(Default)]
struct CallCounters {
    get_by_ids: AtomicU64,
    ids_requested: AtomicU64,
    query_range: AtomicU64,
}

/// Document store held entirely in memory.
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Document>>>,
    max_ids: usize,
    latency: Duration,
    failures: Mutex<VecDeque<FetchError>>,
    calls: CallCounters,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            max_ids: DEFAULT_MAX_IDS_PER_QUERY,
            latency: Duration::ZERO,
            failures: Mutex::new(VecDeque::new()),
            calls: CallCounters::default(),
        }
    }

    pub fn with_max_ids(mut self, max_ids: usize) -> Self {
        self.max_ids = max_ids.max(1);
        self
    }

    /// Delays every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Inserts or replaces a document.
    pub fn insert(&self, collection: &str, doc: Document) {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(doc.id.clone(), doc);
    }

    pub fn insert_all(&self, collection: &str, docs: impl IntoIterator<Item = Document>) {
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        for doc in docs {
            target.insert(doc.id.clone(), doc);
        }
    }

    pub fn remove(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections.write().get_mut(collection)?.remove(id)
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Makes the next call fail with `error`. Failures queue up in order.
    pub fn fail_next(&self, error: FetchError) {
        self.failures.lock().push_back(error);
    }

    pub fn call_counts(&self) -> StoreCallCounts {
        StoreCallCounts {
            get_by_ids: self.calls.get_by_ids.load(Ordering::Relaxed),
            ids_requested: self.calls.ids_requested.load(Ordering::Relaxed),
            query_range: self.calls.query_range.load(Ordering::Relaxed),
        }
    }

    pub fn reset_counts(&self) {
        self.calls.get_by_ids.store(0, Ordering::Relaxed);
        self.calls.ids_requested.store(0, Ordering::Relaxed);
        self.calls.query_range.store(0, Ordering::Relaxed);
    }

    async fn begin_call(&self) -> FetchResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl RemoteStore for InMemoryStore {
    fn max_ids_per_query(&self) -> usize {
        self.max_ids
    }

    fn get_by_ids<'a>(
        &'a self,
        collection: &'a str,
        ids: &'a [String],
    ) -> BoxFuture<'a, FetchResult<Vec<Document>>> {
        Box::pin(async move {
            self.calls.get_by_ids.fetch_add(1, Ordering::Relaxed);
            self.calls
                .ids_requested
                .fetch_add(ids.len() as u64, Ordering::Relaxed);
            self.begin_call().await?;

            if ids.len() > self.max_ids {
                return Err(FetchError::malformed(
                    "get_by_ids",
                    format!("{} ids exceeds the limit of {}", ids.len(), self.max_ids),
                ));
            }

            let collections = self.collections.read();
            let docs: Vec<Document> = match collections.get(collection) {
                Some(docs) => ids.iter().filter_map(|id| docs.get(id).cloned()).collect(),
                None => Vec::new(),
            };
            trace!(collection, requested = ids.len(), found = docs.len(), "get_by_ids");
            Ok(docs)
        })
    }

    fn query_range<'a>(&'a self, query: &'a RangeQuery) -> BoxFuture<'a, FetchResult<Vec<Document>>> {
        Box::pin(async move {
            self.calls.query_range.fetch_add(1, Ordering::Relaxed);
            self.begin_call().await?;

            let collections = self.collections.read();
            let Some(docs) = collections.get(&query.collection) else {
                return Ok(Vec::new());
            };

            let mut matched: Vec<(super::IndexValue, &Document)> = docs
                .values()
                .filter(|doc| query.matches(doc))
                .filter_map(|doc| doc.index_value(&query.field).map(|v| (v, doc)))
                .collect();
            matched.sort_by(|(va, da), (vb, db)| va.cmp(vb).then_with(|| da.id.cmp(&db.id)));
            if query.descending {
                matched.reverse();
            }

            let result: Vec<Document> = matched
                .into_iter()
                .take(query.limit)
                .map(|(_, doc)| doc.clone())
                .collect();
            trace!(query = %query, found = result.len(), "query_range");
            Ok(result)
        })
    }
}

/// Blob service held entirely in memory. URLs have the form `mem://<path>`.
pub struct InMemoryBlobStore {
    blobs: DashMap<String, Bytes>,
    latency: Duration,
    failures: Mutex<VecDeque<FetchError>>,
    gets: AtomicU64,
    puts: AtomicU64,
    deletes: AtomicU64,
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: DashMap::new(),
            latency: Duration::ZERO,
            failures: Mutex::new(VecDeque::new()),
            gets: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// URL under which `path` is stored.
    pub fn url_for(path: &str) -> String {
        format!("{}{}", MEMORY_URL_SCHEME, path.trim_start_matches('/'))
    }

    /// Seeds a blob without counting a put. Returns its URL.
    pub fn insert(&self, path: &str, bytes: impl Into<Bytes>) -> String {
        let url = Self::url_for(path);
        self.blobs.insert(url.clone(), bytes.into());
        url
    }

    pub fn contains(&self, url: &str) -> bool {
        self.blobs.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn fail_next(&self, error: FetchError) {
        self.failures.lock().push_back(error);
    }

    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    async fn begin_call(&self) -> FetchResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put_blob<'a>(&'a self, path: &'a str, bytes: Bytes) -> BoxFuture<'a, FetchResult<String>> {
        Box::pin(async move {
            self.puts.fetch_add(1, Ordering::Relaxed);
            self.begin_call().await?;
            let url = Self::url_for(path);
            self.blobs.insert(url.clone(), bytes);
            Ok(url)
        })
    }

    fn get_blob<'a>(&'a self, url: &'a str) -> BoxFuture<'a, FetchResult<Bytes>> {
        Box::pin(async move {
            self.gets.fetch_add(1, Ordering::Relaxed);
            self.begin_call().await?;
            self.blobs
                .get(url)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| FetchError::not_found(url))
        })
    }

    fn delete_blob<'a>(&'a self, url: &'a str) -> BoxFuture<'a, FetchResult<()>> {
        Box::pin(async move {
            self.deletes.fetch_add(1, Ordering::Relaxed);
            self.begin_call().await?;
            self.blobs
                .remove(url)
                .map(|_| ())
                .ok_or_else(|| FetchError::not_found(url))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::PREFIX_RANGE_SENTINEL;

    fn marker_doc(id: &str, geohash: &str) -> Document {
        Document::new(id).with_field("geohash", geohash)
    }

    fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new().with_max_ids(3);
        store.insert_all(
            "markers",
            vec![
                marker_doc("a", "u4pruydq"),
                marker_doc("b", "u4pruyde"),
                marker_doc("c", "u4q00000"),
                marker_doc("d", "ezs42000"),
            ],
        );
        store
    }

    #[tokio::test]
    async fn test_get_by_ids_skips_missing() {
        let store = seeded();
        let ids = vec!["a".to_string(), "zzz".to_string()];
        let docs = store.get_by_ids("markers", &ids).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "a");

        let counts = store.call_counts();
        assert_eq!(counts.get_by_ids, 1);
        assert_eq!(counts.ids_requested, 2);
    }

    #[tokio::test]
    async fn test_get_by_ids_enforces_cap() {
        let store = seeded();
        let ids: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        assert!(store.get_by_ids("markers", &ids).await.is_err());
    }

    #[tokio::test]
    async fn test_query_range_prefix_scan() {
        let store = seeded();
        let query = RangeQuery::new(
            "markers",
            "geohash",
            "u4p",
            format!("u4p{}", PREFIX_RANGE_SENTINEL),
            10,
        );
        let docs = store.query_range(&query).await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_query_range_descending_limit() {
        let store = InMemoryStore::new();
        for (i, ts) in [10_i64, 30, 20].iter().enumerate() {
            store.insert(
                "posts",
                Document::new(format!("p{}", i))
                    .with_field("producer_id", "alice")
                    .with_field("timestamp", *ts),
            );
        }
        store.insert(
            "posts",
            Document::new("other")
                .with_field("producer_id", "bob")
                .with_field("timestamp", 99_i64),
        );

        let query = RangeQuery::new("posts", "timestamp", i64::MIN, i64::MAX, 2)
            .with_filter("producer_id", "alice")
            .descending();
        let docs = store.query_range(&query).await.unwrap();
        let ts: Vec<i64> = docs.iter().filter_map(|d| d.get_i64("timestamp")).collect();
        assert_eq!(ts, vec![30, 20]);
    }

    #[tokio::test]
    async fn test_injected_failure_consumed_once() {
        let store = seeded();
        store.fail_next(FetchError::transient("offline"));
        let query = RangeQuery::exact("markers", "geohash", "u4pruydq", 1);
        assert!(store.query_range(&query).await.is_err());
        assert_eq!(store.query_range(&query).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blob_store_roundtrip() {
        let blobs = InMemoryBlobStore::new();
        let url = blobs
            .put_blob("photos/x.jpg", Bytes::from_static(b"jpeg"))
            .await
            .unwrap();
        assert_eq!(url, "mem://photos/x.jpg");
        assert_eq!(blobs.get_blob(&url).await.unwrap(), Bytes::from_static(b"jpeg"));

        blobs.delete_blob(&url).await.unwrap();
        assert!(blobs.get_blob(&url).await.unwrap_err().is_not_found());
        assert_eq!(blobs.get_count(), 2);
        assert_eq!(blobs.put_count(), 1);
        assert_eq!(blobs.delete_count(), 1);
    }
}
