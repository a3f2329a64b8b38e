//! Remote collaborators consumed by the caches.
//!
//! Two interfaces are consumed, both treated as black boxes:
//!
//! - [`RemoteStore`]: a document store offering by-ID batch reads (capped
//!   per call) and single-field range queries.
//! - [`BlobStore`]: a key/URL blob service for images.
//!
//! Both traits return [`BoxFuture`] so they stay dyn-compatible and can be
//! injected as `Arc<dyn RemoteStore>` / `Arc<dyn BlobStore>`.
//!
//! # Implementations
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`InMemoryStore`] | In-process document store with call counters |
//! | [`InMemoryBlobStore`] | In-process blob store with call counters |
//! | [`HttpBlobStore`] | reqwest-backed blob service |

mod document;
mod http;
mod memory;
mod retry;

pub use document::{Document, IndexValue, RangeQuery};
pub use http::HttpBlobStore;
pub use memory::{InMemoryBlobStore, InMemoryStore, StoreCallCounts};
pub use retry::{
    retry_with_policy, RetryPolicy, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_DELAY_MS,
    DEFAULT_MAX_DELAY_SECS,
};

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::FetchResult;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Default cap on IDs per `get_by_ids` call.
pub const DEFAULT_MAX_IDS_PER_QUERY: usize = 10;

/// Document store consumed by the marker store and feed aggregator.
pub trait RemoteStore: Send + Sync {
    /// Maximum number of IDs accepted by a single [`get_by_ids`] call.
    ///
    /// Callers are responsible for chunking larger sets.
    ///
    /// [`get_by_ids`]: RemoteStore::get_by_ids
    fn max_ids_per_query(&self) -> usize {
        DEFAULT_MAX_IDS_PER_QUERY
    }

    /// Fetches documents by ID. IDs that do not exist are simply absent
    /// from the result.
    fn get_by_ids<'a>(
        &'a self,
        collection: &'a str,
        ids: &'a [String],
    ) -> BoxFuture<'a, FetchResult<Vec<Document>>>;

    /// Runs a range query over one indexed field.
    fn query_range<'a>(&'a self, query: &'a RangeQuery) -> BoxFuture<'a, FetchResult<Vec<Document>>>;
}

/// Blob service backing the persistent and remote blob tiers.
pub trait BlobStore: Send + Sync {
    /// Uploads `bytes` under `path` and returns the URL to fetch it by.
    fn put_blob<'a>(&'a self, path: &'a str, bytes: Bytes) -> BoxFuture<'a, FetchResult<String>>;

    /// Downloads the blob at `url`.
    fn get_blob<'a>(&'a self, url: &'a str) -> BoxFuture<'a, FetchResult<Bytes>>;

    /// Deletes the blob at `url`.
    fn delete_blob<'a>(&'a self, url: &'a str) -> BoxFuture<'a, FetchResult<()>>;
}
