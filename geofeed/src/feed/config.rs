//! Feed aggregator configuration.

use std::time::Duration;

use crate::coalesce::DEFAULT_FETCH_TIMEOUT;
use crate::remote::RetryPolicy;
use crate::store::DEFAULT_RETRY_ATTEMPTS;

/// Default collection holding feed item documents.
pub const DEFAULT_FEED_COLLECTION: &str = "posts";

/// Default number of items per page.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Default bound on producers fanned out to per page.
pub const DEFAULT_MAX_PRODUCERS: usize = 50;

/// Default time-to-live of cached per-producer pages.
pub const DEFAULT_FEED_CACHE_TTL: Duration = Duration::from_secs(30);

/// Default number of per-producer pages kept.
pub const DEFAULT_FEED_CACHE_CAPACITY: u64 = 256;

/// Configuration for [`FeedAggregator`](super::FeedAggregator).
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub collection: String,
    pub page_size: usize,
    pub max_producers: usize,
    pub cache_ttl: Duration,
    pub cache_capacity: u64,
    pub fetch_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_FEED_COLLECTION.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            max_producers: DEFAULT_MAX_PRODUCERS,
            cache_ttl: DEFAULT_FEED_CACHE_TTL,
            cache_capacity: DEFAULT_FEED_CACHE_CAPACITY,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            retry: RetryPolicy::exponential(DEFAULT_RETRY_ATTEMPTS),
        }
    }
}

impl FeedConfig {
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_max_producers(mut self, max_producers: usize) -> Self {
        self.max_producers = max_producers.max(1);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
