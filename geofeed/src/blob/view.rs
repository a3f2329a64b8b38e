//! Per-consumer handle implementing the view lifecycle.
//!
//! A UI element that shows an image owns a [`BlobView`]. When it becomes
//! visible it calls [`appear`](BlobView::appear); when it is about to go
//! off-screen it calls [`disappear`](BlobView::disappear), which cancels its
//! own pending load and forgets its bytes. The shared cache entry is left
//! alone: other views may still be showing the same asset. Because loads
//! are coalesced with reference-counted cancellation, the underlying
//! transfer only stops when the last interested view goes away.

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::trace;

use super::{BlobKey, MultiTierBlobCache};
use crate::error::{FetchError, FetchResult};

enum ViewState {
    Idle,
    Loading(JoinHandle<FetchResult<Bytes>>),
    Ready(Bytes),
    Failed(FetchError),
}

/// One consumer's view of a cached blob.
pub struct BlobView {
    cache: MultiTierBlobCache,
    key: BlobKey,
    state: ViewState,
}

impl BlobView {
    pub fn new(cache: MultiTierBlobCache, key: BlobKey) -> Self {
        Self {
            cache,
            key,
            state: ViewState::Idle,
        }
    }

    pub fn key(&self) -> &BlobKey {
        &self.key
    }

    /// Starts loading unless the view already has content or a load in
    /// progress. A memory hit is taken synchronously.
    pub fn appear(&mut self) {
        match self.state {
            ViewState::Loading(_) | ViewState::Ready(_) => return,
            ViewState::Idle | ViewState::Failed(_) => {}
        }
        if let Some(bytes) = self.cache.cached(&self.key) {
            self.state = ViewState::Ready(bytes);
            return;
        }
        let cache = self.cache.clone();
        let key = self.key.clone();
        trace!(key = %self.key, "View started load");
        self.state = ViewState::Loading(tokio::spawn(async move { cache.load(&key).await }));
    }

    /// Waits for the current load and returns the view's content.
    ///
    /// Starts a load first if the view is idle.
    pub async fn wait(&mut self) -> FetchResult<Bytes> {
        if matches!(self.state, ViewState::Idle) {
            self.appear();
        }
        let state = std::mem::replace(&mut self.state, ViewState::Idle);
        let result = match state {
            ViewState::Loading(handle) => match handle.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(FetchError::Cancelled),
                Err(e) => Err(FetchError::transient(format!("load task failed: {}", e))),
            },
            ViewState::Ready(bytes) => Ok(bytes),
            ViewState::Failed(e) => Err(e),
            ViewState::Idle => Err(FetchError::Cancelled),
        };
        self.state = match &result {
            Ok(bytes) => ViewState::Ready(bytes.clone()),
            Err(e) => ViewState::Failed(e.clone()),
        };
        result
    }

    /// Content, if loaded.
    pub fn content(&self) -> Option<&Bytes> {
        match &self.state {
            ViewState::Ready(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, ViewState::Loading(_))
    }

    /// Cancels this view's pending load and drops its reference to the
    /// content. The shared cache entry is not evicted.
    pub fn disappear(&mut self) {
        if let ViewState::Loading(handle) = std::mem::replace(&mut self.state, ViewState::Idle) {
            handle.abort();
            trace!(key = %self.key, "View cancelled load");
        }
    }
}

impl Drop for BlobView {
    fn drop(&mut self) {
        if let ViewState::Loading(handle) = &self.state {
            handle.abort();
        }
    }
}
