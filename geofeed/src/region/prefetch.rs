//! Debounced scheduling of adjacent-region prefetches.
//!
//! After a viewport has been served, the four cardinally adjacent viewports
//! of equal span are fetched in the background so the next pan is a cache
//! hit. Scheduling is debounced: every new viewport supersedes the pending
//! one, and the prefetch only runs once the viewport has been stable for the
//! debounce interval.
//!
//! ```text
//! serve(A) ──► schedule(A) ──┐
//! serve(B) ──► schedule(B) ──┼─ cancels A
//!                            └─ 500ms quiet ──► prefetch N/E/S/W of B
//! ```
//!
//! Prefetch work is best-effort. Its errors are logged, never returned.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::coord::{Direction, Viewport};

/// Default quiet period before a prefetch runs.
pub const DEFAULT_PREFETCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Counters for prefetch scheduling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchStats {
    /// Viewports handed to `schedule()`.
    pub scheduled: u64,
    /// Schedules replaced by a newer viewport before they ran.
    pub superseded: u64,
    /// Prefetch runs started after the debounce elapsed.
    pub started: u64,
}

/// Debounces prefetch requests so only the latest viewport is prefetched.
pub struct PrefetchScheduler {
    debounce: Duration,
    pending: Mutex<Option<CancellationToken>>,
    scheduled: AtomicU64,
    superseded: AtomicU64,
    started: Arc<AtomicU64>,
}

impl Default for PrefetchScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_PREFETCH_DEBOUNCE)
    }
}

impl PrefetchScheduler {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: Mutex::new(None),
            scheduled: AtomicU64::new(0),
            superseded: AtomicU64::new(0),
            started: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Schedules `work` to run for `viewport` after the debounce interval,
    /// replacing any prefetch still waiting.
    ///
    /// `work` is invoked at most once, and only if no newer schedule or
    /// [`cancel`](Self::cancel) arrives first. Once started it runs to
    /// completion.
    pub fn schedule<F, Fut>(&self, viewport: Viewport, work: F)
    where
        F: FnOnce(Viewport) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        if let Some(previous) = self.pending.lock().replace(token.clone()) {
            if !previous.is_cancelled() {
                previous.cancel();
                self.superseded.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.scheduled.fetch_add(1, Ordering::Relaxed);

        let debounce = self.debounce;
        let started = Arc::clone(&self.started);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    trace!(viewport = %viewport, "Prefetch superseded");
                }
                _ = tokio::time::sleep(debounce) => {
                    // Mark as consumed so a later schedule doesn't count it superseded.
                    token.cancel();
                    started.fetch_add(1, Ordering::Relaxed);
                    trace!(viewport = %viewport, "Prefetch started");
                    work(viewport).await;
                }
            }
        });
    }

    /// Cancels the pending prefetch, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.pending.lock().take() {
            token.cancel();
        }
    }

    pub fn stats(&self) -> PrefetchStats {
        PrefetchStats {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
        }
    }
}

impl Drop for PrefetchScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// The four cardinal neighbours of `viewport` that stay within valid
/// coordinates.
pub fn adjacent_viewports(viewport: &Viewport) -> Vec<Viewport> {
    Direction::CARDINAL
        .iter()
        .filter_map(|dir| viewport.shifted(*dir))
        .collect()
}
