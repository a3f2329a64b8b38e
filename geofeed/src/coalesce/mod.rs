//! Request coalescing for in-flight fetches.
//!
//! The [`RequestCoalescer`] makes sure a key is fetched at most once at a
//! time. The first caller for a key starts a *flight*; every caller arriving
//! while that flight is running subscribes to it and receives the identical
//! result, success or error.
//!
//! # Architecture
//!
//! ```text
//! caller ──► ┌──────────────┐
//!            │ index lock   │──► key in flight? ──► subscribe ──► await
//!            └──────┬───────┘
//!                   │ absent
//!                   ▼
//!            ┌──────────────┐
//!            │ spawn flight │──► producer() under timeout
//!            └──────┬───────┘
//!                   ▼
//!            ┌──────────────┐
//!            │ complete     │──► remove slots, broadcast result (same lock)
//!            └──────────────┘
//! ```
//!
//! A flight can cover several keys: the batch form partitions requested keys
//! into "already in flight" (joined) and "new" (chunked into flights of at
//! most `chunk_size` keys), so a store with an IDs-per-query limit receives
//! each missing key exactly once.
//!
//! # Cancellation
//!
//! Every caller holds one unit of *interest* in each flight it waits on.
//! Dropping the caller's future releases that interest. The producer is only
//! cancelled when the last unit is released; a flight that still has a
//! waiter keeps running.
//!
//! The index lock is never held across an await point.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{FetchError, FetchResult};

/// Default deadline applied to every flight.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

type FlightOutcome<K, V> = FetchResult<HashMap<K, V>>;

struct Slot<V> {
    flight: u64,
    tx: broadcast::Sender<FetchResult<V>>,
}

struct Flight<K> {
    keys: Vec<K>,
    interest: usize,
    cancel: CancellationToken,
}

struct CoalescerState<K, V> {
    slots: HashMap<K, Slot<V>>,
    flights: HashMap<u64, Flight<K>>,
    next_flight: u64,
}

impl<K, V> CoalescerState<K, V>
where
    K: Eq + Hash,
{
    /// Removes a flight and every slot still owned by it.
    fn remove_flight(&mut self, id: u64) -> Option<Flight<K>> {
        let flight = self.flights.remove(&id)?;
        for key in &flight.keys {
            if self.slots.get(key).is_some_and(|slot| slot.flight == id) {
                self.slots.remove(key);
            }
        }
        Some(flight)
    }
}

#[derive(Default)]
struct Counters {
    started: AtomicU64,
    joined: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
}

/// Snapshot of coalescer activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoalescerStats {
    /// Flights started (one producer invocation each).
    pub started: u64,
    /// Keys served by joining an existing flight.
    pub joined: u64,
    /// Flights that ran to completion, successfully or not.
    pub completed: u64,
    /// Flights cancelled because every caller went away.
    pub cancelled: u64,
    /// Keys currently in flight.
    pub in_flight: usize,
}

impl fmt::Display for CoalescerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} started, {} joined, {} completed, {} cancelled, {} in flight",
            self.started, self.joined, self.completed, self.cancelled, self.in_flight
        )
    }
}

/// Deduplicates concurrent fetches for the same keys.
pub struct RequestCoalescer<K, V> {
    state: Arc<Mutex<CoalescerState<K, V>>>,
    counters: Arc<Counters>,
    timeout: Duration,
}

impl<K, V> Default for RequestCoalescer<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_TIMEOUT)
    }
}

impl<K, V> RequestCoalescer<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a coalescer whose flights time out after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(CoalescerState {
                slots: HashMap::new(),
                flights: HashMap::new(),
                next_flight: 0,
            })),
            counters: Arc::new(Counters::default()),
            timeout,
        }
    }

    /// Fetches `key`, or joins the flight already fetching it.
    ///
    /// `producer` is only invoked when no flight exists for `key`. It is
    /// called while the index lock is held, so it must do nothing but build
    /// the future; all work belongs inside the future.
    pub async fn fetch_or_join<F, Fut>(&self, key: K, producer: F) -> FetchResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<V>> + Send + 'static,
    {
        let (mut rx, _interest) = {
            let mut state = self.state.lock();
            match state.slots.get(&key).map(|slot| (slot.flight, slot.tx.subscribe())) {
                Some((flight, rx)) => {
                    if let Some(f) = state.flights.get_mut(&flight) {
                        f.interest += 1;
                    }
                    self.counters.joined.fetch_add(1, Ordering::Relaxed);
                    trace!(key = ?key, flight, "Joined in-flight fetch");
                    (rx, self.interest(vec![flight]))
                }
                None => {
                    let single_key = key.clone();
                    let fut = producer();
                    let fut = async move { fut.await.map(|v| HashMap::from([(single_key, v)])) };
                    let (flight, mut receivers) =
                        self.launch(&mut state, vec![key.clone()], fut.boxed());
                    let (_, rx) = receivers.remove(0);
                    (rx, self.interest(vec![flight]))
                }
            }
        };

        receive(&mut rx).await
    }

    /// Fetches every key in `keys`, joining flights already in progress.
    ///
    /// Keys not in flight are grouped into chunks of at most `chunk_size`
    /// and `producer` is invoked once per chunk. A key missing from a
    /// successful chunk result resolves to [`FetchError::NotFound`].
    /// Duplicate keys are fetched once.
    pub async fn fetch_many_or_join<F, Fut>(
        &self,
        keys: Vec<K>,
        chunk_size: usize,
        mut producer: F,
    ) -> HashMap<K, FetchResult<V>>
    where
        F: FnMut(Vec<K>) -> Fut,
        Fut: Future<Output = FlightOutcome<K, V>> + Send + 'static,
    {
        let chunk_size = chunk_size.max(1);
        let mut seen = HashSet::with_capacity(keys.len());
        let keys: Vec<K> = keys.into_iter().filter(|k| seen.insert(k.clone())).collect();

        let (receivers, _interest) = {
            let mut state = self.state.lock();
            let mut receivers = Vec::with_capacity(keys.len());
            let mut joined_flights = HashSet::new();
            let mut missing = Vec::new();

            for key in keys {
                match state.slots.get(&key).map(|slot| (slot.flight, slot.tx.subscribe())) {
                    Some((flight, rx)) => {
                        if joined_flights.insert(flight) {
                            if let Some(f) = state.flights.get_mut(&flight) {
                                f.interest += 1;
                            }
                        }
                        self.counters.joined.fetch_add(1, Ordering::Relaxed);
                        receivers.push((key, rx));
                    }
                    None => missing.push(key),
                }
            }

            let mut flights: Vec<u64> = joined_flights.into_iter().collect();
            for chunk in missing.chunks(chunk_size) {
                let fut = producer(chunk.to_vec());
                let (flight, rxs) = self.launch(&mut state, chunk.to_vec(), fut.boxed());
                flights.push(flight);
                receivers.extend(rxs);
            }

            (receivers, self.interest(flights))
        };

        join_all(
            receivers
                .into_iter()
                .map(|(key, mut rx)| async move { (key, receive(&mut rx).await) }),
        )
        .await
        .into_iter()
        .collect()
    }

    /// Returns true if `key` currently has a flight.
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.state.lock().slots.contains_key(key)
    }

    /// Number of keys currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Snapshot of coalescer counters.
    pub fn stats(&self) -> CoalescerStats {
        CoalescerStats {
            started: self.counters.started.load(Ordering::Relaxed),
            joined: self.counters.joined.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            in_flight: self.in_flight_count(),
        }
    }

    /// Registers a new flight for `keys` and spawns its producer.
    ///
    /// The caller already holds the index lock and receives one unit of
    /// interest in the new flight.
    fn launch(
        &self,
        state: &mut CoalescerState<K, V>,
        keys: Vec<K>,
        fut: BoxFuture<'static, FlightOutcome<K, V>>,
    ) -> (u64, Vec<(K, broadcast::Receiver<FetchResult<V>>)>) {
        let id = state.next_flight;
        state.next_flight += 1;

        let cancel = CancellationToken::new();
        let mut receivers = Vec::with_capacity(keys.len());
        for key in &keys {
            let (tx, rx) = broadcast::channel(1);
            state.slots.insert(key.clone(), Slot { flight: id, tx });
            receivers.push((key.clone(), rx));
        }
        state.flights.insert(
            id,
            Flight {
                keys,
                interest: 1,
                cancel: cancel.clone(),
            },
        );
        self.counters.started.fetch_add(1, Ordering::Relaxed);
        debug!(flight = id, keys = receivers.len(), "Starting fetch");

        let guard = FlightGuard {
            state: Arc::clone(&self.state),
            id,
            armed: true,
        };
        tokio::spawn(run_flight(
            guard,
            Arc::clone(&self.counters),
            cancel,
            self.timeout,
            fut,
        ));

        (id, receivers)
    }

    fn interest(&self, flights: Vec<u64>) -> Interest<K, V> {
        Interest {
            state: Arc::clone(&self.state),
            counters: Arc::clone(&self.counters),
            flights,
        }
    }
}

impl<K, V> fmt::Debug for RequestCoalescer<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCoalescer")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

async fn receive<V: Clone>(rx: &mut broadcast::Receiver<FetchResult<V>>) -> FetchResult<V> {
    match rx.recv().await {
        Ok(result) => result,
        Err(_) => Err(FetchError::transient("fetch task aborted")),
    }
}

async fn run_flight<K, V>(
    mut guard: FlightGuard<K, V>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    timeout: Duration,
    fut: BoxFuture<'static, FlightOutcome<K, V>>,
) where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
{
    let outcome = tokio::select! {
        biased;

        _ = cancel.cancelled() => {
            // The last interested caller already cleaned up the index.
            guard.armed = false;
            return;
        }

        result = tokio::time::timeout(timeout, fut) => match result {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(flight = guard.id, timeout_ms = timeout.as_millis() as u64, "Fetch timed out");
                Err(FetchError::Timeout { after: timeout })
            }
        },
    };

    guard.armed = false;
    let mut state = guard.state.lock();
    let Some(flight) = state.flights.remove(&guard.id) else {
        return;
    };

    for key in flight.keys {
        if !state.slots.get(&key).is_some_and(|slot| slot.flight == guard.id) {
            continue;
        }
        let result = match &outcome {
            Ok(values) => values
                .get(&key)
                .cloned()
                .ok_or_else(|| FetchError::not_found(format!("{:?}", key))),
            Err(e) => Err(e.clone()),
        };
        if let Some(slot) = state.slots.remove(&key) {
            // No receivers left is fine: everyone may have stopped listening.
            let _ = slot.tx.send(result);
        }
    }
    counters.completed.fetch_add(1, Ordering::Relaxed);
    trace!(flight = guard.id, ok = outcome.is_ok(), "Fetch completed");
}

/// Cleans up a flight whose task ended without completing (panic or
/// runtime shutdown). Dropping the senders wakes every waiter.
struct FlightGuard<K, V>
where
    K: Eq + Hash,
{
    state: Arc<Mutex<CoalescerState<K, V>>>,
    id: u64,
    armed: bool,
}

impl<K, V> Drop for FlightGuard<K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        if self.armed {
            warn!(flight = self.id, "Fetch task ended without a result");
            self.state.lock().remove_flight(self.id);
        }
    }
}

/// One caller's interest in a set of flights.
struct Interest<K, V>
where
    K: Eq + Hash,
{
    state: Arc<Mutex<CoalescerState<K, V>>>,
    counters: Arc<Counters>,
    flights: Vec<u64>,
}

impl<K, V> Drop for Interest<K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        if self.flights.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        for id in self.flights.drain(..) {
            let last = match state.flights.get_mut(&id) {
                Some(flight) => {
                    flight.interest = flight.interest.saturating_sub(1);
                    flight.interest == 0
                }
                // Already completed.
                None => false,
            };
            if last {
                if let Some(flight) = state.remove_flight(id) {
                    flight.cancel.cancel();
                    self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                    debug!(flight = id, "Fetch cancelled, no callers left");
                }
            }
        }
    }
}
