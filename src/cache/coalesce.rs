//! In-flight request coalescing
//!
//! At most one computation per [`CacheKey`] runs at a time. The first requester (leader)
//! spawns the work; later requesters (followers) await the same shared result. The work is
//! a detached task so dropping any single requester never cancels it; it is aborted only
//! once every requester has gone away.

use crate::fingerprint::CacheKey;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::task::AbortHandle;
use tracing::debug;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightError {
    /// The shared computation panicked
    #[error("coalesced computation panicked")]
    Panicked,

    /// Every requester left and the computation was aborted
    #[error("coalesced computation was abandoned")]
    Abandoned,
}

/// Whether this requester started the flight or joined it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    Leader,
    Follower,
}

type SharedFlight<T> = Shared<BoxFuture<'static, Result<T, FlightError>>>;

struct Flight<T> {
    id: u64,
    shared: SharedFlight<T>,
    waiters: usize,
    abort: AbortHandle,
}

type FlightMap<T> = Arc<Mutex<HashMap<CacheKey, Flight<T>>>>;

pub struct RequestCoalescer<T> {
    flights: FlightMap<T>,
    next_id: Arc<AtomicU64>,
}

impl<T> Clone for RequestCoalescer<T> {
    fn clone(&self) -> Self {
        Self {
            flights: Arc::clone(&self.flights),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<T> Default for RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Number of keys with a computation in flight
    pub fn in_flight(&self) -> usize {
        lock(&self.flights).len()
    }

    /// Run `work` for `key`, or join the flight already running for it
    ///
    /// `work` is only invoked by the leader.
    pub async fn run<F, Fut>(
        &self,
        key: &CacheKey,
        work: F,
    ) -> (Result<T, FlightError>, FlightRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (shared, role, guard) = {
            let mut flights = lock(&self.flights);

            if let Some(flight) = flights.get_mut(key) {
                flight.waiters += 1;
                debug!("Joining in-flight computation for {} ({} waiters)", key, flight.waiters);
                let guard = WaiterGuard {
                    flights: Arc::clone(&self.flights),
                    key: key.clone(),
                    id: flight.id,
                };
                (flight.shared.clone(), FlightRole::Follower, guard)
            } else {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let fut = work();
                let registry = Arc::clone(&self.flights);
                let owned_key = key.clone();

                let handle = tokio::spawn(async move {
                    let output = fut.await;
                    let mut flights = lock(&registry);
                    if flights.get(&owned_key).map(|f| f.id) == Some(id) {
                        flights.remove(&owned_key);
                    }
                    output
                });
                let abort = handle.abort_handle();

                let shared = async move {
                    handle.await.map_err(|e| {
                        if e.is_cancelled() {
                            FlightError::Abandoned
                        } else {
                            FlightError::Panicked
                        }
                    })
                }
                .boxed()
                .shared();

                flights.insert(
                    key.clone(),
                    Flight {
                        id,
                        shared: shared.clone(),
                        waiters: 1,
                        abort,
                    },
                );
                debug!("Started computation for {}", key);

                let guard = WaiterGuard {
                    flights: Arc::clone(&self.flights),
                    key: key.clone(),
                    id,
                };
                (shared, FlightRole::Leader, guard)
            }
        };

        let result = shared.await;
        drop(guard);
        (result, role)
    }
}

/// Deregisters one requester; the last one out aborts an unfinished flight
struct WaiterGuard<T> {
    flights: FlightMap<T>,
    key: CacheKey,
    id: u64,
}

impl<T> Drop for WaiterGuard<T> {
    fn drop(&mut self) {
        let mut flights = lock(&self.flights);
        let abandoned = match flights.get_mut(&self.key) {
            Some(flight) if flight.id == self.id => {
                flight.waiters = flight.waiters.saturating_sub(1);
                flight.waiters == 0
            }
            _ => false,
        };

        if abandoned {
            if let Some(flight) = flights.remove(&self.key) {
                debug!("All requesters left, aborting computation for {}", self.key);
                flight.abort.abort();
            }
        }
    }
}

fn lock<T>(
    flights: &Mutex<HashMap<CacheKey, Flight<T>>>,
) -> MutexGuard<'_, HashMap<CacheKey, Flight<T>>> {
    flights.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
