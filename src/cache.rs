// src/cache.rs
//! Process-wide store of analysis results keyed by track content.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use serde::{Serialize, Serializer};

use crate::analyzer::AudioFeatures;
use crate::error::{MixError, Result};
use crate::grid::BeatGrid;
use crate::track::ContentHash;

/// Features plus the grid built from them. When fitting failed, `grid` is
/// the fixed-tempo fallback and `grid_error` says why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackAnalysis {
    pub features: AudioFeatures,
    pub grid: BeatGrid,
    #[serde(serialize_with = "serialize_error")]
    pub grid_error: Option<MixError>,
}

fn serialize_error<S: Serializer>(error: &Option<MixError>, s: S) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Requests that waited on another caller's extraction.
    pub joined: u64,
}

type Outcome = Result<Arc<TrackAnalysis>>;

/// One extraction in progress. Waiters sleep on `done` until `result` is set.
#[derive(Default)]
struct Flight {
    result: Mutex<Option<Outcome>>,
    done: Condvar,
}

struct CacheState {
    ready: LruCache<ContentHash, Arc<TrackAnalysis>>,
    in_flight: HashMap<ContentHash, Arc<Flight>>,
}

/// LRU of finished analyses with at most one extraction in flight per
/// content hash. Failures are handed to every waiter but never stored.
pub struct FeatureCache {
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    joined: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FeatureCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                ready: LruCache::new(capacity),
                in_flight: HashMap::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            joined: AtomicU64::new(0),
        }
    }

    /// Cached analysis for `hash`, or the result of `compute`. Concurrent
    /// callers for the same hash block until the first caller's `compute`
    /// finishes and all receive its result. `compute` runs without the
    /// cache lock held.
    pub fn get_or_compute<F>(&self, hash: ContentHash, compute: F) -> Outcome
    where
        F: FnOnce() -> Result<TrackAnalysis>,
    {
        let flight = {
            let mut state = lock(&self.state);
            if let Some(hit) = state.ready.get(&hash) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(hit));
            }
            if let Some(existing) = state.in_flight.get(&hash) {
                let existing = Arc::clone(existing);
                drop(state);
                self.joined.fetch_add(1, Ordering::Relaxed);
                log::debug!("joining in-flight analysis for {}", hash);
                return wait_for(&existing);
            }
            let flight = Arc::new(Flight::default());
            state.in_flight.insert(hash, Arc::clone(&flight));
            flight
        };
        self.misses.fetch_add(1, Ordering::Relaxed);

        let mut guard = FlightGuard {
            cache: self,
            hash,
            flight,
            finished: false,
        };
        let outcome = compute().map(Arc::new);
        guard.finish(outcome.clone());
        outcome
    }

    pub fn get(&self, hash: ContentHash) -> Option<Arc<TrackAnalysis>> {
        lock(&self.state).ready.get(&hash).cloned()
    }

    pub fn contains(&self, hash: ContentHash) -> bool {
        lock(&self.state).ready.contains(&hash)
    }

    pub fn evict(&self, hash: ContentHash) -> Option<Arc<TrackAnalysis>> {
        lock(&self.state).ready.pop(&hash)
    }

    pub fn len(&self) -> usize {
        lock(&self.state).ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
        }
    }
}

fn wait_for(flight: &Flight) -> Outcome {
    let mut slot = lock(&flight.result);
    loop {
        if let Some(outcome) = slot.as_ref() {
            return outcome.clone();
        }
        slot = flight.done.wait(slot).unwrap_or_else(PoisonError::into_inner);
    }
}

/// Publishes the outcome and clears the in-flight entry, also when
/// `compute` panics, so waiters never hang.
struct FlightGuard<'a> {
    cache: &'a FeatureCache,
    hash: ContentHash,
    flight: Arc<Flight>,
    finished: bool,
}

impl FlightGuard<'_> {
    fn finish(&mut self, outcome: Outcome) {
        {
            let mut state = lock(&self.cache.state);
            state.in_flight.remove(&self.hash);
            if let Ok(analysis) = &outcome {
                state.ready.put(self.hash, Arc::clone(analysis));
            }
        }
        *lock(&self.flight.result) = Some(outcome);
        self.flight.done.notify_all();
        self.finished = true;
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            log::error!("analysis for {} panicked", self.hash);
            self.finish(Err(MixError::InternalInvariantViolation(format!(
                "analysis for {} panicked",
                self.hash
            ))));
        }
    }
}
