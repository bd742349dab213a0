//! Result Cache
//!
//! Keyed by request fingerprint. At most one generation per fingerprint is in
//! flight: later callers subscribe to the leader's outcome instead of
//! submitting again. Successful results are memoized, errors never are.

use crate::engine::EngineResult;
use crate::error::{EngineError, JobError};
use crate::queue::JobOutcome;
use crate::request::Fingerprint;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;
use tracing::debug;

enum Slot {
    InFlight {
        waiters: Vec<oneshot::Sender<JobOutcome>>,
    },
    Ready(EngineResult),
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<Fingerprint, Slot>,
    /// Ready fingerprints, oldest first
    order: VecDeque<Fingerprint>,
}

/// Result of [`ResultCache::begin`]
pub enum Lookup {
    /// Memoized result
    Hit(EngineResult),
    /// Another caller is generating this fingerprint
    Wait(oneshot::Receiver<JobOutcome>),
    /// Caller now owns the in-flight slot and must call [`ResultCache::complete`]
    Lead,
}

pub struct ResultCache {
    state: Mutex<CacheState>,
    memoize: bool,
    /// 0 means unbounded
    max_entries: usize,
}

impl ResultCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            memoize: true,
            max_entries,
        }
    }

    /// Dedupe in-flight generations without keeping results
    pub fn dedupe_only() -> Self {
        Self {
            memoize: false,
            ..Self::new(0)
        }
    }

    pub fn begin(&self, fingerprint: Fingerprint) -> Lookup {
        let mut state = self.state.lock();
        match state.slots.get_mut(&fingerprint) {
            Some(Slot::Ready(result)) => {
                debug!(fingerprint = %fingerprint.short(), "Result cache hit");
                Lookup::Hit(result.clone())
            }
            Some(Slot::InFlight { waiters }) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                debug!(
                    fingerprint = %fingerprint.short(),
                    waiters = waiters.len(),
                    "Joined in-flight generation"
                );
                Lookup::Wait(rx)
            }
            None => {
                state.slots.insert(
                    fingerprint,
                    Slot::InFlight {
                        waiters: Vec::new(),
                    },
                );
                Lookup::Lead
            }
        }
    }

    /// Finish an in-flight generation, waking every subscriber with a clone of `outcome`
    pub fn complete(&self, fingerprint: Fingerprint, outcome: &JobOutcome) {
        let waiters = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let waiters = match state.slots.remove(&fingerprint) {
                Some(Slot::InFlight { waiters }) => waiters,
                Some(ready @ Slot::Ready(_)) => {
                    state.slots.insert(fingerprint, ready);
                    return;
                }
                None => Vec::new(),
            };
            if let (true, Ok(result)) = (self.memoize, outcome) {
                state.slots.insert(fingerprint, Slot::Ready(result.clone()));
                state.order.push_back(fingerprint);
                self.enforce_capacity(state);
            }
            waiters
        };

        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn enforce_capacity(&self, state: &mut CacheState) {
        if self.max_entries == 0 {
            return;
        }
        while state.order.len() > self.max_entries {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            if matches!(state.slots.get(&oldest), Some(Slot::Ready(_))) {
                state.slots.remove(&oldest);
                debug!(fingerprint = %oldest.short(), "Evicted oldest cached result");
            }
        }
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<EngineResult> {
        match self.state.lock().slots.get(fingerprint) {
            Some(Slot::Ready(result)) => Some(result.clone()),
            _ => None,
        }
    }

    /// Drop a memoized result; in-flight generations are left alone
    pub fn evict(&self, fingerprint: &Fingerprint) -> bool {
        let mut state = self.state.lock();
        if !matches!(state.slots.get(fingerprint), Some(Slot::Ready(_))) {
            return false;
        }
        state.slots.remove(fingerprint);
        state.order.retain(|f| f != fingerprint);
        true
    }

    /// Drop every memoized result, returning how many were removed
    pub fn clear(&self) -> usize {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let before = state.slots.len();
        state.slots.retain(|_, slot| matches!(slot, Slot::InFlight { .. }));
        state.order.clear();
        before - state.slots.len()
    }

    /// Number of memoized results
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.state
            .lock()
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::InFlight { .. }))
            .count()
    }
}

/// Outcome delivered to a subscriber whose leader vanished without completing
pub(crate) fn abandoned() -> JobError {
    JobError::Engine(EngineError::Failed(
        "generation was abandoned before completing".to_string(),
    ))
}
