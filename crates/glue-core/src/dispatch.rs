//! Request entry point: cache-or-compute dispatch with an
//! at-most-one-concurrent-computation guarantee per state key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tracing::{debug, warn};

use crate::batch::{BatchPlan, Slot};
use crate::config::CacheConfig;
use crate::errors::{BatchError, DispatchError};
use crate::key::StateKey;
use crate::model::{validate_tag, FluidState, Provenance, TransportProperties};
use crate::solver::FineGrainSolver;
use crate::store::{Store, StoreError};

/// Per-request state machine: validate, encode, check the cache, and on a
/// miss invoke the solver once and persist the result write-through.
///
/// Store failures propagate; the engine never silently degrades to
/// "skip cache, recompute". Solver failures are never cached.
pub struct DispatchEngine {
    store: Store,
    solver: Arc<dyn FineGrainSolver>,
    config: CacheConfig,
    /// Per-key gates: concurrent requesters for the same key block on the
    /// winner's gate, then re-check the cache and share its result.
    in_flight: Mutex<HashMap<StateKey, Arc<Mutex<()>>>>,
}

impl DispatchEngine {
    pub fn new(store: Store, solver: Arc<dyn FineGrainSolver>, config: CacheConfig) -> Self {
        Self {
            store,
            solver,
            config,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Compute (or retrieve) transport properties for one input state.
    pub fn compute_single(
        &self,
        state: &FluidState,
        tag: &str,
    ) -> Result<TransportProperties, DispatchError> {
        validate_tag(tag, self.config.max_tag_len)?;
        let key = StateKey::encode(state, self.config.significant_digits)?;

        loop {
            // fast path
            if let Some(value) = self.store.lookup(&key)? {
                debug!(key = %key.digest(), "cache hit");
                return Ok(value);
            }

            let gate = self.gate_for(&key);
            // a panicking solver poisons its gate; the lock itself is intact,
            // so the next requester takes the key over
            let guard = gate.lock().unwrap_or_else(PoisonError::into_inner);

            // the winner unregisters its gate when it finishes; a stale gate
            // excludes nobody, so go back and lock the registered one
            if !self.holds_registered_gate(&key, &gate) {
                drop(guard);
                continue;
            }

            // another requester may have finished between the fast path and
            // the gate acquisition
            match self.store.lookup(&key) {
                Ok(Some(value)) => {
                    debug!(key = %key.digest(), "cache hit after wait");
                    self.release_gate(&key, &gate);
                    return Ok(value);
                }
                Ok(None) => {}
                Err(e) => {
                    self.release_gate(&key, &gate);
                    return Err(e.into());
                }
            }

            debug!(key = %key.digest(), tag, "cache miss, invoking fine-grain solver");
            let result = match self.solver.run(state) {
                Ok(value) => match self.store.insert(&key, &value, tag, Provenance::FineGrain) {
                    Ok(()) => Ok(value),
                    Err(StoreError::DuplicateKey(digest)) => {
                        // an out-of-band writer on the same store (another
                        // process, imported data) won the insert; serve what
                        // the cache now holds rather than failing the request
                        warn!(key = %digest, "insert collided with an existing entry");
                        match self.store.lookup(&key) {
                            Ok(Some(cached)) => Ok(cached),
                            // the colliding entry was evicted in the interim
                            Ok(None) => Ok(value),
                            Err(e) => Err(e.into()),
                        }
                    }
                    Err(e) => Err(e.into()),
                },
                Err(e) => {
                    warn!(key = %key.digest(), error = %e, "fine-grain solver failed; nothing cached");
                    Err(DispatchError::Solver(e))
                }
            };

            self.release_gate(&key, &gate);
            return result;
        }
    }

    /// Compute a batch, one output per input in input order.
    ///
    /// Tolerance-equivalent inputs are deduplicated (the solver runs at most
    /// once per distinct key) and misses fan out over at most
    /// `max_concurrent_solves` worker threads. Best-effort on failure: the
    /// returned [`BatchError`] keeps successful elements' results and
    /// attributes failures to their input indices.
    pub fn compute_batch(
        &self,
        states: &[FluidState],
        tag: &str,
    ) -> Result<Vec<TransportProperties>, BatchError> {
        if let Err(e) = validate_tag(tag, self.config.max_tag_len) {
            return Err(BatchError::new(vec![Err(e); states.len()]));
        }

        let plan = BatchPlan::build(states, self.config.significant_digits);
        let group_results = self.run_groups(&plan, tag);

        let results: Vec<Result<TransportProperties, DispatchError>> = plan
            .slots
            .iter()
            .map(|slot| match slot {
                Slot::Group(idx) => group_results[*idx].clone(),
                Slot::Invalid(e) => Err(e.clone()),
            })
            .collect();

        if results.iter().all(Result::is_ok) {
            Ok(results.into_iter().map(|r| r.unwrap()).collect())
        } else {
            Err(BatchError::new(results))
        }
    }

    /// Resolve every distinct key in the plan, bounded by the configured
    /// solver concurrency.
    fn run_groups(
        &self,
        plan: &BatchPlan,
        tag: &str,
    ) -> Vec<Result<TransportProperties, DispatchError>> {
        let n = plan.groups.len();
        if n == 0 {
            return Vec::new();
        }
        let workers = self.config.max_concurrent_solves.min(n).max(1);
        if workers == 1 {
            return plan
                .groups
                .iter()
                .map(|g| self.compute_single(&g.state, tag))
                .collect();
        }

        let mut results: Vec<Option<Result<TransportProperties, DispatchError>>> = vec![None; n];
        let collected: Vec<Vec<(usize, Result<TransportProperties, DispatchError>)>> =
            thread::scope(|s| {
                let handles: Vec<_> = (0..workers)
                    .map(|w| {
                        let groups = &plan.groups;
                        s.spawn(move || {
                            let mut out = Vec::new();
                            let mut i = w;
                            while i < groups.len() {
                                out.push((i, self.compute_single(&groups[i].state, tag)));
                                i += workers;
                            }
                            out
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().expect("batch worker panicked"))
                    .collect()
            });
        for chunk in collected {
            for (i, r) in chunk {
                results[i] = Some(r);
            }
        }
        results
            .into_iter()
            .map(|r| r.expect("every group resolved"))
            .collect()
    }

    fn gate_for(&self, key: &StateKey) -> Arc<Mutex<()>> {
        let mut map = self.in_flight.lock().unwrap();
        map.entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Whether `gate` is still the one registered for `key`. A stale gate
    /// belongs to a computation that already finished.
    fn holds_registered_gate(&self, key: &StateKey, gate: &Arc<Mutex<()>>) -> bool {
        self.in_flight
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, gate))
    }

    fn release_gate(&self, key: &StateKey, gate: &Arc<Mutex<()>>) {
        let mut map = self.in_flight.lock().unwrap();
        if map.get(key).is_some_and(|current| Arc::ptr_eq(current, gate)) {
            map.remove(key);
        }
    }
}
