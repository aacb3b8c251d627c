//! Barrier Registry: named reusable N-party barriers with occupant
//! tracking.
//!
//! Grounded on a dashmap-backed named-registry shape found in the
//! wider codebase (`knhk-consensus/src/gossip/topology.rs`), adapted from async
//! `tokio::sync` to blocking `parking_lot::{Mutex, Condvar}` since this
//! engine's concurrency model is OS threads, not tasks. The original
//! C source's manual two-phase toggle implementation detail
//! ("`barrier_index ^= 1`") doesn't leak into the abstraction here;
//! reusability is handled by a monotonic generation counter instead.

use std::sync::atomic::{AtomicBool, Ordering as A};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::ticker::Tick;

/// What an occupant is waiting for, purely for `show_barrier` diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccupantKind {
    PassStart,
    PassComplete,
    TaskHandoff,
    ResultsCollection,
    Trigger,
}

/// One party currently inside a barrier.
#[derive(Debug, Clone)]
pub struct Occupant {
    pub name: String,
    pub kind: OccupantKind,
    pub worker_index: Option<usize>,
    pub entry_tick: Tick,
}

struct BarrierState {
    occupancy: usize,
    generation: u64,
    occupants: Vec<Occupant>,
    canceled: bool,
}

/// A named reusable N-party rendezvous.
pub struct Barrier {
    pub name: String,
    target: usize,
    state: Mutex<BarrierState>,
    cond: Condvar,
    run_cancel: Arc<AtomicBool>,
}

/// Outcome of `enter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnterOutcome {
    Released,
    Canceled,
}

impl Barrier {
    fn new(name: String, target: usize, run_cancel: Arc<AtomicBool>) -> Self {
        Barrier {
            name,
            target,
            state: Mutex::new(BarrierState {
                occupancy: 0,
                generation: 0,
                occupants: Vec::new(),
                canceled: false,
            }),
            cond: Condvar::new(),
            run_cancel,
        }
    }

    /// Block until `target` callers have entered. All occupants wake
    /// before any may re-enter. Polls both its own `cancel()` flag and
    /// the process-wide run cancellation flag at a bounded interval, so
    /// a sibling Target Thread that never shows up (because it hit its
    /// own error budget, or the whole run was aborted) can never leave
    /// another thread parked here forever.
    pub fn enter(&self, occupant: Occupant) -> EnterOutcome {
        let mut guard = self.state.lock();
        if guard.canceled || self.run_cancel.load(A::Acquire) {
            guard.canceled = true;
            return EnterOutcome::Canceled;
        }
        let my_generation = guard.generation;
        guard.occupancy += 1;
        guard.occupants.push(occupant);

        if guard.occupancy >= self.target {
            guard.occupancy = 0;
            guard.occupants.clear();
            guard.generation = guard.generation.wrapping_add(1);
            self.cond.notify_all();
            return EnterOutcome::Released;
        }

        loop {
            if guard.canceled || self.run_cancel.load(A::Acquire) {
                guard.canceled = true;
                guard.occupancy = 0;
                guard.occupants.clear();
                self.cond.notify_all();
                return EnterOutcome::Canceled;
            }
            if guard.generation != my_generation {
                return EnterOutcome::Released;
            }
            let timed_out = self
                .cond
                .wait_for(&mut guard, Duration::from_millis(50))
                .timed_out();
            let _ = timed_out;
        }
    }

    /// Release all current occupants without requiring full occupancy
    /// — used by a terminating Run Controller so no thread is ever
    /// left parked in a barrier.
    pub fn cancel(&self) {
        let mut guard = self.state.lock();
        guard.canceled = true;
        guard.occupancy = 0;
        guard.occupants.clear();
        guard.generation = guard.generation.wrapping_add(1);
        self.cond.notify_all();
    }

    pub fn occupants(&self) -> Vec<Occupant> {
        self.state.lock().occupants.clone()
    }

    pub fn current_occupancy(&self) -> usize {
        self.state.lock().occupancy
    }

    pub fn target_occupancy(&self) -> usize {
        self.target
    }
}

/// Process-wide registry of live barriers, keyed by name.
pub struct BarrierRegistry {
    barriers: DashMap<String, Arc<Barrier>>,
    run_cancel: Arc<AtomicBool>,
}

impl BarrierRegistry {
    /// `run_cancel` is the run-wide abort flag; every barrier created
    /// through this registry polls it, so canceling a run never leaves
    /// a thread parked in a barrier waiting on a sibling that will
    /// never arrive.
    pub fn new(run_cancel: Arc<AtomicBool>) -> Self {
        BarrierRegistry {
            barriers: DashMap::new(),
            run_cancel,
        }
    }

    /// Create (or fetch, if already created with the same name) a
    /// barrier with target occupancy `n`. Reusable: once n occupants
    /// enter, the barrier resets and may be entered again.
    pub fn create(&self, name: impl Into<String>, n: usize) -> Arc<Barrier> {
        let name = name.into();
        self.barriers
            .entry(name.clone())
            .or_insert_with(|| Arc::new(Barrier::new(name, n, self.run_cancel.clone())))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Barrier>> {
        self.barriers.get(name).map(|b| b.clone())
    }

    /// Cancel every live barrier and drop them from the registry.
    pub fn destroy_all(&self) {
        for entry in self.barriers.iter() {
            entry.value().cancel();
        }
        self.barriers.clear();
    }

    /// Diagnostic dump: (name, occupancy, target, occupants) for every
    /// live barrier, newest insertion order not guaranteed.
    pub fn show_barriers(&self) -> Vec<(String, usize, usize, Vec<Occupant>)> {
        self.barriers
            .iter()
            .map(|entry| {
                let b = entry.value();
                (b.name.clone(), b.current_occupancy(), b.target_occupancy(), b.occupants())
            })
            .collect()
    }

    /// True once every registered barrier is empty — used to verify
    /// that no thread is left parked in a barrier after completion.
    pub fn all_drained(&self) -> bool {
        self.barriers.iter().all(|e| e.value().current_occupancy() == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticker::Ticker;
    use std::thread;

    fn occ(name: &str) -> Occupant {
        Occupant {
            name: name.into(),
            kind: OccupantKind::PassStart,
            worker_index: None,
            entry_tick: Ticker::new().now(),
        }
    }

    fn registry() -> BarrierRegistry {
        BarrierRegistry::new(Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn two_party_barrier_releases_both() {
        let registry = Arc::new(registry());
        let b = registry.create("start", 2);
        let b2 = b.clone();
        let h = thread::spawn(move || b2.enter(occ("worker-1")));
        let r1 = b.enter(occ("worker-0"));
        let r2 = h.join().unwrap();
        assert_eq!(r1, EnterOutcome::Released);
        assert_eq!(r2, EnterOutcome::Released);
        assert_eq!(b.current_occupancy(), 0);
    }

    #[test]
    fn barrier_is_reusable() {
        let registry = registry();
        let b = registry.create("pass-end", 1);
        assert_eq!(b.enter(occ("w0")), EnterOutcome::Released);
        assert_eq!(b.enter(occ("w0")), EnterOutcome::Released);
    }

    #[test]
    fn cancel_releases_waiters_without_full_occupancy() {
        let registry = Arc::new(registry());
        let b = registry.create("stuck", 3);
        let b2 = b.clone();
        let h = thread::spawn(move || b2.enter(occ("lone-waiter")));
        thread::sleep(Duration::from_millis(10));
        b.cancel();
        assert_eq!(h.join().unwrap(), EnterOutcome::Canceled);
    }

    #[test]
    fn run_cancel_flag_releases_waiters_even_without_explicit_cancel() {
        let run_cancel = Arc::new(AtomicBool::new(false));
        let registry = Arc::new(BarrierRegistry::new(run_cancel.clone()));
        let b = registry.create("stuck-run-wide", 2);
        let b2 = b.clone();
        let h = thread::spawn(move || b2.enter(occ("lone-waiter")));
        thread::sleep(Duration::from_millis(10));
        run_cancel.store(true, A::Release);
        assert_eq!(h.join().unwrap(), EnterOutcome::Canceled);
    }

    #[test]
    fn destroy_all_drains_registry() {
        let registry = registry();
        let _ = registry.create("a", 5);
        let _ = registry.create("b", 2);
        assert_eq!(registry.show_barriers().len(), 2);
        registry.destroy_all();
        assert_eq!(registry.show_barriers().len(), 0);
    }
}
