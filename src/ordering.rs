//! Ordering Governor: unordered / loose / strict completion ordering
//! between a target's Worker Agents.
//!
//! Workers form a logical ring by worker index; adjacency here means
//! "the worker handling seek-list entry i" and "the worker handling
//! entry i+1", which under round-robin dispatch are `i % Q` and
//! `(i+1) % Q`.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::config::OrderingRegime;

/// A simple counting semaphore built on `parking_lot`, used as the
/// release primitive between adjacent Worker Agents.
struct Signal {
    permits: Mutex<u32>,
    cond: Condvar,
}

impl Signal {
    fn new(initial: u32) -> Self {
        Signal {
            permits: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    fn release(&self) {
        let mut p = self.permits.lock();
        *p += 1;
        self.cond.notify_one();
    }

    fn acquire(&self) {
        let mut p = self.permits.lock();
        while *p == 0 {
            self.cond.wait(&mut p);
        }
        *p -= 1;
    }
}

/// Per-target ordering coordination. One instance is shared by all of
/// a target's Worker Agents.
pub struct OrderingGovernor {
    regime: OrderingRegime,
    workers: usize,
    /// Loose-only: predecessor signals this before starting its op.
    pre: Vec<Signal>,
    /// Strict: predecessor signals this after completing its op.
    /// Loose: predecessor signals this after completing its op too,
    /// consumed by the successor's step-7 wait.
    post: Vec<Signal>,
}

impl OrderingGovernor {
    pub fn new(regime: OrderingRegime, workers: usize) -> Arc<Self> {
        let workers = workers.max(1);
        let pre: Vec<Signal> = (0..workers).map(|_| Signal::new(0)).collect();
        let post: Vec<Signal> = (0..workers).map(|_| Signal::new(0)).collect();
        // Seed the predecessor-of-worker-0 slot so the very first
        // op in the ring never blocks waiting for a predecessor that
        // doesn't exist yet.
        pre[workers - 1].release();
        post[workers - 1].release();
        Arc::new(OrderingGovernor {
            regime,
            workers,
            pre,
            post,
        })
    }

    fn predecessor(&self, worker: usize) -> usize {
        (worker + self.workers - 1) % self.workers
    }

    /// Step 2: wait on the predecessor's release before starting this op.
    pub fn wait_before_start(&self, worker: usize) {
        match self.regime {
            OrderingRegime::Unordered => {}
            OrderingRegime::Loose => self.pre[self.predecessor(worker)].acquire(),
            OrderingRegime::Strict => self.post[self.predecessor(worker)].acquire(),
        }
    }

    /// Step 3: loose only — release the successor's pre-signal before
    /// issuing this worker's own op, allowing overlap of at most one op.
    pub fn release_pre_if_loose(&self, worker: usize) {
        if self.regime == OrderingRegime::Loose {
            self.pre[worker].release();
        }
    }

    /// Steps 6/post-op: always signal completion for the successor.
    /// Strict's successor consumes this at `wait_before_start`; loose's
    /// successor consumes it at `wait_after_completion`.
    pub fn signal_completion(&self, worker: usize) {
        if self.regime != OrderingRegime::Unordered {
            self.post[worker].release();
        }
    }

    /// Step 7: loose only — after finishing its own op, a worker waits
    /// for its predecessor's post-op release too, confirming the
    /// predecessor's storage op actually completed (not just started).
    pub fn wait_after_completion_if_loose(&self, worker: usize) {
        if self.regime == OrderingRegime::Loose {
            self.post[self.predecessor(worker)].acquire();
            // Re-arm: this worker's own completion must still be
            // observable by its successor, so hand the permit back.
            self.post[self.predecessor(worker)].release();
        }
    }
}

/// Cross-target master/slave coupling driven by a periodic trigger.
/// The master increments the slave's task
/// counter on configured intervals and wakes it if parked; the slave
/// consumes counter units as it works and parks again at zero.
pub struct Lockstep {
    remaining: Mutex<u64>,
    cond: Condvar,
    master_finished: std::sync::atomic::AtomicBool,
}

impl Lockstep {
    pub fn new() -> Arc<Self> {
        Arc::new(Lockstep {
            remaining: Mutex::new(0),
            cond: Condvar::new(),
            master_finished: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Master: grant the slave `units` more ops worth of work and wake
    /// it if parked.
    pub fn grant(&self, units: u64) {
        let mut r = self.remaining.lock();
        *r += units;
        self.cond.notify_all();
    }

    /// Master: signal that it has finished; the slave observes this
    /// via `is_master_finished` and decides whether to drain or abort.
    pub fn finish(&self) {
        self.master_finished
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self.cond.notify_all();
    }

    pub fn is_master_finished(&self) -> bool {
        self.master_finished.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Slave: consume one unit, parking until one is available or the
    /// master has finished (in which case it returns `false` so the
    /// caller can decide to drain remaining work or abort).
    pub fn consume_one(&self) -> bool {
        let mut r = self.remaining.lock();
        while *r == 0 {
            if self.is_master_finished() {
                return false;
            }
            self.cond.wait(&mut r);
        }
        *r -= 1;
        true
    }
}
