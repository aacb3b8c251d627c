//! Trigger Fabric: cross-target start/stop signalling.
//!
//! Grounded on `examples/original_source/src/base/target_pass_e2e_specific.c`.
//! `before_op_hook` returns an explicit `TriggerOutcome` rather than a
//! value callers may ignore.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::barrier::{Barrier, BarrierRegistry, Occupant, OccupantKind};
use crate::ticker::Ticker;

/// The threshold a monitoring target watches for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerThreshold {
    ElapsedTime(Duration),
    OpNumber(u64),
    PercentComplete(f64),
    BytesTransferred(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Start,
    Stop,
}

/// One declared cross-target trigger: "when `monitor_target` crosses
/// `threshold`, fire `kind` on `subject_target`".
#[derive(Debug, Clone)]
pub struct TriggerSpec {
    pub monitor_target: String,
    pub subject_target: String,
    pub threshold: TriggerThreshold,
    pub kind: TriggerKind,
}

/// Progress snapshot a target reports to the fabric on every op boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct Progress {
    pub elapsed_secs: f64,
    pub op_number: u64,
    pub percent_complete: f64,
    pub bytes_transferred: u64,
}

/// Outcome of a before-op hook check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    None,
    Fired(TriggerKind),
}

/// Cross-target trigger coordinator: every declared trigger posts to
/// its subject's start/stop barrier exactly once.
pub struct TriggerFabric {
    specs: Vec<TriggerSpec>,
    barriers: Arc<BarrierRegistry>,
    fired: DashMap<usize, bool>,
}

impl TriggerFabric {
    pub fn new(specs: Vec<TriggerSpec>, barriers: Arc<BarrierRegistry>) -> Self {
        TriggerFabric {
            specs,
            barriers,
            fired: DashMap::new(),
        }
    }

    fn barrier_name(target: &str, kind: TriggerKind) -> String {
        match kind {
            TriggerKind::Start => format!("trigger-start:{target}"),
            TriggerKind::Stop => format!("trigger-stop:{target}"),
        }
    }

    /// The barrier a subject target waits in at pass entry if it
    /// declared `wait_for_start`.
    pub fn start_barrier(&self, subject_target: &str) -> Arc<Barrier> {
        self.barriers
            .create(Self::barrier_name(subject_target, TriggerKind::Start), 2)
    }

    pub fn stop_barrier(&self, subject_target: &str) -> Arc<Barrier> {
        self.barriers
            .create(Self::barrier_name(subject_target, TriggerKind::Stop), 2)
    }

    /// Non-blocking: true once a declared trigger of `kind` targeting
    /// `subject_target` has fired. Used by a subject target to poll for
    /// a stop condition inside its per-op dispatch loop without parking
    /// in a barrier on every iteration.
    pub fn has_fired(&self, subject_target: &str, kind: TriggerKind) -> bool {
        self.specs.iter().enumerate().any(|(idx, spec)| {
            spec.subject_target == subject_target
                && spec.kind == kind
                && self.fired.get(&idx).map(|v| *v).unwrap_or(false)
        })
    }

    /// Called by the monitoring target on every op boundary.
    pub fn check(&self, monitor_target: &str, progress: Progress, ticker: &Ticker) -> TriggerOutcome {
        for (idx, spec) in self.specs.iter().enumerate() {
            if spec.monitor_target != monitor_target {
                continue;
            }
            if self.fired.get(&idx).map(|v| *v).unwrap_or(false) {
                continue;
            }
            let crossed = match spec.threshold {
                TriggerThreshold::ElapsedTime(d) => progress.elapsed_secs >= d.as_secs_f64(),
                TriggerThreshold::OpNumber(n) => progress.op_number >= n,
                TriggerThreshold::PercentComplete(p) => progress.percent_complete >= p,
                TriggerThreshold::BytesTransferred(b) => progress.bytes_transferred >= b,
            };
            if crossed {
                self.fired.insert(idx, true);
                let barrier = self.barriers.create(
                    Self::barrier_name(&spec.subject_target, spec.kind),
                    2,
                );
                let _ = ticker;
                barrier.enter(Occupant {
                    name: monitor_target.to_string(),
                    kind: OccupantKind::Trigger,
                    worker_index: None,
                    entry_tick: ticker.now(),
                });
                return TriggerOutcome::Fired(spec.kind);
            }
        }
        TriggerOutcome::None
    }
}
