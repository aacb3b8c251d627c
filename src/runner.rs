//! Run Controller: orchestrates passes, the run-time deadline, and
//! global abort.
//!
//! Grounded on `knhk-swarm`'s top-level orchestrator shape, adapted to
//! spawn one OS thread per Target Thread rather than tokio tasks. Also
//! owns SIGINT/SIGTERM handling via `ctrlc`-free raw signal
//! registration kept minimal since this crate
//! only needs a single `canceled` flag flip.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as A};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::barrier::BarrierRegistry;
use crate::config::RunConfig;
use crate::error::Result;
use crate::ordering::Lockstep;
use crate::target::{TargetResult, TargetRunner};
use crate::ticker::Ticker;
use crate::trigger::{TriggerFabric, TriggerSpec};

/// Aggregate outcome of one run, across all targets.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub targets: Vec<TargetResult>,
    pub canceled: bool,
}

/// Drives a whole `RunConfig` to completion (or cancellation).
pub struct RunController {
    config: RunConfig,
    trigger_specs: Vec<TriggerSpec>,
    cancel: Arc<AtomicBool>,
}

impl RunController {
    pub fn new(config: RunConfig, trigger_specs: Vec<TriggerSpec>) -> Self {
        RunController {
            config,
            trigger_specs,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle to flip for external cancellation (SIGINT/SIGTERM
    /// handlers in `main.rs` call this; tests can call it directly).
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run every target to completion. Spawns one thread per target;
    /// a deadline timer thread flips `canceled` at `start+runtime` if
    /// a run-time limit was configured.
    pub fn run(&self) -> Result<RunResult> {
        let ticker = Arc::new(Ticker::new());
        let barriers = Arc::new(BarrierRegistry::new(self.cancel.clone()));
        let fabric = Arc::new(TriggerFabric::new(self.trigger_specs.clone(), barriers.clone()));
        let total_targets = self.config.targets.len();

        let deadline = self.config.run_time_limit.map(|limit| Instant::now() + limit);
        let deadline_thread = deadline.map(|dl| {
            let cancel = self.cancel.clone();
            std::thread::spawn(move || {
                loop {
                    if cancel.load(A::Acquire) {
                        return;
                    }
                    let now = Instant::now();
                    if now >= dl {
                        info!("run-time deadline reached");
                        cancel.store(true, A::Release);
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(100).min(dl - now));
                }
            })
        });

        info!(targets = total_targets, "starting run");

        // One `Lockstep` per declared pair, keyed into both the master's
        // and the slave's name so each `TargetRunner` can look up its
        // role without knowing about the other pairs.
        let mut master_of: HashMap<String, Arc<Lockstep>> = HashMap::new();
        let mut slave_of: HashMap<String, Arc<Lockstep>> = HashMap::new();
        for (master, slave) in &self.config.lockstep_pairs {
            let ls = Lockstep::new();
            master_of.insert(master.clone(), ls.clone());
            slave_of.insert(slave.clone(), ls);
        }

        let mut handles = Vec::with_capacity(total_targets);
        for target in &self.config.targets {
            let runner = TargetRunner::new(
                target.clone(),
                ticker.clone(),
                barriers.clone(),
                fabric.clone(),
                total_targets,
                self.cancel.clone(),
            )
            .with_lockstep(master_of.get(&target.name).cloned(), slave_of.get(&target.name).cloned());
            let pass_count = self.config.pass_count;
            let inter_pass_delay = self.config.inter_pass_delay;
            handles.push(std::thread::spawn(move || runner.run(pass_count, inter_pass_delay, deadline)));
        }

        let mut results = Vec::with_capacity(total_targets);
        let mut had_error = false;
        for handle in handles {
            match handle.join() {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(e)) => {
                    error!(error = %e, "target thread returned an error");
                    had_error = true;
                }
                Err(_) => {
                    error!("target thread panicked");
                    had_error = true;
                }
            }
        }

        // No thread may be left parked in a barrier once the run is
        // declared complete.
        barriers.destroy_all();

        if let Some(handle) = deadline_thread {
            self.cancel.store(true, A::Release);
            let _ = handle.join();
        }

        if had_error && !self.cancel.load(A::Acquire) {
            warn!("run completed with one or more target errors");
        }

        Ok(RunResult {
            targets: results,
            canceled: self.cancel.load(A::Acquire),
        })
    }

    /// Install process-wide SIGINT/SIGTERM handlers that flip the
    /// shared cancellation flag. Only the first call takes effect;
    /// later calls are a no-op since
    /// `libc::signal` is itself process-global.
    #[cfg(unix)]
    pub fn install_signal_handlers(cancel: Arc<AtomicBool>) {
        let _ = SIGNAL_CANCEL.set(cancel);
        unsafe {
            libc::signal(libc::SIGINT, handle_signal as libc::sighandler_t);
            libc::signal(libc::SIGTERM, handle_signal as libc::sighandler_t);
        }
    }
}

static SIGNAL_CANCEL: OnceLock<Arc<AtomicBool>> = OnceLock::new();

#[cfg(unix)]
extern "C" fn handle_signal(_sig: libc::c_int) {
    if let Some(flag) = SIGNAL_CANCEL.get() {
        flag.store(true, A::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AccessMode, DataPattern, E2eProtocol, OrderingRegime, PassBudget, SeekPattern, TargetConfig, ThrottleSpec,
        TimestampMode,
    };

    fn target(path: std::path::PathBuf) -> TargetConfig {
        TargetConfig {
            name: "t0".into(),
            path,
            access_mode: AccessMode::WriteOnly,
            block_size: 512,
            request_size: 4,
            queue_depth: 2,
            pass_budget: PassBudget::Ops(6),
            start_offset: 0,
            inter_pass_offset_delta: 0,
            direct_io: false,
            preallocate_bytes: None,
            ordering: OrderingRegime::Unordered,
            throttle: ThrottleSpec::None,
            timestamp_mode: TimestampMode::Disabled,
            seek_pattern: SeekPattern::Sequential,
            seek_seed: 1,
            seek_stride: 1,
            seek_interleave: 1,
            data_pattern: DataPattern::Fixed(0x11),
            e2e_role: None,
            e2e_protocol: E2eProtocol::Tcp,
            restart_manifest_path: None,
            randomize_between_passes: false,
            max_errors: 0,
            wait_for_start: false,
            wait_for_stop: false,
            tsdump_path: None,
        }
    }

    #[test]
    fn single_target_run_completes() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut config = RunConfig {
            targets: vec![target(tmp.path().to_path_buf())],
            pass_count: 2,
            inter_pass_delay: Duration::ZERO,
            run_time_limit: None,
            lockstep_pairs: Vec::new(),
        };
        config.validate().unwrap();

        let controller = RunController::new(config, Vec::new());
        let result = controller.run().unwrap();
        assert_eq!(result.targets.len(), 1);
        assert_eq!(result.targets[0].passes.len(), 2);
        assert!(!result.canceled);
    }

    #[test]
    fn pre_canceled_run_stops_early() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut config = RunConfig {
            targets: vec![target(tmp.path().to_path_buf())],
            pass_count: 5,
            inter_pass_delay: Duration::ZERO,
            run_time_limit: None,
            lockstep_pairs: Vec::new(),
        };
        config.validate().unwrap();

        let controller = RunController::new(config, Vec::new());
        controller.cancel_handle().store(true, A::Release);
        let result = controller.run().unwrap();
        assert!(result.canceled);
        assert!(result.targets[0].passes.len() <= 1);
    }
}
