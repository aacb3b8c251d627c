//! Target Thread: owns one target's Worker Agent pool and drives it
//! through however many passes the run calls for.
//!
//! Grounded on `examples/original_source/src/target_pass.c` for the
//! per-pass step ordering (build seek list, apply offset delta,
//! barrier, dispatch, drain, collect). Dispatch is round-robin over a
//! fixed worker pool regardless of ordering regime: `OrderingGovernor`
//! itself already no-ops for `Unordered`, so a single dispatch path
//! gives unordered, loose and strict regimes full Q-way concurrency
//! without a separate idle-worker-discovery path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as A};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::backend::{FileBackend, StorageBackend};
use crate::barrier::{BarrierRegistry, EnterOutcome, Occupant, OccupantKind};
use crate::config::{AccessMode, E2eProtocol, E2eRole, TargetConfig};
use crate::e2e::transport::{E2eChannel, TcpDestination, TcpSource, UdpDestination, UdpSource};
use crate::error::{Result, XddError};
use crate::ordering::{Lockstep, OrderingGovernor};
use crate::restart::RestartManifest;
use crate::seeklist;
use crate::throttle::ThrottleGovernor;
use crate::ticker::Ticker;
use crate::trigger::{Progress, TriggerFabric, TriggerKind};
use crate::tsdump::{self, DumpHeader};
use crate::worker::{self, Task, WorkerContext, WorkerHandle};

/// Per-pass aggregate counters handed back to the Run Controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassResult {
    pub pass: u32,
    pub bytes_transferred: u64,
    pub ops_completed: u64,
    pub errors: u64,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TargetResult {
    pub name: String,
    pub passes: Vec<PassResult>,
}

fn build_e2e_channel(config: &TargetConfig) -> Result<Option<Box<dyn E2eChannel>>> {
    match &config.e2e_role {
        None => Ok(None),
        Some(E2eRole::Source { peers }) => {
            let chan: Box<dyn E2eChannel> = match config.e2e_protocol {
                E2eProtocol::Tcp => Box::new(TcpSource::connect(peers)?),
                E2eProtocol::Udp => {
                    let addr = peers.first().ok_or_else(|| {
                        XddError::Configuration(format!("target {}: udp source needs one peer", config.name))
                    })?;
                    Box::new(UdpSource::connect(addr)?)
                }
            };
            Ok(Some(chan))
        }
        Some(E2eRole::Destination { listen }) => {
            let chan: Box<dyn E2eChannel> = match config.e2e_protocol {
                E2eProtocol::Tcp => Box::new(TcpDestination::bind(listen)?),
                E2eProtocol::Udp => Box::new(UdpDestination::bind(listen, config.io_size() as usize)?),
            };
            Ok(Some(chan))
        }
    }
}

/// Stable numeric id for a target name, for `tsdump::DumpHeader`
/// (which has no string field of its own). FNV-1a, 32-bit.
fn target_id(name: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in name.bytes() {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Drives one target's full lifetime: worker pool creation, per-pass
/// dispatch loop, and teardown.
pub struct TargetRunner {
    config: TargetConfig,
    ticker: Arc<Ticker>,
    barriers: Arc<BarrierRegistry>,
    trigger_fabric: Arc<TriggerFabric>,
    total_targets: usize,
    cancel: Arc<AtomicBool>,
    master_lockstep: Option<Arc<Lockstep>>,
    slave_lockstep: Option<Arc<Lockstep>>,
}

impl TargetRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: TargetConfig,
        ticker: Arc<Ticker>,
        barriers: Arc<BarrierRegistry>,
        trigger_fabric: Arc<TriggerFabric>,
        total_targets: usize,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        TargetRunner {
            config,
            ticker,
            barriers,
            trigger_fabric,
            total_targets,
            cancel,
            master_lockstep: None,
            slave_lockstep: None,
        }
    }

    /// Couple this target to a `Lockstep` pair: `master` grants the
    /// paired slave permission to proceed as this target dispatches its
    /// own ops; `slave` is consumed by this target's own dispatch loop,
    /// one unit per op, parking when starved.
    pub fn with_lockstep(mut self, master: Option<Arc<Lockstep>>, slave: Option<Arc<Lockstep>>) -> Self {
        self.master_lockstep = master;
        self.slave_lockstep = slave;
        self
    }

    #[instrument(skip(self), fields(target = %self.config.name))]
    pub fn run(&self, pass_count: u32, inter_pass_delay: Duration, deadline: Option<Instant>) -> Result<TargetResult> {
        let write = !matches!(self.config.access_mode, AccessMode::ReadOnly);
        if let Some(bytes) = self.config.preallocate_bytes {
            if write {
                let mut setup = FileBackend::open(&self.config.path, true, self.config.direct_io)?;
                setup.preallocate(bytes)?;
            }
        }

        let ordering = OrderingGovernor::new(self.config.ordering, self.config.queue_depth);
        let throttle = ThrottleGovernor::new(self.config.throttle, self.config.io_size());
        let target_errors = Arc::new(AtomicU64::new(0));
        let error_break = Arc::new(AtomicBool::new(false));
        let pass_complete = self.barriers.create(
            format!("pass-complete:{}", self.config.name),
            self.config.queue_depth + 1,
        );

        // Built once per target, not once per worker: binding/connecting
        // the same address from every queue-depth worker would race on
        // `bind()` (TCP/UDP destinations) or open redundant connections
        // (TCP/UDP sources).
        let e2e: Option<Arc<Mutex<Box<dyn E2eChannel>>>> =
            build_e2e_channel(&self.config)?.map(|chan| Arc::new(Mutex::new(chan)));

        let restart_manifest: Option<Arc<RestartManifest>> = self
            .config
            .restart_manifest_path
            .as_ref()
            .map(|p| RestartManifest::open(p))
            .transpose()?
            .map(Arc::new);

        let mut handles: Vec<WorkerHandle> = Vec::with_capacity(self.config.queue_depth);
        for w in 0..self.config.queue_depth {
            let backend: Box<dyn StorageBackend> =
                Box::new(FileBackend::open(&self.config.path, write, self.config.direct_io)?);
            let ctx = WorkerContext {
                target_name: self.config.name.clone(),
                index: w,
                config: self.config.clone(),
                ticker: self.ticker.clone(),
                ordering: ordering.clone(),
                latency_threshold_ticks: None,
            };
            handles.push(worker::spawn(
                ctx,
                backend,
                e2e.clone(),
                restart_manifest.clone(),
                pass_complete.clone(),
                self.cancel.clone(),
                target_errors.clone(),
                error_break.clone(),
            ));
        }

        if self.config.wait_for_start {
            let outcome = self.trigger_fabric.start_barrier(&self.config.name).enter(Occupant {
                name: self.config.name.clone(),
                kind: OccupantKind::Trigger,
                worker_index: None,
                entry_tick: self.ticker.now(),
            });
            if outcome == EnterOutcome::Canceled {
                for handle in &handles {
                    let _ = handle.task_tx.send(Task::Stop);
                }
                for handle in handles {
                    let _ = handle.join.join();
                }
                return Ok(TargetResult {
                    name: self.config.name.clone(),
                    passes: Vec::new(),
                });
            }
        }

        let mut result = TargetResult {
            name: self.config.name.clone(),
            passes: Vec::new(),
        };

        for pass in 0..pass_count {
            if self.cancel.load(A::Acquire) || error_break.load(A::Acquire) {
                break;
            }
            if let Some(dl) = deadline {
                if Instant::now() >= dl {
                    info!("deadline reached, stopping before pass {pass}");
                    break;
                }
            }

            let pass_start_barrier = self
                .barriers
                .create(format!("pass-start:{pass}"), self.total_targets);
            let outcome = pass_start_barrier.enter(Occupant {
                name: self.config.name.clone(),
                kind: OccupantKind::PassStart,
                worker_index: None,
                entry_tick: self.ticker.now(),
            });
            if outcome == EnterOutcome::Canceled {
                break;
            }

            let pass_seed_offset = if self.config.randomize_between_passes {
                pass as u64
            } else {
                0
            };
            let mut entries = seeklist::build(&self.config, self.config.queue_depth, pass_seed_offset);
            if pass > 0 && self.config.inter_pass_offset_delta > 0 {
                seeklist::apply_pass_offset_delta(
                    &mut entries,
                    self.config.block_size,
                    self.config.inter_pass_offset_delta * pass as u64,
                );
            }

            let pass_start_tick = self.ticker.now();
            let total_ops = entries.len() as u64;

            for entry in &entries {
                if self.cancel.load(A::Acquire) {
                    break;
                }
                if self.config.wait_for_stop && self.trigger_fabric.has_fired(&self.config.name, TriggerKind::Stop) {
                    info!("stop trigger fired, ending pass early");
                    break;
                }
                if let Some(slave) = &self.slave_lockstep {
                    if !slave.consume_one() {
                        break;
                    }
                }

                let pass_elapsed = crate::throttle::elapsed_secs(&self.ticker, pass_start_tick);
                throttle.wait_for_next(entry.index, pass_elapsed);

                let progress = Progress {
                    elapsed_secs: pass_elapsed,
                    op_number: entry.index,
                    percent_complete: if total_ops > 0 {
                        entry.index as f64 / total_ops as f64 * 100.0
                    } else {
                        100.0
                    },
                    bytes_transferred: entry.index * self.config.io_size(),
                };
                let _ = self.trigger_fabric.check(&self.config.name, progress, &self.ticker);

                let worker_index = (entry.index as usize) % self.config.queue_depth;
                let send_result = handles[worker_index].task_tx.send(Task::Io {
                    pass,
                    op_index: entry.index,
                    byte_offset: entry.byte_offset,
                    length: entry.length,
                    kind: entry.kind,
                });
                if send_result.is_err() {
                    warn!(worker = worker_index, "worker channel closed early");
                    break;
                }

                if let Some(master) = &self.master_lockstep {
                    master.grant(1);
                }
            }

            for handle in &handles {
                let _ = handle.task_tx.send(Task::EndOfPass);
            }
            let outcome = pass_complete.enter(Occupant {
                name: format!("{}-target-thread", self.config.name),
                kind: OccupantKind::PassComplete,
                worker_index: None,
                entry_tick: self.ticker.now(),
            });
            if outcome == EnterOutcome::Canceled {
                break;
            }

            let elapsed_secs = crate::throttle::elapsed_secs(&self.ticker, pass_start_tick);
            let mut bytes_transferred = 0u64;
            let mut ops_completed = 0u64;
            let mut errors = 0u64;
            for handle in &handles {
                let snap = handle.counters.snapshot();
                bytes_transferred += snap.bytes_xfered;
                ops_completed += snap.ops_completed;
                errors += snap.error_count;
            }

            result.passes.push(PassResult {
                pass,
                bytes_transferred,
                ops_completed,
                errors,
                elapsed_secs,
            });

            let results_barrier = self
                .barriers
                .create(format!("results:{pass}"), self.total_targets);
            let outcome = results_barrier.enter(Occupant {
                name: self.config.name.clone(),
                kind: OccupantKind::ResultsCollection,
                worker_index: None,
                entry_tick: self.ticker.now(),
            });
            if outcome == EnterOutcome::Canceled {
                break;
            }

            if pass + 1 < pass_count && !inter_pass_delay.is_zero() {
                std::thread::sleep(inter_pass_delay);
            }
        }

        if let Some(master) = &self.master_lockstep {
            master.finish();
        }

        if let Some(tsdump_path) = &self.config.tsdump_path {
            if !matches!(self.config.timestamp_mode, crate::config::TimestampMode::Disabled) {
                let mut entries = Vec::new();
                for handle in &handles {
                    entries.extend_from_slice(handle.tsring.lock().snapshot());
                }
                let header = DumpHeader {
                    target_id: target_id(&self.config.name),
                    request_size: self.config.request_size as u32,
                    sector_size: self.config.block_size as u32,
                    timer_resolution_ps: self.ticker.period(),
                    entry_count: entries.len() as u64,
                };
                let records = tsdump::records_from_entries(&entries);
                if let Err(e) = tsdump::write_dump(tsdump_path, &header, &records) {
                    warn!(error = %e, "tsdump write failed");
                }
            }
        }

        for handle in &handles {
            let _ = handle.task_tx.send(Task::Stop);
        }
        for handle in handles {
            let _ = handle.join.join();
        }

        if !self.cancel.load(A::Acquire) && !error_break.load(A::Acquire) {
            if let Some(manifest) = &restart_manifest {
                let total_bytes: u64 = result.passes.iter().map(|p| p.bytes_transferred).sum();
                if let Err(e) = manifest.mark_complete(total_bytes) {
                    warn!(error = %e, "restart manifest mark_complete failed");
                }
            }
        }

        Ok(result)
    }

    pub fn path(&self) -> &PathBuf {
        &self.config.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataPattern, OrderingRegime, PassBudget, SeekPattern, ThrottleSpec, TimestampMode};

    fn config(path: PathBuf) -> TargetConfig {
        TargetConfig {
            name: "t0".into(),
            path,
            access_mode: AccessMode::WriteOnly,
            block_size: 512,
            request_size: 8,
            queue_depth: 2,
            pass_budget: PassBudget::Ops(8),
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
            data_pattern: DataPattern::Fixed(0xAB),
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
    fn single_target_single_pass_writes_all_bytes() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let cfg = config(tmp.path().to_path_buf());
        let ticker = Arc::new(Ticker::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let barriers = Arc::new(BarrierRegistry::new(cancel.clone()));
        let fabric = Arc::new(TriggerFabric::new(Vec::new(), barriers.clone()));

        let runner = TargetRunner::new(cfg.clone(), ticker, barriers, fabric, 1, cancel);
        let result = runner.run(1, Duration::ZERO, None).unwrap();

        assert_eq!(result.passes.len(), 1);
        let pass = result.passes[0];
        assert_eq!(pass.ops_completed, 8);
        assert_eq!(pass.bytes_transferred, cfg.total_bytes());
        assert_eq!(pass.errors, 0);
    }

    #[test]
    fn strict_ordering_target_completes_cleanly() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut cfg = config(tmp.path().to_path_buf());
        cfg.ordering = OrderingRegime::Strict;
        cfg.queue_depth = 3;
        let ticker = Arc::new(Ticker::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let barriers = Arc::new(BarrierRegistry::new(cancel.clone()));
        let fabric = Arc::new(TriggerFabric::new(Vec::new(), barriers.clone()));

        let runner = TargetRunner::new(cfg.clone(), ticker, barriers, fabric, 1, cancel);
        let result = runner.run(2, Duration::ZERO, None).unwrap();
        assert_eq!(result.passes.len(), 2);
        assert_eq!(result.passes[1].ops_completed, 8);
    }

    #[test]
    fn lockstep_slave_tracks_master_dispatch_pace() {
        let tmp_master = tempfile::NamedTempFile::new().unwrap();
        let tmp_slave = tempfile::NamedTempFile::new().unwrap();
        let mut master_cfg = config(tmp_master.path().to_path_buf());
        master_cfg.name = "master".into();
        master_cfg.queue_depth = 1;
        let mut slave_cfg = config(tmp_slave.path().to_path_buf());
        slave_cfg.name = "slave".into();
        slave_cfg.queue_depth = 1;

        let ticker = Arc::new(Ticker::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let barriers = Arc::new(BarrierRegistry::new(cancel.clone()));
        let fabric = Arc::new(TriggerFabric::new(Vec::new(), barriers.clone()));
        let lockstep = Lockstep::new();

        let master_runner = TargetRunner::new(
            master_cfg.clone(),
            ticker.clone(),
            barriers.clone(),
            fabric.clone(),
            2,
            cancel.clone(),
        )
        .with_lockstep(Some(lockstep.clone()), None);
        let slave_runner = TargetRunner::new(slave_cfg.clone(), ticker, barriers, fabric, 2, cancel)
            .with_lockstep(None, Some(lockstep));

        let h_master = std::thread::spawn(move || master_runner.run(1, Duration::ZERO, None).unwrap());
        let h_slave = std::thread::spawn(move || slave_runner.run(1, Duration::ZERO, None).unwrap());

        let master_result = h_master.join().unwrap();
        let slave_result = h_slave.join().unwrap();
        assert_eq!(master_result.passes[0].ops_completed, 8);
        assert_eq!(slave_result.passes[0].ops_completed, 8);
    }
}
