//! Worker Agent: executes one storage op per task request from its
//! Target Thread.
//!
//! Grounded on `knhk-swarm/src/agents/worker.rs`'s `WorkerAgent` shape
//! (`#[instrument]`, explicit state, counters) adapted from
//! `tokio::sync::RwLock` to a plain OS thread with a blocking
//! rendezvous channel for task handoff, matching a "parallel OS
//! threads, blocking system calls allowed" concurrency model. Worker
//! Agents are addressed purely by `(target_id, index)` into an
//! indexed pool, never by pointer.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering as A};
use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::backend::{IoOutcome, StorageBackend};
use crate::config::{DataPattern, TargetConfig};
use crate::e2e::transport::E2eChannel;
use crate::error::{Result, XddError};
use crate::ordering::OrderingGovernor;
use crate::pattern::{self, FillContext};
use crate::restart::{ManifestFlags, ManifestState, RestartManifest};
use crate::ticker::{Tick, Ticker};
use crate::tsring::{OpKind as TsOpKind, TimestampRing};

bitflags! {
    /// Worker Agent lifecycle state. Bit-flags compose:
    /// e.g. `AVAILABLE | BARRIER` while parked waiting for a handoff
    /// inside a barrier wait.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WorkerState: u32 {
        const INIT          = 0b0000_0001;
        const AVAILABLE     = 0b0000_0010;
        const WAITING_PREV  = 0b0000_0100;
        const IO            = 0b0000_1000;
        const E2E_RECV      = 0b0001_0000;
        const E2E_SEND      = 0b0010_0000;
        const BARRIER       = 0b0100_0000;
        const PASS_COMPLETE = 0b1000_0000;
    }
}

/// One unit of work handed from the Target Thread to a Worker Agent.
#[derive(Debug, Clone)]
pub enum Task {
    Io {
        pass: u32,
        op_index: u64,
        byte_offset: u64,
        length: u64,
        kind: crate::seeklist::OpKind,
    },
    EndOfPass,
    Eof,
    Stop,
}

/// Per-worker accumulated counters.
#[derive(Default)]
pub struct WorkerCounters {
    pub bytes_xfered: AtomicU64,
    pub ops_completed: AtomicU64,
    pub accumulated_op_ticks: AtomicU64,
    pub accumulated_read_ticks: AtomicU64,
    pub accumulated_write_ticks: AtomicU64,
    pub accumulated_noop_ticks: AtomicU64,
    pub error_count: AtomicU64,
    pub longest_op_ticks: AtomicU64,
    pub shortest_op_ticks: AtomicU64,
}

impl WorkerCounters {
    pub fn snapshot(&self) -> WorkerCountersSnapshot {
        WorkerCountersSnapshot {
            bytes_xfered: self.bytes_xfered.load(A::Relaxed),
            ops_completed: self.ops_completed.load(A::Relaxed),
            accumulated_op_ticks: self.accumulated_op_ticks.load(A::Relaxed),
            error_count: self.error_count.load(A::Relaxed),
            longest_op_ticks: self.longest_op_ticks.load(A::Relaxed),
            shortest_op_ticks: self.shortest_op_ticks.load(A::Relaxed),
        }
    }

    fn record_op(&self, kind: TsOpKind, ticks: u64) {
        self.ops_completed.fetch_add(1, A::Relaxed);
        self.accumulated_op_ticks.fetch_add(ticks, A::Relaxed);
        match kind {
            TsOpKind::Read => self.accumulated_read_ticks.fetch_add(ticks, A::Relaxed),
            TsOpKind::Write => self.accumulated_write_ticks.fetch_add(ticks, A::Relaxed),
            _ => self.accumulated_noop_ticks.fetch_add(ticks, A::Relaxed),
        };
        self.longest_op_ticks.fetch_max(ticks, A::Relaxed);
        let shortest = self.shortest_op_ticks.load(A::Relaxed);
        if shortest == 0 || ticks < shortest {
            self.shortest_op_ticks.store(ticks, A::Relaxed);
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerCountersSnapshot {
    pub bytes_xfered: u64,
    pub ops_completed: u64,
    pub accumulated_op_ticks: u64,
    pub error_count: u64,
    pub longest_op_ticks: u64,
    pub shortest_op_ticks: u64,
}

/// Shared handle the Target Thread keeps for a Worker Agent it owns.
pub struct WorkerHandle {
    pub index: usize,
    pub task_tx: Sender<Task>,
    pub counters: Arc<WorkerCounters>,
    pub tsring: Arc<Mutex<TimestampRing>>,
    pub state: Arc<AtomicU32>,
    pub join: std::thread::JoinHandle<()>,
}

impl WorkerHandle {
    pub fn state(&self) -> WorkerState {
        WorkerState::from_bits_truncate(self.state.load(A::Acquire))
    }
}

/// Configuration a Worker Agent needs beyond the shared `TargetConfig`.
pub struct WorkerContext {
    pub target_name: String,
    pub index: usize,
    pub config: TargetConfig,
    pub ticker: Arc<Ticker>,
    pub ordering: Arc<OrderingGovernor>,
    pub latency_threshold_ticks: Option<u64>,
}

/// Spawn a Worker Agent thread. `backend` is moved in exclusively;
/// `e2e` is shared (via a mutex) across every worker in the target's
/// pool, since an E2E channel is bound or connected once per target,
/// not once per worker. `pass_complete` is entered once per pass after
/// an `EndOfPass` task.
#[allow(clippy::too_many_arguments)]
pub fn spawn(
    ctx: WorkerContext,
    mut backend: Box<dyn StorageBackend>,
    e2e: Option<Arc<Mutex<Box<dyn E2eChannel>>>>,
    restart_manifest: Option<Arc<RestartManifest>>,
    pass_complete: Arc<crate::barrier::Barrier>,
    cancel: Arc<std::sync::atomic::AtomicBool>,
    target_errors: Arc<AtomicU64>,
    error_break: Arc<std::sync::atomic::AtomicBool>,
) -> WorkerHandle {
    let (task_tx, task_rx): (Sender<Task>, Receiver<Task>) = crossbeam::channel::bounded(0);
    let state = Arc::new(AtomicU32::new(WorkerState::INIT.bits()));
    let counters = Arc::new(WorkerCounters::default());
    let align = crate::platform::alignment(ctx.config.block_size as usize);
    let buf_len = (ctx.config.io_size() as usize).max(align);
    let buffer = crate::platform::aligned_buffer(buf_len, align);
    let tsring = Arc::new(Mutex::new(TimestampRing::new(ctx.config.timestamp_mode)));

    let index = ctx.index;
    let state2 = state.clone();
    let counters2 = counters.clone();
    let tsring2 = tsring.clone();

    let join = std::thread::Builder::new()
        .name(format!("xdd-worker-{}-{}", ctx.target_name, index))
        .spawn(move || {
            state2.store(WorkerState::AVAILABLE.bits(), A::Release);
            let mut agent = WorkerAgent {
                ctx,
                backend: backend.as_mut(),
                e2e,
                restart_manifest,
                buffer,
                counters: counters2,
                tsring: tsring2,
                state: state2,
                pass_complete,
                cancel,
                target_errors,
                error_break,
            };
            agent.run(task_rx);
        })
        .expect("failed to spawn worker thread");

    WorkerHandle {
        index,
        task_tx,
        counters,
        tsring,
        state,
        join,
    }
}

struct WorkerAgent<'a> {
    ctx: WorkerContext,
    backend: &'a mut dyn StorageBackend,
    e2e: Option<Arc<Mutex<Box<dyn E2eChannel>>>>,
    restart_manifest: Option<Arc<RestartManifest>>,
    buffer: crate::platform::AlignedBuffer,
    counters: Arc<WorkerCounters>,
    tsring: Arc<Mutex<TimestampRing>>,
    state: Arc<AtomicU32>,
    pass_complete: Arc<crate::barrier::Barrier>,
    cancel: Arc<std::sync::atomic::AtomicBool>,
    target_errors: Arc<AtomicU64>,
    error_break: Arc<std::sync::atomic::AtomicBool>,
}

impl<'a> WorkerAgent<'a> {
    fn set_state(&self, s: WorkerState) {
        self.state.store(s.bits(), A::Release);
    }

    fn run(&mut self, task_rx: Receiver<Task>) {
        loop {
            let task = match task_rx.recv() {
                Ok(t) => t,
                Err(_) => return,
            };
            match task {
                Task::Stop => {
                    self.set_state(WorkerState::PASS_COMPLETE);
                    return;
                }
                Task::EndOfPass => {
                    if let Some(e2e) = &self.e2e {
                        let mut chan = e2e.lock();
                        if chan.is_source() {
                            let seq = self.counters.ops_completed.load(A::Relaxed);
                            if let Err(e) = chan.send_eof(seq) {
                                warn!(error = %e, "e2e send eof failed");
                            }
                        }
                    }
                    self.set_state(WorkerState::PASS_COMPLETE);
                    self.pass_complete.enter(crate::barrier::Occupant {
                        name: format!("{}-worker-{}", self.ctx.target_name, self.ctx.index),
                        kind: crate::barrier::OccupantKind::PassComplete,
                        worker_index: Some(self.ctx.index),
                        entry_tick: self.ctx.ticker.now(),
                    });
                    self.set_state(WorkerState::AVAILABLE);
                }
                Task::Eof => {
                    self.set_state(WorkerState::PASS_COMPLETE);
                }
                Task::Io {
                    pass,
                    op_index,
                    byte_offset,
                    length,
                    kind,
                    ..
                } => {
                    if self.cancel.load(A::Acquire) {
                        // Cancellation observed: still ack completion
                        // (so the Target Thread never blocks forever
                        // on a handoff) but skip further I/O.
                        continue;
                    }
                    self.execute(pass, op_index, byte_offset, length, kind);
                }
            }
        }
    }

    #[instrument(skip(self), fields(target = %self.ctx.target_name, worker = self.ctx.index, op = op_index))]
    fn execute(
        &mut self,
        pass: u32,
        op_index: u64,
        byte_offset: u64,
        length: u64,
        kind: crate::seeklist::OpKind,
    ) {
        let ts_kind: TsOpKind = kind.into();

        self.set_state(WorkerState::IO);
        let start_tick = self.before_op(pass, op_index, byte_offset, ts_kind);

        self.ctx.ordering.wait_before_start(self.ctx.index);
        self.ctx.ordering.release_pre_if_loose(self.ctx.index);

        let len = length as usize;
        let result = match kind {
            crate::seeklist::OpKind::Noop | crate::seeklist::OpKind::Eof => Ok(IoOutcome::Transferred(0)),
            crate::seeklist::OpKind::Write => {
                pattern::fill(
                    &mut self.buffer[..len],
                    &self.ctx.config.data_pattern,
                    FillContext {
                        absolute_offset: byte_offset,
                        target_seed: self.ctx.config.seek_seed,
                    },
                );
                self.backend.write_at(byte_offset, &self.buffer[..len])
            }
            crate::seeklist::OpKind::Read => self.backend.read_at(byte_offset, &mut self.buffer[..len]),
        };

        let end_tick = self.ctx.ticker.now();
        let xfer = self.after_op(
            pass,
            op_index,
            byte_offset,
            len,
            ts_kind,
            start_tick,
            end_tick,
            result,
        );

        self.ctx.ordering.signal_completion(self.ctx.index);
        self.ctx.ordering.wait_after_completion_if_loose(self.ctx.index);

        let _ = xfer;
        self.set_state(WorkerState::AVAILABLE);
    }

    fn before_op(&mut self, pass: u32, op_index: u64, byte_offset: u64, kind: TsOpKind) -> Tick {
        let tick = self.ctx.ticker.now();
        self.tsring
            .lock()
            .record_start(self.ctx.index, pass, op_index, byte_offset, kind, tick);
        if let Some(e2e) = &self.e2e {
            let mut chan = e2e.lock();
            if chan.is_destination() {
                self.set_state(WorkerState::E2E_RECV);
                if let Err(e) = chan.recv_into(&mut self.buffer) {
                    warn!(error = %e, "e2e receive failed");
                }
            }
        }
        tick
    }

    #[allow(clippy::too_many_arguments)]
    fn after_op(
        &mut self,
        _pass: u32,
        op_index: u64,
        byte_offset: u64,
        requested: usize,
        kind: TsOpKind,
        start_tick: Tick,
        end_tick: Tick,
        result: Result<IoOutcome>,
    ) -> usize {
        let xfer_size = match result {
            Ok(IoOutcome::Transferred(n)) => {
                if n < requested && !(n == 0 && requested == 0) {
                    self.record_error(op_index, byte_offset, requested, n);
                }
                n
            }
            Ok(IoOutcome::Eof) => 0,
            Err(e) => {
                warn!(error = %e, "I/O op failed");
                self.counters.error_count.fetch_add(1, A::Relaxed);
                self.target_errors.fetch_add(1, A::Relaxed);
                self.maybe_trip_error_break();
                0
            }
        };

        self.counters.bytes_xfered.fetch_add(xfer_size as u64, A::Relaxed);
        let ticks = end_tick.since(start_tick) as u64;
        self.counters.record_op(kind, ticks);

        if let Some(threshold) = self.ctx.latency_threshold_ticks {
            if ticks > threshold {
                debug!(ticks, threshold, "operation exceeded latency threshold");
            }
        }

        self.tsring.lock().record_end(xfer_size, end_tick);

        if let Some(e2e) = &self.e2e {
            let mut chan = e2e.lock();
            if chan.is_source() && kind != TsOpKind::Eof {
                self.set_state(WorkerState::E2E_SEND);
                let n = xfer_size.max(requested).min(self.buffer.len());
                if let Err(e) = chan.send_data(op_index, byte_offset, &self.buffer[..n]) {
                    warn!(error = %e, "e2e send failed");
                }
            }
            if chan.is_destination() && kind == TsOpKind::Write && xfer_size > 0 {
                if let Some(manifest) = &self.restart_manifest {
                    if let Err(e) = manifest.update(&ManifestState {
                        last_committed_op: op_index,
                        last_committed_byte_location: byte_offset,
                        last_committed_length: xfer_size as u64,
                        source_host: String::new(),
                        destination_host: self.ctx.target_name.clone(),
                        source_path: PathBuf::new(),
                        destination_path: self.ctx.config.path.clone(),
                        flags: ManifestFlags::RESUME_COPY.bits(),
                    }) {
                        warn!(error = %e, "restart manifest commit failed");
                    }
                }
            }
        }
        xfer_size
    }

    fn record_error(&self, op: u64, offset: u64, requested: usize, returned: usize) {
        let err = XddError::ShortIo {
            target: self.ctx.target_name.clone(),
            worker: self.ctx.index,
            op,
            requested,
            returned,
        };
        warn!(error = %err, "short I/O");
        self.counters.error_count.fetch_add(1, A::Relaxed);
        self.target_errors.fetch_add(1, A::Relaxed);
        self.maybe_trip_error_break();
    }

    /// Tripping a target's error budget cancels the whole run, not just
    /// this target: the per-pass barriers this target no longer shows
    /// up for are shared with every other Target Thread, so a
    /// target-local stop would leave siblings parked waiting for a
    /// participant that will never arrive.
    fn maybe_trip_error_break(&self) {
        let max = self.ctx.config.max_errors;
        if max > 0 && self.target_errors.load(A::Relaxed) >= max {
            self.error_break.store(true, A::Release);
            self.cancel.store(true, A::Release);
        }
    }
}
