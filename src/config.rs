//! The shared data model: `TargetConfig` and `RunConfig`.
//!
//! This module is the named interface the rest of the engine depends
//! on. `main.rs` builds a `RunConfig` from `clap` flags and hands it
//! to the `RunController`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, XddError};

/// Read-only, write-only, or mixed with a read fraction ρ∈[0,1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    Mixed { read_fraction: f64 },
}

impl AccessMode {
    pub fn read_fraction(&self) -> f64 {
        match self {
            AccessMode::ReadOnly => 1.0,
            AccessMode::WriteOnly => 0.0,
            AccessMode::Mixed { read_fraction } => *read_fraction,
        }
    }
}

/// Ordering regime constraining adjacent-op temporal relationships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OrderingRegime {
    #[default]
    Unordered,
    Loose,
    Strict,
}

/// Seek-list generation pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SeekPattern {
    #[default]
    Sequential,
    Random,
    Staggered,
    Interleaved,
    None,
}

/// Throttle mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum ThrottleSpec {
    #[default]
    None,
    OpsPerSec(f64),
    MegabytesPerSec(f64),
    Delay(std::time::Duration),
}

/// Timestamp ring recording policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TimestampMode {
    #[default]
    Disabled,
    Oneshot { capacity: usize },
    Wrap { capacity: usize },
}

/// E2E half-transfer role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum E2eRole {
    Source { peers: Vec<String> },
    Destination { listen: String },
}

/// E2E wire transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum E2eProtocol {
    #[default]
    Tcp,
    Udp,
}

/// Data pattern used to fill/verify I/O buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataPattern {
    Fixed(u8),
    Ascii { text: String, replicate: bool },
    Hex { text: String, replicate: bool },
    Random { seed: u64, per_target: bool },
    Sequenced { prefix: u32, inverse: bool },
    File { path: PathBuf },
    Lfpat,
    Ltpat,
    Cjtpat,
    Crpat,
    Cspat,
}

/// One addressable storage endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub path: PathBuf,
    pub access_mode: AccessMode,
    /// Block size B, bytes.
    pub block_size: u64,
    /// Request size R, blocks.
    pub request_size: u64,
    /// Queue depth Q.
    pub queue_depth: usize,
    /// Either a byte budget or an op count for the pass.
    pub pass_budget: PassBudget,
    pub start_offset: u64,
    pub inter_pass_offset_delta: u64,
    pub direct_io: bool,
    pub preallocate_bytes: Option<u64>,
    pub ordering: OrderingRegime,
    pub throttle: ThrottleSpec,
    pub timestamp_mode: TimestampMode,
    pub seek_pattern: SeekPattern,
    pub seek_seed: u64,
    pub seek_stride: u64,
    pub seek_interleave: u64,
    pub data_pattern: DataPattern,
    pub e2e_role: Option<E2eRole>,
    pub e2e_protocol: E2eProtocol,
    pub restart_manifest_path: Option<PathBuf>,
    pub randomize_between_passes: bool,
    pub max_errors: u64,
    /// Block at pass entry until a trigger declared against this
    /// target's name with `TriggerKind::Start` fires.
    pub wait_for_start: bool,
    /// Poll for a `TriggerKind::Stop` trigger fired against this
    /// target's name and end the pass early once it has.
    pub wait_for_stop: bool,
    /// Where to write this target's timestamp dump at the end of a
    /// clean run, when `timestamp_mode` isn't `Disabled`.
    pub tsdump_path: Option<PathBuf>,
}

/// Total work for one pass, expressed either way; resolved to an op
/// count once `block_size`/`request_size` are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassBudget {
    Bytes(u64),
    Ops(u64),
}

impl TargetConfig {
    /// `io_size` R·B, the nominal transfer size of one operation.
    pub fn io_size(&self) -> u64 {
        self.block_size * self.request_size
    }

    /// Total operation count for one pass, resolving a byte budget.
    pub fn total_ops(&self) -> u64 {
        match self.pass_budget {
            PassBudget::Ops(n) => n,
            PassBudget::Bytes(b) => {
                let io = self.io_size().max(1);
                (b + io - 1) / io
            }
        }
    }

    /// Total pass byte budget, resolving an op count.
    pub fn total_bytes(&self) -> u64 {
        match self.pass_budget {
            PassBudget::Bytes(b) => b,
            PassBudget::Ops(n) => n * self.io_size(),
        }
    }

    /// Validate invariants. `queue_depth > total_ops` is clamped down
    /// with a warning, never silently matched to the legacy behavior
    /// and never a hard error.
    pub fn validate(&mut self) -> Result<()> {
        if self.block_size == 0 {
            return Err(XddError::Configuration(format!(
                "target {}: block_size must be > 0",
                self.name
            )));
        }
        if self.request_size == 0 {
            return Err(XddError::Configuration(format!(
                "target {}: request_size must be > 0",
                self.name
            )));
        }
        if self.queue_depth == 0 {
            return Err(XddError::Configuration(format!(
                "target {}: queue_depth must be >= 1",
                self.name
            )));
        }
        let rf = self.access_mode.read_fraction();
        if !(0.0..=1.0).contains(&rf) {
            return Err(XddError::Configuration(format!(
                "target {}: read fraction {} out of [0,1]",
                self.name, rf
            )));
        }
        if matches!(self.ordering, OrderingRegime::Strict) && self.queue_depth == 1 {
            tracing::warn!(
                target = %self.name,
                "strict ordering with queue_depth=1 collapses to unordered"
            );
            self.ordering = OrderingRegime::Unordered;
        }
        let total_ops = self.total_ops();
        if total_ops > 0 && (self.queue_depth as u64) > total_ops {
            tracing::warn!(
                target = %self.name,
                queue_depth = self.queue_depth,
                total_ops,
                "queue_depth exceeds total_ops, clamping down"
            );
            self.queue_depth = total_ops as usize;
        }
        Ok(())
    }
}

/// A full run: one or more targets, global pass count and deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub targets: Vec<TargetConfig>,
    pub pass_count: u32,
    pub inter_pass_delay: std::time::Duration,
    pub run_time_limit: Option<std::time::Duration>,
    pub lockstep_pairs: Vec<(String, String)>,
}

impl RunConfig {
    pub fn validate(&mut self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(XddError::Configuration("no targets configured".into()));
        }
        for t in &mut self.targets {
            t.validate()?;
        }
        Ok(())
    }

    pub fn target(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.iter().find(|t| t.name == name)
    }
}
