//! Results Collector: per-target, per-pass summary rendering, exposed
//! as a named interface so a run has somewhere to report to.
//!
//! Grounded on `examples/original_source/src/base/info_display.c`'s
//! `xdd_display_kmgt` KB/MB/GB/TB breakdown, translated into a typed
//! summary struct plus a `Display` impl instead of direct `fprintf`.

use std::fmt;

use crate::target::TargetResult;

const KILOBYTE: f64 = 1024.0;
const MEGABYTE: f64 = KILOBYTE * 1024.0;
const GIGABYTE: f64 = MEGABYTE * 1024.0;

/// One target's whole-run summary, aggregated across its passes.
#[derive(Debug, Clone, Default)]
pub struct TargetSummary {
    pub name: String,
    pub passes: u32,
    pub total_bytes: u64,
    pub total_ops: u64,
    pub total_errors: u64,
    pub elapsed_secs: f64,
}

impl TargetSummary {
    pub fn from_result(result: &TargetResult) -> Self {
        let mut s = TargetSummary {
            name: result.name.clone(),
            passes: result.passes.len() as u32,
            ..Default::default()
        };
        for pass in &result.passes {
            s.total_bytes += pass.bytes_transferred;
            s.total_ops += pass.ops_completed;
            s.total_errors += pass.errors;
            s.elapsed_secs += pass.elapsed_secs;
        }
        s
    }

    pub fn bandwidth_mb_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            0.0
        } else {
            (self.total_bytes as f64 / MEGABYTE) / self.elapsed_secs
        }
    }

    pub fn iops(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            0.0
        } else {
            self.total_ops as f64 / self.elapsed_secs
        }
    }
}

impl fmt::Display for TargetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Target: {}", self.name)?;
        writeln!(f, "  Passes completed  : {}", self.passes)?;
        writeln!(f, "  Bytes transferred : {}", self.total_bytes)?;
        writeln!(f, "    {:.3} KBytes", self.total_bytes as f64 / KILOBYTE)?;
        writeln!(f, "    {:.3} MBytes", self.total_bytes as f64 / MEGABYTE)?;
        writeln!(f, "    {:.3} GBytes", self.total_bytes as f64 / GIGABYTE)?;
        writeln!(f, "  Ops completed     : {}", self.total_ops)?;
        writeln!(f, "  Errors            : {}", self.total_errors)?;
        writeln!(f, "  Elapsed           : {:.3} s", self.elapsed_secs)?;
        writeln!(f, "  Bandwidth         : {:.3} MB/s", self.bandwidth_mb_per_sec())?;
        write!(f, "  IOPS              : {:.1}", self.iops())
    }
}

/// Render a whole run's summaries, one block per target.
pub fn render_run(results: &[TargetResult]) -> String {
    results
        .iter()
        .map(|r| TargetSummary::from_result(r).to_string())
        .collect::<Vec<_>>()
        .join("\n\n")
}
