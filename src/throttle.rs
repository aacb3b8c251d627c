//! Throttle Governor: paces operations to an ops/sec, MB/sec, or delay
//! target.
//!
//! Sleeps are measured against the `Ticker`, not wall-clock calendar
//! time, and negative slack is never compensated — a late op does not
//! try to "catch up", grounded on
//! `examples/original_source/src/io_loop_before_io_operation.c`.

use std::time::Duration;

use crate::config::ThrottleSpec;
use crate::ticker::Ticker;

pub struct ThrottleGovernor {
    spec: ThrottleSpec,
    io_size: u64,
}

impl ThrottleGovernor {
    pub fn new(spec: ThrottleSpec, io_size: u64) -> Self {
        ThrottleGovernor { spec, io_size }
    }

    /// The i-th op's scheduled wall-clock offset from pass start, in
    /// seconds. `None` for `ThrottleSpec::Delay`, whose pacing is
    /// purely inter-op, not scheduled against an absolute timeline.
    pub fn scheduled_offset_secs(&self, op_index: u64) -> Option<f64> {
        match self.spec {
            ThrottleSpec::None | ThrottleSpec::Delay(_) => None,
            ThrottleSpec::OpsPerSec(theta) if theta > 0.0 => Some(op_index as f64 / theta),
            ThrottleSpec::MegabytesPerSec(beta) if beta > 0.0 => {
                let bytes = op_index * self.io_size;
                Some((bytes as f64 / (1024.0 * 1024.0)) / beta)
            }
            _ => None,
        }
    }

    /// Block the Target Thread until the next handoff is due. `elapsed`
    /// is the pass-relative elapsed time already observed via the
    /// Ticker.
    pub fn wait_for_next(&self, op_index: u64, pass_elapsed_secs: f64) {
        match self.spec {
            ThrottleSpec::None => {}
            ThrottleSpec::Delay(d) => {
                std::thread::sleep(d);
            }
            ThrottleSpec::OpsPerSec(_) | ThrottleSpec::MegabytesPerSec(_) => {
                if let Some(target) = self.scheduled_offset_secs(op_index) {
                    let slack = target - pass_elapsed_secs;
                    if slack > 0.0 {
                        std::thread::sleep(Duration::from_secs_f64(slack));
                    }
                    // Negative slack (we're already behind schedule)
                    // is not compensated: no catch-up sleep, no skip.
                }
            }
        }
    }
}

/// Convenience: measure pass-relative elapsed seconds from a pass-start tick.
pub fn elapsed_secs(ticker: &Ticker, pass_start: crate::ticker::Tick) -> f64 {
    ticker.ticks_to_secs(ticker.now().since(pass_start))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_per_sec_schedule_is_linear() {
        let gov = ThrottleGovernor::new(ThrottleSpec::OpsPerSec(100.0), 65536);
        assert_eq!(gov.scheduled_offset_secs(0), Some(0.0));
        assert!((gov.scheduled_offset_secs(100).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn mb_per_sec_schedule_scales_with_io_size() {
        let gov = ThrottleGovernor::new(ThrottleSpec::MegabytesPerSec(1.0), 1024 * 1024);
        assert!((gov.scheduled_offset_secs(1).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn none_and_delay_have_no_absolute_schedule() {
        let gov = ThrottleGovernor::new(ThrottleSpec::None, 4096);
        assert_eq!(gov.scheduled_offset_secs(5), None);
        let gov = ThrottleGovernor::new(ThrottleSpec::Delay(Duration::from_millis(5)), 4096);
        assert_eq!(gov.scheduled_offset_secs(5), None);
    }
}
