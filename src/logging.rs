//! Tracing setup for the `xdd` binary.
//!
//! Library code never prints; it only emits `tracing` events. The CLI
//! shell is the only place an env-filtered subscriber gets installed.

use tracing_subscriber::EnvFilter;

/// Install a `tracing-subscriber` fmt layer honoring `RUST_LOG`,
/// defaulting to `info` when unset.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
