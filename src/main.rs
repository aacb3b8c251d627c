//! xdd CLI: storage I/O benchmarking and end-to-end data-movement engine.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use xdd::config::{
    AccessMode, DataPattern, E2eProtocol, OrderingRegime, PassBudget, RunConfig, SeekPattern, TargetConfig,
    ThrottleSpec, TimestampMode,
};
use xdd::runner::RunController;

#[derive(Parser)]
#[command(name = "xdd")]
#[command(about = "Multi-threaded storage I/O benchmarking and data-movement engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Single-target run (xdd-lite style): one path, one op count, one
    /// block size, no multi-target config file required.
    Run {
        /// Path to the target file or device.
        target: PathBuf,

        /// Access mode for this run.
        #[arg(long, default_value = "write")]
        mode: String,

        /// Block size in bytes.
        #[arg(long, default_value_t = 512)]
        block_size: u64,

        /// Request size in blocks.
        #[arg(long, default_value_t = 128)]
        request_size: u64,

        /// Number of operations in the pass.
        #[arg(long, default_value_t = 100)]
        ops: u64,

        /// Queue depth (worker count). Defaults to the host's logical
        /// CPU count when not given.
        #[arg(long)]
        queue_depth: Option<usize>,

        /// Number of passes.
        #[arg(long, default_value_t = 1)]
        passes: u32,

        /// Ordering regime: unordered, loose, strict.
        #[arg(long, default_value = "unordered")]
        ordering: String,

        /// Direct I/O (bypass the page cache).
        #[arg(long, default_value_t = false)]
        direct_io: bool,

        /// Seek pattern: sequential, random, staggered, interleaved, none.
        #[arg(long, default_value = "sequential")]
        seek_pattern: String,

        /// Seed for random seek order / random data pattern.
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Run-time deadline in seconds (optional).
        #[arg(long)]
        run_time_limit_secs: Option<u64>,
    },

    /// Offline bandwidth-curve report from one or two timestamp dumps.
    Tsreport {
        /// Source-side dump path.
        source: PathBuf,

        /// Destination-side dump path (optional, for E2E conservation checks).
        destination: Option<PathBuf>,

        /// Sliding window width in seconds.
        #[arg(long, default_value_t = 1.0)]
        window_secs: f64,
    },

    /// Truncate (or create) a file to an exact byte length, used to
    /// reset a target between test runs.
    Truncate {
        path: PathBuf,
        bytes: u64,
    },
}

fn parse_access_mode(s: &str) -> anyhow::Result<AccessMode> {
    match s {
        "read" | "read-only" => Ok(AccessMode::ReadOnly),
        "write" | "write-only" => Ok(AccessMode::WriteOnly),
        other => {
            if let Some(rest) = other.strip_prefix("mixed:") {
                let frac: f64 = rest.parse()?;
                Ok(AccessMode::Mixed { read_fraction: frac })
            } else {
                anyhow::bail!("unknown access mode '{other}' (use read, write, or mixed:<fraction>)")
            }
        }
    }
}

fn parse_ordering(s: &str) -> anyhow::Result<OrderingRegime> {
    match s {
        "unordered" => Ok(OrderingRegime::Unordered),
        "loose" => Ok(OrderingRegime::Loose),
        "strict" => Ok(OrderingRegime::Strict),
        other => anyhow::bail!("unknown ordering regime '{other}'"),
    }
}

fn parse_seek_pattern(s: &str) -> anyhow::Result<SeekPattern> {
    match s {
        "sequential" => Ok(SeekPattern::Sequential),
        "random" => Ok(SeekPattern::Random),
        "staggered" => Ok(SeekPattern::Staggered),
        "interleaved" => Ok(SeekPattern::Interleaved),
        "none" => Ok(SeekPattern::None),
        other => anyhow::bail!("unknown seek pattern '{other}'"),
    }
}

fn main() -> anyhow::Result<()> {
    xdd::logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            target,
            mode,
            block_size,
            request_size,
            ops,
            queue_depth,
            passes,
            ordering,
            direct_io,
            seek_pattern,
            seed,
            run_time_limit_secs,
        } => {
            let queue_depth = queue_depth.unwrap_or_else(num_cpus::get);
            let mut config = TargetConfig {
                name: "target0".into(),
                path: target,
                access_mode: parse_access_mode(&mode)?,
                block_size,
                request_size,
                queue_depth,
                pass_budget: PassBudget::Ops(ops),
                start_offset: 0,
                inter_pass_offset_delta: 0,
                direct_io,
                preallocate_bytes: None,
                ordering: parse_ordering(&ordering)?,
                throttle: ThrottleSpec::None,
                timestamp_mode: TimestampMode::Disabled,
                seek_pattern: parse_seek_pattern(&seek_pattern)?,
                seek_seed: seed,
                seek_stride: 1,
                seek_interleave: 1,
                data_pattern: DataPattern::Sequenced {
                    prefix: 0,
                    inverse: false,
                },
                e2e_role: None,
                e2e_protocol: E2eProtocol::Tcp,
                restart_manifest_path: None,
                randomize_between_passes: false,
                max_errors: 0,
                wait_for_start: false,
                wait_for_stop: false,
                tsdump_path: None,
            };
            config.validate()?;

            let mut run_config = RunConfig {
                targets: vec![config.clone()],
                pass_count: passes,
                inter_pass_delay: Duration::ZERO,
                run_time_limit: run_time_limit_secs.map(Duration::from_secs),
                lockstep_pairs: Vec::new(),
            };
            run_config.validate()?;
            let _ = &mut config;

            let controller = RunController::new(run_config, Vec::new());
            #[cfg(unix)]
            RunController::install_signal_handlers(controller.cancel_handle());

            let result = controller.run()?;
            println!("{}", xdd::results::render_run(&result.targets));
            if result.canceled {
                std::process::exit(2);
            }
        }

        Commands::Tsreport {
            source,
            destination,
            window_secs,
        } => {
            let (src_header, src_records) = xdd::tsdump::read_dump(&source)?;
            println!(
                "source dump: target_id={} entries={}",
                src_header.target_id,
                src_records.len()
            );
            let curve = xdd::tsdump::bandwidth_curve(&src_records, src_header.timer_resolution_ps, window_secs);
            for point in &curve {
                println!("t={:.3}s  {:.3} MB/s", point.time_secs, point.mb_per_sec);
            }

            if let Some(dest_path) = destination {
                let (dest_header, dest_records) = xdd::tsdump::read_dump(&dest_path)?;
                let src_bytes: u64 = src_records.iter().map(|r| r.xfer_size).sum();
                let dest_bytes: u64 = dest_records.iter().map(|r| r.xfer_size).sum();
                println!(
                    "destination dump: target_id={} entries={}",
                    dest_header.target_id,
                    dest_records.len()
                );
                if src_bytes == dest_bytes {
                    println!("conservation check: OK ({src_bytes} bytes)");
                } else {
                    println!("conservation check: MISMATCH (source={src_bytes} destination={dest_bytes})");
                    std::process::exit(1);
                }
            }
        }

        Commands::Truncate { path, bytes } => {
            let file = std::fs::OpenOptions::new().create(true).write(true).open(&path)?;
            file.set_len(bytes)?;
            println!("{}: truncated to {bytes} bytes", path.display());
        }
    }

    Ok(())
}
