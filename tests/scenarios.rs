//! Integration tests for the six testable-property scenarios covering
//! sequential writes, random read/verify, ordering overlap, throttle
//! pacing, end-to-end transfer, and restart resumption.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use xdd::backend::{FileBackend, StorageBackend};
use xdd::barrier::BarrierRegistry;
use xdd::config::{
    AccessMode, DataPattern, E2eProtocol, E2eRole, OrderingRegime, PassBudget, RunConfig, SeekPattern, TargetConfig,
    ThrottleSpec, TimestampMode,
};
use xdd::pattern::{self, FillContext};
use xdd::restart::{self, ManifestFlags, ManifestState, RestartManifest};
use xdd::runner::RunController;
use xdd::target::TargetRunner;
use xdd::ticker::Ticker;
use xdd::trigger::TriggerFabric;

fn base_target(path: std::path::PathBuf) -> TargetConfig {
    TargetConfig {
        name: "t0".into(),
        path,
        access_mode: AccessMode::WriteOnly,
        block_size: 512,
        request_size: 4,
        queue_depth: 2,
        pass_budget: PassBudget::Ops(16),
        start_offset: 0,
        inter_pass_offset_delta: 0,
        direct_io: false,
        preallocate_bytes: None,
        ordering: OrderingRegime::Unordered,
        throttle: ThrottleSpec::None,
        timestamp_mode: TimestampMode::Disabled,
        seek_pattern: SeekPattern::Sequential,
        seek_seed: 99,
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
    }
}

/// S1: a sequential write pass lands every byte at its expected offset,
/// with zero errors and the full configured byte budget transferred.
#[test]
fn s1_sequential_write_covers_the_whole_file() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let mut config = RunConfig {
        targets: vec![base_target(tmp.path().to_path_buf())],
        pass_count: 1,
        inter_pass_delay: Duration::ZERO,
        run_time_limit: None,
        lockstep_pairs: Vec::new(),
    };
    config.validate().unwrap();
    let expected_bytes = config.targets[0].total_bytes();

    let controller = RunController::new(config, Vec::new());
    let result = controller.run().unwrap();

    assert_eq!(result.targets.len(), 1);
    let pass = &result.targets[0].passes[0];
    assert_eq!(pass.bytes_transferred, expected_bytes);
    assert_eq!(pass.errors, 0);

    let mut backend = FileBackend::open(tmp.path(), false, false).unwrap();
    let mut buf = vec![0u8; expected_bytes as usize];
    backend.read_at(0, &mut buf).unwrap();
    let mismatches = pattern::verify(
        &buf,
        &DataPattern::Sequenced {
            prefix: 0,
            inverse: false,
        },
        0,
        16,
        |_, _, _| {},
    );
    assert_eq!(mismatches, 0);
}

/// S2: a write pass followed by an independent read-only pass over the
/// same byte range round-trips the sequenced pattern without mismatch,
/// exercising the write-then-verify path a restart or audit would use.
#[test]
fn s2_random_write_then_read_verifies_clean() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let mut write_cfg = base_target(tmp.path().to_path_buf());
    write_cfg.seek_pattern = SeekPattern::Random;
    write_cfg.pass_budget = PassBudget::Ops(10);

    let mut run_config = RunConfig {
        targets: vec![write_cfg.clone()],
        pass_count: 1,
        inter_pass_delay: Duration::ZERO,
        run_time_limit: None,
        lockstep_pairs: Vec::new(),
    };
    run_config.validate().unwrap();
    RunController::new(run_config, Vec::new()).run().unwrap();

    let mut read_cfg = write_cfg.clone();
    read_cfg.access_mode = AccessMode::ReadOnly;
    let mut read_config = RunConfig {
        targets: vec![read_cfg],
        pass_count: 1,
        inter_pass_delay: Duration::ZERO,
        run_time_limit: None,
        lockstep_pairs: Vec::new(),
    };
    read_config.validate().unwrap();
    let result = RunController::new(read_config, Vec::new()).run().unwrap();
    assert_eq!(result.targets[0].passes[0].errors, 0);

    let total_bytes = write_cfg.total_bytes();
    let mut backend = FileBackend::open(tmp.path(), false, false).unwrap();
    let mut buf = vec![0u8; total_bytes as usize];
    backend.read_at(0, &mut buf).unwrap();
    let mismatches = pattern::verify(
        &buf,
        &DataPattern::Sequenced {
            prefix: 0,
            inverse: false,
        },
        0,
        16,
        |_, _, _| {},
    );
    assert_eq!(mismatches, 0);
}

/// S3: a loose-ordering pass with queue depth > 1 overlaps adjacent
/// operations but still completes every op with no errors, across
/// multiple passes.
#[test]
fn s3_loose_ordering_overlaps_without_losing_ops() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let mut target = base_target(tmp.path().to_path_buf());
    target.ordering = OrderingRegime::Loose;
    target.queue_depth = 4;
    target.pass_budget = PassBudget::Ops(20);

    let mut config = RunConfig {
        targets: vec![target],
        pass_count: 3,
        inter_pass_delay: Duration::ZERO,
        run_time_limit: None,
        lockstep_pairs: Vec::new(),
    };
    config.validate().unwrap();

    let result = RunController::new(config, Vec::new()).run().unwrap();
    assert_eq!(result.targets[0].passes.len(), 3);
    for pass in &result.targets[0].passes {
        assert_eq!(pass.ops_completed, 20);
        assert_eq!(pass.errors, 0);
    }
}

/// S4: an ops/sec throttle stretches a pass out to at least the
/// scheduled duration; the governor never races ahead of its target
/// rate even though no per-op work blocks it.
#[test]
fn s4_throttle_stretches_pass_duration() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let mut target = base_target(tmp.path().to_path_buf());
    target.pass_budget = PassBudget::Ops(20);
    target.queue_depth = 1;
    target.throttle = ThrottleSpec::OpsPerSec(200.0);

    let mut config = RunConfig {
        targets: vec![target],
        pass_count: 1,
        inter_pass_delay: Duration::ZERO,
        run_time_limit: None,
        lockstep_pairs: Vec::new(),
    };
    config.validate().unwrap();

    let result = RunController::new(config, Vec::new()).run().unwrap();
    let pass = &result.targets[0].passes[0];
    assert_eq!(pass.ops_completed, 20);
    // 20 ops at 200/sec should take at least ~0.09s; generous floor to
    // tolerate scheduler jitter on a loaded CI host.
    assert!(pass.elapsed_secs > 0.05, "elapsed_secs={}", pass.elapsed_secs);
}

/// S5: an end-to-end TCP transfer delivers every byte from a source
/// target to a destination target over loopback, with the destination
/// observing a final EOF frame.
#[test]
fn s5_e2e_tcp_happy_path_delivers_all_bytes() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let src_file = tempfile::NamedTempFile::new().unwrap();
    let dst_file = tempfile::NamedTempFile::new().unwrap();

    let mut src_cfg = base_target(src_file.path().to_path_buf());
    src_cfg.queue_depth = 1;
    src_cfg.pass_budget = PassBudget::Ops(4);
    src_cfg.e2e_role = Some(E2eRole::Source { peers: vec![addr.clone()] });

    let mut dst_cfg = base_target(dst_file.path().to_path_buf());
    dst_cfg.name = "t1".into();
    dst_cfg.queue_depth = 1;
    dst_cfg.pass_budget = PassBudget::Ops(4);
    dst_cfg.access_mode = AccessMode::WriteOnly;
    dst_cfg.e2e_role = Some(E2eRole::Destination { listen: addr });

    let ticker = Arc::new(Ticker::new());
    let cancel = Arc::new(AtomicBool::new(false));
    let barriers = Arc::new(BarrierRegistry::new(cancel.clone()));
    let fabric = Arc::new(TriggerFabric::new(Vec::new(), barriers.clone()));

    let dst_runner = TargetRunner::new(
        dst_cfg.clone(),
        ticker.clone(),
        barriers.clone(),
        fabric.clone(),
        2,
        cancel.clone(),
    );
    let dst_handle = std::thread::spawn(move || dst_runner.run(1, Duration::ZERO, None));

    // Give the destination's listener a moment to bind before the
    // source dials in; the destination side blocks in `accept()` so
    // the ordering only needs the bind itself to have happened.
    std::thread::sleep(Duration::from_millis(50));

    let src_runner = TargetRunner::new(src_cfg.clone(), ticker, barriers, fabric, 2, cancel);
    let src_result = src_runner.run(1, Duration::ZERO, None).unwrap();
    let dst_result = dst_handle.join().unwrap().unwrap();

    assert_eq!(src_result.passes[0].errors, 0);
    assert_eq!(dst_result.passes[0].errors, 0);
    assert_eq!(dst_result.passes[0].bytes_transferred, src_cfg.total_bytes());
}

/// S6: a restart manifest records each destination commit and, after a
/// simulated kill partway through, resumption reads back the last
/// contiguous commit rather than starting the transfer over.
#[test]
fn s6_restart_manifest_resumes_from_last_commit() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let manifest = RestartManifest::open(tmp.path()).unwrap();

    let io_size = 2048u64;
    for op in 0..5u64 {
        manifest
            .update(&ManifestState {
                last_committed_op: op,
                last_committed_byte_location: op * io_size,
                last_committed_length: io_size,
                source_host: "source-host".into(),
                destination_host: "dest-host".into(),
                source_path: "/data/src".into(),
                destination_path: "/data/dst".into(),
                flags: ManifestFlags::RESUME_COPY.bits(),
            })
            .unwrap();
    }
    // Simulated kill: no further updates, no `mark_complete` call.

    let recovered = restart::parse(tmp.path()).unwrap();
    assert_eq!(recovered.last_committed_op, 4);
    assert_eq!(recovered.last_committed_byte_location, 4 * io_size);
    assert!(recovered.flags().contains(ManifestFlags::RESUME_COPY));

    // Resumption continues at the next byte past the last commit.
    let resume_offset = recovered.last_committed_byte_location + recovered.last_committed_length;
    assert_eq!(resume_offset, 5 * io_size);

    manifest.mark_complete(5 * io_size).unwrap();
    let contents = std::fs::read_to_string(tmp.path()).unwrap();
    assert!(contents.contains("completed successfully"));
}

#[test]
fn pattern_fill_context_is_reexported_for_consumers() {
    // Sanity check that the public pattern API consumers (test
    // harnesses, `xdd tsreport`-adjacent tooling) depend on stays
    // stable: filling and verifying through the crate's own types.
    let mut buf = vec![0u8; 16];
    let ctx = FillContext {
        absolute_offset: 0,
        target_seed: 1,
    };
    pattern::fill(&mut buf, &DataPattern::Fixed(0x42), ctx);
    assert!(buf.iter().all(|b| *b == 0x42));
}
