//! Per-controller rate gating and async execution.

use std::time::Duration;

use axon_manager::cycle::RtContext;
use axon_manager::{ControllerEntry, ManagerConfig, Strictness};

use super::common::TestBench;

const SWITCH_TIMEOUT: Duration = Duration::from_secs(1);

fn bench_with_counter(update_rate_hz: Option<u32>, is_async: bool) -> TestBench {
    let mut config = ManagerConfig::with_rate(100);
    config.controllers.insert(
        "counter".to_string(),
        ControllerEntry {
            type_name: "CountingPid".to_string(),
            update_rate_hz,
            is_async,
            ..Default::default()
        },
    );
    let bench = TestBench::new(config);
    bench.manager.load_controller("counter", None).unwrap();
    bench.manager.configure_controller("counter").unwrap();
    bench
}

fn update_count(bench: &TestBench) -> f64 {
    bench
        .manager
        .resource_manager()
        .registry()
        .command_handle("joint1/position_cmd")
        .unwrap()
        .get_optional()
        .unwrap_or(0.0)
}

#[test]
fn manager_rate_controller_runs_every_cycle() {
    let bench = bench_with_counter(None, false);
    bench
        .switch_with_cycles(&["counter"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();

    let before = update_count(&bench);
    let mut ctx = RtContext::new();
    bench.run_cycles(&mut ctx, 100);
    let invocations = update_count(&bench) - before;
    assert_eq!(invocations, 100.0);
}

#[test]
fn half_rate_controller_runs_every_other_cycle() {
    let bench = bench_with_counter(Some(50), false);
    bench
        .switch_with_cycles(&["counter"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();

    let before = update_count(&bench);
    let mut ctx = RtContext::new();
    // One second of cycles at 100 Hz.
    bench.run_cycles(&mut ctx, 100);
    let invocations = update_count(&bench) - before;
    assert!(
        (49.0..=51.0).contains(&invocations),
        "expected ~50 updates, got {invocations}"
    );
}

#[test]
fn over_rate_controller_is_clamped_at_configure_time() {
    let bench = bench_with_counter(Some(200), false);
    let infos = bench.manager.list_controllers();
    let counter = infos.iter().find(|info| info.name == "counter").unwrap();
    assert_eq!(counter.update_rate_hz, 100);

    bench
        .switch_with_cycles(&["counter"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();
    let before = update_count(&bench);
    let mut ctx = RtContext::new();
    bench.run_cycles(&mut ctx, 20);
    assert_eq!(update_count(&bench) - before, 20.0);
}

#[test]
fn non_divisor_rate_still_accumulates_updates() {
    // 33 Hz against a 100 Hz manager: no constant sub-period exists. With
    // the exactly stepped simulation clock the gate quantizes to whole
    // manager ticks, so the count lands between every-3rd and every-4th
    // cycle; on real (jittery) clocks it averages out to the rate.
    let bench = bench_with_counter(Some(33), false);
    bench
        .switch_with_cycles(&["counter"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();

    let before = update_count(&bench);
    let mut ctx = RtContext::new();
    bench.run_cycles(&mut ctx, 100);
    let invocations = update_count(&bench) - before;
    assert!(
        (24.0..=34.0).contains(&invocations),
        "expected between 25 and 34 updates, got {invocations}"
    );
}

#[test]
fn async_controller_updates_on_its_worker() {
    let bench = bench_with_counter(None, true);
    bench
        .switch_with_cycles(&["counter"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();

    let mut ctx = RtContext::new();
    for _ in 0..20 {
        bench.cycle(&mut ctx);
        // Give the worker thread a moment to consume the trigger.
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(
        update_count(&bench) >= 1.0,
        "async worker never ran an update"
    );

    bench
        .switch_with_cycles(&[], &["counter"], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();
    assert_eq!(bench.state_of("counter"), "inactive");
}

#[test]
fn execution_statistics_accumulate() {
    let bench = bench_with_counter(None, false);
    bench
        .switch_with_cycles(&["counter"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();

    let mut ctx = RtContext::new();
    bench.run_cycles(&mut ctx, 10);

    let summary = bench
        .manager
        .diagnostics()
        .cycle_periodicity_summary()
        .expect("cycle periodicity was recorded");
    assert!(summary.count >= 10);
    // The simulated clock steps exactly one period per cycle.
    assert!((summary.mean - 100.0).abs() < 1.0);
}
