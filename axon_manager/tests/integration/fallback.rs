//! Error-driven deactivation and fallback activation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axon_manager::cycle::RtContext;
use axon_manager::{ControllerEntry, ManagerConfig, Strictness};

use super::common::TestBench;

const SWITCH_TIMEOUT: Duration = Duration::from_secs(1);

fn config_with_fallback(risky_type: &str) -> ManagerConfig {
    let mut config = ManagerConfig::with_rate(100);
    config.controllers.insert(
        "risky".to_string(),
        ControllerEntry {
            type_name: risky_type.to_string(),
            fallback_controllers: vec!["safe".to_string()],
            ..Default::default()
        },
    );
    config.controllers.insert(
        "safe".to_string(),
        ControllerEntry {
            type_name: "PositionPid".to_string(),
            ..Default::default()
        },
    );
    config
}

fn bench_with_failing_controller(risky_type: &str) -> TestBench {
    let bench = TestBench::new(config_with_fallback(risky_type));
    bench.manager.load_controller("risky", None).unwrap();
    bench.manager.load_controller("safe", None).unwrap();
    bench.manager.configure_controller("risky").unwrap();
    bench.manager.configure_controller("safe").unwrap();
    bench
}

/// Activate `risky`, raise the failure signal, and run enough cycles for
/// the failure to propagate (one write+read pair to publish the signal,
/// one update to fail and reshuffle).
fn trip_failure(bench: &TestBench) {
    bench
        .switch_with_cycles(&["risky"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();
    assert_eq!(bench.state_of("risky"), "active");

    bench.raise_failure_signal();
    let mut ctx = RtContext::new();
    bench.cycle(&mut ctx);
    bench.cycle(&mut ctx);
    bench.cycle(&mut ctx);
}

#[test]
fn update_error_activates_fallback() {
    let bench = bench_with_failing_controller("FailOnSignal");

    let events = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&events);
    bench
        .manager
        .diagnostics()
        .set_activity_callback(Box::new(move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

    trip_failure(&bench);

    assert_eq!(bench.state_of("risky"), "inactive");
    assert_eq!(bench.state_of("safe"), "active");

    let registry = bench.manager.resource_manager().registry();
    assert_eq!(
        registry.claimed_by("joint1/position_cmd").as_deref(),
        Some("safe")
    );
    assert!(
        events.load(Ordering::SeqCst) > 0,
        "the fallback reshuffle publishes an activity event"
    );
}

#[test]
fn update_panic_is_contained_and_triggers_fallback() {
    let bench = bench_with_failing_controller("PanicOnSignal");
    trip_failure(&bench);

    assert_eq!(bench.state_of("risky"), "inactive");
    assert_eq!(bench.state_of("safe"), "active");
}

#[test]
fn activation_requires_configured_fallbacks() {
    let bench = TestBench::new(config_with_fallback("FailOnSignal"));
    bench.manager.load_controller("risky", None).unwrap();
    bench.manager.load_controller("safe", None).unwrap();
    bench.manager.configure_controller("risky").unwrap();
    // safe stays unconfigured.

    let err = bench
        .manager
        .switch_controller(
            &["risky".to_string()],
            &[],
            Strictness::Strict,
            false,
            SWITCH_TIMEOUT,
        )
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("fallback"), "unexpected message: {message}");
    assert_eq!(bench.state_of("risky"), "inactive");
}

#[test]
fn hardware_read_error_deactivates_bound_controllers() {
    let bench = TestBench::at_100hz();
    bench.manager.load_controller("pid1", Some("PositionPid")).unwrap();
    bench.manager.configure_controller("pid1").unwrap();
    bench
        .switch_with_cycles(&["pid1"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();
    assert_eq!(bench.state_of("pid1"), "active");

    bench.switches.fail_read.store(true, Ordering::SeqCst);
    let mut ctx = RtContext::new();
    bench.cycle(&mut ctx);
    bench.cycle(&mut ctx);

    assert_eq!(bench.state_of("pid1"), "inactive");
    let registry = bench.manager.resource_manager().registry();
    assert!(!registry.command_is_claimed("joint1/position_cmd"));
}

#[test]
fn hardware_deactivate_request_stops_commanding_controllers_only() {
    let bench = TestBench::at_100hz();
    bench.manager.load_controller("pid1", Some("PositionPid")).unwrap();
    bench.manager.configure_controller("pid1").unwrap();
    bench
        .switch_with_cycles(&["pid1"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();

    bench.switches.deactivate_write.store(true, Ordering::SeqCst);
    let mut ctx = RtContext::new();
    bench.cycle(&mut ctx);
    assert_eq!(bench.state_of("pid1"), "inactive");

    // The hardware keeps asking; with the controller already inactive the
    // repeat is a warning, not a state change.
    bench.cycle(&mut ctx);
    assert_eq!(bench.state_of("pid1"), "inactive");
}

#[test]
fn hardware_write_error_deactivates_bound_controllers() {
    let bench = TestBench::at_100hz();
    bench.manager.load_controller("pid1", Some("PositionPid")).unwrap();
    bench.manager.configure_controller("pid1").unwrap();
    bench
        .switch_with_cycles(&["pid1"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();

    bench.switches.fail_write.store(true, Ordering::SeqCst);
    let mut ctx = RtContext::new();
    bench.cycle(&mut ctx);
    assert_eq!(bench.state_of("pid1"), "inactive");
}
