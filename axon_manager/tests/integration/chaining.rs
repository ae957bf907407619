//! Chained controller activation, ordering and deactivation rules.

use std::time::Duration;

use axon_manager::cycle::RtContext;
use axon_manager::{ManagerError, Strictness};

use super::common::TestBench;

const SWITCH_TIMEOUT: Duration = Duration::from_secs(1);

fn chained_bench() -> TestBench {
    let bench = TestBench::at_100hz();
    bench.manager.load_controller("traj", Some("TrajFollower")).unwrap();
    bench.manager.load_controller("pid1", Some("ChainablePid")).unwrap();
    bench.manager.configure_controller("pid1").unwrap();
    bench.manager.configure_controller("traj").unwrap();
    bench
}

#[test]
fn chained_pair_activates_together() {
    let bench = chained_bench();
    bench
        .switch_with_cycles(&["traj", "pid1"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();

    assert_eq!(bench.state_of("traj"), "active");
    assert_eq!(bench.state_of("pid1"), "active");

    let infos = bench.manager.list_controllers();
    let pid1 = infos.iter().find(|info| info.name == "pid1").unwrap();
    assert!(pid1.is_chainable);
    assert!(pid1.is_chained);
    assert_eq!(pid1.reference_interfaces, vec!["pid1/position_ref".to_string()]);

    // The follower claims the exported reference interface.
    let registry = bench.manager.resource_manager().registry();
    assert_eq!(
        registry.claimed_by("pid1/position_ref").as_deref(),
        Some("traj")
    );
}

#[test]
fn execution_order_puts_following_first() {
    let bench = chained_bench();
    bench
        .switch_with_cycles(&["traj", "pid1"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();

    let names: Vec<String> = bench
        .manager
        .list_controllers()
        .into_iter()
        .map(|info| info.name)
        .collect();
    let pid1_pos = names.iter().position(|name| name == "pid1").unwrap();
    let traj_pos = names.iter().position(|name| name == "traj").unwrap();
    assert!(
        pid1_pos < traj_pos,
        "following controller must execute before its preceding controller: {names:?}"
    );
}

#[test]
fn chain_connections_are_reported() {
    let bench = chained_bench();
    let infos = bench.manager.list_controllers();
    let traj = infos.iter().find(|info| info.name == "traj").unwrap();
    assert_eq!(traj.chain_connections.len(), 1);
    assert_eq!(traj.chain_connections[0].name, "pid1");
    assert_eq!(
        traj.chain_connections[0].reference_interfaces,
        vec!["position_ref".to_string()]
    );
}

#[test]
fn deactivating_chained_leaf_alone_is_rejected() {
    let bench = chained_bench();
    bench
        .switch_with_cycles(&["traj", "pid1"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();

    let err = bench
        .manager
        .switch_controller(
            &[],
            &["pid1".to_string()],
            Strictness::Strict,
            false,
            SWITCH_TIMEOUT,
        )
        .unwrap_err();
    let message = err.to_string();
    assert!(
        message.contains(
            "preceding controller 'traj' is currently active and will not be deactivated"
        ),
        "unexpected message: {message}"
    );

    // No state change.
    assert_eq!(bench.state_of("traj"), "active");
    assert_eq!(bench.state_of("pid1"), "active");
}

#[test]
fn deactivating_the_whole_chain_succeeds() {
    let bench = chained_bench();
    bench
        .switch_with_cycles(&["traj", "pid1"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();
    bench
        .switch_with_cycles(&[], &["traj", "pid1"], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();

    assert_eq!(bench.state_of("traj"), "inactive");
    assert_eq!(bench.state_of("pid1"), "inactive");
    // The reference interface went unavailable with its exporter.
    let registry = bench.manager.resource_manager().registry();
    assert!(!registry.command_is_available("pid1/position_ref"));
}

#[test]
fn activating_preceding_without_following_is_rejected() {
    let bench = chained_bench();
    let err = bench
        .manager
        .switch_controller(
            &["traj".to_string()],
            &[],
            Strictness::Strict,
            false,
            SWITCH_TIMEOUT,
        )
        .unwrap_err();
    assert!(matches!(err, ManagerError::SwitchRejected { .. }));
    assert_eq!(bench.state_of("traj"), "inactive");
    assert_eq!(bench.state_of("pid1"), "inactive");
}

#[test]
fn preceding_activates_against_already_active_following() {
    let bench = chained_bench();
    bench
        .switch_with_cycles(&["pid1"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();
    assert_eq!(bench.state_of("pid1"), "active");
    let infos = bench.manager.list_controllers();
    let pid1 = infos.iter().find(|info| info.name == "pid1").unwrap();
    assert!(!pid1.is_chained, "standalone activation is not chained mode");

    // Activating traj now flips pid1 into chained mode, which requires a
    // restart of pid1 within the same switch.
    bench
        .switch_with_cycles(&["traj"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();
    assert_eq!(bench.state_of("traj"), "active");
    assert_eq!(bench.state_of("pid1"), "active");
    let infos = bench.manager.list_controllers();
    let pid1 = infos.iter().find(|info| info.name == "pid1").unwrap();
    assert!(pid1.is_chained);
}

#[test]
fn reference_value_flows_through_the_chain() {
    let bench = chained_bench();
    bench
        .switch_with_cycles(&["traj", "pid1"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();

    let mut ctx = RtContext::new();
    bench.run_cycles(&mut ctx, 3);

    let registry = bench.manager.resource_manager().registry();
    let reference = registry.command_handle("pid1/position_ref").unwrap();
    assert_eq!(reference.get_optional(), Some(0.25));
}

#[test]
fn cleanup_after_deactivation_clears_chain_edges() {
    let bench = chained_bench();
    bench
        .switch_with_cycles(&["traj", "pid1"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();
    bench
        .switch_with_cycles(&[], &["traj", "pid1"], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();

    bench.manager.cleanup_controller("traj").unwrap();
    assert_eq!(bench.state_of("traj"), "unconfigured");

    // With traj's edge gone, pid1 deactivation rules no longer mention it:
    // activate pid1 standalone and deactivate it again.
    bench
        .switch_with_cycles(&["pid1"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();
    bench
        .switch_with_cycles(&[], &["pid1"], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();
    assert_eq!(bench.state_of("pid1"), "inactive");
}
