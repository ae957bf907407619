//! Lifecycle and introspection services.

use std::time::Duration;

use axon_interface::ComponentState;
use axon_manager::{ManagerError, Strictness};

use super::common::TestBench;

const SWITCH_TIMEOUT: Duration = Duration::from_secs(1);

#[test]
fn load_requires_a_type() {
    let bench = TestBench::at_100hz();
    let err = bench.manager.load_controller("pid1", None).unwrap_err();
    assert!(matches!(err, ManagerError::Configuration { .. }));

    let err = bench
        .manager
        .load_controller("pid1", Some("NoSuchType"))
        .unwrap_err();
    assert!(err.to_string().contains("NoSuchType"));
}

#[test]
fn duplicate_load_is_rejected() {
    let bench = TestBench::at_100hz();
    bench.manager.load_controller("pid1", Some("PositionPid")).unwrap();
    let err = bench
        .manager
        .load_controller("pid1", Some("PositionPid"))
        .unwrap_err();
    assert!(matches!(err, ManagerError::Configuration { .. }));
}

#[test]
fn configure_cleanup_round_trip() {
    let bench = TestBench::at_100hz();
    bench.manager.load_controller("pid1", Some("PositionPid")).unwrap();
    assert_eq!(bench.state_of("pid1"), "unconfigured");

    bench.manager.configure_controller("pid1").unwrap();
    assert_eq!(bench.state_of("pid1"), "inactive");

    bench.manager.cleanup_controller("pid1").unwrap();
    assert_eq!(bench.state_of("pid1"), "unconfigured");

    // Configure works again after cleanup.
    bench.manager.configure_controller("pid1").unwrap();
    assert_eq!(bench.state_of("pid1"), "inactive");
}

#[test]
fn reconfigure_from_inactive_passes_through_cleanup() {
    let bench = TestBench::at_100hz();
    bench.manager.load_controller("pid1", Some("ChainablePid")).unwrap();
    bench.manager.configure_controller("pid1").unwrap();
    // Second configure runs the cleanup + configure pair and re-imports
    // the exported interfaces without duplicate errors.
    bench.manager.configure_controller("pid1").unwrap();
    assert_eq!(bench.state_of("pid1"), "inactive");

    let registry = bench.manager.resource_manager().registry();
    assert_eq!(
        registry.reference_interfaces_of("pid1"),
        vec!["pid1/position_ref".to_string()]
    );
}

#[test]
fn unload_removes_the_controller() {
    let bench = TestBench::at_100hz();
    bench.manager.load_controller("pid1", Some("PositionPid")).unwrap();
    bench.manager.configure_controller("pid1").unwrap();
    bench.manager.unload_controller("pid1").unwrap();
    assert!(bench
        .manager
        .list_controllers()
        .iter()
        .all(|info| info.name != "pid1"));

    assert!(matches!(
        bench.manager.unload_controller("pid1"),
        Err(ManagerError::UnknownController { .. })
    ));
}

#[test]
fn unload_of_active_controller_is_rejected() {
    let bench = TestBench::at_100hz();
    bench.manager.load_controller("pid1", Some("PositionPid")).unwrap();
    bench.manager.configure_controller("pid1").unwrap();
    bench
        .switch_with_cycles(&["pid1"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();

    assert!(matches!(
        bench.manager.unload_controller("pid1"),
        Err(ManagerError::LifecycleViolation { .. })
    ));
}

#[test]
fn list_controllers_reports_interfaces_and_claims() {
    let bench = TestBench::at_100hz();
    bench.manager.load_controller("pid1", Some("PositionPid")).unwrap();
    bench.manager.configure_controller("pid1").unwrap();

    let infos = bench.manager.list_controllers();
    let pid1 = infos.iter().find(|info| info.name == "pid1").unwrap();
    assert_eq!(pid1.type_name, "PositionPid");
    assert_eq!(pid1.state, "inactive");
    assert_eq!(
        pid1.required_command_interfaces,
        vec!["joint1/position_cmd".to_string()]
    );
    assert_eq!(
        pid1.required_state_interfaces,
        vec!["joint1/position".to_string()]
    );
    assert!(pid1.claimed_interfaces.is_empty());

    bench
        .switch_with_cycles(&["pid1"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();
    let infos = bench.manager.list_controllers();
    let pid1 = infos.iter().find(|info| info.name == "pid1").unwrap();
    assert_eq!(
        pid1.claimed_interfaces,
        vec!["joint1/position_cmd".to_string()]
    );
}

#[test]
fn list_controller_types_carries_base_kinds() {
    let bench = TestBench::at_100hz();
    let types = bench.manager.list_controller_types();
    let chainable = types
        .iter()
        .find(|info| info.type_name == "ChainablePid")
        .unwrap();
    assert_eq!(chainable.base_kind, "chainable_controller");
    let standard = types
        .iter()
        .find(|info| info.type_name == "PositionPid")
        .unwrap();
    assert_eq!(standard.base_kind, "controller");
}

#[test]
fn hardware_listing_and_state_service() {
    let bench = TestBench::at_100hz();
    let components = bench.manager.list_hardware_components();
    assert_eq!(components.len(), 1);
    assert_eq!(components[0].name, "servo_board");
    assert_eq!(components[0].state, ComponentState::Active);
    assert_eq!(components[0].command_interfaces.len(), 2);
    assert_eq!(components[0].state_interfaces.len(), 4);

    let interfaces = bench.manager.list_hardware_interfaces();
    assert!(interfaces
        .iter()
        .any(|status| status.name == "joint1/position_cmd"));

    let reached = bench
        .manager
        .set_hardware_component_state("servo_board", ComponentState::Inactive)
        .unwrap();
    assert_eq!(reached, ComponentState::Inactive);
    assert!(bench
        .manager
        .set_hardware_component_state("missing", ComponentState::Active)
        .is_err());
}

#[test]
fn reload_requires_force_when_controllers_are_active() {
    let bench = TestBench::at_100hz();
    bench.manager.load_controller("pid1", Some("PositionPid")).unwrap();
    bench.manager.configure_controller("pid1").unwrap();
    bench
        .switch_with_cycles(&["pid1"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();

    assert!(matches!(
        bench.manager.reload_controller_registry(false),
        Err(ManagerError::LifecycleViolation { .. })
    ));

    bench.manager.reload_controller_registry(true).unwrap();
    assert!(bench.manager.list_controllers().is_empty());
    // Loans released with the forced deactivation.
    let registry = bench.manager.resource_manager().registry();
    assert!(!registry.command_is_claimed("joint1/position_cmd"));

    // The roster accepts fresh loads afterwards.
    bench.manager.load_controller("pid1", Some("PositionPid")).unwrap();
}

#[test]
fn shutdown_finalizes_controllers_and_hardware() {
    let bench = TestBench::at_100hz();
    bench.manager.load_controller("pid1", Some("PositionPid")).unwrap();
    bench.manager.configure_controller("pid1").unwrap();
    bench
        .switch_with_cycles(&["pid1"], &[], Strictness::Strict, SWITCH_TIMEOUT)
        .unwrap();

    bench.manager.shutdown().unwrap();
    assert!(bench.manager.list_controllers().is_empty());
    let components = bench.manager.list_hardware_components();
    assert_eq!(components[0].state, ComponentState::Finalized);
    let registry = bench.manager.resource_manager().registry();
    assert!(!registry.command_is_claimed("joint1/position_cmd"));
}
