//! Shared fixture: a manager over the simulated servo board with a small
//! catalogue of test controller types.
//!
//! Test controllers carry no shared state; they communicate with the test
//! through the interface handles themselves (e.g. the counting controller
//! publishes its invocation count on its command interface).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axon_controller::{
    CallbackResult, ChainableController, Controller, ControllerIo, ControllerKind,
    ControllerRegistry, InterfaceConfiguration, UpdateResult,
};
use axon_interface::sim::{SimComponent, SimSwitches};
use axon_interface::{ComponentState, InterfaceDescription, ResourceManager};
use axon_manager::cycle::RtContext;
use axon_manager::{Clock, ControllerManager, ManagerConfig, SimClock, Strictness};

/// Holds each joint at its measured position.
pub struct PositionPid;

impl Controller for PositionPid {
    fn command_interface_configuration(&self) -> InterfaceConfiguration {
        InterfaceConfiguration::individual(["joint1/position_cmd"])
    }

    fn state_interface_configuration(&self) -> InterfaceConfiguration {
        InterfaceConfiguration::individual(["joint1/position"])
    }

    fn update(
        &mut self,
        _now: Duration,
        _period: Duration,
        io: &mut ControllerIo<'_>,
    ) -> UpdateResult {
        if let Some(position) = io.states[0].get_optional() {
            if position.is_finite() {
                let _ = io.commands[0].set_value(position);
            }
        }
        UpdateResult::Ok
    }
}

/// Publishes its invocation count on `joint1/position_cmd`.
pub struct CountingPid {
    count: u64,
}

impl Controller for CountingPid {
    fn command_interface_configuration(&self) -> InterfaceConfiguration {
        InterfaceConfiguration::individual(["joint1/position_cmd"])
    }

    fn state_interface_configuration(&self) -> InterfaceConfiguration {
        InterfaceConfiguration::none()
    }

    fn update(
        &mut self,
        _now: Duration,
        _period: Duration,
        io: &mut ControllerIo<'_>,
    ) -> UpdateResult {
        self.count += 1;
        let _ = io.commands[0].set_value(self.count as f64);
        UpdateResult::Ok
    }
}

/// Position threshold on `joint2/position` above which the signal-driven
/// test controllers consider themselves broken.
pub const FAILURE_THRESHOLD: f64 = 1_000.0;

/// Errors out once `joint2/position` crosses the failure threshold; the
/// test raises the signal by commanding joint2, which is not claimed by
/// anyone.
pub struct FailOnSignal;

impl Controller for FailOnSignal {
    fn command_interface_configuration(&self) -> InterfaceConfiguration {
        InterfaceConfiguration::individual(["joint1/position_cmd"])
    }

    fn state_interface_configuration(&self) -> InterfaceConfiguration {
        InterfaceConfiguration::individual(["joint2/position"])
    }

    fn update(
        &mut self,
        _now: Duration,
        _period: Duration,
        io: &mut ControllerIo<'_>,
    ) -> UpdateResult {
        match io.states[0].get_optional() {
            Some(position) if position > FAILURE_THRESHOLD => UpdateResult::Error,
            _ => UpdateResult::Ok,
        }
    }
}

/// Panics instead of erroring; the host must contain the unwind.
pub struct PanicOnSignal;

impl Controller for PanicOnSignal {
    fn command_interface_configuration(&self) -> InterfaceConfiguration {
        InterfaceConfiguration::individual(["joint1/position_cmd"])
    }

    fn state_interface_configuration(&self) -> InterfaceConfiguration {
        InterfaceConfiguration::individual(["joint2/position"])
    }

    fn update(
        &mut self,
        _now: Duration,
        _period: Duration,
        io: &mut ControllerIo<'_>,
    ) -> UpdateResult {
        if let Some(position) = io.states[0].get_optional() {
            if position > FAILURE_THRESHOLD {
                panic!("deliberate test panic");
            }
        }
        UpdateResult::Ok
    }
}

/// Chainable position controller: claims the joint, exports a
/// `position_ref` reference interface under its own name.
pub struct ChainablePid;

impl Controller for ChainablePid {
    fn command_interface_configuration(&self) -> InterfaceConfiguration {
        InterfaceConfiguration::individual(["joint1/position_cmd"])
    }

    fn state_interface_configuration(&self) -> InterfaceConfiguration {
        InterfaceConfiguration::individual(["joint1/position"])
    }

    fn update(
        &mut self,
        _now: Duration,
        _period: Duration,
        io: &mut ControllerIo<'_>,
    ) -> UpdateResult {
        if let Some(position) = io.states[0].get_optional() {
            if position.is_finite() {
                let _ = io.commands[0].set_value(position);
            }
        }
        UpdateResult::Ok
    }

    fn as_chainable(&mut self) -> Option<&mut dyn ChainableController> {
        Some(self)
    }
}

impl ChainableController for ChainablePid {
    fn export_reference_interfaces(&self) -> Vec<InterfaceDescription> {
        // The host rewrites the prefix to the instance name.
        vec![InterfaceDescription::double("self", "position_ref")]
    }

    fn on_set_chained_mode(&mut self, _chained: bool) -> bool {
        true
    }
}

/// Writes a fixed setpoint into `pid1/position_ref`.
pub struct TrajFollower;

impl Controller for TrajFollower {
    fn command_interface_configuration(&self) -> InterfaceConfiguration {
        InterfaceConfiguration::individual(["pid1/position_ref"])
    }

    fn state_interface_configuration(&self) -> InterfaceConfiguration {
        InterfaceConfiguration::none()
    }

    fn on_activate(&mut self) -> CallbackResult {
        CallbackResult::Success
    }

    fn update(
        &mut self,
        _now: Duration,
        _period: Duration,
        io: &mut ControllerIo<'_>,
    ) -> UpdateResult {
        let _ = io.commands[0].set_value(0.25);
        UpdateResult::Ok
    }
}

pub fn test_registry() -> ControllerRegistry {
    let mut registry = ControllerRegistry::new();
    registry.register("PositionPid", ControllerKind::Standard, || {
        Box::new(PositionPid)
    });
    registry.register("CountingPid", ControllerKind::Standard, || {
        Box::new(CountingPid { count: 0 })
    });
    registry.register("FailOnSignal", ControllerKind::Standard, || {
        Box::new(FailOnSignal)
    });
    registry.register("PanicOnSignal", ControllerKind::Standard, || {
        Box::new(PanicOnSignal)
    });
    registry.register("ChainablePid", ControllerKind::Chainable, || {
        Box::new(ChainablePid)
    });
    registry.register("TrajFollower", ControllerKind::Standard, || {
        Box::new(TrajFollower)
    });
    registry
}

/// Manager over one simulated servo board plus the cycle-driving helpers.
pub struct TestBench {
    pub manager: Arc<ControllerManager>,
    pub clock: Arc<SimClock>,
    pub switches: Arc<SimSwitches>,
    period: Duration,
}

impl TestBench {
    /// Build a bench at 100 Hz with the default controller catalogue.
    pub fn new(config: ManagerConfig) -> Self {
        let period = config.period();
        let clock = Arc::new(SimClock::new());
        let switches = Arc::new(SimSwitches::default());

        let resource_manager = Arc::new(ResourceManager::new());
        resource_manager
            .register_component(Box::new(SimComponent::with_switches(
                "servo_board",
                &["joint1", "joint2"],
                Arc::clone(&switches),
            )))
            .unwrap();
        resource_manager
            .set_component_state("servo_board", ComponentState::Active)
            .unwrap();

        let manager = Arc::new(ControllerManager::new(
            config,
            test_registry(),
            resource_manager,
            Arc::clone(&clock) as Arc<dyn axon_manager::Clock>,
        ));

        Self {
            manager,
            clock,
            switches,
            period,
        }
    }

    /// Bench at 100 Hz, empty controller table.
    pub fn at_100hz() -> Self {
        Self::new(ManagerConfig::with_rate(100))
    }

    /// Step the simulation clock and run one full cycle.
    pub fn cycle(&self, ctx: &mut RtContext) {
        self.clock.advance(self.period);
        let now = self.clock.now();
        self.manager.read(ctx, now, self.period);
        self.manager.update(ctx, now, self.period);
        self.manager.write(ctx, now, self.period);
    }

    /// Run `count` cycles.
    pub fn run_cycles(&self, ctx: &mut RtContext, count: usize) {
        for _ in 0..count {
            self.cycle(ctx);
        }
    }

    /// Issue a switch while a background thread keeps the cycle running,
    /// the way the realtime loop would.
    pub fn switch_with_cycles(
        &self,
        activate: &[&str],
        deactivate: &[&str],
        strictness: Strictness,
        timeout: Duration,
    ) -> Result<String, axon_manager::ManagerError> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let manager = Arc::clone(&self.manager);
        let clock = Arc::clone(&self.clock);
        let period = self.period;
        let driver = std::thread::spawn(move || {
            let mut ctx = RtContext::new();
            while !thread_stop.load(Ordering::SeqCst) {
                clock.advance(period);
                let now = clock.now();
                manager.read(&mut ctx, now, period);
                manager.update(&mut ctx, now, period);
                manager.write(&mut ctx, now, period);
                std::thread::sleep(Duration::from_millis(1));
            }
        });

        let result = self.manager.switch_controller(
            &to_strings(activate),
            &to_strings(deactivate),
            strictness,
            false,
            timeout,
        );

        stop.store(true, Ordering::SeqCst);
        driver.join().unwrap();
        result
    }

    /// Drive joint2 past the failure threshold; the signal-driven
    /// controllers see it once the next write+read pair has run.
    pub fn raise_failure_signal(&self) {
        let registry = self.manager.resource_manager().registry();
        let handle = registry.command_handle("joint2/position_cmd").unwrap();
        assert!(handle.set_value(FAILURE_THRESHOLD * 2.0));
    }

    /// State label of a loaded controller.
    pub fn state_of(&self, name: &str) -> String {
        self.manager
            .list_controllers()
            .into_iter()
            .find(|info| info.name == name)
            .map(|info| info.state)
            .unwrap_or_else(|| panic!("controller '{name}' is not loaded"))
    }
}

pub fn to_strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}
