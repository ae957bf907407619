//! Software-only hardware component.
//!
//! A unit plant: every commanded joint position is reached within one write
//! cycle and reported back on the next read. Used by the demo binary and by
//! the integration tests, which also exercise the failure paths through the
//! injection switches.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::component::{ComponentIo, ComponentState, HardwareComponent, IoResult};
use crate::handle::{InterfaceDescription, InterfaceValue};

/// Failure-injection switches shared with the test or host code.
#[derive(Debug, Default)]
pub struct SimSwitches {
    /// Force the next reads to return [`IoResult::Error`].
    pub fail_read: AtomicBool,
    /// Force the next writes to return [`IoResult::Error`].
    pub fail_write: AtomicBool,
    /// Force the next writes to return [`IoResult::Deactivate`].
    pub deactivate_write: AtomicBool,
    /// Reject the next command-mode switch in the prepare phase.
    pub reject_mode_switch: AtomicBool,
    /// Number of prepare calls observed.
    pub prepare_calls: AtomicU32,
    /// Number of perform calls observed.
    pub perform_calls: AtomicU32,
}

/// Simulated servo board exporting `<joint>/position`, `<joint>/velocity`
/// state interfaces and a `<joint>/position_cmd` command interface per
/// configured joint.
pub struct SimComponent {
    name: String,
    joints: Vec<String>,
    state: ComponentState,
    switches: Arc<SimSwitches>,
    /// Plant positions, one per joint.
    positions: Vec<f64>,
    velocities: Vec<f64>,
    /// `[position, velocity]` per joint, bound at registration.
    state_handles: Vec<Arc<crate::handle::Handle>>,
    command_handles: Vec<Arc<crate::handle::Handle>>,
}

impl SimComponent {
    /// Create a component with private injection switches.
    pub fn new(name: impl Into<String>, joints: &[&str]) -> Self {
        Self::with_switches(name, joints, Arc::new(SimSwitches::default()))
    }

    /// Create a component sharing `switches` with the caller.
    pub fn with_switches(
        name: impl Into<String>,
        joints: &[&str],
        switches: Arc<SimSwitches>,
    ) -> Self {
        let joints: Vec<String> = joints.iter().map(|joint| joint.to_string()).collect();
        let joint_count = joints.len();
        Self {
            name: name.into(),
            joints,
            state: ComponentState::Unconfigured,
            switches,
            positions: vec![0.0; joint_count],
            velocities: vec![0.0; joint_count],
            state_handles: Vec::new(),
            command_handles: Vec::new(),
        }
    }
}

impl HardwareComponent for SimComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ComponentState {
        self.state
    }

    fn set_state(&mut self, target: ComponentState) -> ComponentState {
        if self.state != ComponentState::Finalized {
            self.state = target;
        }
        self.state
    }

    fn state_interface_descriptions(&self) -> Vec<InterfaceDescription> {
        self.joints
            .iter()
            .flat_map(|joint| {
                let mut position = InterfaceDescription::double(joint, "position");
                position.initial_value = Some(InterfaceValue::Double(0.0));
                let mut velocity = InterfaceDescription::double(joint, "velocity");
                velocity.initial_value = Some(InterfaceValue::Double(0.0));
                [position, velocity]
            })
            .collect()
    }

    fn command_interface_descriptions(&self) -> Vec<InterfaceDescription> {
        self.joints
            .iter()
            .map(|joint| InterfaceDescription::double(joint, "position_cmd"))
            .collect()
    }

    fn bind(&mut self, io: ComponentIo) {
        self.state_handles = io.states;
        self.command_handles = io.commands;
    }

    fn read(&mut self, _now: Duration, period: Duration) -> IoResult {
        if self.switches.fail_read.load(Ordering::SeqCst) {
            return IoResult::Error;
        }
        let dt = period.as_secs_f64();
        for (index, _) in self.joints.iter().enumerate() {
            let position = self.positions[index];
            let velocity = if dt > 0.0 { self.velocities[index] / dt } else { 0.0 };
            // state_handles layout is [position, velocity] per joint.
            let _ = self.state_handles[index * 2].set_value(position);
            let _ = self.state_handles[index * 2 + 1].set_value(velocity);
        }
        IoResult::Ok
    }

    fn write(&mut self, _now: Duration, _period: Duration) -> IoResult {
        if self.switches.fail_write.load(Ordering::SeqCst) {
            return IoResult::Error;
        }
        if self.switches.deactivate_write.load(Ordering::SeqCst) {
            return IoResult::Deactivate;
        }
        for (index, _) in self.joints.iter().enumerate() {
            if let Some(command) = self.command_handles[index].get_optional() {
                if command.is_finite() {
                    self.velocities[index] = command - self.positions[index];
                    self.positions[index] = command;
                }
            }
        }
        IoResult::Ok
    }

    fn prepare_command_mode_switch(&mut self, _start: &[String], _stop: &[String]) -> bool {
        self.switches.prepare_calls.fetch_add(1, Ordering::SeqCst);
        !self.switches.reject_mode_switch.load(Ordering::SeqCst)
    }

    fn perform_command_mode_switch(&mut self, _start: &[String], _stop: &[String]) -> bool {
        self.switches.perform_calls.fetch_add(1, Ordering::SeqCst);
        true
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_manager::ResourceManager;

    #[test]
    fn unit_plant_follows_command() {
        let manager = ResourceManager::new();
        manager
            .register_component(Box::new(SimComponent::new("board", &["joint1"])))
            .unwrap();
        manager
            .set_component_state("board", ComponentState::Active)
            .unwrap();

        let registry = manager.registry();
        registry
            .command_handle("joint1/position_cmd")
            .unwrap()
            .set_value(1.5);

        let period = Duration::from_millis(10);
        manager.write_all(Duration::ZERO, period);
        manager.read_all(period, period);

        let position = registry.state_handle("joint1/position").unwrap();
        assert_eq!(position.get_optional(), Some(1.5));
    }

    #[test]
    fn mode_switch_rejection_is_injectable() {
        let switches = Arc::new(SimSwitches::default());
        let mut component =
            SimComponent::with_switches("board", &["joint1"], Arc::clone(&switches));
        assert!(component.prepare_command_mode_switch(&[], &[]));

        switches.reject_mode_switch.store(true, Ordering::SeqCst);
        assert!(!component.prepare_command_mode_switch(&[], &[]));
        assert_eq!(switches.prepare_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn nan_command_is_ignored() {
        let mut component = SimComponent::new("board", &["joint1"]);
        let descriptions = component.command_interface_descriptions();
        let io = ComponentIo {
            states: component
                .state_interface_descriptions()
                .iter()
                .map(|d| Arc::new(crate::handle::Handle::new(d)))
                .collect(),
            commands: descriptions
                .iter()
                .map(|d| Arc::new(crate::handle::Handle::new(d)))
                .collect(),
        };
        component.bind(io);
        component.set_state(ComponentState::Active);

        // position_cmd defaults to NaN; the plant must hold position.
        component.write(Duration::ZERO, Duration::from_millis(10));
        assert_eq!(component.positions[0], 0.0);
    }
}
