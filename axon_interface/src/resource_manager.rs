//! Resource manager: hardware component pool + interface arena.
//!
//! Owns every registered [`HardwareComponent`] and the
//! [`InterfaceRegistry`] their interfaces live in. Sequences the per-cycle
//! hardware read and write, fans command-mode switches out to the owning
//! components, and keeps the controller-to-hardware cache used to deactivate
//! the right controllers when a component fails mid-cycle.
//!
//! Realtime paths (`read_all`, `write_all`, `perform_command_mode_switch`,
//! `enforce_command_limits`) only ever try-lock; a contended component is
//! skipped for the cycle rather than awaited.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::component::{ComponentState, HardwareComponent, ComponentIo, IoResult};
use crate::error::{InterfaceError, InterfaceResult};
use crate::registry::InterfaceRegistry;

struct ComponentSlot {
    name: String,
    rw_rate_hz: u32,
    driver: Mutex<Box<dyn HardwareComponent>>,
}

/// Availability and claim status of one interface, for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceStatus {
    /// Full interface name.
    pub name: String,
    /// Whether the interface is currently available.
    pub available: bool,
    /// Claimant, for command interfaces that are claimed.
    pub claimed_by: Option<String>,
}

/// Snapshot of one hardware component, for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentOverview {
    /// Component name.
    pub name: String,
    /// Lifecycle state at snapshot time.
    pub state: ComponentState,
    /// Component read/write rate; 0 means every manager cycle.
    pub rw_rate_hz: u32,
    /// Command interfaces exported by this component.
    pub command_interfaces: Vec<InterfaceStatus>,
    /// State interfaces exported by this component.
    pub state_interfaces: Vec<InterfaceStatus>,
}

/// Hardware component pool plus interface arena.
pub struct ResourceManager {
    registry: Arc<InterfaceRegistry>,
    components: RwLock<Vec<ComponentSlot>>,
    /// Full interface name → owning component name.
    interface_to_component: Mutex<HashMap<String, String>>,
    /// Component name → controllers bound to it (rebuilt at activation).
    controllers_by_component: Mutex<HashMap<String, Vec<String>>>,
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceManager {
    /// Create an empty resource manager.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(InterfaceRegistry::new()),
            components: RwLock::new(Vec::new()),
            interface_to_component: Mutex::new(HashMap::new()),
            controllers_by_component: Mutex::new(HashMap::new()),
        }
    }

    /// The interface arena.
    pub fn registry(&self) -> &Arc<InterfaceRegistry> {
        &self.registry
    }

    /// Register a component: its interface descriptions are turned into
    /// live handles, the handles are bound back to the component, and the
    /// component joins the read/write cycle.
    pub fn register_component(
        &self,
        mut component: Box<dyn HardwareComponent>,
    ) -> InterfaceResult<()> {
        let name = component.name().to_string();
        let state_descriptions = component.state_interface_descriptions();
        let command_descriptions = component.command_interface_descriptions();

        let mut io = ComponentIo::default();
        {
            let mut mapping = self.interface_to_component.lock();
            for description in &state_descriptions {
                let handle = self.registry.insert_state(description)?;
                mapping.insert(description.full_name(), name.clone());
                io.states.push(handle);
            }
            for description in &command_descriptions {
                let handle = self.registry.insert_command(description)?;
                mapping.insert(description.full_name(), name.clone());
                io.commands.push(handle);
            }
        }
        component.bind(io);

        debug!(
            component = %name,
            states = state_descriptions.len(),
            commands = command_descriptions.len(),
            "registered hardware component"
        );
        let rw_rate_hz = component.rw_rate_hz();
        self.components.write().push(ComponentSlot {
            name,
            rw_rate_hz,
            driver: Mutex::new(component),
        });
        Ok(())
    }

    /// Read all active components. Returns the combined result and the
    /// names of the components whose read failed.
    pub fn read_all(&self, now: Duration, period: Duration) -> (IoResult, Vec<String>) {
        self.for_each_active(|component| component.read(now, period))
    }

    /// Write all active components. Returns the combined result and the
    /// names of the components whose write did not return `Ok`.
    pub fn write_all(&self, now: Duration, period: Duration) -> (IoResult, Vec<String>) {
        self.for_each_active(|component| component.write(now, period))
    }

    fn for_each_active(
        &self,
        mut op: impl FnMut(&mut dyn HardwareComponent) -> IoResult,
    ) -> (IoResult, Vec<String>) {
        let mut combined = IoResult::Ok;
        let mut failed = Vec::new();
        let Some(components) = self.components.try_read() else {
            return (IoResult::Ok, failed);
        };
        for slot in components.iter() {
            let Some(mut driver) = slot.driver.try_lock() else {
                continue;
            };
            if driver.state() != ComponentState::Active {
                continue;
            }
            let result = op(driver.as_mut());
            if result != IoResult::Ok {
                failed.push(slot.name.clone());
            }
            combined = combined.combine(result);
        }
        (combined, failed)
    }

    /// Non-realtime veto point for a command-mode switch. Each component
    /// only sees the interfaces it owns; all components must accept.
    pub fn prepare_command_mode_switch(&self, start: &[String], stop: &[String]) -> bool {
        self.mode_switch(start, stop, false)
    }

    /// Realtime commit of a prepared command-mode switch.
    pub fn perform_command_mode_switch(&self, start: &[String], stop: &[String]) -> bool {
        self.mode_switch(start, stop, true)
    }

    fn mode_switch(&self, start: &[String], stop: &[String], perform: bool) -> bool {
        let mapping = self.interface_to_component.lock();
        let per_component = |names: &[String], component: &str| -> Vec<String> {
            names
                .iter()
                .filter(|name| mapping.get(*name).map(String::as_str) == Some(component))
                .cloned()
                .collect()
        };

        let Some(components) = self.components.try_read() else {
            return false;
        };
        let mut accepted = true;
        for slot in components.iter() {
            let component_start = per_component(start, &slot.name);
            let component_stop = per_component(stop, &slot.name);
            if component_start.is_empty() && component_stop.is_empty() {
                continue;
            }
            let Some(mut driver) = slot.driver.try_lock() else {
                error!(component = %slot.name, "component busy during command mode switch");
                accepted = false;
                continue;
            };
            let ok = if perform {
                driver.perform_command_mode_switch(&component_start, &component_stop)
            } else {
                driver.prepare_command_mode_switch(&component_start, &component_stop)
            };
            if !ok {
                warn!(
                    component = %slot.name,
                    phase = if perform { "perform" } else { "prepare" },
                    "command mode switch rejected"
                );
                accepted = false;
            }
        }
        accepted
    }

    /// Clamp commands against hardware limits, every cycle.
    pub fn enforce_command_limits(&self, period: Duration) {
        let Some(components) = self.components.try_read() else {
            return;
        };
        for slot in components.iter() {
            if let Some(mut driver) = slot.driver.try_lock() {
                if driver.state() == ComponentState::Active {
                    driver.enforce_command_limits(period);
                }
            }
        }
    }

    /// Rebuild the hardware cache entry for one controller from its
    /// resolved interface list. Used on read/write errors to find the
    /// controllers bound to a failing component.
    pub fn cache_controller_to_hardware(&self, controller: &str, interfaces: &[String]) {
        let mapping = self.interface_to_component.lock();
        let mut cache = self.controllers_by_component.lock();
        for controllers in cache.values_mut() {
            controllers.retain(|name| name != controller);
        }
        for interface in interfaces {
            if let Some(component) = mapping.get(interface) {
                let controllers = cache.entry(component.clone()).or_default();
                if !controllers.iter().any(|name| name == controller) {
                    controllers.push(controller.to_string());
                }
            }
        }
    }

    /// Controllers cached against a component.
    pub fn controllers_cached_for(&self, component: &str) -> Vec<String> {
        self.controllers_by_component
            .lock()
            .get(component)
            .cloned()
            .unwrap_or_default()
    }

    /// Request a lifecycle transition on a named component.
    pub fn set_component_state(
        &self,
        name: &str,
        target: ComponentState,
    ) -> InterfaceResult<ComponentState> {
        let components = self.components.read();
        let slot = components
            .iter()
            .find(|slot| slot.name == name)
            .ok_or_else(|| InterfaceError::ComponentNotFound {
                name: name.to_string(),
            })?;
        let mut driver = slot.driver.lock();
        let from = driver.state();
        let reached = driver.set_state(target);
        if reached != target {
            return Err(InterfaceError::ComponentTransitionRejected {
                name: name.to_string(),
                from,
                to: target,
            });
        }
        Ok(reached)
    }

    /// Snapshot of every component with per-interface availability and
    /// claim status.
    pub fn component_overviews(&self) -> Vec<ComponentOverview> {
        let mapping = self.interface_to_component.lock().clone();
        let components = self.components.read();
        components
            .iter()
            .map(|slot| {
                let state = slot.driver.lock().state();
                let interfaces_of = |names: Vec<String>, command: bool| -> Vec<InterfaceStatus> {
                    names
                        .into_iter()
                        .filter(|name| mapping.get(name).map(String::as_str) == Some(&slot.name))
                        .map(|name| InterfaceStatus {
                            available: if command {
                                self.registry.command_is_available(&name)
                            } else {
                                self.registry.state_is_available(&name)
                            },
                            claimed_by: if command {
                                self.registry.claimed_by(&name)
                            } else {
                                None
                            },
                            name,
                        })
                        .collect()
                };
                ComponentOverview {
                    name: slot.name.clone(),
                    state,
                    rw_rate_hz: slot.rw_rate_hz,
                    command_interfaces: interfaces_of(
                        self.registry.command_interface_names(),
                        true,
                    ),
                    state_interfaces: interfaces_of(self.registry.state_interface_names(), false),
                }
            })
            .collect()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
