//! The controller manager: roster ownership and the service surface.
//!
//! All service operations serialize on one mutex and mutate the roster
//! through its writer guard; the realtime loop (in [`crate::cycle`]) only
//! ever sees published snapshots. The switch operation lives in
//! [`crate::switch`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use axon_controller::{
    ControllerHost, ControllerOptions, ControllerRegistry, InterfaceConfigKind,
};
use axon_interface::{ComponentState, ResourceManager};
use axon_interface::resource_manager::ComponentOverview;

use crate::chain::ChainGraph;
use crate::clock::Clock;
use crate::config::ManagerConfig;
use crate::diagnostics::{ActivityEvent, Diagnostics, NamedState};
use crate::error::{ManagerError, ManagerResult};
use crate::services::{ChainConnection, ControllerStateInfo, ControllerTypeInfo};
use crate::switch::SwitchCoordinator;

/// The orchestrator core.
pub struct ControllerManager {
    pub(crate) config: ManagerConfig,
    pub(crate) registry: ControllerRegistry,
    pub(crate) resource_manager: Arc<ResourceManager>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) roster: crate::roster::ControllerRoster,
    pub(crate) chain: Mutex<ChainGraph>,
    pub(crate) switch: SwitchCoordinator,
    /// Serializes every service operation.
    pub(crate) services: Mutex<()>,
    pub(crate) diagnostics: Diagnostics,
}

impl ControllerManager {
    /// Create a manager over the given hardware pool and controller types.
    pub fn new(
        config: ManagerConfig,
        registry: ControllerRegistry,
        resource_manager: Arc<ResourceManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!(rate_hz = config.update_rate_hz, "controller manager starting");
        Self {
            config,
            registry,
            resource_manager,
            clock,
            roster: crate::roster::ControllerRoster::new(),
            chain: Mutex::new(ChainGraph::new()),
            switch: SwitchCoordinator::new(),
            services: Mutex::new(()),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Manager cycle rate.
    pub fn update_rate_hz(&self) -> u32 {
        self.config.update_rate_hz
    }

    /// Manager cycle period.
    pub fn period(&self) -> Duration {
        self.config.period()
    }

    /// The clock driving the cycle.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The hardware pool.
    pub fn resource_manager(&self) -> &Arc<ResourceManager> {
        &self.resource_manager
    }

    /// Diagnostics collector.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    // ── Resolution helpers ──────────────────────────────────────────

    /// Command interfaces a controller's configuration resolves to against
    /// the current availability.
    pub(crate) fn resolved_command_interfaces(&self, host: &ControllerHost) -> Vec<String> {
        let config = host.command_interface_configuration();
        match config.kind {
            InterfaceConfigKind::All => {
                self.resource_manager.registry().available_command_interfaces()
            }
            InterfaceConfigKind::Individual => config.names,
            InterfaceConfigKind::None => Vec::new(),
        }
    }

    /// State interfaces a controller's configuration resolves to.
    pub(crate) fn resolved_state_interfaces(&self, host: &ControllerHost) -> Vec<String> {
        let config = host.state_interface_configuration();
        match config.kind {
            InterfaceConfigKind::All => {
                self.resource_manager.registry().available_state_interfaces()
            }
            InterfaceConfigKind::Individual => config.names,
            InterfaceConfigKind::None => Vec::new(),
        }
    }

    pub(crate) fn find_in<'a>(
        list: &'a [Arc<ControllerHost>],
        name: &str,
    ) -> Option<&'a Arc<ControllerHost>> {
        list.iter().find(|host| host.name() == name)
    }

    // ── Load / configure / cleanup / unload ─────────────────────────

    /// Load a controller by name. The type comes from `type_override` or
    /// the configuration's controller table.
    pub fn load_controller(&self, name: &str, type_override: Option<&str>) -> ManagerResult<()> {
        let _services = self.services.lock();
        info!(controller = name, "loading controller");

        let entry = self.config.controllers.get(name);
        let type_name = match type_override.or(entry.map(|entry| entry.type_name.as_str())) {
            Some(type_name) if !type_name.is_empty() => type_name.to_string(),
            _ => {
                return Err(ManagerError::config(format!(
                    "the 'type' parameter of controller '{name}' is not set"
                )))
            }
        };

        let roster = self.roster.lock();
        if roster.find(name).is_some() {
            return Err(ManagerError::config(format!(
                "a controller named '{name}' is already loaded"
            )));
        }

        let controller = self.registry.create(&type_name)?;
        let options = ControllerOptions {
            update_rate_hz: entry.and_then(|entry| entry.update_rate_hz).unwrap_or(0),
            is_async: entry.map(|entry| entry.is_async).unwrap_or(false),
            fallback_controllers: entry
                .map(|entry| entry.fallback_controllers.clone())
                .unwrap_or_default(),
            params_files: entry
                .map(|entry| entry.params_files.clone())
                .unwrap_or_default(),
            extra_args: entry
                .map(|entry| entry.extra_args.clone())
                .unwrap_or_default(),
        };
        let host = Arc::new(ControllerHost::new(name, &type_name, options, controller));
        host.init()?;

        let mut list = roster.updated_list();
        list.push(Arc::clone(&host));
        roster.publish(list);
        self.chain.lock().add_controller(name);
        Ok(())
    }

    /// Configure a controller: run its configure callback, export its
    /// chainable interfaces, rebuild its chain edges and reorder the
    /// roster.
    pub fn configure_controller(&self, name: &str) -> ManagerResult<()> {
        let _services = self.services.lock();
        info!(controller = name, "configuring controller");

        let roster = self.roster.lock();
        let host = roster
            .find(name)
            .ok_or_else(|| ManagerError::UnknownController {
                name: name.to_string(),
            })?;

        let state = host.lifecycle_state();
        if !matches!(
            state,
            axon_controller::LifecycleState::Unconfigured | axon_controller::LifecycleState::Inactive
        ) {
            return Err(ManagerError::lifecycle(format!(
                "controller '{name}' cannot be configured from '{state}' state"
            )));
        }

        // Re-configure path: drop the previous exports before the host runs
        // its cleanup + configure pair.
        if state == axon_controller::LifecycleState::Inactive && host.is_chainable() {
            self.resource_manager.registry().remove_controller_exports(name);
        }

        host.configure()?;

        let manager_rate = self.config.update_rate_hz;
        let controller_rate = host.update_rate_hz();
        if controller_rate > manager_rate {
            warn!(
                controller = name,
                controller_rate_hz = controller_rate,
                manager_rate_hz = manager_rate,
                "controller update rate exceeds the manager rate, clamping"
            );
            host.clamp_update_rate(manager_rate);
        } else if controller_rate != 0 && manager_rate % controller_rate != 0 {
            warn!(
                controller = name,
                controller_rate_hz = controller_rate,
                manager_rate_hz = manager_rate,
                "controller rate is not a divisor of the manager rate, updates will not \
                 run at a constant period"
            );
        }

        if host.is_chainable() {
            let (references, exported_states) = host
                .exported_interfaces()
                .unwrap_or_default();
            if references.is_empty() && exported_states.is_empty() {
                let _ = host.cleanup();
                return Err(ManagerError::config(format!(
                    "controller '{name}' is chainable but exports no reference or state \
                     interfaces"
                )));
            }
            self.resource_manager
                .registry()
                .import_controller_exports(name, &references, &exported_states)?;
        }

        let command_names = match host.command_interface_configuration().kind {
            InterfaceConfigKind::Individual => host.command_interface_configuration().names,
            _ => Vec::new(),
        };
        let state_names = match host.state_interface_configuration().kind {
            InterfaceConfigKind::Individual => host.state_interface_configuration().names,
            _ => Vec::new(),
        };

        if let Some(duplicate) = first_duplicate(&command_names) {
            self.unconfigure_after_bad_config(&roster, name);
            return Err(ManagerError::config(format!(
                "the command interfaces of controller '{name}' are not unique: '{duplicate}'"
            )));
        }
        if let Some(duplicate) = first_duplicate(&state_names) {
            self.unconfigure_after_bad_config(&roster, name);
            return Err(ManagerError::config(format!(
                "the state interfaces of controller '{name}' are not unique: '{duplicate}'"
            )));
        }

        {
            let mut chain = self.chain.lock();
            if let Err(err) = chain.rebuild_edges(name, &command_names, &state_names) {
                drop(chain);
                self.unconfigure_after_bad_config(&roster, name);
                return Err(err);
            }

            // Reorder the published roster to the chain execution order.
            let ordered = chain.ordered_names()?;
            let list = roster.updated_list();
            let mut reordered = Vec::with_capacity(list.len());
            for ordered_name in &ordered {
                if let Some(host) = Self::find_in(&list, ordered_name) {
                    reordered.push(Arc::clone(host));
                }
            }
            // Controllers without chain records keep their original spot.
            for host in &list {
                if !ordered.iter().any(|n| n == host.name()) {
                    reordered.push(Arc::clone(host));
                }
            }
            debug!(order = ?reordered.iter().map(|h| h.name()).collect::<Vec<_>>(),
                   "roster execution order");
            roster.publish(reordered);
        }
        Ok(())
    }

    fn unconfigure_after_bad_config(
        &self,
        roster: &crate::roster::RosterWriteGuard<'_>,
        name: &str,
    ) {
        if let Some(host) = roster.find(name) {
            if host.is_chainable() {
                self.resource_manager.registry().remove_controller_exports(name);
            }
            if let Err(err) = host.cleanup() {
                error!(controller = name, error = %err, "cleanup after invalid configuration failed");
            }
        }
    }

    /// Return an inactive controller to unconfigured, dropping its chain
    /// edges and exported interfaces.
    pub fn cleanup_controller(&self, name: &str) -> ManagerResult<()> {
        let _services = self.services.lock();
        let roster = self.roster.lock();
        let host = roster
            .find(name)
            .ok_or_else(|| ManagerError::UnknownController {
                name: name.to_string(),
            })?;
        if !host.is_inactive() {
            return Err(ManagerError::lifecycle(format!(
                "controller '{name}' can only be cleaned up from 'inactive' state"
            )));
        }
        if host.is_chainable() {
            self.resource_manager.registry().remove_controller_exports(name);
        }
        host.cleanup()?;
        self.chain.lock().clear_contributions(name);
        Ok(())
    }

    /// Unload a controller. Active controllers must be deactivated first.
    pub fn unload_controller(&self, name: &str) -> ManagerResult<()> {
        let _services = self.services.lock();
        info!(controller = name, "unloading controller");

        let roster = self.roster.lock();
        let host = roster
            .find(name)
            .ok_or_else(|| ManagerError::UnknownController {
                name: name.to_string(),
            })?;
        if host.is_active() {
            return Err(ManagerError::lifecycle(format!(
                "controller '{name}' cannot be unloaded while it is active"
            )));
        }
        if host.is_chainable() {
            self.resource_manager.registry().remove_controller_exports(name);
        }
        if let Err(err) = host.shutdown() {
            warn!(controller = name, error = %err, "shutdown during unload failed");
        }
        self.chain.lock().remove_controller(name);

        let mut list = roster.updated_list();
        list.retain(|entry| entry.name() != name);
        roster.publish(list);
        Ok(())
    }

    /// Orderly shutdown: deactivate everything, finalize every controller,
    /// release the hardware.
    pub fn shutdown(&self) -> ManagerResult<()> {
        let _services = self.services.lock();
        info!("controller manager shutting down");

        let roster = self.roster.lock();
        let list = roster.updated_list();
        for host in &list {
            if host.is_active() {
                host.prepare_for_deactivation();
                host.wait_for_update_to_finish();
                if let Err(err) = host.deactivate() {
                    error!(controller = host.name(), error = %err, "deactivation during shutdown failed");
                }
            }
        }
        for host in &list {
            if host.is_chainable() {
                self.resource_manager
                    .registry()
                    .remove_controller_exports(host.name());
            }
            if host.lifecycle_state() != axon_controller::LifecycleState::Finalized {
                if let Err(err) = host.shutdown() {
                    warn!(controller = host.name(), error = %err, "controller shutdown failed");
                }
            }
        }
        roster.publish(Vec::new());

        for overview in self.resource_manager.component_overviews() {
            let _ = self
                .resource_manager
                .set_component_state(&overview.name, ComponentState::Finalized);
        }
        Ok(())
    }

    /// Unload every controller and start over from an empty roster.
    ///
    /// With `force_kill`, active controllers are deactivated first;
    /// without it, any active controller fails the call.
    pub fn reload_controller_registry(&self, force_kill: bool) -> ManagerResult<()> {
        let _services = self.services.lock();
        let roster = self.roster.lock();
        let list = roster.updated_list();

        let active: Vec<_> = list.iter().filter(|host| host.is_active()).collect();
        if !active.is_empty() && !force_kill {
            return Err(ManagerError::lifecycle(format!(
                "{} controllers are still active; pass force_kill to reload anyway",
                active.len()
            )));
        }
        for host in active {
            host.prepare_for_deactivation();
            host.wait_for_update_to_finish();
            if let Err(err) = host.deactivate() {
                error!(controller = host.name(), error = %err, "forced deactivation failed");
            }
        }
        for host in &list {
            if host.is_chainable() {
                self.resource_manager
                    .registry()
                    .remove_controller_exports(host.name());
            }
            let _ = host.shutdown();
            self.chain.lock().remove_controller(host.name());
        }
        roster.publish(Vec::new());
        info!("controller registry reloaded, roster cleared");
        Ok(())
    }

    // ── Introspection services ──────────────────────────────────────

    /// Full description of every loaded controller.
    pub fn list_controllers(&self) -> Vec<ControllerStateInfo> {
        let _services = self.services.lock();
        let roster = self.roster.lock();
        let list = roster.updated_list();
        let registry = self.resource_manager.registry();
        let controller_names: Vec<String> =
            list.iter().map(|host| host.name().to_string()).collect();

        list.iter()
            .map(|host| {
                let state = host.lifecycle_state();
                let configured = matches!(
                    state,
                    axon_controller::LifecycleState::Inactive
                        | axon_controller::LifecycleState::Active
                );
                let required_command_interfaces = if configured {
                    self.resolved_command_interfaces(host)
                } else {
                    Vec::new()
                };
                let required_state_interfaces = if configured {
                    self.resolved_state_interfaces(host)
                } else {
                    Vec::new()
                };

                // Chain connections: command interfaces whose prefix names
                // another loaded controller.
                let mut chain_connections: Vec<ChainConnection> = Vec::new();
                for interface in &required_command_interfaces {
                    let (prefix, suffix) = axon_interface::split_full_name(interface);
                    if prefix != host.name() && controller_names.iter().any(|n| n == prefix) {
                        match chain_connections.iter_mut().find(|c| c.name == prefix) {
                            Some(connection) => {
                                connection.reference_interfaces.push(suffix.to_string())
                            }
                            None => chain_connections.push(ChainConnection {
                                name: prefix.to_string(),
                                reference_interfaces: vec![suffix.to_string()],
                            }),
                        }
                    }
                }

                let (reference_interfaces, exported_state_interfaces) =
                    if configured && host.is_chainable() {
                        (
                            registry.reference_interfaces_of(host.name()),
                            registry.exported_state_interfaces_of(host.name()),
                        )
                    } else {
                        (Vec::new(), Vec::new())
                    };

                ControllerStateInfo {
                    name: host.name().to_string(),
                    type_name: host.type_name().to_string(),
                    state: state.label().to_string(),
                    is_chainable: host.is_chainable(),
                    is_chained: host.is_in_chained_mode(),
                    is_async: host.is_async(),
                    update_rate_hz: host.update_rate_hz(),
                    required_command_interfaces,
                    required_state_interfaces,
                    claimed_interfaces: registry.claimed_interfaces_of(host.name()),
                    chain_connections,
                    reference_interfaces,
                    exported_state_interfaces,
                }
            })
            .collect()
    }

    /// Registered controller types with their base kinds.
    pub fn list_controller_types(&self) -> Vec<ControllerTypeInfo> {
        let _services = self.services.lock();
        self.registry
            .types()
            .into_iter()
            .map(|(type_name, kind)| ControllerTypeInfo {
                type_name: type_name.to_string(),
                base_kind: kind.label().to_string(),
            })
            .collect()
    }

    /// Per-component hardware snapshot.
    pub fn list_hardware_components(&self) -> Vec<ComponentOverview> {
        let _services = self.services.lock();
        self.resource_manager.component_overviews()
    }

    /// Flat list of every interface with availability and claim status.
    pub fn list_hardware_interfaces(
        &self,
    ) -> Vec<axon_interface::resource_manager::InterfaceStatus> {
        let _services = self.services.lock();
        self.resource_manager
            .component_overviews()
            .into_iter()
            .flat_map(|overview| {
                overview
                    .command_interfaces
                    .into_iter()
                    .chain(overview.state_interfaces)
            })
            .collect()
    }

    /// Request a hardware component lifecycle transition.
    pub fn set_hardware_component_state(
        &self,
        name: &str,
        target: ComponentState,
    ) -> ManagerResult<ComponentState> {
        let _services = self.services.lock();
        Ok(self.resource_manager.set_component_state(name, target)?)
    }

    // ── Activity events ─────────────────────────────────────────────

    /// Snapshot every controller's state into an activity event.
    pub(crate) fn activity_snapshot(
        &self,
        list: &[Arc<ControllerHost>],
    ) -> ActivityEvent {
        ActivityEvent {
            controllers: list
                .iter()
                .map(|host| NamedState {
                    name: host.name().to_string(),
                    state: host.lifecycle_state().label().to_string(),
                })
                .collect(),
        }
    }
}

/// First value occurring twice, if any.
fn first_duplicate(names: &[String]) -> Option<&String> {
    names
        .iter()
        .enumerate()
        .find(|(index, name)| names[..*index].contains(name))
        .map(|(_, name)| name)
}

// ─── Tests ──────────────────────────────────────────────────────────
