//! Atomic controller switching.
//!
//! A switch runs in two phases. Phase one (here, on the calling service
//! thread) resolves and validates the request: lifecycle states, chain
//! implications, interface availability, fallback readiness, and the
//! hardware veto. Phase two is the commit: the request is published to the
//! realtime loop through a flag + condition variable, `manage_switch` (in
//! [`crate::cycle`]) applies it inside one cycle, and the service thread
//! returns once the loop acknowledges, or times out leaving whatever the
//! loop already committed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use axon_controller::ControllerHost;
use axon_interface::split_full_name;

use crate::error::{ManagerError, ManagerResult};
use crate::manager::ControllerManager;
use crate::services::Strictness;

/// The request lists consumed by one `manage_switch` call.
#[derive(Default)]
pub struct SwitchRequest {
    /// Controllers to activate, in request order.
    pub activate: Vec<String>,
    /// Controllers to deactivate.
    pub deactivate: Vec<String>,
    /// Chainable controllers entering chained mode this switch.
    pub to_chained_mode: Vec<String>,
    /// Chainable controllers leaving chained mode this switch.
    pub from_chained_mode: Vec<String>,
    /// Command interfaces gaining a writer.
    pub activate_command_interfaces: Vec<String>,
    /// Command interfaces losing their writer.
    pub deactivate_command_interfaces: Vec<String>,
    /// Whether controllers may activate as soon as their interfaces free
    /// up instead of in one step at the end.
    pub activate_asap: bool,
}

impl SwitchRequest {
    fn is_empty(&self) -> bool {
        self.activate.is_empty()
            && self.deactivate.is_empty()
            && self.to_chained_mode.is_empty()
            && self.from_chained_mode.is_empty()
            && self.activate_command_interfaces.is_empty()
            && self.deactivate_command_interfaces.is_empty()
    }

    fn clear(&mut self) {
        self.activate.clear();
        self.deactivate.clear();
        self.to_chained_mode.clear();
        self.from_chained_mode.clear();
        self.activate_command_interfaces.clear();
        self.deactivate_command_interfaces.clear();
        self.activate_asap = false;
    }
}

/// Handoff point between the service thread and the realtime loop.
pub struct SwitchCoordinator {
    do_switch: AtomicBool,
    request: Mutex<SwitchRequest>,
    done: Condvar,
    default_timeout_noted: AtomicBool,
}

impl Default for SwitchCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SwitchCoordinator {
    /// Create an idle coordinator.
    pub fn new() -> Self {
        Self {
            do_switch: AtomicBool::new(false),
            request: Mutex::new(SwitchRequest::default()),
            done: Condvar::new(),
            default_timeout_noted: AtomicBool::new(false),
        }
    }

    /// Whether a published request awaits the realtime loop.
    pub fn is_pending(&self) -> bool {
        self.do_switch.load(Ordering::SeqCst)
    }

    /// Realtime side: try to take the request for processing. `None` when
    /// the service thread holds the lock; retry next cycle.
    pub(crate) fn try_take_for_rt(&self) -> Option<MutexGuard<'_, SwitchRequest>> {
        self.request.try_lock()
    }

    /// Realtime side: acknowledge a processed request while still holding
    /// its guard.
    pub(crate) fn acknowledge(&self, guard: &MutexGuard<'_, SwitchRequest>) {
        let _ = guard;
        self.do_switch.store(false, Ordering::SeqCst);
        self.done.notify_all();
    }

    /// Realtime side: whether `name` is listed for deactivation in the
    /// pending request. Non-blocking; `false` when the request is locked.
    pub(crate) fn pending_deactivation_of(&self, name: &str) -> bool {
        match self.request.try_lock() {
            Some(request) => request.deactivate.iter().any(|entry| entry == name),
            None => false,
        }
    }
}

impl ControllerManager {
    /// Atomically activate and deactivate sets of controllers.
    ///
    /// Returns the human-readable result message on success. The request
    /// is validated completely before anything is published to the
    /// realtime loop; under [`Strictness::Strict`] any invalid entry
    /// aborts the whole request, under [`Strictness::BestEffort`] invalid
    /// entries are dropped.
    pub fn switch_controller(
        &self,
        activate: &[String],
        deactivate: &[String],
        strictness: Strictness,
        activate_asap: bool,
        timeout: Duration,
    ) -> ManagerResult<String> {
        let _services = self.services.lock();
        let strictness = strictness.resolve();

        {
            let request = self.switch.request.lock();
            if !request.is_empty() || self.switch.is_pending() {
                panic!(
                    "switch request lists are not empty at the beginning of switch_controller; \
                     the manager state is corrupt"
                );
            }
        }

        if !activate.is_empty() {
            info!(controllers = ?activate, "activating controllers");
        }
        if !deactivate.is_empty() {
            info!(controllers = ?deactivate, "deactivating controllers");
        }

        let roster = self.roster.lock();
        let list = roster.updated_list();

        let mut request = SwitchRequest {
            activate_asap,
            ..Default::default()
        };

        // 1. Resolve names against the roster.
        request.deactivate =
            self.resolve_switch_names(&list, deactivate, "deactivate", strictness)?;
        request.activate = self.resolve_switch_names(&list, activate, "activate", strictness)?;

        // 2. Deactivating a preceding controller pulls its followings out
        // of chained mode.
        self.propagate_deactivation_of_chained_mode(&list, &mut request);

        // 3. Activation checks: lifecycle state, chain followings,
        // fallback readiness.
        let mut index = 0;
        while index < request.activate.len() {
            let name = request.activate[index].clone();
            let host = Self::find_in(&list, &name).cloned();
            let failure = match host {
                Some(host) => self
                    .check_activate_candidate(&list, &host, &mut request)
                    .err(),
                None => Some(format!("controller '{name}' disappeared from the roster")),
            };
            match failure {
                None => index += 1,
                Some(message) => {
                    warn!(controller = %name, "{message}");
                    if strictness.is_strict() {
                        self.rollback_request(&mut request, &list);
                        return Err(ManagerError::SwitchRejected { message });
                    }
                    request.activate.remove(index);
                }
            }
        }

        // 4. Deactivation checks: must be active, no live preceding
        // controller left behind.
        let mut index = 0;
        while index < request.deactivate.len() {
            let name = request.deactivate[index].clone();
            let host = Self::find_in(&list, &name).cloned();
            let failure = match host {
                Some(host) => self
                    .check_deactivate_candidate(&list, &host, &request)
                    .err(),
                None => Some(format!("controller '{name}' disappeared from the roster")),
            };
            match failure {
                None => index += 1,
                Some(message) => {
                    warn!(controller = %name, "{message}");
                    if strictness.is_strict() {
                        self.rollback_request(&mut request, &list);
                        return Err(ManagerError::SwitchRejected { message });
                    }
                    request.deactivate.remove(index);
                }
            }
        }

        if request.activate.is_empty() && request.deactivate.is_empty() {
            self.rollback_request(&mut request, &list);
            let message = "after checking the controllers, no controllers need to be \
                           activated or deactivated."
                .to_string();
            info!("{message}");
            return Ok(message);
        }

        // 5.–6. Chain-flip injection and conflict handling over the whole
        // roster; resolve the affected command interfaces.
        for host in &list {
            let name = host.name().to_string();
            let in_to_chained = request.to_chained_mode.contains(&name);
            let in_from_chained = request.from_chained_mode.contains(&name);
            let is_active = host.is_active();
            let is_inactive = host.is_inactive();

            // An active controller flipping chained mode must cycle
            // through inactive: inject deactivate + reactivate.
            if (in_to_chained || in_from_chained)
                && is_active
                && !request.deactivate.contains(&name)
            {
                request.deactivate.push(name.clone());
                request.activate.push(name.clone());
            }

            let in_deactivate = request.deactivate.contains(&name);
            let in_activate = request.activate.contains(&name);

            // Double stop.
            if !is_active && in_deactivate {
                let message =
                    format!("could not deactivate controller '{name}' since it is not active");
                if strictness.is_strict() {
                    self.rollback_request(&mut request, &list);
                    return Err(ManagerError::SwitchRejected { message });
                }
                warn!("{message}");
                request.deactivate.retain(|entry| entry != &name);
            }

            // Double activation.
            let in_deactivate = request.deactivate.contains(&name);
            if is_active && !in_deactivate && in_activate {
                let message =
                    format!("could not activate controller '{name}' since it is already active");
                if strictness.is_strict() {
                    self.rollback_request(&mut request, &list);
                    return Err(ManagerError::SwitchRejected { message });
                }
                warn!("{message}");
                request.activate.retain(|entry| entry != &name);
            }

            // Activation of an unconfigured or finalized controller.
            let in_activate = request.activate.contains(&name);
            if !is_inactive && !in_deactivate && in_activate {
                let message = format!(
                    "could not activate controller '{name}' since it is not in 'inactive' state"
                );
                if strictness.is_strict() {
                    self.rollback_request(&mut request, &list);
                    return Err(ManagerError::SwitchRejected { message });
                }
                warn!("{message}");
                request.activate.retain(|entry| entry != &name);
            }

            let in_activate = request.activate.contains(&name);
            let in_deactivate = request.deactivate.contains(&name);
            if in_activate {
                for interface in self.resolved_command_interfaces(host) {
                    if !request.activate_command_interfaces.contains(&interface) {
                        request.activate_command_interfaces.push(interface);
                    }
                }
                // Cache hardware bindings for error-driven deactivation.
                let mut bound = self.resolved_command_interfaces(host);
                bound.extend(self.resolved_state_interfaces(host));
                self.resource_manager.cache_controller_to_hardware(&name, &bound);
            }
            if in_deactivate {
                for interface in self.resolved_command_interfaces(host) {
                    if !request.deactivate_command_interfaces.contains(&interface) {
                        request.deactivate_command_interfaces.push(interface);
                    }
                }
            }
        }

        if request.activate.is_empty() && request.deactivate.is_empty() {
            self.rollback_request(&mut request, &list);
            let message = "after checking the controllers, no controllers need to be \
                           activated or deactivated."
                .to_string();
            info!("{message}");
            return Ok(message);
        }

        // 7. Every interface the activations resolve to must be available.
        if let Err(message) = self.check_interface_availability(&list, &request) {
            self.rollback_request(&mut request, &list);
            return Err(ManagerError::ResourceUnavailable { message });
        }

        // Let deactivating async controllers finish their current
        // iteration before the realtime loop takes their loans.
        for name in &request.deactivate {
            if let Some(host) = Self::find_in(&list, name) {
                host.prepare_for_deactivation();
            }
        }

        // 9. Hardware veto point.
        if !request.activate_command_interfaces.is_empty()
            || !request.deactivate_command_interfaces.is_empty()
        {
            if !self.resource_manager.prepare_command_mode_switch(
                &request.activate_command_interfaces,
                &request.deactivate_command_interfaces,
            ) {
                self.rollback_request(&mut request, &list);
                return Err(ManagerError::HardwareModeSwitchRejected);
            }
        }

        // Phase 2: publish to the realtime loop and wait.
        let timeout = if timeout.is_zero() {
            let fallback = Duration::from_millis(self.config.default_switch_timeout_ms);
            if !self
                .switch
                .default_timeout_noted
                .swap(true, Ordering::Relaxed)
            {
                info!(?fallback, "switch timeout 0 given, using the configured default");
            }
            fallback
        } else {
            timeout
        };

        let activate_list = request.activate.clone();
        let deactivate_list = request.deactivate.clone();
        {
            let mut pending = self.switch.request.lock();
            *pending = request;
            self.switch.do_switch.store(true, Ordering::SeqCst);
            debug!("requested atomic controller switch from the realtime loop");

            let deadline = Instant::now() + timeout;
            while self.switch.is_pending() {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                self.switch.done.wait_for(&mut pending, deadline - now);
            }
            if self.switch.is_pending() {
                error!(?timeout, "switch controller timed out");
                self.switch.do_switch.store(false, Ordering::SeqCst);
                self.rollback_request(&mut pending, &list);
                return Err(ManagerError::SwitchTimeout { timeout });
            }
            self.rollback_request(&mut pending, &list);
        }

        // Verify the realtime loop landed every listed controller where
        // the request said it would.
        let mut mismatches = Vec::new();
        for name in &activate_list {
            match Self::find_in(&list, name) {
                Some(host) if host.is_active() => {}
                _ => mismatches.push(format!("'{name}' is not active after the switch")),
            }
        }
        for name in &deactivate_list {
            if activate_list.contains(name) {
                continue;
            }
            match Self::find_in(&list, name) {
                Some(host) if !host.is_active() => {}
                _ => mismatches.push(format!("'{name}' is still active after the switch")),
            }
        }
        // Publish the (reordered, re-labelled) roster so observers see the
        // new states.
        roster.publish(list.clone());
        self.diagnostics
            .publish_activity(&self.activity_snapshot(&list));

        if mismatches.is_empty() {
            Ok("successfully switched controllers".to_string())
        } else {
            let message = mismatches.join("; ");
            error!("{message}");
            Err(ManagerError::SwitchRejected { message })
        }
    }

    // ── Validation helpers ──────────────────────────────────────────

    fn resolve_switch_names(
        &self,
        list: &[Arc<ControllerHost>],
        requested: &[String],
        action: &str,
        strictness: Strictness,
    ) -> ManagerResult<Vec<String>> {
        let mut resolved = Vec::with_capacity(requested.len());
        for name in requested {
            if Self::find_in(list, name).is_some() {
                if !resolved.contains(name) {
                    resolved.push(name.clone());
                } else {
                    let message =
                        format!("controller '{name}' is listed twice in the {action} request");
                    if strictness.is_strict() {
                        return Err(ManagerError::SwitchRejected { message });
                    }
                    warn!("{message}, keeping the first occurrence");
                }
            } else {
                let message = format!(
                    "could not {action} controller '{name}' because no controller with this \
                     name exists"
                );
                if strictness.is_strict() {
                    error!("{message}; aborting, no controller is switched ('strict' switch)");
                    return Err(ManagerError::SwitchRejected { message });
                }
                warn!("{message}");
            }
        }
        Ok(resolved)
    }

    fn check_activate_candidate(
        &self,
        list: &[Arc<ControllerHost>],
        host: &Arc<ControllerHost>,
        request: &mut SwitchRequest,
    ) -> Result<(), String> {
        let name = host.name();
        let state = host.lifecycle_state();
        match state {
            axon_controller::LifecycleState::Unconfigured
            | axon_controller::LifecycleState::Unknown => {
                return Err(format!(
                    "controller '{name}' is in 'unconfigured' state and needs to be configured \
                     before it can be activated"
                ));
            }
            axon_controller::LifecycleState::Active => {
                if !request.deactivate.iter().any(|entry| entry == name) {
                    return Err(format!("controller '{name}' is already active"));
                }
            }
            axon_controller::LifecycleState::Finalized => {
                return Err(format!(
                    "controller '{name}' is finalized and can never be activated again"
                ));
            }
            axon_controller::LifecycleState::Inactive => {
                self.check_following_controllers_for_activate(list, host, request)?;
            }
        }
        self.check_fallback_controllers(list, host)
    }

    /// Recursive walk over the interfaces of an activating controller: any
    /// interface naming another controller requires that following
    /// controller to be active (and stay active) or activate in the same
    /// request, and accumulates the chained-mode implications.
    fn check_following_controllers_for_activate(
        &self,
        list: &[Arc<ControllerHost>],
        host: &Arc<ControllerHost>,
        request: &mut SwitchRequest,
    ) -> Result<(), String> {
        let name = host.name();
        let command_config = host.command_interface_configuration();
        let state_config = host.state_interface_configuration();
        let command_count = command_config.names.len();
        let interfaces: Vec<String> = command_config
            .names
            .into_iter()
            .chain(state_config.names)
            .collect();

        for (index, interface) in interfaces.iter().enumerate() {
            let is_command = index < command_count;
            let (prefix, _) = split_full_name(interface);
            if prefix == name {
                continue;
            }
            let Some(following) = Self::find_in(list, prefix) else {
                continue;
            };
            let following_name = following.name().to_string();
            debug!(
                controller = name,
                following = %following_name,
                interface = %interface,
                "checking following controller"
            );

            if !following.is_chainable() {
                return Err(format!(
                    "no reference interface '{interface}' exists, since the following \
                     controller '{following_name}' is not chainable"
                ));
            }

            if following.is_active() {
                if request.deactivate.iter().any(|entry| entry == &following_name) {
                    return Err(format!(
                        "the following controller '{following_name}' is currently active but \
                         it is requested to be deactivated"
                    ));
                }
            } else if !request.activate.iter().any(|entry| entry == &following_name) {
                return Err(format!(
                    "the following controller '{following_name}' is currently inactive and it \
                     is not requested to be activated"
                ));
            }

            // The chain graph is acyclic (validated at configure), so this
            // recursion terminates.
            self.check_following_controllers_for_activate(list, following, request)?;

            if !following.is_in_chained_mode() {
                if !request
                    .to_chained_mode
                    .iter()
                    .any(|entry| entry == &following_name)
                {
                    // Pre-publish the exported interfaces so validation of
                    // the rest of the chain sees them as available.
                    let registry = self.resource_manager.registry();
                    registry.set_exported_state_availability(&following_name, true);
                    if is_command {
                        registry.set_reference_availability(&following_name, true);
                        request.to_chained_mode.push(following_name.clone());
                        debug!(controller = %following_name, "added to 'to chained mode' request");
                    }
                }
            } else {
                // Already chained; make sure nothing pulls it out.
                request
                    .from_chained_mode
                    .retain(|entry| entry != &following_name);
            }
        }
        Ok(())
    }

    fn check_deactivate_candidate(
        &self,
        list: &[Arc<ControllerHost>],
        host: &Arc<ControllerHost>,
        request: &SwitchRequest,
    ) -> Result<(), String> {
        let name = host.name();
        if !host.is_active() {
            return Err(format!(
                "controller '{name}' cannot be deactivated since it is not active"
            ));
        }
        if !host.is_chainable() {
            return Ok(());
        }

        let chain = self.chain.lock();
        let mut preceding = chain.reference_preceding(name);
        preceding.extend(chain.state_preceding(name));
        drop(chain);

        for preceding_name in preceding {
            let Some(preceding_host) = Self::find_in(list, &preceding_name) else {
                continue;
            };
            if preceding_host.is_inactive()
                && request.activate.iter().any(|entry| entry == &preceding_name)
            {
                return Err(format!(
                    "unable to deactivate controller '{name}' because preceding controller \
                     '{preceding_name}' is inactive and will be activated"
                ));
            }
            if preceding_host.is_active()
                && !request.deactivate.iter().any(|entry| entry == &preceding_name)
            {
                return Err(format!(
                    "unable to deactivate controller '{name}' because preceding controller \
                     '{preceding_name}' is currently active and will not be deactivated"
                ));
            }
        }
        Ok(())
    }

    /// Fallback controllers of an activating controller must be
    /// configured, and their interfaces available or exported by a
    /// chainable controller in the same fallback list.
    fn check_fallback_controllers(
        &self,
        list: &[Arc<ControllerHost>],
        host: &Arc<ControllerHost>,
    ) -> Result<(), String> {
        let name = host.name();
        let registry = self.resource_manager.registry();
        for fallback_name in host.fallback_controllers() {
            let Some(fallback) = Self::find_in(list, fallback_name) else {
                return Err(format!(
                    "unable to find the fallback controller '{fallback_name}' of controller \
                     '{name}' within the controller list"
                ));
            };
            if !(fallback.is_inactive() || fallback.is_active()) {
                return Err(format!(
                    "controller '{name}' cannot be activated, as its fallback controller \
                     '{fallback_name}' needs to be configured and in inactive or active state"
                ));
            }

            let command_names = fallback.command_interface_configuration().names;
            let state_names = fallback.state_interface_configuration().names;
            for interface in &command_names {
                if registry.command_is_available(interface) {
                    continue;
                }
                self.check_fallback_exported_interface(
                    list, host, fallback_name, interface, true,
                )?;
            }
            for interface in &state_names {
                if registry.state_is_available(interface) {
                    continue;
                }
                self.check_fallback_exported_interface(
                    list, host, fallback_name, interface, false,
                )?;
            }
        }
        Ok(())
    }

    fn check_fallback_exported_interface(
        &self,
        list: &[Arc<ControllerHost>],
        host: &Arc<ControllerHost>,
        fallback_name: &str,
        interface: &str,
        is_command: bool,
    ) -> Result<(), String> {
        let name = host.name();
        let (prefix, _) = split_full_name(interface);
        let exporter = Self::find_in(list, prefix).filter(|h| h.is_chainable());
        let Some(exporter) = exporter else {
            let kind = if is_command { "command" } else { "state" };
            return Err(format!(
                "controller '{name}' cannot be activated, as not all of its fallback \
                 controller's '{fallback_name}' {kind} interfaces are currently available"
            ));
        };
        if exporter.is_active() {
            return Ok(());
        }
        // The exporter is inactive; it can only satisfy the fallback if it
        // is itself part of the fallback list and actually exports the
        // interface.
        if !host
            .fallback_controllers()
            .iter()
            .any(|entry| entry == exporter.name())
        {
            return Err(format!(
                "controller '{name}' cannot be activated, as the interface '{interface}' \
                 required by its fallback controller '{fallback_name}' is not available and \
                 the exporting controller '{}' is not in the fallback list",
                exporter.name()
            ));
        }
        let registry = self.resource_manager.registry();
        let exported = if is_command {
            registry.reference_interfaces_of(exporter.name())
        } else {
            registry.exported_state_interfaces_of(exporter.name())
        };
        if !exported.iter().any(|entry| entry == interface) {
            return Err(format!(
                "controller '{name}' cannot be activated, as the interface '{interface}' \
                 required by its fallback controller '{fallback_name}' is not exported by \
                 controller '{}'",
                exporter.name()
            ));
        }
        Ok(())
    }

    /// Deactivating a preceding controller pulls every following
    /// controller it feeds out of chained mode.
    fn propagate_deactivation_of_chained_mode(
        &self,
        list: &[Arc<ControllerHost>],
        request: &mut SwitchRequest,
    ) {
        for name in request.deactivate.clone() {
            let Some(host) = Self::find_in(list, &name) else {
                continue;
            };
            if !host.is_active() {
                continue;
            }
            let command_names = host.command_interface_configuration().names;
            let state_names = host.state_interface_configuration().names;
            for interface in command_names.iter().chain(state_names.iter()) {
                let (prefix, _) = split_full_name(interface);
                if prefix == name {
                    continue;
                }
                if Self::find_in(list, prefix).is_some()
                    && !request.from_chained_mode.iter().any(|entry| entry == prefix)
                {
                    debug!(controller = prefix, "added to 'from chained mode' request");
                    request.from_chained_mode.push(prefix.to_string());
                }
            }
        }
    }

    fn check_interface_availability(
        &self,
        list: &[Arc<ControllerHost>],
        request: &SwitchRequest,
    ) -> Result<(), String> {
        let registry = self.resource_manager.registry();
        for name in &request.activate {
            let Some(host) = Self::find_in(list, name) else {
                continue;
            };
            for interface in self.resolved_command_interfaces(host) {
                if !registry.command_is_available(&interface) {
                    return Err(format!(
                        "command interface '{interface}' required by controller '{name}' is \
                         not available"
                    ));
                }
            }
            for interface in self.resolved_state_interfaces(host) {
                if !registry.state_is_available(&interface) {
                    return Err(format!(
                        "state interface '{interface}' required by controller '{name}' is \
                         not available"
                    ));
                }
            }
        }
        Ok(())
    }

    /// Clear a request, retracting the availability of exported interfaces
    /// whose controller did not end up active.
    pub(crate) fn rollback_request(&self, request: &mut SwitchRequest, list: &[Arc<ControllerHost>]) {
        let registry = self.resource_manager.registry();
        for name in &request.to_chained_mode {
            let active = Self::find_in(list, name).is_some_and(|host| host.is_active());
            if !active {
                registry.set_reference_availability(name, false);
                registry.set_exported_state_availability(name, false);
            }
        }
        request.clear();
    }
}
