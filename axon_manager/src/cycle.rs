//! The periodic control cycle: read → update → write.
//!
//! Called by the loop host at the manager rate with an externally owned
//! [`RtContext`] scratch buffer, so the steady-state cycle allocates
//! nothing. Controllers run in the roster's (topological) order with
//! per-controller rate gating; a controller that fails is deactivated on
//! the next cycle and replaced by its fallback controllers.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use axon_controller::{ControllerHost, UpdateResult};
use axon_interface::IoResult;

use crate::manager::ControllerManager;

/// Jitter absorption for the per-controller rate gate: a controller whose
/// period has 99% elapsed runs now instead of drifting a full manager tick.
pub const RATE_GATE_JITTER_FACTOR: f64 = 0.99;

/// Scratch buffers reused across cycles, owned by the loop host.
#[derive(Default)]
pub struct RtContext {
    /// Controllers scheduled for deactivation this cycle (update errors
    /// and hardware read failures).
    deactivate_on_error: Vec<String>,
    /// Fallback controllers to activate for the failed ones.
    fallback: Vec<String>,
    /// Command interfaces gaining a writer in the fallback reshuffle.
    start_interfaces: Vec<String>,
    /// Command interfaces losing their writer in the fallback reshuffle.
    stop_interfaces: Vec<String>,
}

impl RtContext {
    /// Create empty scratch buffers.
    pub fn new() -> Self {
        Self::default()
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.iter().any(|entry| entry == &value) {
        list.push(value);
    }
}

impl ControllerManager {
    /// Hardware read phase. Failing components schedule their bound
    /// controllers for deactivation in this cycle's error-handling step.
    pub fn read(&self, ctx: &mut RtContext, now: Duration, period: Duration) {
        ctx.deactivate_on_error.clear();
        self.diagnostics.record_cycle_period(period.as_secs_f64());

        let (result, failed_components) = self.resource_manager.read_all(now, period);
        if result == IoResult::Error {
            error!(
                components = ?failed_components,
                "hardware read failed, deactivating the bound controllers"
            );
            for component in &failed_components {
                for controller in self.resource_manager.controllers_cached_for(component) {
                    push_unique(&mut ctx.deactivate_on_error, controller);
                }
            }
        }
    }

    /// Per-controller update phase, in roster order, rate-gated.
    pub fn update(&self, ctx: &mut RtContext, now: Duration, period: Duration) {
        let Some(rt_list) = self.roster.rt_list() else {
            return;
        };
        let manager_rate = self.config.update_rate_hz;

        for host in rt_list.iter() {
            if !host.is_active() {
                continue;
            }
            // An async controller about to be deactivated finishes its
            // current iteration instead of being triggered again.
            if self.switch.is_pending()
                && host.is_async()
                && self.switch.pending_deactivation_of(host.name())
            {
                debug!(
                    controller = host.name(),
                    "skipping update of async controller pending deactivation"
                );
                continue;
            }

            let controller_rate = host.update_rate_hz();
            let run_at_manager_rate = controller_rate == 0 || controller_rate >= manager_rate;
            let last_update = host.last_update_time();
            let first_update = last_update.is_none();
            let actual_period = match last_update {
                Some(last) => now.saturating_sub(last),
                None => period,
            };

            let due = run_at_manager_rate
                || first_update
                || actual_period.as_secs_f64() * controller_rate as f64
                    >= RATE_GATE_JITTER_FACTOR;
            if !due {
                continue;
            }

            let outcome = host.trigger_update(now, actual_period);
            if !outcome.triggered {
                continue;
            }
            host.set_last_update_time(now);
            if let Some(execution_time) = outcome.execution_time {
                host.record_execution_time(execution_time);
            }
            if !first_update {
                host.record_periodicity(actual_period);
            }
            if outcome.result == UpdateResult::Error {
                error!(controller = host.name(), "update returned an error");
                push_unique(&mut ctx.deactivate_on_error, host.name().to_string());
            }
        }

        self.resource_manager.enforce_command_limits(period);

        if !ctx.deactivate_on_error.is_empty() {
            self.handle_failed_controllers(ctx, &rt_list);
        }

        if self.switch.is_pending() {
            self.manage_switch();
        }
    }

    /// Hardware write phase. `Error` deactivates every controller bound to
    /// the failing components; `Deactivate` only those with live command
    /// interfaces on them.
    pub fn write(&self, ctx: &mut RtContext, now: Duration, period: Duration) {
        let (result, failed_components) = self.resource_manager.write_all(now, period);
        match result {
            IoResult::Ok => {}
            IoResult::Error => {
                error!(
                    components = ?failed_components,
                    "hardware write failed, deactivating the bound controllers"
                );
                let Some(rt_list) = self.roster.rt_list() else {
                    return;
                };
                let mut to_deactivate = Vec::new();
                for component in &failed_components {
                    for controller in self.resource_manager.controllers_cached_for(component) {
                        push_unique(&mut to_deactivate, controller);
                    }
                }
                // The hardware errored out of the active state; no mode
                // switch is possible or needed.
                self.deactivate_controllers(&rt_list, &to_deactivate);
            }
            IoResult::Deactivate => {
                let Some(rt_list) = self.roster.rt_list() else {
                    return;
                };
                let mut to_deactivate = Vec::new();
                for component in &failed_components {
                    for controller in self.resource_manager.controllers_cached_for(component) {
                        let Some(host) = Self::find_in(&rt_list, &controller) else {
                            // Repeated DEACTIVATE returns from the same
                            // component land here once the controller is
                            // already gone.
                            warn!(
                                controller = %controller,
                                component = %component,
                                "deactivate request for a controller that is no longer loaded"
                            );
                            continue;
                        };
                        if !host.is_active() {
                            // The component keeps returning the request
                            // until its own state machine moves on.
                            warn!(
                                controller = %controller,
                                component = %component,
                                "repeated deactivate request, controller already inactive"
                            );
                            continue;
                        }
                        if !self.resolved_command_interfaces(host).is_empty() {
                            push_unique(&mut to_deactivate, controller);
                        }
                    }
                }
                if !to_deactivate.is_empty() {
                    error!(
                        controllers = ?to_deactivate,
                        "hardware requested deactivation of commanding controllers"
                    );
                    self.mode_change_for(&rt_list, &[], &to_deactivate, ctx, "write");
                    self.deactivate_controllers(&rt_list, &to_deactivate);
                }
            }
        }
    }

    // ── Error-driven fallback activation ────────────────────────────

    fn handle_failed_controllers(
        &self,
        ctx: &mut RtContext,
        rt_list: &[Arc<ControllerHost>],
    ) {
        ctx.fallback.clear();

        for failed in ctx.deactivate_on_error.clone() {
            let Some(host) = Self::find_in(rt_list, &failed) else {
                continue;
            };
            for fallback_name in host.fallback_controllers() {
                push_unique(&mut ctx.fallback, fallback_name.clone());
                // Any active controller holding interfaces the fallback
                // needs has to go too.
                if let Some(fallback_host) = Self::find_in(rt_list, fallback_name) {
                    let needed = self.resolved_command_interfaces(fallback_host);
                    for other in rt_list.iter() {
                        if !other.is_active()
                            || ctx.deactivate_on_error.iter().any(|n| n == other.name())
                        {
                            continue;
                        }
                        let held = self.resolved_command_interfaces(other);
                        if held.iter().any(|interface| needed.contains(interface)) {
                            push_unique(
                                &mut ctx.deactivate_on_error,
                                other.name().to_string(),
                            );
                        }
                    }
                }
            }
        }

        error!(
            controllers = ?ctx.deactivate_on_error,
            "deactivating controllers after update errors"
        );
        if !ctx.fallback.is_empty() {
            error!(controllers = ?ctx.fallback, "activating fallback controllers");
        }

        let deactivate = ctx.deactivate_on_error.clone();
        let fallback = ctx.fallback.clone();
        self.mode_change_for(rt_list, &fallback, &deactivate, ctx, "update");
        self.deactivate_controllers(rt_list, &deactivate);
        if !fallback.is_empty() {
            self.activate_controllers(rt_list, &fallback);
        }
        self.diagnostics
            .publish_activity(&self.activity_snapshot(rt_list));
    }

    /// Prepare + perform the hardware command-mode change for a realtime
    /// reshuffle (fallbacks, write-side deactivation).
    fn mode_change_for(
        &self,
        rt_list: &[Arc<ControllerHost>],
        activate_names: &[String],
        deactivate_names: &[String],
        ctx: &mut RtContext,
        cycle_name: &str,
    ) {
        ctx.start_interfaces.clear();
        ctx.stop_interfaces.clear();
        for name in activate_names {
            if let Some(host) = Self::find_in(rt_list, name) {
                for interface in self.resolved_command_interfaces(host) {
                    push_unique(&mut ctx.start_interfaces, interface);
                }
            }
        }
        for name in deactivate_names {
            if let Some(host) = Self::find_in(rt_list, name) {
                for interface in self.resolved_command_interfaces(host) {
                    push_unique(&mut ctx.stop_interfaces, interface);
                }
            }
        }
        if ctx.start_interfaces.is_empty() && ctx.stop_interfaces.is_empty() {
            return;
        }
        let prepared = self
            .resource_manager
            .prepare_command_mode_switch(&ctx.start_interfaces, &ctx.stop_interfaces);
        let performed = prepared
            && self
                .resource_manager
                .perform_command_mode_switch(&ctx.start_interfaces, &ctx.stop_interfaces);
        if !performed {
            error!(
                cycle = cycle_name,
                "command mode switch failed while deactivating controllers"
            );
        }
    }

    // ── Switch commit (realtime side) ───────────────────────────────

    /// Apply a pending switch request inside the cycle. Guarded by a
    /// `try_lock`: when the service thread holds the request, the commit
    /// waits for the next cycle.
    pub(crate) fn manage_switch(&self) {
        let Some(request) = self.switch.try_take_for_rt() else {
            debug!("switch request busy, retrying next cycle");
            return;
        };

        if !self.resource_manager.perform_command_mode_switch(
            &request.activate_command_interfaces,
            &request.deactivate_command_interfaces,
        ) {
            error!("error while performing hardware command mode switch");
        }

        {
            let Some(rt_list) = self.roster.rt_list() else {
                self.switch.acknowledge(&request);
                return;
            };
            self.deactivate_controllers(&rt_list, &request.deactivate);
            self.switch_chained_mode(&rt_list, &request.to_chained_mode, true);
            self.switch_chained_mode(&rt_list, &request.from_chained_mode, false);
            if request.activate_asap {
                // Interfaces freed by the deactivations above are already
                // released, so activating in list order starts each
                // controller as soon as its claims can succeed.
                debug!("activating controllers as soon as possible");
            }
            self.activate_controllers(&rt_list, &request.activate);
        }

        self.switch.acknowledge(&request);
    }

    pub(crate) fn deactivate_controllers(
        &self,
        rt_list: &[Arc<ControllerHost>],
        names: &[String],
    ) {
        let registry = self.resource_manager.registry();
        for name in names {
            let Some(host) = Self::find_in(rt_list, name) else {
                error!(
                    controller = %name,
                    "deactivation requested but the controller is not in the realtime list"
                );
                continue;
            };
            if !host.is_active() {
                continue;
            }
            if let Err(err) = host.deactivate() {
                error!(controller = %name, error = %err, "deactivation failed");
                continue;
            }
            if host.is_chainable() {
                registry.set_reference_availability(name, false);
                registry.set_exported_state_availability(name, false);
            }
        }
    }

    fn switch_chained_mode(
        &self,
        rt_list: &[Arc<ControllerHost>],
        names: &[String],
        to_chained: bool,
    ) {
        let registry = self.resource_manager.registry();
        for name in names {
            let Some(host) = Self::find_in(rt_list, name) else {
                error!(
                    controller = %name,
                    to_chained,
                    "chained mode switch requested but the controller is not in the realtime list"
                );
                continue;
            };
            if host.is_active() {
                error!(
                    controller = %name,
                    "chained mode switch requested on an active controller"
                );
                continue;
            }
            if !host.set_chained_mode(to_chained) {
                error!(
                    controller = %name,
                    to_chained,
                    "controller refused the chained mode switch; restart the chain if control \
                     misbehaves"
                );
                continue;
            }
            if to_chained {
                // The exported interfaces are the chain's write path now;
                // a preceding controller activating later in this same
                // switch claims them.
                registry.set_reference_availability(name, true);
                registry.set_exported_state_availability(name, true);
            }
        }
    }

    pub(crate) fn activate_controllers(
        &self,
        rt_list: &[Arc<ControllerHost>],
        names: &[String],
    ) {
        let registry = self.resource_manager.registry();
        for name in names {
            let Some(host) = Self::find_in(rt_list, name) else {
                error!(
                    controller = %name,
                    "activation requested but the controller is not in the realtime list"
                );
                continue;
            };

            let command_names = self.resolved_command_interfaces(host);
            let mut command_loans = Vec::with_capacity(command_names.len());
            let mut claims_ok = true;
            for interface in &command_names {
                match registry.claim_command(interface, name) {
                    Ok(loan) => command_loans.push(loan),
                    Err(err) => {
                        error!(
                            controller = %name,
                            interface = %interface,
                            error = %err,
                            "resource conflict, skipping activation"
                        );
                        claims_ok = false;
                        break;
                    }
                }
            }
            if !claims_ok {
                continue;
            }

            let state_names = self.resolved_state_interfaces(host);
            let mut state_loans = Vec::with_capacity(state_names.len());
            for interface in &state_names {
                match registry.borrow_state(interface) {
                    Ok(loan) => state_loans.push(loan),
                    Err(err) => {
                        error!(
                            controller = %name,
                            interface = %interface,
                            error = %err,
                            "state interface missing, skipping activation"
                        );
                        claims_ok = false;
                        break;
                    }
                }
            }
            if !claims_ok {
                continue;
            }

            if let Err(err) = host.activate(command_loans, state_loans) {
                error!(controller = %name, error = %err, "activation failed");
                continue;
            }
            if host.is_chainable() {
                registry.set_reference_availability(name, true);
                registry.set_exported_state_availability(name, true);
            }
        }
    }
}
