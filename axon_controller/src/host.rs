//! Controller host: lifecycle, loans and update triggering for one
//! loaded controller.
//!
//! The host is the only code that touches user controller callbacks. Every
//! invocation runs under `catch_unwind`; a panic is logged and treated as
//! [`CallbackResult::Error`], routing the controller through its error hook
//! instead of unwinding into the caller.
//!
//! The realtime loop reads the lifecycle state from an atomic and triggers
//! updates through `try_lock` only; a host whose core is held by a
//! non-realtime thread simply skips the cycle.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use axon_interface::{InterfaceDescription, LoanedCommandInterface, LoanedStateInterface};

use crate::controller::{
    CallbackResult, Controller, ControllerIo, InterfaceConfiguration, UpdateResult,
};
use crate::error::ControllerError;
use crate::lifecycle::{LifecycleState, Transition};
use crate::stats::{RollingStats, StatsSummary};
use crate::worker::AsyncUpdateWorker;

/// Window size for the per-controller rolling statistics.
const STATS_WINDOW: usize = 100;

/// Sentinel for "activated, first update pending".
const JUST_ACTIVATED: u64 = u64::MAX;

/// Per-controller options resolved at load time.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Requested update rate. Clamped to the manager rate at configure
    /// time.
    pub update_rate_hz: u32,
    /// Run updates on a dedicated worker thread.
    pub is_async: bool,
    /// Controllers activated automatically when this one fails mid-cycle.
    pub fallback_controllers: Vec<String>,
    /// Parameter files the controller reads in its configure callback.
    pub params_files: Vec<String>,
    /// Free-form arguments forwarded to the controller.
    pub extra_args: Vec<String>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            update_rate_hz: 0,
            is_async: false,
            fallback_controllers: Vec::new(),
            params_files: Vec::new(),
            extra_args: Vec::new(),
        }
    }
}

/// The algorithm plus the loans it holds while active.
///
/// Lives behind the host's mutex; the async worker shares it.
pub struct ControllerCore {
    /// The user algorithm.
    pub controller: Box<dyn Controller>,
    /// Exclusive command loans, configuration order.
    pub commands: Vec<LoanedCommandInterface>,
    /// Shared state loans, configuration order.
    pub states: Vec<LoanedStateInterface>,
}

impl ControllerCore {
    /// Wrap an algorithm with no loans.
    pub fn new(controller: Box<dyn Controller>) -> Self {
        Self {
            controller,
            commands: Vec::new(),
            states: Vec::new(),
        }
    }
}

/// Run one update against a locked core, converting panics to errors.
pub(crate) fn run_update_locked(
    name: &str,
    core: &mut ControllerCore,
    now: Duration,
    period: Duration,
) -> UpdateResult {
    let ControllerCore {
        controller,
        commands,
        states,
    } = core;
    let mut io = ControllerIo {
        commands: commands.as_mut_slice(),
        states: states.as_slice(),
    };
    match catch_unwind(AssertUnwindSafe(|| controller.update(now, period, &mut io))) {
        Ok(result) => result,
        Err(_) => {
            error!(controller = name, "update panicked");
            UpdateResult::Error
        }
    }
}

/// What a trigger attempt produced.
#[derive(Debug, Clone, Copy)]
pub struct TriggerOutcome {
    /// Whether an update was actually started (sync) or enqueued (async).
    pub triggered: bool,
    /// Update result (for async controllers, the previous iteration's).
    pub result: UpdateResult,
    /// Measured execution time, when an iteration completed.
    pub execution_time: Option<Duration>,
}

impl TriggerOutcome {
    fn skipped() -> Self {
        Self {
            triggered: false,
            result: UpdateResult::Ok,
            execution_time: None,
        }
    }
}

/// One loaded controller: algorithm, lifecycle, loans, update plumbing.
pub struct ControllerHost {
    name: String,
    type_name: String,
    options: ControllerOptions,
    /// Live update rate; diverges from the requested one when clamped at
    /// configure time.
    update_rate_hz: AtomicU64,
    is_chainable: bool,
    state: AtomicU8,
    chained_mode: AtomicBool,
    core: Arc<Mutex<ControllerCore>>,
    worker: Mutex<Option<AsyncUpdateWorker>>,
    /// Nanoseconds of the controller's last update, or
    /// [`JUST_ACTIVATED`].
    last_update_ns: AtomicU64,
    execution_stats: Mutex<RollingStats>,
    periodicity_stats: Mutex<RollingStats>,
}

impl ControllerHost {
    /// Wrap a freshly created controller. The host starts in
    /// [`LifecycleState::Unknown`]; call [`ControllerHost::init`] next.
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        options: ControllerOptions,
        mut controller: Box<dyn Controller>,
    ) -> Self {
        let is_chainable = controller.as_chainable().is_some();
        let update_rate_hz = AtomicU64::new(options.update_rate_hz as u64);
        Self {
            name: name.into(),
            type_name: type_name.into(),
            options,
            update_rate_hz,
            is_chainable,
            state: AtomicU8::new(LifecycleState::Unknown as u8),
            chained_mode: AtomicBool::new(false),
            core: Arc::new(Mutex::new(ControllerCore::new(controller))),
            worker: Mutex::new(None),
            last_update_ns: AtomicU64::new(JUST_ACTIVATED),
            execution_stats: Mutex::new(RollingStats::new(STATS_WINDOW)),
            periodicity_stats: Mutex::new(RollingStats::new(STATS_WINDOW)),
        }
    }

    /// Controller instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registered type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Current update rate; 0 means "manager rate".
    pub fn update_rate_hz(&self) -> u32 {
        self.update_rate_hz.load(Ordering::Relaxed) as u32
    }

    /// Clamp the update rate (configure-time, when it exceeds the manager
    /// rate).
    pub fn clamp_update_rate(&self, rate_hz: u32) {
        self.update_rate_hz.store(rate_hz as u64, Ordering::Relaxed);
    }

    /// Whether updates run on a dedicated worker thread.
    pub fn is_async(&self) -> bool {
        self.options.is_async
    }

    /// Whether the controller carries the chainable capability.
    pub fn is_chainable(&self) -> bool {
        self.is_chainable
    }

    /// Whether the controller's reference interfaces are currently the
    /// write path (chained mode).
    pub fn is_in_chained_mode(&self) -> bool {
        self.chained_mode.load(Ordering::SeqCst)
    }

    /// Fallback controllers activated when this one fails mid-cycle.
    pub fn fallback_controllers(&self) -> &[String] {
        &self.options.fallback_controllers
    }

    /// Parameter files from the manager configuration.
    pub fn params_files(&self) -> &[String] {
        &self.options.params_files
    }

    /// Free-form arguments from the manager configuration.
    pub fn extra_args(&self) -> &[String] {
        &self.options.extra_args
    }

    /// Current lifecycle state (atomic read; realtime-safe).
    pub fn lifecycle_state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Shortcut: state == Active.
    pub fn is_active(&self) -> bool {
        self.lifecycle_state() == LifecycleState::Active
    }

    /// Shortcut: state == Inactive.
    pub fn is_inactive(&self) -> bool {
        self.lifecycle_state() == LifecycleState::Inactive
    }

    fn set_state(&self, state: LifecycleState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// The controller's command-interface request.
    pub fn command_interface_configuration(&self) -> InterfaceConfiguration {
        self.core.lock().controller.command_interface_configuration()
    }

    /// The controller's state-interface request.
    pub fn state_interface_configuration(&self) -> InterfaceConfiguration {
        self.core.lock().controller.state_interface_configuration()
    }

    /// Reference/state interfaces a chainable controller exports, `None`
    /// for non-chainable controllers.
    ///
    /// Exported interfaces always live under the controller's instance
    /// name; whatever prefix the controller wrote is overwritten here.
    pub fn exported_interfaces(
        &self,
    ) -> Option<(Vec<InterfaceDescription>, Vec<InterfaceDescription>)> {
        let mut core = self.core.lock();
        let chainable = core.controller.as_chainable()?;
        let rename = |mut descriptions: Vec<InterfaceDescription>| {
            for description in &mut descriptions {
                description.prefix = self.name.clone();
            }
            descriptions
        };
        Some((
            rename(chainable.export_reference_interfaces()),
            rename(chainable.export_state_interfaces()),
        ))
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    fn invoke_callback(
        &self,
        core: &mut ControllerCore,
        transition: Transition,
    ) -> CallbackResult {
        let call = |controller: &mut Box<dyn Controller>| match transition {
            Transition::Init => controller.on_init(),
            Transition::Configure => controller.on_configure(),
            Transition::Cleanup => controller.on_cleanup(),
            Transition::Activate => controller.on_activate(),
            Transition::Deactivate => controller.on_deactivate(),
            Transition::Shutdown => controller.on_shutdown(),
        };
        match catch_unwind(AssertUnwindSafe(|| call(&mut core.controller))) {
            Ok(result) => result,
            Err(_) => {
                error!(
                    controller = %self.name,
                    transition = transition.label(),
                    "callback panicked"
                );
                CallbackResult::Error
            }
        }
    }

    /// Run the error hook and land in unconfigured or finalized.
    fn run_error_hook(&self, core: &mut ControllerCore) {
        core.commands.clear();
        core.states.clear();
        let hook = catch_unwind(AssertUnwindSafe(|| core.controller.on_error()));
        match hook {
            Ok(CallbackResult::Success) => {
                warn!(controller = %self.name, "error hook recovered, controller unconfigured");
                self.set_state(LifecycleState::Unconfigured);
            }
            _ => {
                error!(controller = %self.name, "error hook failed, controller finalized");
                self.set_state(LifecycleState::Finalized);
            }
        }
    }

    fn transition(&self, transition: Transition) -> Result<(), ControllerError> {
        let from = self.lifecycle_state();
        if !transition.allowed_from(from) {
            return Err(ControllerError::InvalidTransition {
                name: self.name.clone(),
                from: from.label(),
                transition: transition.label(),
            });
        }
        let mut core = self.core.lock();
        match self.invoke_callback(&mut core, transition) {
            CallbackResult::Success => {
                self.set_state(transition.target());
                debug!(
                    controller = %self.name,
                    state = transition.target().label(),
                    "lifecycle transition"
                );
                Ok(())
            }
            CallbackResult::Failure => Err(ControllerError::CallbackFailed {
                name: self.name.clone(),
                transition: transition.label(),
            }),
            CallbackResult::Error => {
                self.run_error_hook(&mut core);
                Err(ControllerError::CallbackError {
                    name: self.name.clone(),
                    transition: transition.label(),
                })
            }
        }
    }

    /// Unknown → Unconfigured, right after loading.
    pub fn init(&self) -> Result<(), ControllerError> {
        self.transition(Transition::Init)
    }

    /// Configure, taking the re-configure path (cleanup first) from
    /// inactive.
    pub fn configure(&self) -> Result<(), ControllerError> {
        if self.lifecycle_state() == LifecycleState::Inactive {
            debug!(controller = %self.name, "cleaning up before re-configure");
            self.transition(Transition::Cleanup)?;
        }
        self.transition(Transition::Configure)
    }

    /// Inactive → Unconfigured.
    pub fn cleanup(&self) -> Result<(), ControllerError> {
        self.transition(Transition::Cleanup)
    }

    /// Any primary state → Finalized.
    pub fn shutdown(&self) -> Result<(), ControllerError> {
        self.transition(Transition::Shutdown)
    }

    /// Assign the loans and activate.
    ///
    /// On any failure the loans are dropped (releasing their claims) and
    /// the controller keeps or loses its state per the callback result.
    pub fn activate(
        &self,
        commands: Vec<LoanedCommandInterface>,
        states: Vec<LoanedStateInterface>,
    ) -> Result<(), ControllerError> {
        let from = self.lifecycle_state();
        if !Transition::Activate.allowed_from(from) {
            return Err(ControllerError::InvalidTransition {
                name: self.name.clone(),
                from: from.label(),
                transition: Transition::Activate.label(),
            });
        }
        let mut core = self.core.lock();
        core.commands = commands;
        core.states = states;
        match self.invoke_callback(&mut core, Transition::Activate) {
            CallbackResult::Success => {
                self.execution_stats.lock().reset();
                self.periodicity_stats.lock().reset();
                self.last_update_ns.store(JUST_ACTIVATED, Ordering::SeqCst);
                self.set_state(LifecycleState::Active);
                if self.options.is_async {
                    *self.worker.lock() =
                        Some(AsyncUpdateWorker::spawn(&self.name, Arc::clone(&self.core)));
                }
                Ok(())
            }
            CallbackResult::Failure => {
                core.commands.clear();
                core.states.clear();
                Err(ControllerError::CallbackFailed {
                    name: self.name.clone(),
                    transition: Transition::Activate.label(),
                })
            }
            CallbackResult::Error => {
                self.run_error_hook(&mut core);
                Err(ControllerError::CallbackError {
                    name: self.name.clone(),
                    transition: Transition::Activate.label(),
                })
            }
        }
    }

    /// Deactivate and release every loan.
    ///
    /// For async controllers the worker is stopped first; this blocks until
    /// any in-flight update finished, so it must not be called from the
    /// realtime path, except through `manage_switch`, which has already
    /// stopped triggering the controller.
    pub fn deactivate(&self) -> Result<(), ControllerError> {
        let from = self.lifecycle_state();
        if !Transition::Deactivate.allowed_from(from) {
            return Err(ControllerError::InvalidTransition {
                name: self.name.clone(),
                from: from.label(),
                transition: Transition::Deactivate.label(),
            });
        }
        if let Some(worker) = self.worker.lock().take() {
            worker.skip_new_triggers();
            worker.wait_for_update_to_finish();
        }
        let mut core = self.core.lock();
        let result = self.invoke_callback(&mut core, Transition::Deactivate);
        core.commands.clear();
        core.states.clear();
        match result {
            CallbackResult::Success => {
                self.set_state(LifecycleState::Inactive);
                Ok(())
            }
            CallbackResult::Failure => {
                // Loans are gone either way; the controller cannot stay
                // active without them.
                warn!(controller = %self.name, "deactivate refused, forcing inactive");
                self.set_state(LifecycleState::Inactive);
                Err(ControllerError::CallbackFailed {
                    name: self.name.clone(),
                    transition: Transition::Deactivate.label(),
                })
            }
            CallbackResult::Error => {
                self.run_error_hook(&mut core);
                Err(ControllerError::CallbackError {
                    name: self.name.clone(),
                    transition: Transition::Deactivate.label(),
                })
            }
        }
    }

    /// Toggle chained mode. Only legal while not active.
    pub fn set_chained_mode(&self, chained: bool) -> bool {
        if self.is_active() {
            error!(
                controller = %self.name,
                "chained mode cannot change while the controller is active"
            );
            return false;
        }
        if !self.is_chainable {
            return false;
        }
        let mut core = self.core.lock();
        let accepted = match core.controller.as_chainable() {
            Some(chainable) => {
                match catch_unwind(AssertUnwindSafe(|| chainable.on_set_chained_mode(chained))) {
                    Ok(accepted) => accepted,
                    Err(_) => {
                        error!(controller = %self.name, "on_set_chained_mode panicked");
                        false
                    }
                }
            }
            None => false,
        };
        if accepted {
            self.chained_mode.store(chained, Ordering::SeqCst);
        }
        accepted
    }

    // ── Update path ─────────────────────────────────────────────────

    /// Trigger one update. Synchronous controllers run inline; async
    /// controllers get the request posted and report the previous
    /// iteration's result.
    pub fn trigger_update(&self, now: Duration, period: Duration) -> TriggerOutcome {
        if self.options.is_async {
            let Some(worker_guard) = self.worker.try_lock() else {
                return TriggerOutcome::skipped();
            };
            let Some(worker) = worker_guard.as_ref() else {
                return TriggerOutcome::skipped();
            };
            let (enqueued, previous) = worker.trigger(now, period);
            match previous {
                Some(completed) => TriggerOutcome {
                    triggered: enqueued,
                    result: completed.result,
                    execution_time: Some(completed.execution_time),
                },
                None => TriggerOutcome {
                    triggered: enqueued,
                    result: UpdateResult::Ok,
                    execution_time: None,
                },
            }
        } else {
            let Some(mut core) = self.core.try_lock() else {
                return TriggerOutcome::skipped();
            };
            let started = Instant::now();
            let result = run_update_locked(&self.name, &mut core, now, period);
            TriggerOutcome {
                triggered: true,
                result,
                execution_time: Some(started.elapsed()),
            }
        }
    }

    /// Stop executing new async triggers (pre-deactivation).
    pub fn prepare_for_deactivation(&self) {
        if let Some(worker) = self.worker.lock().as_ref() {
            worker.skip_new_triggers();
        }
    }

    /// Wait until no async update is in flight. Not realtime-safe.
    pub fn wait_for_update_to_finish(&self) {
        if let Some(worker) = self.worker.lock().as_ref() {
            worker.wait_for_update_to_finish();
        }
    }

    // ── Rate gating bookkeeping ─────────────────────────────────────

    /// Time of the last update, `None` right after activation.
    pub fn last_update_time(&self) -> Option<Duration> {
        match self.last_update_ns.load(Ordering::Relaxed) {
            JUST_ACTIVATED => None,
            nanos => Some(Duration::from_nanos(nanos)),
        }
    }

    /// Record the time of an update that just ran.
    pub fn set_last_update_time(&self, now: Duration) {
        self.last_update_ns
            .store(now.as_nanos() as u64, Ordering::Relaxed);
    }

    // ── Statistics ──────────────────────────────────────────────────

    /// Record a measured execution time (realtime path; skips when the
    /// diagnostics reader holds the window).
    pub fn record_execution_time(&self, execution: Duration) {
        if let Some(mut stats) = self.execution_stats.try_lock() {
            stats.record(execution.as_secs_f64() * 1e6);
        }
    }

    /// Record a measured update period in Hz terms (realtime path).
    pub fn record_periodicity(&self, period: Duration) {
        let seconds = period.as_secs_f64();
        if seconds <= 0.0 {
            return;
        }
        if let Some(mut stats) = self.periodicity_stats.try_lock() {
            stats.record(1.0 / seconds);
        }
    }

    /// Execution-time summary in microseconds.
    pub fn execution_time_summary(&self) -> Option<StatsSummary> {
        self.execution_stats.lock().summary()
    }

    /// Periodicity summary in Hz.
    pub fn periodicity_summary(&self) -> Option<StatsSummary> {
        self.periodicity_stats.lock().summary()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
