//! The control algorithm contract.
//!
//! A controller is user code loaded by type name. The orchestrator talks to
//! it through [`Controller`]: lifecycle callbacks (non-realtime), interface
//! configuration queries, and the periodic [`Controller::update`] entry
//! point (realtime). Controllers whose outputs can feed other controllers
//! additionally implement [`ChainableController`] and surface it through
//! [`Controller::as_chainable`].

use std::time::Duration;

use axon_interface::{InterfaceDescription, LoanedCommandInterface, LoanedStateInterface};

/// Result of a lifecycle callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    /// Transition may proceed.
    Success,
    /// Transition is refused; the controller keeps its prior state.
    Failure,
    /// The controller is broken; route through the error hook.
    Error,
}

/// Result of one update call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    /// Cycle completed.
    Ok,
    /// The controller failed; it will be deactivated on the next cycle and
    /// its fallback controllers activated.
    Error,
}

/// Which interfaces a controller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceConfigKind {
    /// Every interface the resource manager has available.
    All,
    /// The explicitly listed names.
    Individual,
    /// No interfaces of this kind.
    None,
}

/// A controller's command- or state-interface request.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceConfiguration {
    /// Request kind.
    pub kind: InterfaceConfigKind,
    /// Interface names, meaningful for [`InterfaceConfigKind::Individual`].
    pub names: Vec<String>,
}

impl InterfaceConfiguration {
    /// Claim everything available.
    pub fn all() -> Self {
        Self {
            kind: InterfaceConfigKind::All,
            names: Vec::new(),
        }
    }

    /// Claim the named interfaces.
    pub fn individual(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            kind: InterfaceConfigKind::Individual,
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Claim nothing.
    pub fn none() -> Self {
        Self {
            kind: InterfaceConfigKind::None,
            names: Vec::new(),
        }
    }
}

/// The loans held by an active controller, passed to every update.
pub struct ControllerIo<'a> {
    /// Exclusive command loans, in configuration order.
    pub commands: &'a mut [LoanedCommandInterface],
    /// Shared state loans, in configuration order.
    pub states: &'a [LoanedStateInterface],
}

impl ControllerIo<'_> {
    /// Find a command loan by full interface name.
    pub fn command(&mut self, name: &str) -> Option<&mut LoanedCommandInterface> {
        self.commands.iter_mut().find(|loan| loan.name() == name)
    }

    /// Find a state loan by full interface name.
    pub fn state(&self, name: &str) -> Option<&LoanedStateInterface> {
        self.states.iter().find(|loan| loan.name() == name)
    }
}

/// A user-supplied control algorithm.
///
/// All lifecycle callbacks run on non-realtime threads. `update` runs in
/// the realtime cycle (or on the controller's async worker thread) and must
/// not block or allocate.
pub trait Controller: Send {
    /// Called once right after loading.
    fn on_init(&mut self) -> CallbackResult {
        CallbackResult::Success
    }

    /// Read parameters, build internal state.
    fn on_configure(&mut self) -> CallbackResult {
        CallbackResult::Success
    }

    /// Interfaces are loaned; last chance to refuse activation.
    fn on_activate(&mut self) -> CallbackResult {
        CallbackResult::Success
    }

    /// About to lose the loans.
    fn on_deactivate(&mut self) -> CallbackResult {
        CallbackResult::Success
    }

    /// Drop configured state, return to unconfigured.
    fn on_cleanup(&mut self) -> CallbackResult {
        CallbackResult::Success
    }

    /// Final transition; the controller never runs again.
    fn on_shutdown(&mut self) -> CallbackResult {
        CallbackResult::Success
    }

    /// Error hook: invoked after a callback returned
    /// [`CallbackResult::Error`] or panicked. `Success` lands the
    /// controller in unconfigured, anything else finalizes it.
    fn on_error(&mut self) -> CallbackResult {
        CallbackResult::Success
    }

    /// Command interfaces this controller writes while active.
    fn command_interface_configuration(&self) -> InterfaceConfiguration;

    /// State interfaces this controller reads while active.
    fn state_interface_configuration(&self) -> InterfaceConfiguration;

    /// One control step. `period` is the measured time since this
    /// controller's previous update (not the manager period when the
    /// controller runs at a sub-rate).
    fn update(&mut self, now: Duration, period: Duration, io: &mut ControllerIo<'_>)
        -> UpdateResult;

    /// Chainable capability, when present.
    fn as_chainable(&mut self) -> Option<&mut dyn ChainableController> {
        None
    }
}

/// Capability of controllers whose outputs serve as inputs to others.
///
/// A chainable controller exports reference interfaces (command targets
/// other controllers write) and optionally state interfaces (read-only
/// outputs), both under the controller's own name as prefix. While in
/// chained mode its external input paths are expected to be disabled so the
/// exported references are the single write path.
pub trait ChainableController: Controller {
    /// Reference interfaces to export (writable by preceding controllers).
    fn export_reference_interfaces(&self) -> Vec<InterfaceDescription>;

    /// Read-only interfaces to export.
    fn export_state_interfaces(&self) -> Vec<InterfaceDescription> {
        Vec::new()
    }

    /// Toggle chained mode. Only called while inactive. Returning `false`
    /// refuses the switch.
    fn on_set_chained_mode(&mut self, _chained: bool) -> bool {
        true
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
