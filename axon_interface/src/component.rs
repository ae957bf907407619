//! Hardware component boundary.
//!
//! The resource manager drives hardware through this trait. Drivers
//! (fieldbus masters, simulators, sensor bridges) implement it; the
//! orchestrator core never talks to hardware directly.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::handle::{Handle, InterfaceDescription};

/// Lifecycle state of a hardware component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentState {
    /// Constructed, hardware not yet initialized.
    Unconfigured,
    /// Initialized, not participating in the read/write cycle.
    Inactive,
    /// Participating in the read/write cycle.
    Active,
    /// Shut down, never to return.
    Finalized,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unconfigured => "unconfigured",
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Finalized => "finalized",
        };
        write!(f, "{label}")
    }
}

/// Outcome of one component read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoResult {
    /// Cycle completed.
    Ok,
    /// Hard failure; controllers bound to this component must be
    /// deactivated.
    Error,
    /// Soft request from hardware (write only): deactivate the controllers
    /// commanding this component, hardware itself stays up.
    Deactivate,
}

impl IoResult {
    /// Combine per-component results, keeping the most severe.
    pub fn combine(self, other: IoResult) -> IoResult {
        use IoResult::*;
        match (self, other) {
            (Error, _) | (_, Error) => Error,
            (Deactivate, _) | (_, Deactivate) => Deactivate,
            _ => Ok,
        }
    }
}

/// Handles bound to a component at registration time.
///
/// The registry owns the handles; the component gets shared references so
/// its read cycle can publish sensor values and its write cycle can consume
/// commands.
#[derive(Default)]
pub struct ComponentIo {
    /// State handles exported by the component, in description order.
    pub states: Vec<Arc<Handle>>,
    /// Command handles exported by the component, in description order.
    pub commands: Vec<Arc<Handle>>,
}

/// Driver contract consumed by the resource manager.
///
/// `read` and `write` run inside the realtime cycle and must not block or
/// allocate. The mode-switch pair runs in two phases: `prepare` is the
/// non-realtime veto point, `perform` the realtime commit.
pub trait HardwareComponent: Send {
    /// Unique component name.
    fn name(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> ComponentState;

    /// Request a lifecycle transition; returns the state actually reached.
    fn set_state(&mut self, target: ComponentState) -> ComponentState;

    /// Descriptions of the state interfaces this component exports.
    fn state_interface_descriptions(&self) -> Vec<InterfaceDescription>;

    /// Descriptions of the command interfaces this component exports.
    fn command_interface_descriptions(&self) -> Vec<InterfaceDescription>;

    /// Receive the live handles created from the descriptions.
    fn bind(&mut self, io: ComponentIo);

    /// Read rate in Hz; 0 means "every manager cycle".
    fn rw_rate_hz(&self) -> u32 {
        0
    }

    /// Read hardware into the state handles.
    fn read(&mut self, now: Duration, period: Duration) -> IoResult;

    /// Write the command handles out to hardware.
    fn write(&mut self, now: Duration, period: Duration) -> IoResult;

    /// Non-realtime veto point for a command-mode switch. `start` and
    /// `stop` only contain interfaces owned by this component.
    fn prepare_command_mode_switch(&mut self, _start: &[String], _stop: &[String]) -> bool {
        true
    }

    /// Realtime commit of a previously prepared command-mode switch.
    fn perform_command_mode_switch(&mut self, _start: &[String], _stop: &[String]) -> bool {
        true
    }

    /// Clamp commands against hardware limits. Runs every cycle after the
    /// controller updates.
    fn enforce_command_limits(&mut self, _period: Duration) {}
}

// ─── Tests ──────────────────────────────────────────────────────────
