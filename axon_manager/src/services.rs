//! Transport-agnostic service data types.
//!
//! The manager's control surface is a set of plain method calls returning
//! these records; an RPC binding (gRPC, D-Bus, whatever the deployment
//! uses) serializes them as-is.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Policy governing how switch-request validation failures are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    /// All-or-nothing: any invalid entry aborts the whole request.
    Strict,
    /// Drop invalid entries and switch the rest.
    BestEffort,
    /// Documented synonym of [`Strictness::BestEffort`].
    Auto,
    /// Documented synonym of [`Strictness::BestEffort`].
    ForceAuto,
}

impl Strictness {
    /// Collapse the documented synonyms onto the two implemented policies.
    pub fn resolve(self) -> Strictness {
        match self {
            Self::Strict => Self::Strict,
            Self::BestEffort => Self::BestEffort,
            Self::Auto => {
                warn!("strictness AUTO is not implemented, defaulting to BEST_EFFORT");
                Self::BestEffort
            }
            Self::ForceAuto => {
                debug!("strictness FORCE_AUTO is not implemented, defaulting to BEST_EFFORT");
                Self::BestEffort
            }
        }
    }

    /// Whether this (resolved) policy aborts on the first invalid entry.
    pub fn is_strict(self) -> bool {
        matches!(self, Self::Strict)
    }
}

/// One downstream connection of a controller in a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConnection {
    /// Name of the following controller.
    pub name: String,
    /// Reference interfaces of the following controller this controller
    /// writes.
    pub reference_interfaces: Vec<String>,
}

/// Full description of one loaded controller, as reported by the
/// list-controllers service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerStateInfo {
    /// Instance name.
    pub name: String,
    /// Registered type name.
    pub type_name: String,
    /// Lifecycle state label.
    pub state: String,
    /// Whether the controller exports chainable interfaces.
    pub is_chainable: bool,
    /// Whether the controller currently runs in chained mode.
    pub is_chained: bool,
    /// Whether updates run on a dedicated worker thread.
    pub is_async: bool,
    /// Update rate in Hz; 0 means the manager rate.
    pub update_rate_hz: u32,
    /// Command interfaces the configuration resolves to.
    pub required_command_interfaces: Vec<String>,
    /// State interfaces the configuration resolves to.
    pub required_state_interfaces: Vec<String>,
    /// Command interfaces currently claimed by this controller.
    pub claimed_interfaces: Vec<String>,
    /// Downstream chain connections.
    pub chain_connections: Vec<ChainConnection>,
    /// Reference interfaces exported by this controller (chainable only).
    pub reference_interfaces: Vec<String>,
    /// State interfaces exported by this controller (chainable only).
    pub exported_state_interfaces: Vec<String>,
}

/// One entry of the list-controller-types service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerTypeInfo {
    /// Registered type name.
    pub type_name: String,
    /// Base kind tag (`controller` / `chainable_controller`).
    pub base_kind: String,
}

// ─── Tests ──────────────────────────────────────────────────────────
