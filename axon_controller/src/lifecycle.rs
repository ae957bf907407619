//! Controller lifecycle as plain data.
//!
//! States and transitions:
//!
//! ```text
//! Unknown --init--> Unconfigured
//! Unconfigured --configure--> Inactive
//! Inactive --configure--> (cleanup -> Unconfigured) -> Inactive   (re-configure)
//! Inactive --activate--> Active
//! Active --deactivate--> Inactive
//! Inactive --cleanup--> Unconfigured
//! {Unconfigured, Inactive, Active} --shutdown--> Finalized
//! any --error--> Unconfigured or Finalized (via the error hook)
//! ```
//!
//! The table below is pure data; the callback plumbing (which determines
//! whether an allowed transition actually lands) lives in the host.

use std::fmt;

/// Lifecycle state of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    /// Constructed but `on_init` has not run.
    Unknown = 0,
    /// Loaded, not configured.
    Unconfigured = 1,
    /// Configured, not running.
    Inactive = 2,
    /// Running in the control cycle, loans held.
    Active = 3,
    /// Shut down, never to return.
    Finalized = 4,
}

impl LifecycleState {
    /// Decode from the atomic representation.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unknown,
            1 => Self::Unconfigured,
            2 => Self::Inactive,
            3 => Self::Active,
            _ => Self::Finalized,
        }
    }

    /// Human-readable label, as reported by the list services.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Unconfigured => "unconfigured",
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Finalized => "finalized",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// External triggers that drive lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Unknown → Unconfigured, right after loading.
    Init,
    /// Unconfigured/Inactive → Inactive.
    Configure,
    /// Inactive → Unconfigured.
    Cleanup,
    /// Inactive → Active.
    Activate,
    /// Active → Inactive.
    Deactivate,
    /// Any non-finalized → Finalized.
    Shutdown,
}

impl Transition {
    /// Label used in log and error messages.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Configure => "configure",
            Self::Cleanup => "cleanup",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Shutdown => "shutdown",
        }
    }

    /// Whether this transition is allowed from `state`.
    pub fn allowed_from(&self, state: LifecycleState) -> bool {
        use LifecycleState::*;
        match self {
            Self::Init => state == Unknown,
            Self::Configure => matches!(state, Unconfigured | Inactive),
            Self::Cleanup => state == Inactive,
            Self::Activate => state == Inactive,
            Self::Deactivate => state == Active,
            Self::Shutdown => matches!(state, Unconfigured | Inactive | Active),
        }
    }

    /// State reached when the callback returns success.
    pub fn target(&self) -> LifecycleState {
        match self {
            Self::Init => LifecycleState::Unconfigured,
            Self::Configure => LifecycleState::Inactive,
            Self::Cleanup => LifecycleState::Unconfigured,
            Self::Activate => LifecycleState::Active,
            Self::Deactivate => LifecycleState::Inactive,
            Self::Shutdown => LifecycleState::Finalized,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
