//! Manager error taxonomy.
//!
//! Everything non-fatal is returned to the caller with a readable message.
//! Contract violations (interface names without `/`, non-empty switch
//! request lists at entry) panic instead; they indicate a bug in the
//! manager, not a runtime condition.

use std::time::Duration;

use thiserror::Error;

use axon_controller::ControllerError;
use axon_interface::InterfaceError;

/// Errors surfaced by the manager's service operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Invalid configuration: unknown type, duplicate interface names,
    /// missing parameters.
    #[error("configuration error: {message}")]
    Configuration {
        /// What is wrong.
        message: String,
    },

    /// No loaded controller with this name.
    #[error("no controller with name '{name}' exists")]
    UnknownController {
        /// Requested name.
        name: String,
    },

    /// Operation requested against a controller in an incompatible state.
    #[error("lifecycle violation: {message}")]
    LifecycleViolation {
        /// What is wrong.
        message: String,
    },

    /// A required interface is absent, claimed, or otherwise unavailable.
    #[error("resource unavailable: {message}")]
    ResourceUnavailable {
        /// What is missing.
        message: String,
    },

    /// The chain topology would contain a cycle.
    #[error("chain cycle detected involving controller '{name}'")]
    ChainCycle {
        /// A controller on the cycle.
        name: String,
    },

    /// Switch validation failed.
    #[error("{message}")]
    SwitchRejected {
        /// Why the switch was rejected.
        message: String,
    },

    /// Hardware vetoed the command mode switch in the prepare phase.
    #[error("could not switch controllers since prepare command mode switch was rejected")]
    HardwareModeSwitchRejected,

    /// The realtime loop did not acknowledge the switch in time. Partial
    /// transitions committed before the timeout remain; query state and
    /// retry.
    #[error("switch controller timed out after {timeout:?}")]
    SwitchTimeout {
        /// The expired wait budget.
        timeout: Duration,
    },

    /// Error propagated from the controller layer.
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Error propagated from the interface layer.
    #[error(transparent)]
    Interface(#[from] InterfaceError),
}

impl ManagerError {
    /// Shorthand for [`ManagerError::Configuration`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Shorthand for [`ManagerError::LifecycleViolation`].
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::LifecycleViolation {
            message: message.into(),
        }
    }
}

/// Result type for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;
