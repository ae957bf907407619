//! Error types for the interface layer.

use thiserror::Error;

/// Errors raised by the registry and resource manager.
#[derive(Debug, Clone, Error)]
pub enum InterfaceError {
    /// An interface with the same full name is already registered.
    #[error("interface '{name}' is already registered")]
    DuplicateInterface {
        /// Full interface name (`prefix/name`).
        name: String,
    },

    /// The requested interface does not exist.
    #[error("interface '{name}' does not exist")]
    UnknownInterface {
        /// Full interface name.
        name: String,
    },

    /// The requested interface exists but is currently not available.
    #[error("interface '{name}' is not available")]
    Unavailable {
        /// Full interface name.
        name: String,
    },

    /// A command interface is already claimed by another controller.
    #[error("command interface '{name}' is already claimed by '{claimant}'")]
    AlreadyClaimed {
        /// Full interface name.
        name: String,
        /// Name of the controller holding the claim.
        claimant: String,
    },

    /// No hardware component with the given name is registered.
    #[error("hardware component '{name}' is not registered")]
    ComponentNotFound {
        /// Component name.
        name: String,
    },

    /// A hardware component rejected the requested lifecycle transition.
    #[error("component '{name}' rejected transition from {from:?} to {to:?}")]
    ComponentTransitionRejected {
        /// Component name.
        name: String,
        /// State at the time of the request.
        from: crate::component::ComponentState,
        /// Requested target state.
        to: crate::component::ComponentState,
    },
}

/// Result type for interface-layer operations.
pub type InterfaceResult<T> = Result<T, InterfaceError>;
