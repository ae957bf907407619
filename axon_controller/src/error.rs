//! Error types for the controller layer.

use thiserror::Error;

/// Errors raised by the controller registry and host.
#[derive(Debug, Clone, Error)]
pub enum ControllerError {
    /// No factory registered under the requested type name.
    #[error("unknown controller type '{type_name}'")]
    UnknownType {
        /// Requested type name.
        type_name: String,
    },

    /// The requested lifecycle transition is not allowed from the current
    /// state.
    #[error("controller '{name}' cannot {transition} from '{from}' state")]
    InvalidTransition {
        /// Controller name.
        name: String,
        /// State at the time of the request.
        from: &'static str,
        /// Requested transition.
        transition: &'static str,
    },

    /// The user callback refused the transition.
    #[error("controller '{name}' refused to {transition}")]
    CallbackFailed {
        /// Controller name.
        name: String,
        /// Requested transition.
        transition: &'static str,
    },

    /// The user callback errored or panicked; the controller was routed
    /// through its error hook.
    #[error("controller '{name}' errored during {transition}")]
    CallbackError {
        /// Controller name.
        name: String,
        /// Requested transition.
        transition: &'static str,
    },
}
