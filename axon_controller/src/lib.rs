//! # AXON Controller Layer
//!
//! Everything the orchestrator knows about a single controller:
//!
//! - [`controller::Controller`]: the user-supplied control algorithm, with
//!   an optional [`controller::ChainableController`] capability for
//!   controllers whose outputs feed other controllers,
//! - [`lifecycle`]: the plain-data lifecycle state machine
//!   (unconfigured → inactive → active → finalized),
//! - [`host::ControllerHost`]: one per loaded controller: wraps the
//!   algorithm with its lifecycle, interface loans, update-rate bookkeeping
//!   and (for async controllers) a dedicated worker thread,
//! - [`registry::ControllerRegistry`]: the type-name to factory mapping used by
//!   the load operation.
//!
//! User callbacks never unwind into the realtime loop: every invocation is
//! wrapped in `catch_unwind` and a panic becomes an error value.

pub mod controller;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod registry;
pub mod stats;
pub mod worker;

pub use controller::{
    CallbackResult, ChainableController, Controller, ControllerIo, InterfaceConfigKind,
    InterfaceConfiguration, UpdateResult,
};
pub use error::ControllerError;
pub use host::{ControllerHost, ControllerOptions, TriggerOutcome};
pub use lifecycle::LifecycleState;
pub use registry::{ControllerFactory, ControllerKind, ControllerRegistry};
pub use stats::RollingStats;
