//! # AXON Interface Layer
//!
//! Hardware signal layer for the AXON controller orchestrator. A running
//! machine exposes a pool of named scalar signals ("interfaces"): state
//! interfaces carry sensor feedback, command interfaces carry actuator
//! targets. This crate provides:
//!
//! - [`handle::Handle`]: one named signal guarded by a non-blocking
//!   reader-writer lock, so the realtime loop never waits on an
//!   introspection reader,
//! - [`loaned::LoanedCommandInterface`] / [`loaned::LoanedStateInterface`]:
//!   scoped borrows handed to exactly one active controller (exclusive for
//!   commands, shared for states),
//! - [`registry::InterfaceRegistry`]: the arena owning all handles, with
//!   availability and claim tracking,
//! - [`component::HardwareComponent`]: the driver boundary consumed by the
//!   resource manager,
//! - [`resource_manager::ResourceManager`]: component pool + registry,
//!   sequencing hardware read/write and command-mode switches.

pub mod component;
pub mod error;
pub mod handle;
pub mod loaned;
pub mod registry;
pub mod resource_manager;
pub mod sim;

pub use component::{ComponentState, HardwareComponent, IoResult};
pub use error::{InterfaceError, InterfaceResult};
pub use handle::{split_full_name, Handle, InterfaceDataType, InterfaceDescription, InterfaceValue};
pub use loaned::{LoanedCommandInterface, LoanedStateInterface};
pub use registry::InterfaceRegistry;
pub use resource_manager::ResourceManager;
