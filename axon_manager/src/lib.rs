//! # AXON Controller Manager
//!
//! Realtime control orchestrator for robotic hardware. Multiplexes
//! independently developed controllers onto a shared pool of hardware
//! signals, guaranteeing at-most-one writer per command interface,
//! enforcing lifecycle transitions, and sequencing the periodic
//! read → update → write cycle at a fixed rate.
//!
//! ## Architecture
//!
//! - [`roster`]: double-buffered controller list: the realtime loop reads
//!   a stable snapshot while service threads mutate the other copy,
//! - [`chain`]: the "feeds into" topology over controllers, producing the
//!   per-cycle execution order,
//! - [`switch`]: the atomic transition protocol between service threads
//!   and the realtime loop,
//! - [`cycle`]: the read, update (rate-gated), write executor with
//!   error-driven fallback activation,
//! - [`manager`]: the service surface: load, configure, switch, unload,
//!   introspection,
//! - [`loop_host`]: the thread that paces the cycle (SCHED_FIFO +
//!   `clock_nanosleep` under the `rt` feature, `Instant`-paced otherwise),
//! - [`diagnostics`]: rolling cycle statistics and activity events.
//!
//! ## Realtime discipline
//!
//! The realtime path never blocks: lifecycle state reads are atomic, the
//! roster snapshot is lock-free for the reader, every other acquisition is
//! a `try_lock` where failure means "skip, retry next cycle".

pub mod chain;
pub mod clock;
pub mod config;
pub mod cycle;
pub mod diagnostics;
pub mod error;
pub mod loop_host;
pub mod manager;
pub mod roster;
pub mod services;
pub mod switch;

pub use clock::{Clock, SimClock, SteadyClock};
pub use config::{ControllerEntry, ManagerConfig};
pub use cycle::RtContext;
pub use error::{ManagerError, ManagerResult};
pub use loop_host::LoopHost;
pub use manager::ControllerManager;
pub use services::{ControllerStateInfo, Strictness};
