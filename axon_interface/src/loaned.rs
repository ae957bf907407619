//! Scoped loans of interface handles.
//!
//! A loan binds a handle to exactly one controller for the duration of its
//! active state. Command loans are exclusive (single writer), state loans
//! are shared. Dropping a loan runs its release hook, which clears the claim
//! in the registry.
//!
//! Loans absorb transient lock contention from introspection threads by
//! retrying the underlying non-blocking access a bounded number of times,
//! yielding between attempts. When all retries fail the controller sees "no
//! value this cycle" and is expected to hold its last value or skip.

use std::cell::Cell;
use std::sync::Arc;

use tracing::warn;

use crate::handle::Handle;

/// Default number of non-blocking attempts before giving up for the cycle.
pub const DEFAULT_MAX_TRIES: u32 = 10;

/// Hook run when a loan is dropped.
pub type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Access counters kept per loan, reported on drop.
#[derive(Debug, Clone, Copy, Default)]
struct LoanStatistics {
    total: u64,
    failed: u64,
    timeout: u64,
}

fn log_statistics(full_name: &str, stats: LoanStatistics) {
    if stats.failed > 0 || stats.timeout > 0 {
        warn!(
            interface = full_name,
            total = stats.total,
            failed = stats.failed,
            timeouts = stats.timeout,
            "loan saw lock contention during its lifetime"
        );
    }
}

/// Shared read loan over a state interface.
pub struct LoanedStateInterface {
    handle: Arc<Handle>,
    on_release: Option<ReleaseFn>,
    stats: Cell<LoanStatistics>,
}

impl LoanedStateInterface {
    /// Wrap a handle. `on_release` runs once on drop.
    pub fn new(handle: Arc<Handle>, on_release: Option<ReleaseFn>) -> Self {
        Self {
            handle,
            on_release,
            stats: Cell::new(LoanStatistics::default()),
        }
    }

    /// Full interface name.
    pub fn name(&self) -> &str {
        self.handle.full_name()
    }

    /// Owner prefix of the underlying handle.
    pub fn prefix(&self) -> &str {
        self.handle.prefix()
    }

    /// Read the value, retrying up to [`DEFAULT_MAX_TRIES`] times.
    pub fn get_optional(&self) -> Option<f64> {
        self.get_optional_with_tries(DEFAULT_MAX_TRIES)
    }

    /// Read the value with an explicit retry budget.
    pub fn get_optional_with_tries(&self, max_tries: u32) -> Option<f64> {
        let mut stats = self.stats.get();
        for _ in 0..max_tries {
            stats.total += 1;
            if let Some(value) = self.handle.get_optional() {
                self.stats.set(stats);
                return Some(value);
            }
            stats.failed += 1;
            std::thread::yield_now();
        }
        stats.timeout += 1;
        self.stats.set(stats);
        None
    }

    /// Read a bool-typed interface, retrying on contention.
    pub fn get_optional_bool(&self) -> Option<bool> {
        let mut stats = self.stats.get();
        for _ in 0..DEFAULT_MAX_TRIES {
            stats.total += 1;
            if let Some(value) = self.handle.get_optional_bool() {
                self.stats.set(stats);
                return Some(value);
            }
            stats.failed += 1;
            std::thread::yield_now();
        }
        stats.timeout += 1;
        self.stats.set(stats);
        None
    }
}

impl Drop for LoanedStateInterface {
    fn drop(&mut self) {
        log_statistics(self.handle.full_name(), self.stats.get());
        if let Some(release) = self.on_release.take() {
            release();
        }
    }
}

/// Exclusive write loan over a command interface.
///
/// At most one live command loan exists per handle; the registry enforces
/// this when the loan is created.
pub struct LoanedCommandInterface {
    handle: Arc<Handle>,
    on_release: Option<ReleaseFn>,
    stats: Cell<LoanStatistics>,
}

impl std::fmt::Debug for LoanedCommandInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoanedCommandInterface")
            .field("handle", &self.handle.full_name())
            .field("stats", &self.stats)
            .finish()
    }
}

impl LoanedCommandInterface {
    /// Wrap a handle. `on_release` runs once on drop.
    pub fn new(handle: Arc<Handle>, on_release: Option<ReleaseFn>) -> Self {
        Self {
            handle,
            on_release,
            stats: Cell::new(LoanStatistics::default()),
        }
    }

    /// Full interface name.
    pub fn name(&self) -> &str {
        self.handle.full_name()
    }

    /// Owner prefix of the underlying handle.
    pub fn prefix(&self) -> &str {
        self.handle.prefix()
    }

    /// Read back the current command (chainable controllers consume their
    /// reference interfaces this way).
    pub fn get_optional(&self) -> Option<f64> {
        let mut stats = self.stats.get();
        for _ in 0..DEFAULT_MAX_TRIES {
            stats.total += 1;
            if let Some(value) = self.handle.get_optional() {
                self.stats.set(stats);
                return Some(value);
            }
            stats.failed += 1;
            std::thread::yield_now();
        }
        stats.timeout += 1;
        self.stats.set(stats);
        None
    }

    /// Write the command, retrying up to [`DEFAULT_MAX_TRIES`] times.
    /// Returns `false` when every attempt lost the lock race.
    pub fn set_value(&self, value: f64) -> bool {
        let mut stats = self.stats.get();
        for _ in 0..DEFAULT_MAX_TRIES {
            stats.total += 1;
            if self.handle.set_value(value) {
                self.stats.set(stats);
                return true;
            }
            stats.failed += 1;
            std::thread::yield_now();
        }
        stats.timeout += 1;
        self.stats.set(stats);
        false
    }

    /// Write a bool command, retrying on contention.
    pub fn set_bool(&self, value: bool) -> bool {
        let mut stats = self.stats.get();
        for _ in 0..DEFAULT_MAX_TRIES {
            stats.total += 1;
            if self.handle.set_bool(value) {
                self.stats.set(stats);
                return true;
            }
            stats.failed += 1;
            std::thread::yield_now();
        }
        stats.timeout += 1;
        self.stats.set(stats);
        false
    }

    /// Write through the handle's installed limiter.
    pub fn set_limited_value(&self, value: f64) -> bool {
        self.handle.set_limited_value(value)
    }

    /// Whether the handle's limiter clamped the last limited write.
    pub fn is_limited(&self) -> bool {
        self.handle.is_limited()
    }
}

impl Drop for LoanedCommandInterface {
    fn drop(&mut self) {
        log_statistics(self.handle.full_name(), self.stats.get());
        if let Some(release) = self.on_release.take() {
            release();
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
