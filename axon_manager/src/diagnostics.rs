//! Manager-level diagnostics: cycle statistics and activity events.
//!
//! Per-controller execution and periodicity windows live on the controller
//! hosts; this module aggregates the manager's own cycle periodicity and
//! budget overruns, and publishes activity events (roster swaps, fallback
//! reshuffles) through an installable callback.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use axon_controller::stats::{RollingStats, StatsSummary};

/// Window size for the manager cycle statistics.
const CYCLE_STATS_WINDOW: usize = 1_000;

/// Name + lifecycle state, as carried by an activity event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedState {
    /// Controller name.
    pub name: String,
    /// Lifecycle state label at event time.
    pub state: String,
}

/// Snapshot published whenever the controller roster changes shape.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ActivityEvent {
    /// Every loaded controller with its state.
    pub controllers: Vec<NamedState>,
}

/// Callback receiving activity events. Runs on the thread that triggered
/// the event; realtime callers fire it only after their cycle work is done.
pub type ActivityCallback = Box<dyn Fn(&ActivityEvent) + Send + Sync>;

/// Diagnostics collector.
pub struct Diagnostics {
    cycle_periodicity: Mutex<RollingStats>,
    /// Cycles whose work exceeded the manager period.
    overruns: AtomicU64,
    on_activity: RwLock<Option<ActivityCallback>>,
}

impl Diagnostics {
    /// Create a collector with empty windows.
    pub fn new() -> Self {
        Self {
            cycle_periodicity: Mutex::new(RollingStats::new(CYCLE_STATS_WINDOW)),
            overruns: AtomicU64::new(0),
            on_activity: RwLock::new(None),
        }
    }

    /// Record one measured cycle period (realtime path; skips when the
    /// reader holds the window).
    pub fn record_cycle_period(&self, period_s: f64) {
        if period_s <= 0.0 {
            return;
        }
        if let Some(mut stats) = self.cycle_periodicity.try_lock() {
            stats.record(1.0 / period_s);
        }
    }

    /// Cycle periodicity summary in Hz.
    pub fn cycle_periodicity_summary(&self) -> Option<StatsSummary> {
        self.cycle_periodicity.lock().summary()
    }

    /// Count a cycle that blew its period budget.
    pub fn record_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of budget overruns since startup.
    pub fn overrun_count(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Install the activity callback.
    pub fn set_activity_callback(&self, callback: ActivityCallback) {
        *self.on_activity.write() = Some(callback);
    }

    /// Publish an activity event to the installed callback, if any.
    pub fn publish_activity(&self, event: &ActivityEvent) {
        if let Some(guard) = self.on_activity.try_read() {
            if let Some(callback) = guard.as_ref() {
                callback(event);
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
