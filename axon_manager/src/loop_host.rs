//! The host thread pacing the control cycle.
//!
//! Drives `read → update → write` at the manager rate. With the `rt`
//! feature the thread locks its pages, pins itself to a CPU, takes
//! SCHED_FIFO priority and paces on `clock_nanosleep(TIMER_ABSTIME)` for
//! drift-free cycles; without it, `Instant`-based sleeping approximates the
//! period (good enough for simulation and tests).
//!
//! Cycle timing belongs to the manager's [`crate::diagnostics`] collector:
//! the read phase feeds the periodicity window, the loop host reports
//! budget overruns, and the collected summary is logged when the loop
//! stops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::cycle::RtContext;
use crate::manager::ControllerManager;

// ─── RT setup ───────────────────────────────────────────────────────

/// Errors during realtime thread setup.
#[derive(Debug, thiserror::Error)]
#[error("realtime setup failed: {0}")]
pub struct RtSetupError(String);

/// Lock all current and future memory pages.
#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), RtSetupError> {
    use nix::sys::mman::{mlockall, MlockallFlags};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| RtSetupError(format!("mlockall failed: {e}")))?;
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), RtSetupError> {
    Ok(())
}

/// Pin the current thread to a specific CPU core.
#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), RtSetupError> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| RtSetupError(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| RtSetupError(format!("sched_setaffinity failed: {e}")))?;
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), RtSetupError> {
    Ok(())
}

/// Set SCHED_FIFO with the given priority.
#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), RtSetupError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(RtSetupError(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), RtSetupError> {
    Ok(())
}

/// Perform the realtime setup sequence for the calling thread.
///
/// No-op without the `rt` feature.
pub fn rt_setup(cpu_core: usize, rt_priority: i32) -> Result<(), RtSetupError> {
    rt_mlockall()?;
    rt_set_affinity(cpu_core)?;
    rt_set_scheduler(rt_priority)?;
    Ok(())
}

// ─── Loop host ──────────────────────────────────────────────────────

/// Scheduling options for the loop thread.
#[derive(Debug, Clone)]
pub struct LoopOptions {
    /// CPU core to pin to (`rt` feature only).
    pub cpu_core: usize,
    /// SCHED_FIFO priority (`rt` feature only).
    pub rt_priority: i32,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            cpu_core: 0,
            rt_priority: 80,
        }
    }
}

/// Drives the manager's cycle at its configured rate.
pub struct LoopHost {
    manager: Arc<ControllerManager>,
    options: LoopOptions,
    stop: Arc<AtomicBool>,
    /// Absolute wake time for drift-free pacing (`rt` feature).
    #[cfg(feature = "rt")]
    next_wake: Option<nix::sys::time::TimeSpec>,
}

impl LoopHost {
    /// Create a host for the manager.
    pub fn new(manager: Arc<ControllerManager>, options: LoopOptions) -> Self {
        Self {
            manager,
            options,
            stop: Arc::new(AtomicBool::new(false)),
            #[cfg(feature = "rt")]
            next_wake: None,
        }
    }

    /// Flag that stops the loop at the next cycle boundary. Clone it
    /// before calling [`LoopHost::run`].
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Enter the cycle loop on the calling thread; returns when the stop
    /// flag is raised.
    pub fn run(&mut self) -> Result<(), RtSetupError> {
        rt_setup(self.options.cpu_core, self.options.rt_priority)?;

        let period = self.manager.period();
        info!(
            rate_hz = self.manager.update_rate_hz(),
            "control loop running"
        );

        let mut ctx = RtContext::new();
        let clock = Arc::clone(self.manager.clock());
        let mut last_cycle_start = clock.now();
        let mut cycles: u64 = 0;

        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            let wall_start = Instant::now();
            let now = clock.now();
            let measured_period = now.saturating_sub(last_cycle_start);
            let effective_period = if measured_period.is_zero() {
                period
            } else {
                measured_period
            };
            last_cycle_start = now;

            self.manager.read(&mut ctx, now, effective_period);
            self.manager.update(&mut ctx, now, effective_period);
            self.manager.write(&mut ctx, now, effective_period);
            cycles += 1;

            let elapsed = wall_start.elapsed();
            if elapsed > period {
                self.manager.diagnostics().record_overrun();
                warn!(
                    cycle_ns = elapsed.as_nanos() as i64,
                    budget_ns = period.as_nanos() as i64,
                    "cycle overrun"
                );
            }

            self.pace(period, elapsed);
        }

        let diagnostics = self.manager.diagnostics();
        match diagnostics.cycle_periodicity_summary() {
            Some(summary) => info!(
                cycles,
                overruns = diagnostics.overrun_count(),
                mean_rate_hz = format!("{:.1}", summary.mean),
                min_rate_hz = format!("{:.1}", summary.min),
                "control loop stopped"
            ),
            None => info!(cycles, "control loop stopped"),
        }
        Ok(())
    }

    /// Absolute-time sleep on CLOCK_MONOTONIC: each wake time is the
    /// previous one plus the period, so jitter does not accumulate.
    #[cfg(feature = "rt")]
    fn pace(&mut self, period: Duration, _elapsed: Duration) {
        use nix::time::{clock_gettime, clock_nanosleep, ClockId, ClockNanosleepFlags};

        let next = match self.next_wake {
            Some(previous) => timespec_add_ns(previous, period.as_nanos() as i64),
            None => match clock_gettime(ClockId::CLOCK_MONOTONIC) {
                Ok(now) => timespec_add_ns(now, period.as_nanos() as i64),
                Err(err) => {
                    warn!(error = %err, "clock_gettime failed, skipping pacing");
                    return;
                }
            },
        };
        self.next_wake = Some(next);
        let _ = clock_nanosleep(
            ClockId::CLOCK_MONOTONIC,
            ClockNanosleepFlags::TIMER_ABSTIME,
            &next,
        );
    }

    /// Relative sleep for the remaining budget (simulation mode).
    #[cfg(not(feature = "rt"))]
    fn pace(&mut self, period: Duration, elapsed: Duration) {
        if let Some(remaining) = period.checked_sub(elapsed) {
            std::thread::sleep(remaining);
        }
    }
}

/// Add nanoseconds to a TimeSpec.
#[cfg(feature = "rt")]
fn timespec_add_ns(ts: nix::sys::time::TimeSpec, ns: i64) -> nix::sys::time::TimeSpec {
    use nix::sys::time::TimeSpec;
    let mut secs = ts.tv_sec();
    let mut nanos = ts.tv_nsec() + ns;
    while nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }
    TimeSpec::new(secs, nanos)
}

// ─── Tests ──────────────────────────────────────────────────────────
