//! Async update worker: one OS thread per async controller.
//!
//! The realtime loop never waits for an async controller. Each cycle it
//! posts `(now, period)` into a single-slot channel and collects the result
//! of the previous iteration, pipelining the controller by one cycle. The
//! worker thread does the actual update under the controller core lock.
//!
//! Nothing is allocated per cycle: both channels are bounded(1) and the
//! request/result payloads are `Copy`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::controller::UpdateResult;
use crate::host::{run_update_locked, ControllerCore};

/// Sleep quantum for the non-realtime idle wait.
const IDLE_POLL: Duration = Duration::from_micros(100);

/// Worker poll period while waiting for triggers.
const TRIGGER_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
struct UpdateRequest {
    now: Duration,
    period: Duration,
}

/// Result of one completed async iteration.
#[derive(Debug, Clone, Copy)]
pub struct CompletedUpdate {
    /// What the controller returned (or `Error` if it panicked).
    pub result: UpdateResult,
    /// Wall time the update took on the worker thread.
    pub execution_time: Duration,
}

/// Handle to a running async update thread.
pub struct AsyncUpdateWorker {
    trigger_tx: Sender<UpdateRequest>,
    result_rx: Receiver<CompletedUpdate>,
    busy: Arc<AtomicBool>,
    skip: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AsyncUpdateWorker {
    /// Spawn the worker thread for `name`, updating the given core.
    pub fn spawn(name: &str, core: Arc<Mutex<ControllerCore>>) -> Self {
        let (trigger_tx, trigger_rx) = bounded::<UpdateRequest>(1);
        let (result_tx, result_rx) = bounded::<CompletedUpdate>(1);
        let busy = Arc::new(AtomicBool::new(false));
        let skip = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));

        let thread_busy = Arc::clone(&busy);
        let thread_skip = Arc::clone(&skip);
        let thread_stop = Arc::clone(&stop);
        let thread_results = result_rx.clone();
        let thread_name = name.to_string();
        let thread = std::thread::Builder::new()
            .name(format!("axon-async-{name}"))
            .spawn(move || {
                while !thread_stop.load(Ordering::SeqCst) {
                    let request = match trigger_rx.recv_timeout(TRIGGER_POLL) {
                        Ok(request) => request,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    };
                    if thread_skip.load(Ordering::SeqCst) {
                        continue;
                    }
                    thread_busy.store(true, Ordering::SeqCst);
                    let started = Instant::now();
                    let result = {
                        let mut guard = core.lock();
                        run_update_locked(&thread_name, &mut guard, request.now, request.period)
                    };
                    let completed = CompletedUpdate {
                        result,
                        execution_time: started.elapsed(),
                    };
                    // Single-slot result: an unconsumed previous result is
                    // stale, replace it. Publish before clearing the busy
                    // flag so a waiter observes the finished iteration.
                    if result_tx.is_full() {
                        let _ = thread_results.try_recv();
                    }
                    let _ = result_tx.try_send(completed);
                    thread_busy.store(false, Ordering::SeqCst);
                }
                debug!(controller = %thread_name, "async update worker exiting");
            })
            .expect("spawning async update worker thread");

        Self {
            trigger_tx,
            result_rx,
            busy,
            skip,
            stop,
            thread: Some(thread),
        }
    }

    /// Post a trigger and collect the previous iteration's result.
    ///
    /// Returns `(enqueued, previous)`. `enqueued` is `false` when the
    /// worker has not consumed the previous trigger yet (the controller is
    /// running slower than it is being triggered).
    pub fn trigger(&self, now: Duration, period: Duration) -> (bool, Option<CompletedUpdate>) {
        let previous = self.result_rx.try_recv().ok();
        let enqueued = self.trigger_tx.try_send(UpdateRequest { now, period }).is_ok();
        (enqueued, previous)
    }

    /// Stop executing newly posted triggers (called before deactivation).
    pub fn skip_new_triggers(&self) {
        self.skip.store(true, Ordering::SeqCst);
    }

    /// Block until no update is in flight and no trigger is queued.
    ///
    /// Not realtime-safe; must be called from the non-realtime path before
    /// the controller's loans are released.
    pub fn wait_for_update_to_finish(&self) {
        while self.busy.load(Ordering::SeqCst) || !self.trigger_tx.is_empty() {
            std::thread::sleep(IDLE_POLL);
        }
    }
}

impl Drop for AsyncUpdateWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("async update worker thread panicked during shutdown");
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
