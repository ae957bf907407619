//! Double-buffered controller roster.
//!
//! Two list slots and an atomic index give the realtime loop a stable
//! snapshot while service threads prepare the next one:
//!
//! - the realtime reader publishes which slot it uses (`used_by_rt`), loads
//!   `updated` and try-reads that slot, never blocking,
//! - writers serialize on a plain admin mutex (call sites are structured so
//!   re-entry cannot happen), build the new list in the unused slot, flip
//!   `updated`, then retire the old slot once the realtime thread has moved
//!   off it (100 µs spin-sleep, falling back to the slot lock when no
//!   realtime reader is attached).
//!
//! An optional on-switch callback fires after each flip.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};

use axon_controller::ControllerHost;

/// Sleep quantum for the retire spin.
const RETIRE_POLL: Duration = Duration::from_micros(100);

/// Sentinel: the realtime thread has not read any slot yet.
const NO_RT_READER: usize = usize::MAX;

type HostList = Vec<Arc<ControllerHost>>;

/// Callback fired after each roster flip.
pub type OnSwitchCallback = Box<dyn Fn() + Send + Sync>;

/// The double buffer.
pub struct ControllerRoster {
    slots: [RwLock<HostList>; 2],
    updated: AtomicUsize,
    used_by_rt: AtomicUsize,
    admin: Mutex<()>,
    on_switch: Mutex<Option<OnSwitchCallback>>,
}

impl Default for ControllerRoster {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerRoster {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self {
            slots: [RwLock::new(Vec::new()), RwLock::new(Vec::new())],
            updated: AtomicUsize::new(0),
            used_by_rt: AtomicUsize::new(NO_RT_READER),
            admin: Mutex::new(()),
            on_switch: Mutex::new(None),
        }
    }

    /// Realtime snapshot: marks the slot in use and try-reads it.
    ///
    /// `None` only during the short window in which a writer retires the
    /// slot this reader raced onto; the cycle is skipped, not delayed.
    pub fn rt_list(&self) -> Option<RwLockReadGuard<'_, HostList>> {
        let index = self.updated.load(Ordering::Acquire);
        self.used_by_rt.store(index, Ordering::Release);
        self.slots[index].try_read()
    }

    /// Serialize a writer; the guard exposes the mutation API.
    pub fn lock(&self) -> RosterWriteGuard<'_> {
        RosterWriteGuard {
            roster: self,
            _admin: self.admin.lock(),
        }
    }

    /// Install the post-flip callback.
    pub fn set_on_switch(&self, callback: OnSwitchCallback) {
        *self.on_switch.lock() = Some(callback);
    }

    fn notify_switch(&self) {
        if let Some(callback) = self.on_switch.lock().as_ref() {
            callback();
        }
    }
}

/// Writer access to the roster, holding the admin mutex.
pub struct RosterWriteGuard<'a> {
    roster: &'a ControllerRoster,
    _admin: MutexGuard<'a, ()>,
}

impl RosterWriteGuard<'_> {
    /// Clone of the current (updated) list. Cheap: `Arc` per entry.
    pub fn updated_list(&self) -> HostList {
        let index = self.roster.updated.load(Ordering::Acquire);
        self.roster.slots[index].read().clone()
    }

    /// Find a controller by name in the current list.
    pub fn find(&self, name: &str) -> Option<Arc<ControllerHost>> {
        self.updated_list()
            .iter()
            .find(|host| host.name() == name)
            .cloned()
    }

    /// Publish a new list: write it into the unused slot, flip, retire the
    /// old slot once the realtime thread has moved off it.
    pub fn publish(&self, new_list: HostList) {
        let old_index = self.roster.updated.load(Ordering::Acquire);
        let new_index = 1 - old_index;

        *self.roster.slots[new_index].write() = new_list;
        self.roster.updated.store(new_index, Ordering::Release);

        loop {
            if self.roster.used_by_rt.load(Ordering::Acquire) != old_index {
                self.roster.slots[old_index].write().clear();
                break;
            }
            // The realtime thread still points at the old slot. If it is
            // between cycles the slot lock is free and the retire can
            // proceed; otherwise wait out the in-flight cycle.
            if let Some(mut slot) = self.roster.slots[old_index].try_write() {
                slot.clear();
                break;
            }
            std::thread::sleep(RETIRE_POLL);
        }
        self.roster.notify_switch();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axon_controller::{
        Controller, ControllerIo, ControllerOptions, InterfaceConfiguration, UpdateResult,
    };
    use std::sync::atomic::AtomicUsize;

    struct NullController;

    impl Controller for NullController {
        fn command_interface_configuration(&self) -> InterfaceConfiguration {
            InterfaceConfiguration::none()
        }

        fn state_interface_configuration(&self) -> InterfaceConfiguration {
            InterfaceConfiguration::none()
        }

        fn update(
            &mut self,
            _now: Duration,
            _period: Duration,
            _io: &mut ControllerIo<'_>,
        ) -> UpdateResult {
            UpdateResult::Ok
        }
    }

    fn host(name: &str) -> Arc<ControllerHost> {
        Arc::new(ControllerHost::new(
            name,
            "NullController",
            ControllerOptions::default(),
            Box::new(NullController),
        ))
    }

    #[test]
    fn publish_makes_list_visible_to_rt() {
        let roster = ControllerRoster::new();
        {
            let guard = roster.lock();
            guard.publish(vec![host("a"), host("b")]);
        }
        let rt = roster.rt_list().unwrap();
        let names: Vec<_> = rt.iter().map(|h| h.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn writer_mutates_copy_not_live_list() {
        let roster = ControllerRoster::new();
        roster.lock().publish(vec![host("a")]);

        let guard = roster.lock();
        let mut copy = guard.updated_list();
        copy.push(host("b"));
        // Not yet published: the realtime view still has one entry.
        assert_eq!(roster.rt_list().unwrap().len(), 1);
        guard.publish(copy);
        assert_eq!(roster.rt_list().unwrap().len(), 2);
    }

    #[test]
    fn find_by_name() {
        let roster = ControllerRoster::new();
        roster.lock().publish(vec![host("pid1")]);
        let guard = roster.lock();
        assert!(guard.find("pid1").is_some());
        assert!(guard.find("missing").is_none());
    }

    #[test]
    fn on_switch_callback_fires_per_publish() {
        let roster = ControllerRoster::new();
        let flips = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&flips);
        roster.set_on_switch(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        roster.lock().publish(vec![host("a")]);
        roster.lock().publish(vec![host("a"), host("b")]);
        assert_eq!(flips.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn publish_without_rt_reader_does_not_hang() {
        let roster = ControllerRoster::new();
        for round in 0..10 {
            let guard = roster.lock();
            let mut list = guard.updated_list();
            list.push(host(&format!("c{round}")));
            guard.publish(list);
        }
        assert_eq!(roster.rt_list().unwrap().len(), 10);
    }
}
