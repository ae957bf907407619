//! The interface arena: every live handle, keyed by full name.
//!
//! The registry is the single owner of all [`Handle`]s in a running
//! manager. Command and state interfaces live in separate namespaces, each
//! with availability tracking; command interfaces additionally track their
//! claimant so that at most one command loan exists per handle at any
//! instant.
//!
//! Chainable controllers export interfaces into the same arena under their
//! own name as prefix. Exported entries carry their exporter so they can be
//! flipped available/unavailable as the exporting controller activates and
//! deactivates, and removed wholesale on cleanup.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{InterfaceError, InterfaceResult};
use crate::handle::{Handle, InterfaceDescription};
use crate::loaned::{LoanedCommandInterface, LoanedStateInterface};

struct CommandEntry {
    handle: Arc<Handle>,
    available: bool,
    claimant: Option<String>,
    exporter: Option<String>,
}

struct StateEntry {
    handle: Arc<Handle>,
    available: bool,
    exporter: Option<String>,
}

#[derive(Default)]
struct RegistryInner {
    commands: BTreeMap<String, CommandEntry>,
    states: BTreeMap<String, StateEntry>,
}

/// Arena of all interface handles with claim and availability tracking.
#[derive(Default)]
pub struct InterfaceRegistry {
    inner: Mutex<RegistryInner>,
}

impl InterfaceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hardware-owned command interface, initially available.
    pub fn insert_command(&self, description: &InterfaceDescription) -> InterfaceResult<Arc<Handle>> {
        self.insert_command_entry(description, true, None)
    }

    /// Register a hardware-owned state interface, initially available.
    pub fn insert_state(&self, description: &InterfaceDescription) -> InterfaceResult<Arc<Handle>> {
        self.insert_state_entry(description, true, None)
    }

    fn insert_command_entry(
        &self,
        description: &InterfaceDescription,
        available: bool,
        exporter: Option<String>,
    ) -> InterfaceResult<Arc<Handle>> {
        let mut inner = self.inner.lock();
        let name = description.full_name();
        if inner.commands.contains_key(&name) {
            return Err(InterfaceError::DuplicateInterface { name });
        }
        let handle = Arc::new(Handle::new(description));
        inner.commands.insert(
            name,
            CommandEntry {
                handle: Arc::clone(&handle),
                available,
                claimant: None,
                exporter,
            },
        );
        Ok(handle)
    }

    fn insert_state_entry(
        &self,
        description: &InterfaceDescription,
        available: bool,
        exporter: Option<String>,
    ) -> InterfaceResult<Arc<Handle>> {
        let mut inner = self.inner.lock();
        let name = description.full_name();
        if inner.states.contains_key(&name) {
            return Err(InterfaceError::DuplicateInterface { name });
        }
        let handle = Arc::new(Handle::new(description));
        inner.states.insert(
            name,
            StateEntry {
                handle: Arc::clone(&handle),
                available,
                exporter,
            },
        );
        Ok(handle)
    }

    /// Import the reference and exported-state interfaces of a chainable
    /// controller. Both sets start unavailable; availability follows the
    /// exporting controller's activation.
    pub fn import_controller_exports(
        &self,
        owner: &str,
        references: &[InterfaceDescription],
        states: &[InterfaceDescription],
    ) -> InterfaceResult<()> {
        for description in references {
            self.insert_command_entry(description, false, Some(owner.to_string()))?;
        }
        for description in states {
            self.insert_state_entry(description, false, Some(owner.to_string()))?;
        }
        debug!(
            controller = owner,
            references = references.len(),
            states = states.len(),
            "imported exported interfaces"
        );
        Ok(())
    }

    /// Remove every interface exported by `owner`.
    pub fn remove_controller_exports(&self, owner: &str) {
        let mut inner = self.inner.lock();
        inner
            .commands
            .retain(|_, entry| entry.exporter.as_deref() != Some(owner));
        inner
            .states
            .retain(|_, entry| entry.exporter.as_deref() != Some(owner));
    }

    /// Flip availability of the reference interfaces exported by `owner`.
    pub fn set_reference_availability(&self, owner: &str, available: bool) {
        let mut inner = self.inner.lock();
        for entry in inner.commands.values_mut() {
            if entry.exporter.as_deref() == Some(owner) {
                entry.available = available;
            }
        }
    }

    /// Flip availability of the state interfaces exported by `owner`.
    pub fn set_exported_state_availability(&self, owner: &str, available: bool) {
        let mut inner = self.inner.lock();
        for entry in inner.states.values_mut() {
            if entry.exporter.as_deref() == Some(owner) {
                entry.available = available;
            }
        }
    }

    /// Claim a command interface exclusively for `claimant`.
    ///
    /// The returned loan releases the claim on drop.
    pub fn claim_command(
        self: &Arc<Self>,
        name: &str,
        claimant: &str,
    ) -> InterfaceResult<LoanedCommandInterface> {
        let mut inner = self.inner.lock();
        let entry = inner
            .commands
            .get_mut(name)
            .ok_or_else(|| InterfaceError::UnknownInterface {
                name: name.to_string(),
            })?;
        if !entry.available {
            return Err(InterfaceError::Unavailable {
                name: name.to_string(),
            });
        }
        if let Some(existing) = &entry.claimant {
            return Err(InterfaceError::AlreadyClaimed {
                name: name.to_string(),
                claimant: existing.clone(),
            });
        }
        entry.claimant = Some(claimant.to_string());
        let handle = Arc::clone(&entry.handle);
        drop(inner);

        let registry = Arc::clone(self);
        let released_name = name.to_string();
        Ok(LoanedCommandInterface::new(
            handle,
            Some(Box::new(move || registry.release_command(&released_name))),
        ))
    }

    /// Borrow a state interface (shared; any number of live loans).
    pub fn borrow_state(&self, name: &str) -> InterfaceResult<LoanedStateInterface> {
        let inner = self.inner.lock();
        let entry = inner
            .states
            .get(name)
            .ok_or_else(|| InterfaceError::UnknownInterface {
                name: name.to_string(),
            })?;
        if !entry.available {
            return Err(InterfaceError::Unavailable {
                name: name.to_string(),
            });
        }
        Ok(LoanedStateInterface::new(Arc::clone(&entry.handle), None))
    }

    fn release_command(&self, name: &str) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.commands.get_mut(name) {
            entry.claimant = None;
        }
    }

    /// Handle lookup, command namespace.
    pub fn command_handle(&self, name: &str) -> Option<Arc<Handle>> {
        self.inner
            .lock()
            .commands
            .get(name)
            .map(|entry| Arc::clone(&entry.handle))
    }

    /// Handle lookup, state namespace.
    pub fn state_handle(&self, name: &str) -> Option<Arc<Handle>> {
        self.inner
            .lock()
            .states
            .get(name)
            .map(|entry| Arc::clone(&entry.handle))
    }

    /// All command interface names.
    pub fn command_interface_names(&self) -> Vec<String> {
        self.inner.lock().commands.keys().cloned().collect()
    }

    /// All state interface names.
    pub fn state_interface_names(&self) -> Vec<String> {
        self.inner.lock().states.keys().cloned().collect()
    }

    /// Command interfaces currently available for claiming.
    pub fn available_command_interfaces(&self) -> Vec<String> {
        self.inner
            .lock()
            .commands
            .iter()
            .filter(|(_, entry)| entry.available)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// State interfaces currently available for borrowing.
    pub fn available_state_interfaces(&self) -> Vec<String> {
        self.inner
            .lock()
            .states
            .iter()
            .filter(|(_, entry)| entry.available)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Whether a command interface exists and is available.
    pub fn command_is_available(&self, name: &str) -> bool {
        self.inner
            .lock()
            .commands
            .get(name)
            .is_some_and(|entry| entry.available)
    }

    /// Whether a state interface exists and is available.
    pub fn state_is_available(&self, name: &str) -> bool {
        self.inner
            .lock()
            .states
            .get(name)
            .is_some_and(|entry| entry.available)
    }

    /// Whether a command interface is currently claimed.
    pub fn command_is_claimed(&self, name: &str) -> bool {
        self.inner
            .lock()
            .commands
            .get(name)
            .is_some_and(|entry| entry.claimant.is_some())
    }

    /// Claimant of a command interface, if any.
    pub fn claimed_by(&self, name: &str) -> Option<String> {
        self.inner
            .lock()
            .commands
            .get(name)
            .and_then(|entry| entry.claimant.clone())
    }

    /// Command interfaces currently claimed by `controller`.
    pub fn claimed_interfaces_of(&self, controller: &str) -> Vec<String> {
        self.inner
            .lock()
            .commands
            .iter()
            .filter(|(_, entry)| entry.claimant.as_deref() == Some(controller))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Reference interfaces exported by `owner`.
    pub fn reference_interfaces_of(&self, owner: &str) -> Vec<String> {
        self.inner
            .lock()
            .commands
            .iter()
            .filter(|(_, entry)| entry.exporter.as_deref() == Some(owner))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// State interfaces exported by `owner`.
    pub fn exported_state_interfaces_of(&self, owner: &str) -> Vec<String> {
        self.inner
            .lock()
            .states
            .iter()
            .filter(|(_, entry)| entry.exporter.as_deref() == Some(owner))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
