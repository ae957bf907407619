//! Controller type registry.
//!
//! Maps a type name to a factory producing fresh controller instances.
//! Constructed at startup via `register()` and handed to the manager by
//! value. No global state, testable in isolation.

use std::collections::BTreeMap;

use crate::controller::Controller;
use crate::error::ControllerError;

/// Factory function producing one controller instance.
pub type ControllerFactory = fn() -> Box<dyn Controller>;

/// Base kind of a registered type, reported by the list-types service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    /// Plain controller.
    Standard,
    /// Controller exporting reference/state interfaces for chaining.
    Chainable,
}

impl ControllerKind {
    /// Label used by the list-types service.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Standard => "controller",
            Self::Chainable => "chainable_controller",
        }
    }
}

/// Registry of available controller types.
#[derive(Default)]
pub struct ControllerRegistry {
    factories: BTreeMap<&'static str, (ControllerFactory, ControllerKind)>,
}

impl ControllerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller factory.
    ///
    /// # Panics
    /// Panics if the type name is already registered.
    pub fn register(&mut self, type_name: &'static str, kind: ControllerKind, factory: ControllerFactory) {
        if self.factories.contains_key(type_name) {
            panic!("controller type '{type_name}' is already registered");
        }
        self.factories.insert(type_name, (factory, kind));
    }

    /// Create a controller instance by type name.
    pub fn create(&self, type_name: &str) -> Result<Box<dyn Controller>, ControllerError> {
        let (factory, _) = self
            .factories
            .get(type_name)
            .ok_or_else(|| ControllerError::UnknownType {
                type_name: type_name.to_string(),
            })?;
        Ok(factory())
    }

    /// Whether a type name is registered.
    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// All registered types with their base kinds.
    pub fn types(&self) -> Vec<(&'static str, ControllerKind)> {
        self.factories
            .iter()
            .map(|(name, (_, kind))| (*name, *kind))
            .collect()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
