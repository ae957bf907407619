//! Interface handles: one named signal, one non-blocking RW lock.
//!
//! A [`Handle`] carries a single typed scalar (`f64` or `bool`) named
//! `prefix/interface` (e.g. `joint1/position`). All accessors are
//! non-blocking: a reader or writer that loses the lock race gets "no value
//! this attempt" instead of stalling the realtime cycle. Consumers tolerate
//! the occasional miss: the controller retries next cycle, the
//! introspection publisher skips the sample.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Declared data type of an interface. Immutable after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceDataType {
    /// 64-bit float scalar.
    #[default]
    Double,
    /// Boolean flag (e.g. a gripper latch or an enable line).
    Bool,
}

impl fmt::Display for InterfaceDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Double => write!(f, "double"),
            Self::Bool => write!(f, "bool"),
        }
    }
}

impl FromStr for InterfaceDataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "double" => Ok(Self::Double),
            "bool" => Ok(Self::Bool),
            other => Err(format!(
                "invalid interface data type '{other}', supported types are double and bool"
            )),
        }
    }
}

/// Current value of a handle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InterfaceValue {
    /// Float value.
    Double(f64),
    /// Boolean value.
    Bool(bool),
}

impl InterfaceValue {
    /// Data type of this value.
    pub fn data_type(&self) -> InterfaceDataType {
        match self {
            Self::Double(_) => InterfaceDataType::Double,
            Self::Bool(_) => InterfaceDataType::Bool,
        }
    }
}

/// Construction record for a handle.
///
/// Hardware components and chainable controllers describe the interfaces
/// they export with this record; the registry turns each description into a
/// live [`Handle`].
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceDescription {
    /// Owner prefix: a joint/sensor identifier or a controller name.
    pub prefix: String,
    /// Interface name within the prefix (e.g. `position`).
    pub name: String,
    /// Declared data type.
    pub data_type: InterfaceDataType,
    /// Initial value. `None` means NaN for doubles, `false` for bools.
    pub initial_value: Option<InterfaceValue>,
}

impl InterfaceDescription {
    /// Shorthand for a double-typed description with no initial value.
    pub fn double(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            name: name.into(),
            data_type: InterfaceDataType::Double,
            initial_value: None,
        }
    }

    /// Shorthand for a bool-typed description with no initial value.
    pub fn boolean(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            name: name.into(),
            data_type: InterfaceDataType::Bool,
            initial_value: None,
        }
    }

    /// Full name, `prefix/name`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.prefix, self.name)
    }
}

/// Split a full interface name at the first `/`.
///
/// # Panics
/// Panics when the name contains no `/`. Every interface name is
/// `prefix/interface` by contract and a bare name is a programming error,
/// not a runtime condition.
pub fn split_full_name(full_name: &str) -> (&str, &str) {
    match full_name.split_once('/') {
        Some((prefix, interface)) => (prefix, interface),
        None => panic!("interface name '{full_name}' has no '/' separator"),
    }
}

/// Limiter installed on a command interface: maps a requested value to a
/// (possibly clamped) value plus a flag telling whether limiting occurred.
pub type CommandLimiter = Box<dyn Fn(f64) -> (f64, bool) + Send + Sync>;

/// A single named signal with non-blocking access.
///
/// The declared data type is fixed at construction. Accessing a handle with
/// the wrong type panics; that is a contract violation between the
/// controller and the hardware description, never a runtime race. The one
/// permitted widening is `bool` read as `double` (0.0/1.0), which logs a
/// one-shot warning.
pub struct Handle {
    prefix: String,
    interface_name: String,
    full_name: String,
    data_type: InterfaceDataType,
    value: RwLock<InterfaceValue>,
    limiter: RwLock<Option<CommandLimiter>>,
    is_limited: AtomicBool,
    bool_cast_warned: AtomicBool,
}

impl Handle {
    /// Create a handle from a description.
    pub fn new(description: &InterfaceDescription) -> Self {
        let initial = match (description.data_type, description.initial_value) {
            (InterfaceDataType::Double, Some(InterfaceValue::Double(v))) => {
                InterfaceValue::Double(v)
            }
            (InterfaceDataType::Double, _) => InterfaceValue::Double(f64::NAN),
            (InterfaceDataType::Bool, Some(InterfaceValue::Bool(b))) => InterfaceValue::Bool(b),
            (InterfaceDataType::Bool, _) => InterfaceValue::Bool(false),
        };
        let full_name = description.full_name();
        // Validates the prefix/name contract up front.
        let _ = split_full_name(&full_name);
        Self {
            prefix: description.prefix.clone(),
            interface_name: description.name.clone(),
            full_name,
            data_type: description.data_type,
            value: RwLock::new(initial),
            limiter: RwLock::new(None),
            is_limited: AtomicBool::new(false),
            bool_cast_warned: AtomicBool::new(false),
        }
    }

    /// Owner prefix (joint, sensor or controller name).
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Interface name within the prefix.
    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    /// Full name, `prefix/interface`.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Declared data type.
    pub fn data_type(&self) -> InterfaceDataType {
        self.data_type
    }

    /// Non-blocking read as `f64`.
    ///
    /// Returns `None` when the lock is contended. A `bool` handle is cast to
    /// 0.0/1.0 with a one-shot warning.
    pub fn get_optional(&self) -> Option<f64> {
        let guard = self.value.try_read()?;
        match *guard {
            InterfaceValue::Double(v) => Some(v),
            InterfaceValue::Bool(b) => {
                if !self.bool_cast_warned.swap(true, Ordering::Relaxed) {
                    warn!(
                        interface = %self.full_name,
                        "casting bool to double, better use get_optional_bool()"
                    );
                }
                Some(if b { 1.0 } else { 0.0 })
            }
        }
    }

    /// Non-blocking read as `bool`.
    ///
    /// # Panics
    /// Panics when the handle is declared `double`.
    pub fn get_optional_bool(&self) -> Option<bool> {
        let guard = self.value.try_read()?;
        match *guard {
            InterfaceValue::Bool(b) => Some(b),
            InterfaceValue::Double(_) => panic!(
                "bool access on interface '{}' declared as double",
                self.full_name
            ),
        }
    }

    /// Non-blocking write of an `f64`. Returns `false` on lock contention.
    ///
    /// # Panics
    /// Panics when the handle is declared `bool`.
    pub fn set_value(&self, value: f64) -> bool {
        match self.value.try_write() {
            Some(mut guard) => match *guard {
                InterfaceValue::Double(_) => {
                    *guard = InterfaceValue::Double(value);
                    true
                }
                InterfaceValue::Bool(_) => panic!(
                    "double write on interface '{}' declared as bool",
                    self.full_name
                ),
            },
            None => false,
        }
    }

    /// Non-blocking write of a `bool`. Returns `false` on lock contention.
    ///
    /// # Panics
    /// Panics when the handle is declared `double`.
    pub fn set_bool(&self, value: bool) -> bool {
        match self.value.try_write() {
            Some(mut guard) => match *guard {
                InterfaceValue::Bool(_) => {
                    *guard = InterfaceValue::Bool(value);
                    true
                }
                InterfaceValue::Double(_) => panic!(
                    "bool write on interface '{}' declared as double",
                    self.full_name
                ),
            },
            None => false,
        }
    }

    /// Install a limiter applied by [`Handle::set_limited_value`].
    ///
    /// Called once during component initialization, before the realtime
    /// loop starts.
    pub fn set_on_limiter(&self, limiter: CommandLimiter) {
        *self.limiter.write() = Some(limiter);
    }

    /// Write through the installed limiter, recording whether limiting
    /// occurred. Without a limiter this is plain [`Handle::set_value`].
    pub fn set_limited_value(&self, value: f64) -> bool {
        let limited = match self.limiter.try_read() {
            Some(guard) => match guard.as_ref() {
                Some(limiter) => {
                    let (v, was_limited) = limiter(value);
                    self.is_limited.store(was_limited, Ordering::Relaxed);
                    v
                }
                None => value,
            },
            None => value,
        };
        self.set_value(limited)
    }

    /// Whether the last [`Handle::set_limited_value`] call clamped its input.
    pub fn is_limited(&self) -> bool {
        self.is_limited.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("full_name", &self.full_name)
            .field("data_type", &self.data_type)
            .finish()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
