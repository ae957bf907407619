//! Manager configuration loading.
//!
//! TOML layout:
//!
//! ```toml
//! update_rate_hz = 100
//! default_strictness = "best_effort"
//! default_switch_timeout_ms = 1000
//!
//! [controllers.pid1]
//! type = "PositionPid"
//! params_files = ["config/pid1.toml"]
//! fallback_controllers = ["safe_stop"]
//! update_rate_hz = 50
//!
//! [controllers.safe_stop]
//! type = "SafeStop"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ManagerError, ManagerResult};
use crate::services::Strictness;

fn default_switch_timeout_ms() -> u64 {
    1_000
}

fn default_strictness() -> Strictness {
    Strictness::BestEffort
}

/// Per-controller parameters, loaded when the named controller is loaded.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ControllerEntry {
    /// Registered controller type.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Parameter files forwarded to the controller.
    #[serde(default)]
    pub params_files: Vec<String>,
    /// Controllers activated automatically when this one fails mid-cycle,
    /// in priority order.
    #[serde(default)]
    pub fallback_controllers: Vec<String>,
    /// Extra arguments forwarded to the controller.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Update rate in Hz; absent means the manager rate.
    #[serde(default)]
    pub update_rate_hz: Option<u32>,
    /// Run updates on a dedicated worker thread.
    #[serde(default)]
    pub is_async: bool,
}

/// Top-level manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Master cycle rate in Hz.
    pub update_rate_hz: u32,
    /// Strictness applied when a switch request does not specify one.
    #[serde(default = "default_strictness")]
    pub default_strictness: Strictness,
    /// Switch timeout applied when a request passes zero.
    #[serde(default = "default_switch_timeout_ms")]
    pub default_switch_timeout_ms: u64,
    /// Per-controller parameter table, keyed by controller name.
    #[serde(default)]
    pub controllers: BTreeMap<String, ControllerEntry>,
}

impl ManagerConfig {
    /// A minimal configuration at the given rate, no controllers.
    pub fn with_rate(update_rate_hz: u32) -> Self {
        Self {
            update_rate_hz,
            default_strictness: default_strictness(),
            default_switch_timeout_ms: default_switch_timeout_ms(),
            controllers: BTreeMap::new(),
        }
    }

    /// Load and validate from a TOML file.
    pub fn load(path: &Path) -> ManagerResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            ManagerError::config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::load_from_str(&contents)
    }

    /// Load and validate from a TOML string.
    pub fn load_from_str(contents: &str) -> ManagerResult<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|err| ManagerError::config(format!("parse failure: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation.
    pub fn validate(&self) -> ManagerResult<()> {
        if self.update_rate_hz == 0 {
            return Err(ManagerError::config("update_rate_hz must be non-zero"));
        }
        for (name, entry) in &self.controllers {
            if entry.type_name.is_empty() {
                return Err(ManagerError::config(format!(
                    "controller '{name}' has no type"
                )));
            }
            if let Some(rate) = entry.update_rate_hz {
                if rate == 0 {
                    return Err(ManagerError::config(format!(
                        "controller '{name}' has zero update_rate_hz"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Manager cycle period.
    pub fn period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.update_rate_hz as f64)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
