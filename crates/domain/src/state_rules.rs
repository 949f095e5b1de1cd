//! Per-device-type rules deriving a device's coarse state from its power.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse device state derived from the `power` capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceState {
    Idle,
    On,
    Off,
    Running,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("IDLE"),
            Self::On => f.write_str("ON"),
            Self::Off => f.write_str("OFF"),
            Self::Running => f.write_str("RUNNING"),
        }
    }
}

/// States a device type takes depending on power.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeRule {
    /// State entered when power switches on.
    pub powered_on: DeviceState,
    /// State held by a device without a power capability.
    pub unpowered: DeviceState,
}

impl Default for TypeRule {
    fn default() -> Self {
        Self {
            powered_on: DeviceState::On,
            unpowered: DeviceState::Idle,
        }
    }
}

impl TypeRule {
    /// Rule for appliances that run a cycle once powered.
    #[must_use]
    pub fn long_running() -> Self {
        Self {
            powered_on: DeviceState::Running,
            ..Self::default()
        }
    }
}

/// Table of [`TypeRule`]s keyed by device type (case-insensitive).
///
/// Types without an entry use [`TypeRule::default`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRules {
    rules: HashMap<String, TypeRule>,
}

impl Default for StateRules {
    /// Built-in rules: rice cookers, washing machines, dishwashers and
    /// vacuums run once powered.
    fn default() -> Self {
        Self::empty()
            .with_long_running("rice_cooker")
            .with_long_running("washing_machine")
            .with_long_running("dishwasher")
            .with_long_running("vacuum")
    }
}

impl StateRules {
    /// A table with no type-specific rules.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_rule(mut self, device_type: &str, rule: TypeRule) -> Self {
        self.rules.insert(device_type.to_lowercase(), rule);
        self
    }

    #[must_use]
    pub fn with_long_running(self, device_type: &str) -> Self {
        self.with_rule(device_type, TypeRule::long_running())
    }

    #[must_use]
    pub fn rule_for(&self, device_type: &str) -> TypeRule {
        self.rules
            .get(&device_type.to_lowercase())
            .copied()
            .unwrap_or_default()
    }
}
