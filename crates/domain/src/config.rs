//! Configuration shapes for devices, bindings, groups and scenes.
//!
//! These are the serde-facing forms read by the binary; [`DeviceConfig::build`]
//! turns them into validated domain values.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::capability::Capability;
use crate::device::Device;
use crate::error::DefinitionError;
use crate::scene::{DeviceGroup, Scene};
use crate::state_rules::StateRules;
use crate::status_map::StatusMap;
use crate::value::CapabilityValue;

/// One capability declaration, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CapabilityConfig {
    Switch {
        #[serde(default = "default_switch_states")]
        states: Vec<String>,
        #[serde(default)]
        current_value: Option<CapabilityValue>,
    },
    Number {
        min: f64,
        max: f64,
        #[serde(default)]
        unit: Option<String>,
        #[serde(default)]
        current_value: Option<CapabilityValue>,
    },
    Enum {
        values: Vec<String>,
        #[serde(default)]
        current_value: Option<CapabilityValue>,
    },
}

fn default_switch_states() -> Vec<String> {
    vec!["off".to_string(), "on".to_string()]
}

impl CapabilityConfig {
    /// Build the capability named `name`.
    ///
    /// # Errors
    ///
    /// Returns a [`DefinitionError`] when the declaration violates a
    /// capability invariant or its initial value is out of range.
    pub fn build(&self, name: &str) -> Result<Capability, DefinitionError> {
        let (capability, initial) = match self {
            Self::Switch {
                states,
                current_value,
            } => (Capability::switch(name, states.clone())?, current_value),
            Self::Number {
                min,
                max,
                unit,
                current_value,
            } => (
                Capability::number(name, *min, *max, unit.clone())?,
                current_value,
            ),
            Self::Enum {
                values,
                current_value,
            } => (Capability::enumeration(name, values.clone())?, current_value),
        };
        match initial {
            Some(value) => capability.with_initial(value),
            None => Ok(capability),
        }
    }
}

/// A virtual device declaration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    /// Each entry maps capability names to their declaration.
    #[serde(default)]
    pub capabilities: Vec<BTreeMap<String, CapabilityConfig>>,
}

impl DeviceConfig {
    /// Build the device, resolving its state rule from `rules`.
    ///
    /// # Errors
    ///
    /// Returns a [`DefinitionError`] for empty fields, duplicate or invalid
    /// capabilities.
    pub fn build(&self, rules: &StateRules) -> Result<Device, DefinitionError> {
        let mut builder = Device::builder()
            .id(&self.id)
            .name(&self.name)
            .device_type(&self.device_type)
            .rule(rules.rule_for(&self.device_type));
        for (name, config) in self.capabilities.iter().flatten() {
            builder = builder.capability(config.build(name)?);
        }
        builder.build()
    }
}

/// A device bound to an external device behind an adapter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PhysicalDeviceConfig {
    #[serde(flatten)]
    pub device: DeviceConfig,
    pub adapter_id: String,
    /// Id of the device on the adapter's side.
    #[serde(rename = "device_id")]
    pub external_device_id: String,
    /// Overrides the adapter-level status map for this device.
    #[serde(default)]
    pub status_map: Option<StatusMap>,
}

/// Extra device types that run once powered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StateRulesConfig {
    pub long_running: Vec<String>,
}

impl StateRulesConfig {
    /// Built-in rules extended with the configured long-running types.
    #[must_use]
    pub fn rules(&self) -> StateRules {
        self.long_running
            .iter()
            .fold(StateRules::default(), |rules, ty| rules.with_long_running(ty))
    }
}

/// Everything the registry is built from.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeviceCatalog {
    pub devices: Vec<DeviceConfig>,
    pub physical_devices: Vec<PhysicalDeviceConfig>,
    pub device_groups: Vec<DeviceGroup>,
    pub scenes: Vec<Scene>,
    pub state_rules: StateRulesConfig,
}
