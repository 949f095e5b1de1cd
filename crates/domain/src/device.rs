//! Device — an addressable set of capabilities with a derived coarse state.
//!
//! A device is only ever mutated through [`Device::apply`] (commands) or
//! [`Device::apply_with`] in [`ApplyMode::Telemetry`] (inbound status). Both
//! are all-or-nothing: unknown names and invalid values abort the whole
//! batch before anything is written.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::capability::Capability;
use crate::error::{DefinitionError, SynHomeError, UnknownCapabilityError};
use crate::state_rules::{DeviceState, TypeRule};
use crate::value::CapabilityValue;

/// Name of the switch capability that drives [`DeviceState`].
pub const POWER: &str = "power";

/// A batch of capability assignments keyed by capability name.
pub type CommandSet = BTreeMap<String, CapabilityValue>;

/// Where an applied batch comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyMode {
    /// A user or scene command. Setting a capability on a powered-off device
    /// turns it on first.
    Command,
    /// Status reported by the physical device. Applied verbatim.
    Telemetry,
}

/// One capability whose value actually changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityChange {
    pub capability: String,
    pub old: CapabilityValue,
    pub new: CapabilityValue,
}

/// Outcome of a successful [`Device::apply`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedResult {
    pub device_id: String,
    /// Changed capabilities, power first when it was switched implicitly.
    pub changes: Vec<CapabilityChange>,
    pub previous_state: DeviceState,
    pub state: DeviceState,
    /// Whether power was switched on because the batch adjusted another
    /// capability while the device was off.
    pub implicit_power_on: bool,
}

impl AppliedResult {
    /// `true` when neither a capability nor the state changed.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty() && !self.state_changed()
    }

    #[must_use]
    pub fn state_changed(&self) -> bool {
        self.previous_state != self.state
    }

    #[must_use]
    pub fn changed_capabilities(&self) -> Vec<String> {
        self.changes.iter().map(|c| c.capability.clone()).collect()
    }
}

/// A controllable device.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    id: String,
    name: String,
    device_type: String,
    state: DeviceState,
    capabilities: BTreeMap<String, Capability>,
    rule: TypeRule,
}

impl Device {
    /// Create a builder for constructing a [`Device`].
    #[must_use]
    pub fn builder() -> DeviceBuilder {
        DeviceBuilder::default()
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    #[must_use]
    pub fn state(&self) -> DeviceState {
        self.state
    }

    #[must_use]
    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.get(name)
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.values()
    }

    #[must_use]
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Whether every capability named in `commands` exists on this device.
    #[must_use]
    pub fn supports(&self, commands: &CommandSet) -> bool {
        commands.keys().all(|name| self.has_capability(name))
    }

    /// Apply a command batch.
    ///
    /// Equivalent to [`apply_with`](Self::apply_with) in
    /// [`ApplyMode::Command`].
    ///
    /// # Errors
    ///
    /// See [`apply_with`](Self::apply_with).
    pub fn apply(&mut self, commands: &CommandSet) -> Result<AppliedResult, SynHomeError> {
        self.apply_with(commands, ApplyMode::Command)
    }

    /// Apply a batch of capability assignments atomically.
    ///
    /// In [`ApplyMode::Command`], when the batch leaves `power` untouched
    /// but sets another capability while power is off, power is switched on
    /// first. The state is recomputed whenever `power` is part of the
    /// applied batch.
    ///
    /// # Errors
    ///
    /// Returns [`SynHomeError::UnknownCapability`] if any name is not a
    /// capability of this device, or [`SynHomeError::InvalidValue`] for the
    /// first value violating its constraint. The device is unchanged in
    /// both cases.
    pub fn apply_with(
        &mut self,
        commands: &CommandSet,
        mode: ApplyMode,
    ) -> Result<AppliedResult, SynHomeError> {
        if let Some(unknown) = commands.keys().find(|name| !self.has_capability(name)) {
            return Err(self.unknown(unknown).into());
        }

        let mut plan = Vec::with_capacity(commands.len() + 1);
        for (name, value) in commands {
            let capability = self
                .capabilities
                .get(name)
                .ok_or_else(|| self.unknown(name))?;
            plan.push((name.clone(), capability.validate(value)?));
        }

        let implicit_on = match mode {
            ApplyMode::Command if !commands.is_empty() && !commands.contains_key(POWER) => {
                self.implicit_power_on()
            }
            _ => None,
        };
        let implicit_power_on = implicit_on.is_some();
        if let Some(on) = implicit_on {
            plan.insert(0, (POWER.to_string(), on));
        }

        let touches_power = plan.iter().any(|(name, _)| name == POWER);
        let previous_state = self.state;
        let mut changes = Vec::new();
        for (name, value) in plan {
            let Some(capability) = self.capabilities.get_mut(&name) else {
                continue;
            };
            if capability.current_value() == &value {
                continue;
            }
            let old = capability.replace(value.clone());
            changes.push(CapabilityChange {
                capability: name,
                old,
                new: value,
            });
        }

        if touches_power {
            if let Some(state) = self.powered_state() {
                self.state = state;
            }
        }

        Ok(AppliedResult {
            device_id: self.id.clone(),
            changes,
            previous_state,
            state: self.state,
            implicit_power_on,
        })
    }

    /// The on state of `power` when power is currently off.
    fn implicit_power_on(&self) -> Option<CapabilityValue> {
        let power = self.capabilities.get(POWER)?;
        if power.is_on()? {
            return None;
        }
        power
            .on_state()
            .map(|on| CapabilityValue::Text(on.to_string()))
    }

    /// State implied by the current power value, if the device has power.
    fn powered_state(&self) -> Option<DeviceState> {
        let on = self.capabilities.get(POWER)?.is_on()?;
        Some(if on {
            self.rule.powered_on
        } else {
            DeviceState::Off
        })
    }

    fn unknown(&self, capability: &str) -> UnknownCapabilityError {
        UnknownCapabilityError {
            device_id: self.id.clone(),
            capability: capability.to_string(),
        }
    }
}

/// Step-by-step builder for [`Device`].
#[derive(Debug, Default)]
pub struct DeviceBuilder {
    id: Option<String>,
    name: Option<String>,
    device_type: Option<String>,
    capabilities: Vec<Capability>,
    rule: TypeRule,
}

impl DeviceBuilder {
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self
    }

    #[must_use]
    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    #[must_use]
    pub fn rule(mut self, rule: TypeRule) -> Self {
        self.rule = rule;
        self
    }

    /// Consume the builder, validate, and return a [`Device`].
    ///
    /// The initial state is the rule's powered-on state when `power` starts
    /// on, and the rule's unpowered state otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::EmptyField`] if the id, name or type is
    /// missing, or [`DefinitionError::Duplicate`] if two capabilities share
    /// a name.
    pub fn build(self) -> Result<Device, DefinitionError> {
        let id = required(self.id, "device id")?;
        let name = required(self.name, "device name")?;
        let device_type = required(self.device_type, "device type")?;

        let mut seen = HashSet::new();
        let mut capabilities = BTreeMap::new();
        for capability in self.capabilities {
            if !seen.insert(capability.name().to_string()) {
                return Err(DefinitionError::Duplicate {
                    entity: "capability",
                    id: format!("{id}.{}", capability.name()),
                });
            }
            capabilities.insert(capability.name().to_string(), capability);
        }

        let mut device = Device {
            id,
            name,
            device_type,
            state: self.rule.unpowered,
            capabilities,
            rule: self.rule,
        };
        if device
            .capabilities
            .get(POWER)
            .and_then(Capability::is_on)
            .unwrap_or(false)
        {
            device.state = device.rule.powered_on;
        }
        Ok(device)
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, DefinitionError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(DefinitionError::EmptyField(field))
}
