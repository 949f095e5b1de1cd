//! Device groups and scenes — named fan-outs over the router's broadcast path.

use serde::{Deserialize, Serialize};

use crate::device::{CommandSet, POWER};
use crate::intent::Target;
use crate::value::CapabilityValue;

/// A named set of devices addressed together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub devices: Vec<String>,
}

/// An ordered list of steps applied one after another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub steps: Vec<SceneStep>,
}

/// One scene step: a device (or `"ALL"`), a command verb and its params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneStep {
    pub device_id: String,
    pub command: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// Why a scene step cannot be turned into capability assignments.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SceneStepError {
    #[error("unknown command {0}")]
    UnknownCommand(String),

    #[error("no value given for {0}")]
    MissingValue(String),

    #[error("param {0} is not a scalar")]
    NonScalar(String),
}

impl SceneStep {
    #[must_use]
    pub fn target(&self) -> Target {
        Target::from_id(&self.device_id)
    }

    /// Translate the step's verb into capability assignments.
    ///
    /// | Command | Result |
    /// |---------|--------|
    /// | `turn_on`, `on` | `power` = on state |
    /// | `turn_off`, `off` | `power` = off state |
    /// | `start`, `start_cooking` | `power` = on state, plus every param |
    /// | `stop`, `stop_cooking`, `cancel` | `power` = off state |
    /// | `set` | every param as a capability value |
    /// | `set_<capability>` | `params[<capability>]`, or the only param |
    ///
    /// A started device takes its type's powered-on state, so long-running
    /// appliances end up `RUNNING`.
    ///
    /// # Errors
    ///
    /// Returns a [`SceneStepError`] for unknown verbs, missing values or
    /// non-scalar params.
    pub fn to_commands(&self) -> Result<CommandSet, SceneStepError> {
        match self.command.as_str() {
            "turn_on" | "on" => Ok(power(true)),
            "turn_off" | "off" | "stop" | "stop_cooking" | "cancel" => Ok(power(false)),
            "start" | "start_cooking" => {
                let mut commands = self.params_as_commands()?;
                commands.insert(POWER.to_string(), CapabilityValue::Bool(true));
                Ok(commands)
            }
            "set" => {
                if self.params.is_empty() {
                    return Err(SceneStepError::MissingValue("set".to_string()));
                }
                self.params_as_commands()
            }
            verb => {
                let Some(capability) = verb.strip_prefix("set_").filter(|c| !c.is_empty()) else {
                    return Err(SceneStepError::UnknownCommand(verb.to_string()));
                };
                let value = match self.params.get(capability) {
                    Some(value) => value,
                    None if self.params.len() == 1 => self
                        .params
                        .values()
                        .next()
                        .ok_or_else(|| SceneStepError::MissingValue(capability.to_string()))?,
                    None => return Err(SceneStepError::MissingValue(capability.to_string())),
                };
                let mut commands = CommandSet::new();
                commands.insert(capability.to_string(), scalar(capability, value)?);
                Ok(commands)
            }
        }
    }

    fn params_as_commands(&self) -> Result<CommandSet, SceneStepError> {
        self.params
            .iter()
            .map(|(name, value)| scalar(name, value).map(|v| (name.clone(), v)))
            .collect()
    }
}

/// Switches accept booleans and map them onto their own `[off, on]` states.
fn power(on: bool) -> CommandSet {
    CommandSet::from([(POWER.to_string(), CapabilityValue::Bool(on))])
}

fn scalar(name: &str, value: &serde_json::Value) -> Result<CapabilityValue, SceneStepError> {
    CapabilityValue::from_json(value).ok_or_else(|| SceneStepError::NonScalar(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(device_id: &str, command: &str, params: serde_json::Value) -> SceneStep {
        SceneStep {
            device_id: device_id.to_string(),
            command: command.to_string(),
            params: params.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn should_translate_turn_on_to_power() {
        let commands = step("lamp", "turn_on", serde_json::json!({})).to_commands().unwrap();
        assert_eq!(commands.get(POWER), Some(&CapabilityValue::Bool(true)));
    }

    #[test]
    fn should_translate_off_alias_to_power() {
        let commands = step("lamp", "off", serde_json::Value::Null).to_commands().unwrap();
        assert_eq!(commands.get(POWER), Some(&CapabilityValue::Bool(false)));
    }

    #[test]
    fn should_translate_set_with_all_params() {
        let commands = step("ac", "set", serde_json::json!({"mode": "cool", "temperature": 22}))
            .to_commands()
            .unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands.get("mode"), Some(&CapabilityValue::from("cool")));
    }

    #[test]
    fn should_translate_set_capability_with_named_param() {
        let commands = step("lamp", "set_brightness", serde_json::json!({"brightness": 30}))
            .to_commands()
            .unwrap();
        assert_eq!(commands.get("brightness"), Some(&CapabilityValue::Number(30.0)));
    }

    #[test]
    fn should_translate_set_capability_with_single_param() {
        let commands = step("lamp", "set_brightness", serde_json::json!({"value": 70}))
            .to_commands()
            .unwrap();
        assert_eq!(commands.get("brightness"), Some(&CapabilityValue::Number(70.0)));
    }

    #[test]
    fn should_translate_start_to_power_on_with_program() {
        let commands = step("cooker", "start_cooking", serde_json::json!({"program": "rice"}))
            .to_commands()
            .unwrap();
        assert_eq!(commands.get(POWER), Some(&CapabilityValue::Bool(true)));
        assert_eq!(commands.get("program"), Some(&CapabilityValue::from("rice")));
    }

    #[test]
    fn should_translate_bare_start_to_power_on() {
        let commands = step("vacuum", "start", serde_json::json!({})).to_commands().unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands.get(POWER), Some(&CapabilityValue::Bool(true)));
    }

    #[test]
    fn should_translate_stop_verbs_to_power_off() {
        for verb in ["stop", "stop_cooking", "cancel"] {
            let commands = step("cooker", verb, serde_json::json!({})).to_commands().unwrap();
            assert_eq!(commands.len(), 1, "{verb}");
            assert_eq!(commands.get(POWER), Some(&CapabilityValue::Bool(false)), "{verb}");
        }
    }

    #[test]
    fn should_reject_unknown_command() {
        let result = step("lamp", "dance", serde_json::json!({})).to_commands();
        assert_eq!(
            result,
            Err(SceneStepError::UnknownCommand("dance".to_string()))
        );
    }

    #[test]
    fn should_reject_set_capability_without_value() {
        let result = step("lamp", "set_brightness", serde_json::json!({})).to_commands();
        assert!(matches!(result, Err(SceneStepError::MissingValue(_))));
    }

    #[test]
    fn should_recognise_wildcard_target() {
        assert_eq!(step("ALL", "off", serde_json::json!({})).target(), Target::All);
    }

    #[test]
    fn should_deserialize_scene_with_default_params() {
        let scene: Scene = serde_json::from_value(serde_json::json!({
            "id": "night",
            "name": "Good night",
            "steps": [{"device_id": "ALL", "command": "off"}]
        }))
        .unwrap();
        assert_eq!(scene.steps.len(), 1);
        assert!(scene.steps[0].params.is_empty());
    }
}
