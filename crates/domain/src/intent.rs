//! Intent — structured output of free-text command interpretation.
//!
//! The extractor replies with JSON of one of two shapes:
//!
//! ```json
//! {"target": "lamp" | "ALL" | ["lamp", "fan"], "capability_values": {"power": "on"}}
//! {"rejected": "no device matches"}
//! ```
//!
//! Anything else is an [`IntentParseError::Malformed`].

use crate::device::CommandSet;
use crate::error::IntentParseError;
use crate::value::CapabilityValue;

/// Wildcard target addressing every device.
pub const ALL_DEVICES: &str = "ALL";

/// Devices addressed by an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Device(String),
    Devices(Vec<String>),
    All,
}

impl Target {
    /// Parse a single target id, recognising the [`ALL_DEVICES`] wildcard.
    #[must_use]
    pub fn from_id(id: &str) -> Self {
        if id == ALL_DEVICES {
            Self::All
        } else {
            Self::Device(id.to_string())
        }
    }
}

/// A validated intent ready for routing.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub target: Target,
    pub capability_values: CommandSet,
}

impl Intent {
    /// Validate an extractor reply.
    ///
    /// # Errors
    ///
    /// Returns [`IntentParseError::Rejected`] when the reply carries a
    /// rejection reason, and [`IntentParseError::Malformed`] when it does
    /// not match either accepted shape.
    pub fn from_reply(reply: &serde_json::Value) -> Result<Self, IntentParseError> {
        let object = reply
            .as_object()
            .ok_or_else(|| malformed("reply is not an object"))?;

        if let Some(reason) = object.get("rejected") {
            let reason = reason
                .as_str()
                .ok_or_else(|| malformed("rejected must be a string"))?;
            return Err(IntentParseError::Rejected(reason.to_string()));
        }

        let target = match object.get("target") {
            Some(serde_json::Value::String(id)) if !id.is_empty() => Target::from_id(id),
            Some(serde_json::Value::Array(ids)) if !ids.is_empty() => {
                let ids = ids
                    .iter()
                    .map(|id| id.as_str().filter(|s| !s.is_empty()).map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| malformed("target list must hold non-empty strings"))?;
                if ids.iter().any(|id| id == ALL_DEVICES) {
                    Target::All
                } else {
                    Target::Devices(ids)
                }
            }
            Some(_) => return Err(malformed("target must be a device id or a list of ids")),
            None => return Err(malformed("missing target")),
        };

        let values = object
            .get("capability_values")
            .and_then(serde_json::Value::as_object)
            .ok_or_else(|| malformed("capability_values must be an object"))?;
        if values.is_empty() {
            return Err(malformed("capability_values is empty"));
        }
        let capability_values = values
            .iter()
            .map(|(name, value)| {
                CapabilityValue::from_json(value)
                    .map(|v| (name.clone(), v))
                    .ok_or_else(|| malformed(&format!("capability {name} has a non-scalar value")))
            })
            .collect::<Result<CommandSet, _>>()?;

        Ok(Self {
            target,
            capability_values,
        })
    }
}

fn malformed(reason: &str) -> IntentParseError {
    IntentParseError::Malformed(reason.to_string())
}
