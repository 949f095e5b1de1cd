//! Device events — immutable records of applied changes, for observers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::{AppliedResult, ApplyMode};
use crate::state_rules::DeviceState;
use crate::value::CapabilityValue;

/// UTC timestamp attached to every event.
pub type Timestamp = DateTime<Utc>;

/// Unique identifier of a [`DeviceEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(uuid::Uuid);

impl Default for EventId {
    fn default() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl EventId {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Something that happened to a device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    CapabilityChanged {
        id: EventId,
        device_id: String,
        capability: String,
        old: CapabilityValue,
        new: CapabilityValue,
        origin: ApplyMode,
        timestamp: Timestamp,
    },
    StateChanged {
        id: EventId,
        device_id: String,
        from: DeviceState,
        to: DeviceState,
        origin: ApplyMode,
        timestamp: Timestamp,
    },
}

impl DeviceEvent {
    /// Events describing `applied`: one per changed capability, followed by
    /// a state change if the state moved.
    #[must_use]
    pub fn from_applied(applied: &AppliedResult, origin: ApplyMode) -> Vec<Self> {
        let timestamp = Utc::now();
        let mut events: Vec<Self> = applied
            .changes
            .iter()
            .map(|change| Self::CapabilityChanged {
                id: EventId::new(),
                device_id: applied.device_id.clone(),
                capability: change.capability.clone(),
                old: change.old.clone(),
                new: change.new.clone(),
                origin,
                timestamp,
            })
            .collect();
        if applied.state_changed() {
            events.push(Self::StateChanged {
                id: EventId::new(),
                device_id: applied.device_id.clone(),
                from: applied.previous_state,
                to: applied.state,
                origin,
                timestamp,
            });
        }
        events
    }

    #[must_use]
    pub fn id(&self) -> EventId {
        match self {
            Self::CapabilityChanged { id, .. } | Self::StateChanged { id, .. } => *id,
        }
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        match self {
            Self::CapabilityChanged { device_id, .. } | Self::StateChanged { device_id, .. } => {
                device_id
            }
        }
    }
}
