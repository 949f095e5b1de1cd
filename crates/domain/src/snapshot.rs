//! Read-only device snapshots for UI/API layers and the intent extractor.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::capability::{CapabilityKind, Constraint};
use crate::device::Device;
use crate::state_rules::DeviceState;
use crate::value::CapabilityValue;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub state: DeviceState,
    pub capabilities: BTreeMap<String, CapabilitySnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilitySnapshot {
    #[serde(rename = "type")]
    pub kind: CapabilityKind,
    pub current_value: CapabilityValue,
    pub constraints: Constraint,
}

impl From<&Device> for DeviceSnapshot {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id().to_string(),
            name: device.name().to_string(),
            device_type: device.device_type().to_string(),
            state: device.state(),
            capabilities: device
                .capabilities()
                .map(|capability| {
                    (
                        capability.name().to_string(),
                        CapabilitySnapshot {
                            kind: capability.kind(),
                            current_value: capability.current_value().clone(),
                            constraints: capability.constraint().clone(),
                        },
                    )
                })
                .collect(),
        }
    }
}
