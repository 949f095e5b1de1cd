//! Physical binding — ties a device to an external device behind an adapter.

use serde::{Deserialize, Serialize};

/// Associates a device with the external id it has on one adapter.
///
/// A device has at most one binding. Commands to a bound device are sent
/// through `adapter_id`, and status for it is only accepted from there.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhysicalBinding {
    pub device_id: String,
    pub adapter_id: String,
    pub external_device_id: String,
}

impl PhysicalBinding {
    #[must_use]
    pub fn new(
        device_id: impl Into<String>,
        adapter_id: impl Into<String>,
        external_device_id: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            adapter_id: adapter_id.into(),
            external_device_id: external_device_id.into(),
        }
    }

    /// Key used by the reverse index from inbound status to device.
    #[must_use]
    pub fn external_key(&self) -> (String, String) {
        (self.adapter_id.clone(), self.external_device_id.clone())
    }
}
