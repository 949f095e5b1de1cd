//! JSON payloads published and received by the adapter.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use synhome_app::ports::ExternalDeviceDescriptor;

use crate::error::MqttError;

/// Devices announced on the discovery response topic.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryBatch {
    pub devices: Vec<ExternalDeviceDescriptor>,
    pub complete: bool,
}

#[must_use]
pub fn discovery_request(adapter_id: &str) -> Vec<u8> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default();
    serde_json::json!({"adapter_id": adapter_id, "timestamp": timestamp})
        .to_string()
        .into_bytes()
}

/// Parse a status payload into its raw fields.
///
/// # Errors
///
/// Returns [`MqttError::PayloadParse`] unless the payload is a JSON object.
pub fn parse_status(payload: &[u8]) -> Result<serde_json::Map<String, Value>, MqttError> {
    serde_json::from_slice(payload).map_err(MqttError::PayloadParse)
}

/// Parse a discovery response: either a batch `{devices, complete}` or a
/// single descriptor, which never completes discovery on its own.
///
/// # Errors
///
/// Returns [`MqttError::PayloadParse`] if the payload is not JSON or is
/// neither form.
pub fn parse_discovery(payload: &[u8]) -> Result<DiscoveryBatch, MqttError> {
    let value: Value = serde_json::from_slice(payload).map_err(MqttError::PayloadParse)?;
    if let Some(entries) = value.get("devices").and_then(Value::as_array) {
        let devices = entries
            .iter()
            .filter_map(|entry| {
                serde_json::from_value(entry.clone())
                    .inspect_err(|err| {
                        tracing::debug!(error = %err, "skipping invalid discovery entry");
                    })
                    .ok()
            })
            .collect();
        let complete = value
            .get("complete")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        return Ok(DiscoveryBatch { devices, complete });
    }

    let device = serde_json::from_value(value).map_err(MqttError::PayloadParse)?;
    Ok(DiscoveryBatch {
        devices: vec![device],
        complete: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_status_object() {
        let fields = parse_status(br#"{"pwr":"1","temp":21.5}"#).unwrap();
        assert_eq!(fields["pwr"], "1");
        assert_eq!(fields["temp"], 21.5);
    }

    #[test]
    fn should_reject_non_object_status() {
        assert!(matches!(parse_status(b"[1,2]"), Err(MqttError::PayloadParse(_))));
        assert!(matches!(parse_status(b"on"), Err(MqttError::PayloadParse(_))));
    }

    #[test]
    fn should_parse_discovery_batch() {
        let batch = parse_discovery(
            br#"{"devices":[{"device_id":"wm-01","type":"washing_machine"},{"type":"orphan"}],"complete":true}"#,
        )
        .unwrap();
        assert!(batch.complete);
        assert_eq!(batch.devices.len(), 1);
        assert_eq!(batch.devices[0].device_id, "wm-01");
    }

    #[test]
    fn should_parse_single_discovery_descriptor() {
        let batch = parse_discovery(br#"{"device_id":"rc-01","type":"rice_cooker"}"#).unwrap();
        assert!(!batch.complete);
        assert_eq!(batch.devices[0].device_type.as_deref(), Some("rice_cooker"));
    }

    #[test]
    fn should_include_adapter_id_in_discovery_request() {
        let request: Value = serde_json::from_slice(&discovery_request("mqtt")).unwrap();
        assert_eq!(request["adapter_id"], "mqtt");
        assert!(request["timestamp"].as_f64().unwrap() > 0.0);
    }
}
