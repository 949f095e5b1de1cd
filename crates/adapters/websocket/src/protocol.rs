//! JSON frames exchanged with the endpoint.

use serde_json::{Value, json};

use synhome_app::ports::{ExternalDeviceDescriptor, StatusEvent};

use crate::config::AuthConfig;

const DISCOVERY_RESPONSE: &str = "discovery_response";

/// A parsed inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Status(StatusEvent),
    Discovery(DiscoveryBatch),
    /// Any other frame type; ignored.
    Other,
}

/// One `discovery_response` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryBatch {
    pub devices: Vec<ExternalDeviceDescriptor>,
    /// The endpoint has nothing more to report.
    pub complete: bool,
}

/// The `auth` frame for credential schemes sent in-band, if any.
#[must_use]
pub fn auth_frame(auth: &AuthConfig) -> Option<Value> {
    match auth {
        AuthConfig::None | AuthConfig::Token { .. } => None,
        AuthConfig::Basic { username, password } => Some(json!({
            "type": "auth",
            "username": username,
            "password": password
        })),
        AuthConfig::ApiKey { api_key } => Some(json!({
            "type": "auth",
            "api_key": api_key
        })),
    }
}

/// Check the endpoint's reply to an `auth` frame.
///
/// # Errors
///
/// Returns the endpoint's `message`, or a generic reason, unless the reply
/// carries `"success": true`.
pub fn auth_outcome(reply: &Value) -> Result<(), String> {
    if reply.get("success").and_then(Value::as_bool) == Some(true) {
        return Ok(());
    }
    Err(reply
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string())
}

#[must_use]
pub fn discovery_request(adapter_id: &str) -> Value {
    json!({"type": "discovery", "adapter_id": adapter_id})
}

/// Parse an inbound text frame.
///
/// A status frame without a device id or with an empty status is reported
/// as [`Inbound::Other`]. Discovery entries that are not valid descriptors
/// are dropped.
///
/// # Errors
///
/// Returns an error if `text` is not JSON.
pub fn parse_inbound(text: &str, status_type: &str) -> Result<Inbound, serde_json::Error> {
    let frame: Value = serde_json::from_str(text)?;
    let Some(frame_type) = frame.get("type").and_then(Value::as_str) else {
        return Ok(Inbound::Other);
    };

    if frame_type == status_type {
        let device_id = frame.get("device_id").and_then(Value::as_str);
        let status = frame.get("status").and_then(Value::as_object);
        return Ok(match (device_id, status) {
            (Some(device_id), Some(status)) if !status.is_empty() => Inbound::Status(StatusEvent {
                external_device_id: device_id.to_string(),
                fields: status.clone(),
            }),
            _ => Inbound::Other,
        });
    }

    if frame_type == DISCOVERY_RESPONSE {
        let devices = frame
            .get("devices")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        serde_json::from_value(entry.clone())
                            .inspect_err(|err| {
                                tracing::debug!(error = %err, "skipping invalid discovery entry");
                            })
                            .ok()
                    })
                    .collect()
            })
            .unwrap_or_default();
        let complete = frame
            .get("complete")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        return Ok(Inbound::Discovery(DiscoveryBatch { devices, complete }));
    }

    Ok(Inbound::Other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_build_api_key_auth_frame() {
        let frame = auth_frame(&AuthConfig::ApiKey {
            api_key: "k".to_string(),
        })
        .unwrap();
        assert_eq!(frame, json!({"type": "auth", "api_key": "k"}));
    }

    #[test]
    fn should_not_send_auth_frame_for_token_auth() {
        assert!(auth_frame(&AuthConfig::Token {
            token: "t".to_string()
        })
        .is_none());
        assert!(auth_frame(&AuthConfig::None).is_none());
    }

    #[test]
    fn should_accept_only_successful_auth_reply() {
        assert!(auth_outcome(&json!({"success": true})).is_ok());
        assert_eq!(
            auth_outcome(&json!({"success": false, "message": "bad key"})),
            Err("bad key".to_string())
        );
        assert_eq!(auth_outcome(&json!({})), Err("unknown error".to_string()));
    }

    #[test]
    fn should_parse_status_frame() {
        let text = r#"{"type":"status","device_id":"wm-01","status":{"pwr":"1"}}"#;
        let Inbound::Status(event) = parse_inbound(text, "status").unwrap() else {
            panic!("expected status frame");
        };
        assert_eq!(event.external_device_id, "wm-01");
        assert_eq!(event.fields["pwr"], "1");
    }

    #[test]
    fn should_honour_configured_status_type() {
        let text = r#"{"type":"status","device_id":"wm-01","status":{"pwr":"1"}}"#;
        assert_eq!(parse_inbound(text, "telemetry").unwrap(), Inbound::Other);
    }

    #[test]
    fn should_ignore_status_frame_without_fields() {
        let text = r#"{"type":"status","device_id":"wm-01","status":{}}"#;
        assert_eq!(parse_inbound(text, "status").unwrap(), Inbound::Other);
    }

    #[test]
    fn should_parse_discovery_response_and_skip_invalid_entries() {
        let text = r#"{
            "type": "discovery_response",
            "devices": [{"device_id": "wm-01", "type": "washing_machine"}, {"name": "no id"}],
            "complete": true
        }"#;
        let Inbound::Discovery(batch) = parse_inbound(text, "status").unwrap() else {
            panic!("expected discovery frame");
        };
        assert!(batch.complete);
        assert_eq!(batch.devices.len(), 1);
        assert_eq!(batch.devices[0].device_id, "wm-01");
    }

    #[test]
    fn should_reject_non_json_frame() {
        assert!(parse_inbound("not json", "status").is_err());
    }
}
