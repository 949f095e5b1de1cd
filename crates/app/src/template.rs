//! Command template rendering shared by the adapters.
//!
//! A template is any JSON value. String leaves that are exactly
//! `"{device_id}"`, `"{command}"` or `"{params}"` are replaced by the
//! corresponding JSON value; `{device_id}` and `{command}` inside longer
//! strings are substituted as text. Object keys are left untouched.

use serde_json::Value;

use crate::ports::CommandPayload;

const DEVICE_ID: &str = "{device_id}";
const COMMAND: &str = "{command}";
const PARAMS: &str = "{params}";

/// Render `template` for one command.
#[must_use]
pub fn render_command(template: &Value, external_device_id: &str, payload: &CommandPayload) -> Value {
    match template {
        Value::String(text) => match text.as_str() {
            DEVICE_ID => Value::String(external_device_id.to_string()),
            COMMAND => Value::String(payload.command.clone()),
            PARAMS => Value::Object(payload.params.clone()),
            _ => Value::String(
                text.replace(DEVICE_ID, external_device_id)
                    .replace(COMMAND, &payload.command),
            ),
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_command(item, external_device_id, payload))
                .collect(),
        ),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, value)| {
                    (
                        key.clone(),
                        render_command(value, external_device_id, payload),
                    )
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Substitute `{device_id}` in a topic or path template.
#[must_use]
pub fn render_path(template: &str, external_device_id: &str) -> String {
    template.replace(DEVICE_ID, external_device_id)
}
