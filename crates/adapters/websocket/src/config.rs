//! WebSocket adapter configuration.

use std::time::Duration;

use serde::Deserialize;

use synhome_domain::reconnect::ReconnectSettings;

/// Configuration for one WebSocket adapter.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Endpoint URL (`ws://` or `wss://`).
    pub url: String,
    /// Deadline for connecting, authenticating and acknowledging a command,
    /// in seconds.
    pub timeout_secs: u64,
    /// Interval between keep-alive pings, in seconds.
    pub ping_interval_secs: u64,
    /// Reconnect in the background after the session is lost.
    pub auto_reconnect: bool,
    pub reconnect: ReconnectSettings,
    pub auth: AuthConfig,
    /// JSON template rendered for each outbound command.
    pub command_template: serde_json::Value,
    /// `type` of inbound frames carrying device status.
    pub status_message_type: String,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080".to_string(),
            timeout_secs: 10,
            ping_interval_secs: 30,
            auto_reconnect: true,
            reconnect: ReconnectSettings::default(),
            auth: AuthConfig::default(),
            command_template: default_command_template(),
            status_message_type: "status".to_string(),
        }
    }
}

impl WebSocketConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }
}

/// How the adapter proves its identity to the endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    /// Sent as an `Authorization: Bearer` header on the upgrade request.
    Token { token: String },
    /// Sent in an `auth` frame after the upgrade.
    Basic { username: String, password: String },
    /// Sent in an `auth` frame after the upgrade.
    ApiKey { api_key: String },
}

fn default_command_template() -> serde_json::Value {
    serde_json::json!({
        "type": "command",
        "device_id": "{device_id}",
        "command": "{command}",
        "params": "{params}"
    })
}
