//! MQTT adapter configuration.

use std::time::Duration;

use serde::Deserialize;

use synhome_domain::reconnect::ReconnectSettings;

/// Configuration for one MQTT adapter.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// MQTT broker hostname or IP address.
    pub broker_host: String,
    /// MQTT broker port.
    pub broker_port: u16,
    /// MQTT client identifier.
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u16,
    pub topics: TopicConfig,
    /// JSON template rendered for each outbound command.
    pub command_template: serde_json::Value,
    /// Deadline for handing a command to the broker, and for the first
    /// connection, in seconds.
    pub command_timeout_secs: u64,
    /// How long to collect discovery responses, in seconds.
    pub discovery_timeout_secs: u64,
    /// Reconnect in the background after the broker connection drops.
    pub auto_reconnect: bool,
    pub reconnect: ReconnectSettings,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: "synhome".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            topics: TopicConfig::default(),
            command_template: serde_json::json!({
                "command": "{command}",
                "params": "{params}"
            }),
            command_timeout_secs: 10,
            discovery_timeout_secs: 10,
            auto_reconnect: true,
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl MqttConfig {
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    #[must_use]
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }
}

/// Topic layout. Each topic is `prefix` followed by its template;
/// `{device_id}` marks the external device id segment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub prefix: String,
    pub command: String,
    pub status: String,
    /// Base of the `/request` and `/response` discovery topics.
    pub discovery: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            prefix: "synhome/".to_string(),
            command: "devices/{device_id}/command".to_string(),
            status: "devices/{device_id}/status".to_string(),
            discovery: "discovery".to_string(),
        }
    }
}
