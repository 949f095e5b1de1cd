//! Adapter construction from `[[adapters]]` entries.

use std::sync::Arc;

use synhome_adapter_mqtt::{MqttAdapter, MqttConfig};
use synhome_adapter_websocket::{WebSocketAdapter, WebSocketConfig};
use synhome_app::ports::Adapter;

use crate::config::{AdapterEntry, AdapterKind, ConfigError};

/// Build the adapter described by `entry`.
///
/// # Errors
///
/// Returns [`ConfigError::Adapter`] if the entry's settings do not parse.
pub fn build(entry: &AdapterEntry) -> Result<Arc<dyn Adapter>, ConfigError> {
    let adapter: Arc<dyn Adapter> = match entry.kind {
        AdapterKind::Websocket => Arc::new(WebSocketAdapter::new(
            &entry.id,
            entry.settings::<WebSocketConfig>()?,
        )),
        AdapterKind::Mqtt => Arc::new(MqttAdapter::new(
            &entry.id,
            entry.settings::<MqttConfig>()?,
        )),
    };
    Ok(adapter)
}

/// Build every configured adapter, in declaration order.
///
/// # Errors
///
/// Returns the first entry's [`ConfigError`].
pub fn build_all(entries: &[AdapterEntry]) -> Result<Vec<Arc<dyn Adapter>>, ConfigError> {
    entries.iter().map(build).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use synhome_domain::connection::ConnectionState;

    use crate::config::Config;

    #[test]
    fn should_build_adapters_in_declaration_order() {
        let config: Config = toml::from_str(
            r#"
            [[adapters]]
            id = "hub"
            type = "websocket"
            config = { url = "ws://127.0.0.1:9" }

            [[adapters]]
            id = "broker"
            type = "mqtt"
            "#,
        )
        .unwrap();
        let adapters = build_all(&config.adapters).unwrap();

        let ids: Vec<_> = adapters.iter().map(|a| a.id()).collect();
        assert_eq!(ids, vec!["hub", "broker"]);
        assert!(
            adapters
                .iter()
                .all(|a| a.connection_state() == ConnectionState::Disconnected)
        );
    }

    #[test]
    fn should_fail_on_first_invalid_entry() {
        let config: Config = toml::from_str(
            r#"
            [[adapters]]
            id = "hub"
            type = "websocket"
            config = { timeout_secs = -1 }
            "#,
        )
        .unwrap();
        assert!(matches!(
            build_all(&config.adapters),
            Err(ConfigError::Adapter { .. })
        ));
    }
}
