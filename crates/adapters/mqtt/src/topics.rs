//! Topic names derived from [`TopicConfig`].

use synhome_app::template::render_path;

use crate::config::TopicConfig;

const DEVICE_ID: &str = "{device_id}";
const SINGLE_LEVEL_WILDCARD: &str = "+";

/// Fully-prefixed topics for one adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    command: String,
    status: String,
    discovery_request: String,
    discovery_response: String,
}

impl Topics {
    #[must_use]
    pub fn new(config: &TopicConfig) -> Self {
        Self {
            command: format!("{}{}", config.prefix, config.command),
            status: format!("{}{}", config.prefix, config.status),
            discovery_request: format!("{}{}/request", config.prefix, config.discovery),
            discovery_response: format!("{}{}/response", config.prefix, config.discovery),
        }
    }

    /// Subscription filter matching every device's status topic.
    #[must_use]
    pub fn status_filter(&self) -> String {
        self.status.replace(DEVICE_ID, SINGLE_LEVEL_WILDCARD)
    }

    #[must_use]
    pub fn command_topic(&self, external_device_id: &str) -> String {
        render_path(&self.command, external_device_id)
    }

    #[must_use]
    pub fn discovery_request(&self) -> &str {
        &self.discovery_request
    }

    #[must_use]
    pub fn discovery_response(&self) -> &str {
        &self.discovery_response
    }

    /// External device id carried by a status topic, taken from the level
    /// the `{device_id}` placeholder occupies in the template.
    #[must_use]
    pub fn device_id_from_status<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let mut template = self.status.split('/');
        let mut levels = topic.split('/');
        let mut device_id = None;
        loop {
            match (template.next(), levels.next()) {
                (None, None) => return device_id,
                (Some(DEVICE_ID), Some(level)) if !level.is_empty() => device_id = Some(level),
                (Some(expected), Some(level)) if expected == level => {}
                _ => return None,
            }
        }
    }
}
