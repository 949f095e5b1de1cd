//! Configuration loading — TOML file with environment variable overrides.
//!
//! Reads `synhome.toml` from the working directory, or the file named by
//! `SYNHOME_CONFIG`. Every section is optional; a missing file yields an
//! empty hub. Environment variables take precedence over file values.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use synhome_domain::config::DeviceCatalog;
use synhome_domain::error::DefinitionError;
use synhome_domain::status_map::StatusMap;

const DEFAULT_PATH: &str = "synhome.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Configured protocol adapters.
    pub adapters: Vec<AdapterEntry>,
    /// Devices, bindings, groups, scenes and state rules.
    #[serde(flatten)]
    pub catalog: DeviceCatalog,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "synhomed=info,synhome=info".to_string(),
        }
    }
}

/// Transport implemented by an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Websocket,
    Mqtt,
}

/// One `[[adapters]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AdapterKind,
    /// Transport settings, parsed by the adapter's own config type.
    #[serde(default)]
    pub config: toml::Table,
    /// Default status map for devices bound to this adapter.
    #[serde(default)]
    pub status_map: Option<StatusMap>,
}

impl AdapterEntry {
    /// Parse [`config`](Self::config) into the adapter's settings type.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Adapter`] if the table does not match `T`.
    pub fn settings<T: for<'de> Deserialize<'de>>(&self) -> Result<T, ConfigError> {
        toml::Value::Table(self.config.clone())
            .try_into()
            .map_err(|source| ConfigError::Adapter {
                id: self.id.clone(),
                source,
            })
    }
}

impl Config {
    /// Load configuration from `SYNHOME_CONFIG` or `synhome.toml` (if
    /// present) then apply environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the adapter list is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("SYNHOME_CONFIG").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SYNHOME_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    /// Adapter ids must be present and unique. Device definitions are
    /// validated when the registry is built.
    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for entry in &self.adapters {
            if entry.id.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "adapter id must not be empty".to_string(),
                ));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate adapter id {}",
                    entry.id
                )));
            }
        }
        Ok(())
    }

    /// Default status map of every configured adapter, keyed by adapter id.
    #[must_use]
    pub fn status_maps(&self) -> HashMap<String, StatusMap> {
        self.adapters
            .iter()
            .map(|entry| (entry.id.clone(), entry.status_map.clone().unwrap_or_default()))
            .collect()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[source] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
    /// An adapter's `config` table does not match its transport.
    #[error("invalid settings for adapter {id}")]
    Adapter {
        id: String,
        #[source]
        source: toml::de::Error,
    },
    /// A device, binding, group or scene definition is invalid.
    #[error("invalid device definitions")]
    Definition(#[from] DefinitionError),
}
