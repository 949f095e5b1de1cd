//! MQTT adapter error types.

use std::time::Duration;

use synhome_domain::error::{AuthenticationError, ConnectionError, DiscoveryError, SynHomeError};

/// Errors specific to the MQTT adapter.
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// No broker session is active.
    #[error("MQTT client not connected")]
    NotConnected,

    /// The rumqttc client returned an error.
    #[error("MQTT client error")]
    Client(#[source] rumqttc::ClientError),

    /// The rumqttc event loop lost or could not open the connection.
    #[error("MQTT connection error")]
    Connection(#[source] rumqttc::ConnectionError),

    /// The broker refused the client's credentials.
    #[error("broker refused connection: {0:?}")]
    AuthRefused(rumqttc::ConnectReturnCode),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Failed to parse an incoming MQTT payload as JSON.
    #[error("failed to parse MQTT payload")]
    PayloadParse(#[source] serde_json::Error),
}

impl MqttError {
    /// Convert into the domain's adapter-boundary error for `adapter_id`.
    pub fn into_domain(self, adapter_id: &str) -> SynHomeError {
        match self {
            Self::AuthRefused(code) => AuthenticationError {
                adapter_id: adapter_id.to_string(),
                reason: format!("{code:?}"),
            }
            .into(),
            other => ConnectionError {
                adapter_id: adapter_id.to_string(),
                source: Box::new(other),
            }
            .into(),
        }
    }

    /// Wrap as a [`DiscoveryError`] for `adapter_id`.
    pub fn into_discovery(self, adapter_id: &str) -> SynHomeError {
        DiscoveryError {
            adapter_id: adapter_id.to_string(),
            source: Box::new(self),
        }
        .into()
    }
}

impl From<rumqttc::ConnectionError> for MqttError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        match err {
            rumqttc::ConnectionError::ConnectionRefused(code) if is_auth_refusal(code) => {
                Self::AuthRefused(code)
            }
            other => Self::Connection(other),
        }
    }
}

/// Whether a CONNACK return code means the credentials were refused.
#[must_use]
pub fn is_auth_refusal(code: rumqttc::ConnectReturnCode) -> bool {
    matches!(
        code,
        rumqttc::ConnectReturnCode::BadUserNamePassword | rumqttc::ConnectReturnCode::NotAuthorized
    )
}
