//! WebSocket adapter error types.

use std::time::Duration;

use synhome_domain::error::{AuthenticationError, ConnectionError, DiscoveryError, SynHomeError};

/// Errors specific to the WebSocket adapter.
#[derive(Debug, thiserror::Error)]
pub enum WebSocketError {
    #[error("invalid websocket url {0}")]
    InvalidUrl(String),

    /// The tungstenite transport failed.
    #[error("websocket transport error")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed by peer")]
    Closed,

    /// The endpoint answered the `auth` frame without success.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("failed to parse websocket frame")]
    Frame(#[from] serde_json::Error),

    #[error("websocket not connected")]
    NotConnected,
}

impl WebSocketError {
    /// Convert into the domain's adapter-boundary error for `adapter_id`.
    pub fn into_domain(self, adapter_id: &str) -> SynHomeError {
        match self {
            Self::AuthRejected(reason) => AuthenticationError {
                adapter_id: adapter_id.to_string(),
                reason,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_display_auth_rejected_error() {
        let err = WebSocketError::AuthRejected("bad key".to_string());
        assert_eq!(err.to_string(), "authentication rejected: bad key");
    }

    #[test]
    fn should_convert_auth_rejection_to_authentication_error() {
        let err = WebSocketError::AuthRejected("bad key".to_string()).into_domain("ws");
        assert!(matches!(
            err,
            SynHomeError::Authentication(AuthenticationError { ref adapter_id, .. }) if adapter_id == "ws"
        ));
    }

    #[test]
    fn should_convert_transport_failures_to_connection_error() {
        let err = WebSocketError::Closed.into_domain("ws");
        assert!(matches!(err, SynHomeError::Connection(_)));
        assert_eq!(err.to_string(), "adapter ws connection failed");
    }

    #[test]
    fn should_wrap_discovery_failure() {
        let err = WebSocketError::NotConnected.into_discovery("ws");
        assert!(matches!(err, SynHomeError::Discovery(_)));
    }
}
