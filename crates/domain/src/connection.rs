//! Adapter connection state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of an adapter's session with its remote endpoint.
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Reconnecting -> Connecting ...
///                                                     \-> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Retries are exhausted or credentials were refused. Left only through
    /// an explicit `connect`.
    Failed,
}

impl ConnectionState {
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}
