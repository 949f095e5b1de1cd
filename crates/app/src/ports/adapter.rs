//! Adapter port — the contract every protocol connector implements.
//!
//! An adapter owns one session with an external transport (a persistent
//! socket, a broker, …). The router sends it translated commands; the
//! ingestion task drains its [`StatusStream`]. Adapters are held as
//! `Arc<dyn Adapter>` so the set of transports is decided by configuration.

use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};

use synhome_domain::connection::ConnectionState;
use synhome_domain::error::{CommandError, SynHomeError};

/// Inbound status for one external device, fields as reported on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub external_device_id: String,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// A device reported by an adapter's discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalDeviceDescriptor {
    pub device_id: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Any further attributes the remote side reports.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A command addressed to one external device, before template rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPayload {
    pub command: String,
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl CommandPayload {
    /// The `set` command carrying external field/value pairs.
    #[must_use]
    pub fn set(params: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            command: "set".to_string(),
            params,
        }
    }
}

/// Acknowledgement that a command left the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub external_device_id: String,
}

/// Lazy, unbounded sequence of status events.
pub type StatusStream = Pin<Box<dyn Stream<Item = StatusEvent> + Send>>;

/// A protocol-specific connector.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Configured adapter id, referenced by physical bindings.
    fn id(&self) -> &str;

    fn connection_state(&self) -> ConnectionState;

    /// Follow connection state transitions.
    fn watch_connection(&self) -> watch::Receiver<ConnectionState>;

    /// Establish the session. A no-op when already connected.
    ///
    /// Transport failures start background reconnection before returning
    /// [`SynHomeError::Connection`]; refused credentials return
    /// [`SynHomeError::Authentication`] and never retry.
    async fn connect(&self) -> Result<(), SynHomeError>;

    /// Release the session and cancel pending reconnection. Safe from any
    /// state.
    async fn disconnect(&self);

    /// Query the external devices reachable through this adapter.
    async fn discover_devices(&self) -> Result<Vec<ExternalDeviceDescriptor>, SynHomeError>;

    /// Dispatch a translated command.
    async fn send_command(
        &self,
        external_device_id: &str,
        payload: CommandPayload,
    ) -> Result<Ack, CommandError>;

    /// A fresh stream of inbound status. Each call returns an independent
    /// subscription; slow consumers skip ahead instead of blocking the
    /// adapter.
    fn status_stream(&self) -> StatusStream;
}

/// Wrap a broadcast receiver as a [`StatusStream`], dropping lag markers.
#[must_use]
pub fn broadcast_status_stream(receiver: broadcast::Receiver<StatusEvent>) -> StatusStream {
    Box::pin(
        BroadcastStream::new(receiver).filter_map(|item| match item {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "status consumer lagged, events dropped");
                None
            }
        }),
    )
}
