//! Broker session: option building, the first CONNACK, and the event loop
//! supervisor.
//!
//! rumqttc reconnects whenever the event loop is polled after an error, so
//! the supervisor paces those polls with the reconnection policy and
//! reissues subscriptions on every CONNACK.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use synhome_app::connection::ConnectionCell;
use synhome_app::ports::StatusEvent;
use synhome_app::status::StatusFeed;
use synhome_domain::connection::ConnectionState;
use synhome_domain::reconnect::Backoff;

use crate::config::MqttConfig;
use crate::error::MqttError;
use crate::payload::{self, DiscoveryBatch};
use crate::topics::Topics;

/// Requests the client may queue before the event loop drains them.
pub(crate) const CLIENT_CAPACITY: usize = 64;

const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

/// State shared between the adapter handle and its supervisor.
pub(crate) struct Shared {
    pub adapter_id: String,
    pub config: MqttConfig,
    pub topics: Topics,
    pub state: ConnectionCell,
    pub status: StatusFeed,
    pub discovery_tx: broadcast::Sender<DiscoveryBatch>,
}

pub(crate) fn options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
    options.set_keep_alive(Duration::from_secs(u64::from(config.keep_alive_secs.max(5))));
    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.as_deref().unwrap_or_default());
    }
    options
}

/// Poll until the broker acknowledges the connection.
pub(crate) async fn await_connack(eventloop: &mut EventLoop) -> Result<(), MqttError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = eventloop.poll().await? {
            return Ok(());
        }
    }
}

/// Queue the status and discovery-response subscriptions.
pub(crate) fn subscribe(client: &AsyncClient, topics: &Topics) -> Result<(), MqttError> {
    client
        .try_subscribe(topics.status_filter(), QoS::AtLeastOnce)
        .map_err(MqttError::Client)?;
    client
        .try_subscribe(topics.discovery_response(), QoS::AtLeastOnce)
        .map_err(MqttError::Client)
}

/// Queue a discovery request; responses are routed like any other publish.
pub(crate) fn request_discovery(
    client: &AsyncClient,
    topics: &Topics,
    adapter_id: &str,
) -> Result<(), MqttError> {
    client
        .try_publish(
            topics.discovery_request(),
            QoS::AtLeastOnce,
            false,
            payload::discovery_request(adapter_id),
        )
        .map_err(MqttError::Client)
}

/// Drive the event loop until cancellation or until reconnection stops.
///
/// `connected` tells whether the first CONNACK was already received.
pub(crate) async fn supervise(
    shared: Arc<Shared>,
    client: AsyncClient,
    mut eventloop: EventLoop,
    cancel: CancellationToken,
    mut connected: bool,
) {
    let adapter_id = shared.adapter_id.as_str();
    let policy = shared.config.reconnect.policy();
    let mut attempt: u32 = 0;

    loop {
        if !connected {
            let delay = match policy.next_delay(attempt) {
                Backoff::Retry(delay) => policy.jittered(delay, &mut rand::thread_rng()),
                Backoff::GiveUp => {
                    tracing::error!(adapter_id, attempts = attempt, "reconnection attempts exhausted");
                    shared.state.set(ConnectionState::Failed);
                    break;
                }
            };
            attempt += 1;
            shared.state.set(ConnectionState::Reconnecting);
            tracing::warn!(
                adapter_id,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "waiting before reconnect"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
            shared.state.set(ConnectionState::Connecting);
        }

        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };
        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if let Err(err) = subscribe(&client, &shared.topics) {
                    tracing::warn!(adapter_id, error = %err, "failed to reissue subscriptions");
                }
                if !connected {
                    tracing::info!(adapter_id, attempt, "broker reconnected");
                }
                connected = true;
                attempt = 0;
                shared.state.set(ConnectionState::Connected);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                route_publish(&shared, &publish.topic, &publish.payload);
            }
            Ok(_) => {}
            Err(err) => match MqttError::from(err) {
                MqttError::AuthRefused(code) => {
                    tracing::error!(adapter_id, ?code, "broker refused credentials, not retrying");
                    shared.state.set(ConnectionState::Failed);
                    break;
                }
                err => {
                    tracing::warn!(adapter_id, error = %err, "broker connection lost");
                    if !shared.config.auto_reconnect {
                        shared.state.set(ConnectionState::Disconnected);
                        break;
                    }
                    connected = false;
                }
            },
        }
    }

    if cancel.is_cancelled() && connected && client.try_disconnect().is_ok() {
        // One more poll flushes the DISCONNECT packet.
        let _ = tokio::time::timeout(DISCONNECT_GRACE, eventloop.poll()).await;
    }
    tracing::debug!(adapter_id, "mqtt supervisor stopped");
}

pub(crate) fn route_publish(shared: &Shared, topic: &str, payload: &[u8]) {
    let adapter_id = shared.adapter_id.as_str();
    if topic == shared.topics.discovery_response() {
        match payload::parse_discovery(payload) {
            Ok(batch) => {
                let _ = shared.discovery_tx.send(batch);
            }
            Err(err) => tracing::warn!(adapter_id, topic, error = %err, "ignoring discovery payload"),
        }
        return;
    }

    let Some(external_device_id) = shared.topics.device_id_from_status(topic) else {
        tracing::trace!(adapter_id, topic, "ignoring publish on unrelated topic");
        return;
    };
    match payload::parse_status(payload) {
        Ok(fields) => {
            tracing::trace!(adapter_id, external_device_id, "status received");
            shared.status.publish(StatusEvent {
                external_device_id: external_device_id.to_string(),
                fields,
            });
        }
        Err(err) => tracing::warn!(adapter_id, topic, error = %err, "ignoring status payload"),
    }
}
