//! # synhome-adapter-mqtt
//!
//! MQTT adapter — a publish/subscribe connector built on `rumqttc`.
//!
//! ## Responsibilities
//! - Connect to a broker with optional username/password credentials
//! - Subscribe to per-device status topics and forward them as status events
//! - Publish rendered commands to per-device command topics
//! - Request discovery and collect the announced devices
//! - Resubscribe and back off when the broker connection drops
//!
//! ## Dependency rule
//! Depends on `synhome-app` (port traits) and `synhome-domain` (types).
//! Never depends on other adapters.

pub mod config;
pub mod error;
pub mod payload;
pub mod topics;
mod session;

use std::sync::Arc;

use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use synhome_app::connection::ConnectionCell;
use synhome_app::ports::{Ack, Adapter, CommandPayload, ExternalDeviceDescriptor, StatusStream};
use synhome_app::status::StatusFeed;
use synhome_app::template::render_command;
use synhome_domain::connection::ConnectionState;
use synhome_domain::error::{CommandError, DiscoveryError, SynHomeError};

pub use config::{MqttConfig, TopicConfig};
pub use error::MqttError;
pub use topics::Topics;

use session::Shared;

const STATUS_CHANNEL_CAPACITY: usize = 256;
const DISCOVERY_CHANNEL_CAPACITY: usize = 16;

/// A running event-loop supervisor and the client feeding it.
struct Session {
    client: AsyncClient,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Session {
    fn spawn(
        shared: Arc<Shared>,
        client: AsyncClient,
        eventloop: rumqttc::EventLoop,
        connected: bool,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(session::supervise(
            shared,
            client.clone(),
            eventloop,
            cancel.clone(),
            connected,
        ));
        Self {
            client,
            cancel,
            task,
        }
    }

    async fn stop(mut self) {
        self.cancel.cancel();
        if let Err(err) = (&mut self.task).await {
            tracing::warn!(error = %err, "mqtt supervisor ended abnormally");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Adapter publishing commands and consuming status through an MQTT broker.
pub struct MqttAdapter {
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

impl MqttAdapter {
    #[must_use]
    pub fn new(id: impl Into<String>, config: MqttConfig) -> Self {
        let id = id.into();
        Self {
            shared: Arc::new(Shared {
                state: ConnectionCell::new(id.clone()),
                topics: Topics::new(&config.topics),
                adapter_id: id,
                config,
                status: StatusFeed::new(STATUS_CHANNEL_CAPACITY),
                discovery_tx: broadcast::channel(DISCOVERY_CHANNEL_CAPACITY).0,
            }),
            session: Mutex::new(None),
        }
    }

    /// Put `session` in the slot, stopping any session a concurrent
    /// `connect` installed meanwhile.
    async fn install(&self, session: Session) {
        let replaced = self.session.lock().await.replace(session);
        if let Some(replaced) = replaced {
            replaced.stop().await;
        }
    }

    async fn client(&self) -> Option<AsyncClient> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.client.clone())
    }

    /// Publish `payload` to `topic`, bounded by the command timeout.
    async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<(), CommandError> {
        let client = self.client().await.ok_or(CommandError::NotConnected)?;
        let timeout = self.shared.config.command_timeout();
        tokio::time::timeout(timeout, client.publish(topic, QoS::AtLeastOnce, false, payload))
            .await
            .map_err(|_| CommandError::Timeout(timeout))?
            .map_err(|err| {
                tracing::warn!(
                    adapter_id = %self.shared.adapter_id,
                    error = %err,
                    "publish request not accepted"
                );
                CommandError::NotConnected
            })
    }
}

#[async_trait]
impl Adapter for MqttAdapter {
    fn id(&self) -> &str {
        &self.shared.adapter_id
    }

    fn connection_state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    #[tracing::instrument(skip(self), fields(adapter_id = %self.shared.adapter_id))]
    async fn connect(&self) -> Result<(), SynHomeError> {
        let previous = {
            let mut running = self.session.lock().await;
            if self.shared.state.get().is_connected()
                && running.as_ref().is_some_and(|s| !s.task.is_finished())
            {
                return Ok(());
            }
            running.take()
        };
        if let Some(previous) = previous {
            previous.stop().await;
        }

        let config = &self.shared.config;
        self.shared.state.set(ConnectionState::Connecting);
        let (client, mut eventloop) =
            AsyncClient::new(session::options(config), session::CLIENT_CAPACITY);

        let timeout = config.command_timeout();
        let outcome = tokio::time::timeout(timeout, session::await_connack(&mut eventloop))
            .await
            .unwrap_or(Err(MqttError::Timeout(timeout)))
            .and_then(|()| session::subscribe(&client, &self.shared.topics));

        match outcome {
            Ok(()) => {
                if let Err(err) =
                    session::request_discovery(&client, &self.shared.topics, &self.shared.adapter_id)
                {
                    tracing::warn!(error = %err, "initial discovery request not queued");
                }
                self.shared.state.set(ConnectionState::Connected);
                self.install(Session::spawn(
                    Arc::clone(&self.shared),
                    client,
                    eventloop,
                    true,
                ))
                .await;
                tracing::info!(
                    host = %config.broker_host,
                    port = config.broker_port,
                    "connected to MQTT broker"
                );
                Ok(())
            }
            Err(MqttError::AuthRefused(code)) => {
                tracing::error!(?code, "broker refused credentials");
                self.shared.state.set(ConnectionState::Disconnected);
                Err(MqttError::AuthRefused(code).into_domain(&self.shared.adapter_id))
            }
            Err(err) => {
                tracing::warn!(error = %err, "MQTT connection failed");
                if config.auto_reconnect {
                    self.install(Session::spawn(
                        Arc::clone(&self.shared),
                        client,
                        eventloop,
                        false,
                    ))
                    .await;
                } else {
                    self.shared.state.set(ConnectionState::Disconnected);
                }
                Err(err.into_domain(&self.shared.adapter_id))
            }
        }
    }

    async fn disconnect(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.stop().await;
        }
        self.shared.state.set(ConnectionState::Disconnected);
        self.shared.status.close();
    }

    #[tracing::instrument(skip(self), fields(adapter_id = %self.shared.adapter_id))]
    async fn discover_devices(&self) -> Result<Vec<ExternalDeviceDescriptor>, SynHomeError> {
        let adapter_id = &self.shared.adapter_id;
        if !self.shared.state.get().is_connected() {
            return Err(MqttError::NotConnected.into_discovery(adapter_id));
        }

        let mut batches = self.shared.discovery_tx.subscribe();
        self.publish(
            self.shared.topics.discovery_request().to_string(),
            payload::discovery_request(adapter_id),
        )
        .await
        .map_err(|err| DiscoveryError {
            adapter_id: adapter_id.clone(),
            source: Box::new(err),
        })?;

        let deadline = Instant::now() + self.shared.config.discovery_timeout();
        let mut devices = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, batches.recv()).await {
                Ok(Ok(batch)) => {
                    devices.extend(batch.devices);
                    if batch.complete {
                        break;
                    }
                }
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "discovery responses dropped");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => break,
                Err(_) => {
                    tracing::debug!("discovery window elapsed");
                    break;
                }
            }
        }
        tracing::info!(count = devices.len(), "devices discovered");
        Ok(devices)
    }

    async fn send_command(
        &self,
        external_device_id: &str,
        payload: CommandPayload,
    ) -> Result<Ack, CommandError> {
        if !self.shared.state.get().is_connected() {
            return Err(CommandError::NotConnected);
        }
        let topic = self.shared.topics.command_topic(external_device_id);
        let body = render_command(&self.shared.config.command_template, external_device_id, &payload);
        self.publish(topic.clone(), body.to_string().into_bytes())
            .await?;
        tracing::debug!(
            adapter_id = %self.shared.adapter_id,
            topic,
            command = %payload.command,
            "command published"
        );
        Ok(Ack {
            external_device_id: external_device_id.to_string(),
        })
    }

    fn status_stream(&self) -> StatusStream {
        self.shared.status.stream()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_stream::StreamExt;

    use synhome_domain::reconnect::ReconnectSettings;

    const CONNACK_ACCEPTED: [u8; 4] = [0x20, 0x02, 0x00, 0x00];
    const CONNACK_BAD_CREDENTIALS: [u8; 4] = [0x20, 0x02, 0x00, 0x04];

    /// A QoS 0 PUBLISH packet; remaining length must fit in one byte.
    fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
        let topic_len = u16::try_from(topic.len()).unwrap();
        let remaining = u8::try_from(2 + topic.len() + payload.len()).unwrap();
        assert!(remaining < 128);
        let mut packet = vec![0x30, remaining];
        packet.extend_from_slice(&topic_len.to_be_bytes());
        packet.extend_from_slice(topic.as_bytes());
        packet.extend_from_slice(payload);
        packet
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|window| window == needle)
    }

    /// Bind an ephemeral broker port and return its config.
    async fn broker() -> (TcpListener, MqttConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = MqttConfig {
            broker_host: "127.0.0.1".to_string(),
            broker_port: port,
            command_timeout_secs: 2,
            discovery_timeout_secs: 1,
            auto_reconnect: false,
            ..MqttConfig::default()
        };
        (listener, config)
    }

    async fn accept_and_ack(listener: &TcpListener, connack: [u8; 4]) -> TcpStream {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 256];
        let read = socket.read(&mut buf).await.unwrap();
        assert!(read > 0);
        assert_eq!(buf[0] >> 4, 1, "first packet should be CONNECT");
        socket.write_all(&connack).await.unwrap();
        socket
    }

    #[tokio::test]
    async fn should_refuse_work_while_disconnected() {
        let adapter = MqttAdapter::new("mqtt", MqttConfig::default());
        assert_eq!(adapter.connection_state(), ConnectionState::Disconnected);
        let result = adapter
            .send_command("wm-01", CommandPayload::set(serde_json::Map::new()))
            .await;
        assert_eq!(result, Err(CommandError::NotConnected));
        assert!(matches!(
            adapter.discover_devices().await,
            Err(SynHomeError::Discovery(_))
        ));
    }

    #[tokio::test]
    async fn should_report_unreachable_broker_as_connection_error() {
        let (listener, config) = broker().await;
        drop(listener);

        let adapter = MqttAdapter::new("mqtt", config);
        let err = adapter.connect().await.unwrap_err();
        assert!(matches!(err, SynHomeError::Connection(_)));
        assert_eq!(adapter.connection_state(), ConnectionState::Disconnected);
        assert!(adapter.session.lock().await.is_none());
    }

    #[tokio::test]
    async fn should_give_up_after_exhausting_reconnection_attempts() {
        let (listener, config) = broker().await;
        drop(listener);

        let adapter = MqttAdapter::new(
            "mqtt",
            MqttConfig {
                auto_reconnect: true,
                reconnect: ReconnectSettings {
                    base_delay_secs: 0,
                    max_attempts: 2,
                    ..ReconnectSettings::default()
                },
                ..config
            },
        );
        let mut state = adapter.watch_connection();
        assert!(matches!(
            adapter.connect().await,
            Err(SynHomeError::Connection(_))
        ));

        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|state| *state == ConnectionState::Failed),
        )
        .await
        .unwrap()
        .unwrap();
        adapter.disconnect().await;
    }

    #[tokio::test]
    async fn should_map_refused_credentials_to_authentication_error() {
        let (listener, config) = broker().await;
        tokio::spawn(async move {
            let mut socket = accept_and_ack(&listener, CONNACK_BAD_CREDENTIALS).await;
            let mut buf = [0u8; 64];
            while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
        });

        let adapter = MqttAdapter::new(
            "mqtt",
            MqttConfig {
                username: Some("hub".to_string()),
                password: Some("wrong".to_string()),
                auto_reconnect: true,
                ..config
            },
        );
        let err = adapter.connect().await.unwrap_err();
        assert!(matches!(err, SynHomeError::Authentication(_)));
        assert_eq!(adapter.connection_state(), ConnectionState::Disconnected);
        assert!(adapter.session.lock().await.is_none());
    }

    #[tokio::test]
    async fn should_stream_status_and_publish_commands() {
        let (listener, config) = broker().await;
        let (received_tx, received_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let mut socket = accept_and_ack(&listener, CONNACK_ACCEPTED).await;
            socket
                .write_all(&publish_packet(
                    "synhome/devices/wm-01/status",
                    br#"{"pwr":"1"}"#,
                ))
                .await
                .unwrap();

            let mut seen = Vec::new();
            let mut buf = [0u8; 512];
            loop {
                let read = socket.read(&mut buf).await.unwrap();
                assert!(read > 0, "client closed before publishing the command");
                seen.extend_from_slice(&buf[..read]);
                if contains(&seen, b"synhome/devices/wm-01/command") && contains(&seen, b"\"pwr\"") {
                    break;
                }
            }
            received_tx.send(seen).unwrap();
            while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
        });

        let adapter = MqttAdapter::new("mqtt", config);
        let mut status = adapter.status_stream();
        adapter.connect().await.unwrap();
        assert_eq!(adapter.connection_state(), ConnectionState::Connected);

        let event = tokio::time::timeout(Duration::from_secs(2), status.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.external_device_id, "wm-01");
        assert_eq!(event.fields["pwr"], "1");

        let mut params = serde_json::Map::new();
        params.insert("pwr".to_string(), serde_json::json!("0"));
        let ack = adapter
            .send_command("wm-01", CommandPayload::set(params))
            .await
            .unwrap();
        assert_eq!(ack.external_device_id, "wm-01");

        let seen = tokio::time::timeout(Duration::from_secs(2), received_rx)
            .await
            .unwrap()
            .unwrap();
        assert!(contains(&seen, br#""command":"set""#));
        assert!(contains(&seen, b"synhome/devices/+/status"));
        assert!(contains(&seen, b"synhome/discovery/request"));

        adapter.disconnect().await;
        assert_eq!(adapter.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn should_end_status_streams_on_disconnect() {
        let (listener, config) = broker().await;
        tokio::spawn(async move {
            let mut socket = accept_and_ack(&listener, CONNACK_ACCEPTED).await;
            let mut buf = [0u8; 256];
            while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
        });

        let adapter = MqttAdapter::new("mqtt", config);
        let mut status = adapter.status_stream();
        adapter.connect().await.unwrap();
        adapter.disconnect().await;

        let next = tokio::time::timeout(Duration::from_secs(1), status.next())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn should_resubscribe_after_broker_reconnect() {
        async fn read_until_subscribed(socket: &mut TcpStream) {
            let mut seen = Vec::new();
            let mut buf = [0u8; 512];
            while !contains(&seen, b"synhome/devices/+/status") {
                let read = socket.read(&mut buf).await.unwrap();
                assert!(read > 0, "client closed before subscribing");
                seen.extend_from_slice(&buf[..read]);
            }
        }

        let (listener, config) = broker().await;
        let (resubscribed_tx, resubscribed) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let mut first = accept_and_ack(&listener, CONNACK_ACCEPTED).await;
            read_until_subscribed(&mut first).await;
            drop(first);

            let mut second = accept_and_ack(&listener, CONNACK_ACCEPTED).await;
            read_until_subscribed(&mut second).await;
            resubscribed_tx.send(()).unwrap();
            let mut buf = [0u8; 256];
            while matches!(second.read(&mut buf).await, Ok(n) if n > 0) {}
        });

        let adapter = MqttAdapter::new(
            "mqtt",
            MqttConfig {
                auto_reconnect: true,
                reconnect: ReconnectSettings {
                    base_delay_secs: 0,
                    ..ReconnectSettings::default()
                },
                ..config
            },
        );
        let mut state = adapter.watch_connection();
        adapter.connect().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), resubscribed)
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|state| *state == ConnectionState::Connected),
        )
        .await
        .unwrap()
        .unwrap();
        adapter.disconnect().await;
    }
}
