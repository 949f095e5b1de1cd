//! # synhome-adapter-websocket
//!
//! WebSocket adapter — a bidirectional-session connector.
//!
//! ## Responsibilities
//! - Open a WebSocket session, authenticating by bearer header or an `auth` frame
//! - Render outbound commands from the configured JSON template
//! - Push inbound status frames into the adapter's status stream
//! - Collect `discovery_response` frames for device discovery
//! - Keep the session alive with pings and reconnect with backoff when it drops
//!
//! ## Dependency rule
//! Depends on `synhome-app` (port traits) and `synhome-domain` (types).
//! Never depends on other adapters.

pub mod config;
pub mod error;
pub mod protocol;
mod session;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use synhome_app::connection::ConnectionCell;
use synhome_app::ports::{Ack, Adapter, CommandPayload, ExternalDeviceDescriptor, StatusStream};
use synhome_app::status::StatusFeed;
use synhome_app::template::render_command;
use synhome_domain::connection::ConnectionState;
use synhome_domain::error::{CommandError, DiscoveryError, SynHomeError};

pub use config::{AuthConfig, WebSocketConfig};
pub use error::WebSocketError;

use session::{Outbound, Shared};

const STATUS_CHANNEL_CAPACITY: usize = 256;
const DISCOVERY_CHANNEL_CAPACITY: usize = 16;
const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// A running supervisor and the queue feeding it.
struct Session {
    outbound: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Session {
    fn spawn(shared: Arc<Shared>, stream: Option<session::WsStream>) -> Self {
        let (outbound, queue) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(session::supervise(shared, stream, queue, cancel.clone()));
        Self {
            outbound,
            cancel,
            task,
        }
    }

    async fn stop(mut self) {
        self.cancel.cancel();
        if let Err(err) = (&mut self.task).await {
            tracing::warn!(error = %err, "websocket supervisor ended abnormally");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Adapter speaking JSON frames over a persistent WebSocket.
pub struct WebSocketAdapter {
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

impl WebSocketAdapter {
    #[must_use]
    pub fn new(id: impl Into<String>, config: WebSocketConfig) -> Self {
        let id = id.into();
        Self {
            shared: Arc::new(Shared {
                state: ConnectionCell::new(id.clone()),
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

    /// Queue `frame` on the live session and wait until it is written.
    async fn transmit(&self, frame: String) -> Result<(), CommandError> {
        let sender = self
            .session
            .lock()
            .await
            .as_ref()
            .map(|session| session.outbound.clone())
            .ok_or(CommandError::NotConnected)?;
        let timeout = self.shared.config.timeout();
        let (ack, acked) = oneshot::channel();
        let delivery = async {
            sender
                .send(Outbound { frame, ack })
                .await
                .map_err(|_| CommandError::NotConnected)?;
            acked.await.map_err(|_| CommandError::NotConnected)?
        };
        tokio::time::timeout(timeout, delivery)
            .await
            .map_err(|_| CommandError::Timeout(timeout))?
    }
}

#[async_trait]
impl Adapter for WebSocketAdapter {
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

        self.shared.state.set(ConnectionState::Connecting);
        let session = match session::open(&self.shared).await {
            Ok(stream) => {
                self.shared.state.set(ConnectionState::Connected);
                tracing::info!(url = %self.shared.config.url, "websocket connected");
                Session::spawn(Arc::clone(&self.shared), Some(stream))
            }
            Err(WebSocketError::AuthRejected(reason)) => {
                tracing::error!(%reason, "websocket authentication rejected");
                self.shared.state.set(ConnectionState::Disconnected);
                return Err(
                    WebSocketError::AuthRejected(reason).into_domain(&self.shared.adapter_id)
                );
            }
            Err(err) => {
                tracing::warn!(error = %err, "websocket connection failed");
                if self.shared.config.auto_reconnect {
                    self.install(Session::spawn(Arc::clone(&self.shared), None)).await;
                } else {
                    self.shared.state.set(ConnectionState::Disconnected);
                }
                return Err(err.into_domain(&self.shared.adapter_id));
            }
        };
        self.install(session).await;
        Ok(())
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
            return Err(WebSocketError::NotConnected.into_discovery(adapter_id));
        }

        let mut batches = self.shared.discovery_tx.subscribe();
        self.transmit(protocol::discovery_request(adapter_id).to_string())
            .await
            .map_err(|err| DiscoveryError {
                adapter_id: adapter_id.clone(),
                source: Box::new(err),
            })?;

        let deadline = Instant::now() + self.shared.config.timeout();
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
                    tracing::debug!("discovery window elapsed before completion");
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
        let frame = render_command(&self.shared.config.command_template, external_device_id, &payload);
        self.transmit(frame.to_string()).await?;
        tracing::debug!(
            adapter_id = %self.shared.adapter_id,
            external_device_id,
            command = %payload.command,
            "command sent"
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
    use std::future::Future;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::Message;

    use synhome_domain::reconnect::ReconnectSettings;

    type ServerStream = WebSocketStream<TcpStream>;

    /// Accept one client on an ephemeral port and hand it to `handler`.
    async fn serve_once<F, Fut>(handler: F) -> String
    where
        F: FnOnce(ServerStream) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });
        url
    }

    /// Accept every client, handing the n-th session to `handler(n, ws)`.
    async fn serve_sessions<F, Fut>(handler: F) -> String
    where
        F: Fn(usize, ServerStream) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            for index in 0.. {
                let (tcp, _) = listener.accept().await.unwrap();
                let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
                tokio::spawn(handler(index, ws));
            }
        });
        url
    }

    async fn next_json(ws: &mut ServerStream) -> serde_json::Value {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                _ => continue,
            }
        }
    }

    async fn hold_open(ws: &mut ServerStream) {
        while let Some(Ok(_)) = ws.next().await {}
    }

    fn config(url: String) -> WebSocketConfig {
        WebSocketConfig {
            url,
            timeout_secs: 2,
            auto_reconnect: false,
            ..WebSocketConfig::default()
        }
    }

    #[tokio::test]
    async fn should_authenticate_send_commands_and_stream_status() {
        let (frames_tx, frames_rx) = oneshot::channel();
        let url = serve_once(|mut ws| async move {
            let auth = next_json(&mut ws).await;
            ws.send(Message::text(r#"{"success":true}"#)).await.unwrap();
            let command = next_json(&mut ws).await;
            frames_tx.send((auth, command)).unwrap();
            ws.send(Message::text(
                r#"{"type":"status","device_id":"wm-01","status":{"pwr":"1"}}"#,
            ))
            .await
            .unwrap();
            hold_open(&mut ws).await;
        })
        .await;

        let adapter = WebSocketAdapter::new(
            "ws",
            WebSocketConfig {
                auth: AuthConfig::ApiKey {
                    api_key: "k".to_string(),
                },
                ..config(url)
            },
        );
        let mut status = adapter.status_stream();
        adapter.connect().await.unwrap();
        assert_eq!(adapter.connection_state(), ConnectionState::Connected);

        let mut params = serde_json::Map::new();
        params.insert("pwr".to_string(), serde_json::json!("1"));
        let ack = adapter
            .send_command("wm-01", CommandPayload::set(params))
            .await
            .unwrap();
        assert_eq!(ack.external_device_id, "wm-01");

        let (auth, command) = frames_rx.await.unwrap();
        assert_eq!(auth, serde_json::json!({"type": "auth", "api_key": "k"}));
        assert_eq!(
            command,
            serde_json::json!({
                "type": "command",
                "device_id": "wm-01",
                "command": "set",
                "params": {"pwr": "1"}
            })
        );

        let event = tokio::time::timeout(Duration::from_secs(2), status.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.external_device_id, "wm-01");
        assert_eq!(event.fields["pwr"], "1");

        adapter.disconnect().await;
        assert_eq!(adapter.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn should_report_authentication_failure_without_retry() {
        let url = serve_once(|mut ws| async move {
            next_json(&mut ws).await;
            ws.send(Message::text(r#"{"success":false,"message":"bad key"}"#))
                .await
                .unwrap();
            hold_open(&mut ws).await;
        })
        .await;

        let adapter = WebSocketAdapter::new(
            "ws",
            WebSocketConfig {
                auth: AuthConfig::Basic {
                    username: "u".to_string(),
                    password: "p".to_string(),
                },
                auto_reconnect: true,
                ..config(url)
            },
        );
        let err = adapter.connect().await.unwrap_err();
        assert!(matches!(err, SynHomeError::Authentication(_)));
        assert_eq!(adapter.connection_state(), ConnectionState::Disconnected);
        assert!(adapter.session.lock().await.is_none());
    }

    #[tokio::test]
    async fn should_collect_discovery_batches_until_complete() {
        let url = serve_once(|mut ws| async move {
            let request = next_json(&mut ws).await;
            assert_eq!(request, serde_json::json!({"type": "discovery", "adapter_id": "ws"}));
            ws.send(Message::text(
                r#"{"type":"discovery_response","devices":[{"device_id":"wm-01","type":"washing_machine"}]}"#,
            ))
            .await
            .unwrap();
            ws.send(Message::text(
                r#"{"type":"discovery_response","devices":[{"device_id":"rc-01"}],"complete":true}"#,
            ))
            .await
            .unwrap();
            hold_open(&mut ws).await;
        })
        .await;

        let adapter = WebSocketAdapter::new("ws", config(url));
        adapter.connect().await.unwrap();
        let devices = adapter.discover_devices().await.unwrap();

        let ids: Vec<_> = devices.iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, vec!["wm-01", "rc-01"]);
        assert_eq!(devices[0].device_type.as_deref(), Some("washing_machine"));
        adapter.disconnect().await;
    }

    #[tokio::test]
    async fn should_refuse_work_while_disconnected() {
        let adapter = WebSocketAdapter::new("ws", WebSocketConfig::default());
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
    async fn should_give_up_after_exhausting_reconnection_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let adapter = WebSocketAdapter::new(
            "ws",
            WebSocketConfig {
                auto_reconnect: true,
                reconnect: ReconnectSettings {
                    base_delay_secs: 0,
                    max_attempts: 2,
                    ..ReconnectSettings::default()
                },
                ..config(url)
            },
        );
        let mut state = adapter.watch_connection();

        let err = adapter.connect().await.unwrap_err();
        assert!(matches!(err, SynHomeError::Connection(_)));

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
    async fn should_be_idempotent_when_already_connected() {
        let url = serve_once(|mut ws| async move {
            hold_open(&mut ws).await;
        })
        .await;
        let adapter = WebSocketAdapter::new("ws", config(url));
        adapter.connect().await.unwrap();
        adapter.connect().await.unwrap();
        assert_eq!(adapter.connection_state(), ConnectionState::Connected);
        adapter.disconnect().await;
    }

    #[tokio::test]
    async fn should_treat_refused_upgrade_as_authentication_failure() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        tokio::spawn(async move {
            loop {
                let (mut tcp, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                let mut request = [0_u8; 1024];
                let _ = tcp.read(&mut request).await;
                let _ = tcp
                    .write_all(b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\n\r\n")
                    .await;
                let _ = tcp.shutdown().await;
            }
        });

        let adapter = WebSocketAdapter::new(
            "ws",
            WebSocketConfig {
                auth: AuthConfig::Token {
                    token: "expired".to_string(),
                },
                auto_reconnect: true,
                reconnect: ReconnectSettings {
                    base_delay_secs: 0,
                    ..ReconnectSettings::default()
                },
                ..config(url)
            },
        );
        let err = adapter.connect().await.unwrap_err();
        assert!(matches!(err, SynHomeError::Authentication(_)));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(adapter.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn should_end_status_streams_on_disconnect() {
        let url = serve_once(|mut ws| async move {
            hold_open(&mut ws).await;
        })
        .await;
        let adapter = WebSocketAdapter::new("ws", config(url));
        let mut status = adapter.status_stream();
        adapter.connect().await.unwrap();
        adapter.disconnect().await;

        let next = tokio::time::timeout(Duration::from_secs(1), status.next())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn should_reconnect_after_missed_pongs() {
        // The server never reads, so pings go unanswered.
        let url = serve_once(|ws| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(ws);
        })
        .await;
        let adapter = WebSocketAdapter::new(
            "ws",
            WebSocketConfig {
                ping_interval_secs: 1,
                auto_reconnect: true,
                reconnect: ReconnectSettings {
                    base_delay_secs: 30,
                    ..ReconnectSettings::default()
                },
                ..config(url)
            },
        );
        let mut state = adapter.watch_connection();
        adapter.connect().await.unwrap();

        tokio::time::timeout(
            Duration::from_secs(8),
            state.wait_for(|state| *state == ConnectionState::Reconnecting),
        )
        .await
        .unwrap()
        .unwrap();
        adapter.disconnect().await;
    }

    #[tokio::test]
    async fn should_reconnect_after_server_drops_session() {
        let (accepted_tx, mut accepted) = mpsc::unbounded_channel();
        let (command_tx, mut commands) = mpsc::unbounded_channel();
        let url = serve_sessions(move |index, mut ws| {
            let accepted_tx = accepted_tx.clone();
            let command_tx = command_tx.clone();
            async move {
                accepted_tx.send(index).unwrap();
                if index == 0 {
                    let _ = ws.close(None).await;
                    return;
                }
                let command = next_json(&mut ws).await;
                command_tx.send(command).unwrap();
                hold_open(&mut ws).await;
            }
        })
        .await;

        let adapter = WebSocketAdapter::new(
            "ws",
            WebSocketConfig {
                auto_reconnect: true,
                reconnect: ReconnectSettings {
                    base_delay_secs: 0,
                    ..ReconnectSettings::default()
                },
                ..config(url)
            },
        );
        let mut state = adapter.watch_connection();
        adapter.connect().await.unwrap();

        let wait = Duration::from_secs(5);
        assert_eq!(tokio::time::timeout(wait, accepted.recv()).await.unwrap(), Some(0));
        assert_eq!(tokio::time::timeout(wait, accepted.recv()).await.unwrap(), Some(1));
        tokio::time::timeout(wait, state.wait_for(|state| *state == ConnectionState::Connected))
            .await
            .unwrap()
            .unwrap();

        adapter
            .send_command("wm-01", CommandPayload::set(serde_json::Map::new()))
            .await
            .unwrap();
        let command = tokio::time::timeout(wait, commands.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(command["device_id"], "wm-01");
        adapter.disconnect().await;
    }
}
