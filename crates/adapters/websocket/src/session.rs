//! Session lifecycle: open, serve, and reconnect.
//!
//! One supervisor task per adapter owns the socket. It serves the session
//! until it is lost, then walks the reconnection policy until a new
//! session opens, retries run out, or the adapter is disconnected.
//! Outbound frames reach it through an mpsc queue; each carries a oneshot
//! acknowledged once the frame is written.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use synhome_app::connection::ConnectionCell;
use synhome_app::status::StatusFeed;
use synhome_domain::connection::ConnectionState;
use synhome_domain::error::CommandError;
use synhome_domain::reconnect::Backoff;

use crate::config::{AuthConfig, WebSocketConfig};
use crate::error::WebSocketError;
use crate::protocol::{self, DiscoveryBatch, Inbound};

/// Unanswered keep-alive pings tolerated before the session is dropped.
const MAX_MISSED_PONGS: u32 = 3;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// State shared between the adapter handle and its supervisor.
pub(crate) struct Shared {
    pub adapter_id: String,
    pub config: WebSocketConfig,
    pub state: ConnectionCell,
    pub status: StatusFeed,
    pub discovery_tx: broadcast::Sender<DiscoveryBatch>,
}

/// A frame waiting to be written.
pub(crate) struct Outbound {
    pub frame: String,
    pub ack: oneshot::Sender<Result<(), CommandError>>,
}

enum SessionEnd {
    Cancelled,
    Lost(WebSocketError),
}

/// Connect, then authenticate in-band if the auth scheme requires it.
pub(crate) async fn open(shared: &Shared) -> Result<WsStream, WebSocketError> {
    let config = &shared.config;
    let uri: Uri = config
        .url
        .parse()
        .map_err(|_| WebSocketError::InvalidUrl(config.url.clone()))?;
    let mut request = ClientRequestBuilder::new(uri);
    if let AuthConfig::Token { token } = &config.auth {
        request = request.with_header("Authorization", format!("Bearer {token}"));
    }

    let timeout = config.timeout();
    tracing::debug!(adapter_id = %shared.adapter_id, url = %config.url, "opening websocket");
    let (mut ws, _response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
        .await
        .map_err(|_| WebSocketError::Timeout(timeout))?
        .map_err(upgrade_error)?;

    if let Some(frame) = protocol::auth_frame(&config.auth) {
        ws.send(Message::text(frame.to_string())).await?;
        let reply = tokio::time::timeout(timeout, next_text(&mut ws))
            .await
            .map_err(|_| WebSocketError::Timeout(timeout))??;
        let reply: serde_json::Value = serde_json::from_str(&reply)?;
        if let Err(reason) = protocol::auth_outcome(&reply) {
            let _ = ws.close(None).await;
            return Err(WebSocketError::AuthRejected(reason));
        }
        tracing::debug!(adapter_id = %shared.adapter_id, "websocket authenticated");
    }
    Ok(ws)
}

/// A 401 or 403 answer to the upgrade request means the token was refused.
fn upgrade_error(err: tungstenite::Error) -> WebSocketError {
    match err {
        tungstenite::Error::Http(response)
            if matches!(
                response.status(),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            ) =>
        {
            WebSocketError::AuthRejected(format!("upgrade refused with {}", response.status()))
        }
        other => other.into(),
    }
}

async fn next_text(ws: &mut WsStream) -> Result<String, WebSocketError> {
    while let Some(message) = ws.next().await {
        match message? {
            Message::Text(text) => return Ok(text.as_str().to_string()),
            Message::Close(_) => return Err(WebSocketError::Closed),
            _ => {}
        }
    }
    Err(WebSocketError::Closed)
}

/// Own the session until cancellation or until reconnection stops.
///
/// With `stream` set the session is served first; without it the
/// supervisor starts in the reconnection loop.
pub(crate) async fn supervise(
    shared: Arc<Shared>,
    mut stream: Option<WsStream>,
    mut outbound: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
) {
    let adapter_id = shared.adapter_id.as_str();
    let policy = shared.config.reconnect.policy();
    let mut attempt: u32 = 0;

    loop {
        if let Some(ws) = stream.take() {
            shared.state.set(ConnectionState::Connected);
            attempt = 0;
            match serve(&shared, ws, &mut outbound, &cancel).await {
                SessionEnd::Cancelled => break,
                SessionEnd::Lost(err) => {
                    tracing::warn!(adapter_id, error = %err, "websocket session lost");
                }
            }
            if !shared.config.auto_reconnect {
                shared.state.set(ConnectionState::Disconnected);
                break;
            }
        }

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
        if !backoff(delay, &mut outbound, &cancel).await {
            break;
        }

        shared.state.set(ConnectionState::Connecting);
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = open(&shared) => result,
        };
        match opened {
            Ok(ws) => {
                tracing::info!(adapter_id, attempt, "websocket reconnected");
                stream = Some(ws);
            }
            Err(WebSocketError::AuthRejected(reason)) => {
                tracing::error!(adapter_id, %reason, "authentication rejected, not retrying");
                shared.state.set(ConnectionState::Failed);
                break;
            }
            Err(err) => {
                tracing::warn!(adapter_id, attempt, error = %err, "reconnect attempt failed");
            }
        }
    }

    outbound.close();
    while let Ok(request) = outbound.try_recv() {
        let _ = request.ack.send(Err(CommandError::NotConnected));
    }
    tracing::debug!(adapter_id, "websocket supervisor stopped");
}

/// Sleep for `delay`, refusing queued frames meanwhile. Returns `false` when
/// cancelled.
async fn backoff(
    delay: Duration,
    outbound: &mut mpsc::Receiver<Outbound>,
    cancel: &CancellationToken,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return false,
            () = &mut sleep => return true,
            Some(request) = outbound.recv() => {
                let _ = request.ack.send(Err(CommandError::NotConnected));
            }
        }
    }
}

async fn serve(
    shared: &Shared,
    ws: WsStream,
    outbound: &mut mpsc::Receiver<Outbound>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let (mut write, mut read) = ws.split();
    let period = shared.config.ping_interval();
    let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Cancelled;
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => route_inbound(shared, text.as_str()),
                Some(Ok(Message::Pong(_))) => missed = 0,
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(adapter_id = %shared.adapter_id, ?frame, "websocket close frame received");
                    return SessionEnd::Lost(WebSocketError::Closed);
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return SessionEnd::Lost(err.into()),
                None => return SessionEnd::Lost(WebSocketError::Closed),
            },
            Some(request) = outbound.recv() => {
                if let Err(err) = write.send(Message::text(request.frame)).await {
                    let _ = request.ack.send(Err(CommandError::NotConnected));
                    return SessionEnd::Lost(err.into());
                }
                let _ = request.ack.send(Ok(()));
            }
            _ = keepalive.tick() => {
                if missed >= MAX_MISSED_PONGS {
                    return SessionEnd::Lost(WebSocketError::Timeout(period * MAX_MISSED_PONGS));
                }
                missed += 1;
                if let Err(err) = write.send(Message::Ping(Default::default())).await {
                    return SessionEnd::Lost(err.into());
                }
            }
        }
    }
}

fn route_inbound(shared: &Shared, text: &str) {
    match protocol::parse_inbound(text, &shared.config.status_message_type) {
        Ok(Inbound::Status(event)) => {
            tracing::trace!(
                adapter_id = %shared.adapter_id,
                external_device_id = %event.external_device_id,
                "status frame"
            );
            shared.status.publish(event);
        }
        Ok(Inbound::Discovery(batch)) => {
            let _ = shared.discovery_tx.send(batch);
        }
        Ok(Inbound::Other) => {
            tracing::trace!(adapter_id = %shared.adapter_id, "ignoring frame");
        }
        Err(err) => {
            tracing::warn!(adapter_id = %shared.adapter_id, error = %err, "ignoring malformed frame");
        }
    }
}
