//! Connection handlers for the Lounge server.
//!
//! This module owns the transport side of a connection: it accepts the
//! WebSocket, decodes client frames into intents for the room, and drains
//! the connection's outbox back onto the socket.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use lounge_core::{ConnectionId, Intent, Room};
use lounge_protocol::{codec, error_codes, ClientFrame, Encoding, ProtocolError, ServerFrame};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The chat room.
    pub room: Room,
    /// Server configuration.
    pub config: Config,
    /// Open WebSocket connections.
    open_connections: AtomicUsize,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            room: Room::with_config(config.room.name.clone(), config.room.room_config()),
            config,
            open_connections: AtomicUsize::new(0),
        }
    }
}

/// A reserved connection slot, released on drop.
struct ConnectionSlot {
    state: Arc<AppState>,
}

impl ConnectionSlot {
    fn acquire(state: &Arc<AppState>) -> Option<Self> {
        let max = state.config.limits.max_connections;
        state
            .open_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                (open < max).then_some(open + 1)
            })
            .ok()
            .map(|_| Self {
                state: Arc::clone(state),
            })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.open_connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Lounge server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app(state))
        .await
        .context("Server error")?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.room.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "room": state.room.id(),
        "connections": stats.connections,
        "members": stats.members,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let Some(slot) = ConnectionSlot::acquire(&state) else {
        warn!(
            max = state.config.limits.max_connections,
            "Connection limit reached"
        );
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "Connection limit reached").into_response();
    };

    ws.max_message_size(state.config.limits.max_frame_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, slot))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, _slot: ConnectionSlot) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let (sender, receiver) = socket.split();
    run_connection(sender, receiver, &state).await;
}

/// Drive one connection until the client leaves, the socket fails or the
/// connection idles out, then end its session.
async fn run_connection<S, R>(mut sender: S, mut receiver: R, state: &AppState)
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let (connection_id, mut outbox) = state.room.connect();
    debug!(connection = %connection_id, "WebSocket connected");

    // Replies follow whichever encoding the client used last.
    let mut encoding = Encoding::Json;
    let mut read_buffer = BytesMut::with_capacity(4096);

    let hello = ServerFrame::connected(connection_id.as_str());
    if let Err(e) = send_frame(&mut sender, &hello, encoding).await {
        error!(connection = %connection_id, error = %e, "Failed to send connected frame");
        finish(state, &connection_id);
        return;
    }

    let period = Duration::from_millis(state.config.heartbeat.interval_ms.max(1));
    let idle_timeout = Duration::from_millis(state.config.heartbeat.timeout_ms);
    let mut heartbeat = interval_at(Instant::now() + period, period);
    let mut last_seen = Instant::now();

    'connection: loop {
        tokio::select! {
            biased;

            // Frames fanned out by the room
            Some(frame) = outbox.recv() => {
                if let Err(e) = send_frame(&mut sender, &frame, encoding).await {
                    debug!(connection = %connection_id, error = %e, "Send failed");
                    break;
                }
            }

            msg = receiver.next() => {
                last_seen = Instant::now();

                match msg {
                    Some(Ok(Message::Text(text))) => {
                        encoding = Encoding::Json;
                        metrics::record_frame(text.len(), "inbound");

                        let decoded = codec::decode_json::<ClientFrame>(&text);
                        if let Err(e) = process(decoded, &connection_id, state, &mut sender, encoding).await {
                            debug!(connection = %connection_id, error = %e, "Send failed");
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        encoding = Encoding::MessagePack;
                        metrics::record_frame(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        loop {
                            let decoded = match codec::decode_from::<ClientFrame>(&mut read_buffer) {
                                Ok(Some(frame)) => Ok(frame),
                                Ok(None) => break,
                                Err(e) => {
                                    // Framing is lost; resynchronise on the next message.
                                    read_buffer.clear();
                                    Err(e)
                                }
                            };
                            if let Err(e) = process(decoded, &connection_id, state, &mut sender, encoding).await {
                                debug!(connection = %connection_id, error = %e, "Send failed");
                                break 'connection;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if last_seen.elapsed() > idle_timeout {
                    debug!(connection = %connection_id, "Idle timeout");
                    metrics::record_error("idle_timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    finish(state, &connection_id);
    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// End a connection's session, if it had one.
fn finish(state: &AppState, connection_id: &ConnectionId) {
    if let Some(delivered) = state.room.disconnect(connection_id) {
        metrics::record_intent(Intent::Disconnect.name());
        debug!(connection = %connection_id, delivered, "Left room");
    }
    metrics::set_active_members(state.room.stats().members);
}

/// Handle one decoded (or undecodable) client frame.
///
/// Only socket failures are returned; rejected intents are logged and
/// otherwise ignored.
async fn process<S>(
    decoded: Result<ClientFrame, ProtocolError>,
    connection_id: &ConnectionId,
    state: &AppState,
    sender: &mut S,
    encoding: Encoding,
) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let start = Instant::now();

    let frame = match decoded {
        Ok(frame) => frame,
        Err(e) => {
            warn!(connection = %connection_id, error = %e, "Malformed frame");
            metrics::record_error("protocol");
            let code = match &e {
                ProtocolError::FrameTooLarge(_) => error_codes::FRAME_TOO_LARGE,
                _ => error_codes::MALFORMED_FRAME,
            };
            return send_frame(sender, &ServerFrame::error(code, e.to_string()), encoding).await;
        }
    };

    if let ClientFrame::Ping { timestamp } = frame {
        return send_frame(sender, &ServerFrame::pong(timestamp), encoding).await;
    }

    let Some(intent) = Intent::from_frame(frame) else {
        return Ok(());
    };
    let name = intent.name();

    match state.room.apply(connection_id, intent) {
        Ok(delivered) => {
            metrics::record_intent(name);
            metrics::set_active_members(state.room.stats().members);
            debug!(connection = %connection_id, intent = name, delivered, "Applied");
        }
        Err(e) => {
            debug!(connection = %connection_id, intent = name, error = %e, "Rejected");
            metrics::record_error("rejected_intent");
        }
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
    Ok(())
}

/// Send a frame to the WebSocket.
async fn send_frame<S>(sender: &mut S, frame: &ServerFrame, encoding: Encoding) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let message = match encoding {
        Encoding::Json => Message::Text(codec::encode_json(frame)?),
        Encoding::MessagePack => Message::Binary(codec::encode(frame)?.to_vec()),
    };
    let size = match &message {
        Message::Text(text) => text.len(),
        Message::Binary(data) => data.len(),
        _ => 0,
    };

    sender.send(message).await?;
    metrics::record_frame(size, "outbound");
    Ok(())
}
