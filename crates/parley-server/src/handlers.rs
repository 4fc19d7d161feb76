//! Connection handlers for the Parley relay.
//!
//! Each WebSocket connection gets a [`ChannelSink`] for router pushes and a
//! writer task that drains it to the socket. The read loop decodes frames
//! and turns them into router calls.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use parley_core::{ChannelSink, ConnectResult, Delivery, Router as ChatRouter, Session, Sink};
use parley_protocol::{codec, codes, Frame, PROTOCOL_VERSION};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// How long a closing connection may spend flushing queued frames.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Direct replies buffered per connection before it is dropped.
const REPLY_QUEUE_CAPACITY: usize = 64;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Shared server state.
pub struct AppState {
    /// The message router.
    pub router: ChatRouter,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            router: ChatRouter::with_config(config.router_config()),
            config,
        }
    }
}

/// Build the HTTP application.
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
    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config.clone()));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let listener = TcpListener::bind(addr).await?;

    info!("Parley relay listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.router.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION.to_string(),
        "sessions": stats.sessions,
        "roster_revision": stats.roster_revision,
        "messages_delivered": stats.messages_delivered,
        "deliveries_failed": stats.deliveries_failed,
        "sessions_evicted": stats.sessions_evicted,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Per-connection state seen by the frame handler.
struct Connection {
    id: String,
    /// Registration held by this connection, if any.
    session: Option<Session>,
    sink: Arc<dyn Sink>,
    replies: mpsc::Sender<Frame>,
    /// The client stopped reading its replies.
    overloaded: bool,
}

impl Connection {
    fn new(id: String, sink: Arc<dyn Sink>, replies: mpsc::Sender<Frame>) -> Self {
        Self {
            id,
            session: None,
            sink,
            replies,
            overloaded: false,
        }
    }

    /// Queue a frame for this client only.
    fn reply(&mut self, frame: Frame) {
        match self.replies.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection = %self.id, "Reply queue full");
                metrics::record_error("reply_overflow");
                self.overloaded = true;
            }
            // The writer is gone only when the socket is; the read loop notices.
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Forget a session the router evicted after a failed delivery.
    fn refresh(&mut self, router: &ChatRouter) {
        let evicted = self
            .session
            .as_ref()
            .is_some_and(|session| !router.registry().holds(session));
        if evicted {
            if let Some(session) = self.session.take() {
                debug!(connection = %self.id, session = %session.id(), "Session was evicted");
            }
        }
    }

    fn sender_name(&self) -> Option<&str> {
        self.session.as_ref().map(Session::name)
    }
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = format!("conn_{}", CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed));
    debug!(connection = %connection_id, "WebSocket connected");

    let (sender, mut receiver) = socket.split();
    let (sink, deliveries) = ChannelSink::new(state.config.delivery.queue_capacity);
    let (reply_tx, reply_rx) = mpsc::channel(REPLY_QUEUE_CAPACITY);

    let mut writer = tokio::spawn(write_loop(
        sender,
        deliveries,
        reply_rx,
        connection_id.clone(),
    ));
    let mut writer_done = false;

    let mut conn = Connection::new(connection_id, Arc::new(sink), reply_tx);
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            _ = &mut writer => {
                debug!(connection = %conn.id, "Writer finished");
                writer_done = true;
                break;
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let start = Instant::now();
                        metrics::record_frame(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        if !drain_frames(&mut read_buffer, &mut conn, &state).await {
                            break;
                        }

                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Text(_))) => {
                        conn.reply(Frame::error(
                            codes::MALFORMED_FRAME,
                            "Text messages are not supported",
                        ));
                        if conn.overloaded {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // axum answers pings itself
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %conn.id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %conn.id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %conn.id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    release(&mut conn, &state).await;

    let connection_id = conn.id.clone();
    drop(conn);

    // Both queues are now closed; let the writer flush what is left.
    if !writer_done && tokio::time::timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Give up whatever the connection still holds in the router.
///
/// Losing the socket is an implicit disconnect.
async fn release(conn: &mut Connection, state: &AppState) {
    if let Some(session) = conn.session.take() {
        state.router.disconnect_session(&session).await;
    }
    metrics::record_router_stats(&state.router.stats());
}

/// Decode and handle every complete frame in the buffer.
///
/// Returns `false` if the connection should be closed.
async fn drain_frames(buf: &mut BytesMut, conn: &mut Connection, state: &Arc<AppState>) -> bool {
    let max_message_size = state.config.limits.max_message_size;

    loop {
        if let Ok(Some(length)) = codec::frame_length(buf) {
            if length > max_message_size {
                warn!(connection = %conn.id, size = length, "Frame too large");
                metrics::record_error("frame_too_large");
                conn.reply(Frame::error(
                    codes::FRAME_TOO_LARGE,
                    format!("Frames are limited to {max_message_size} bytes"),
                ));
                return false;
            }
        }

        match codec::decode_from(buf) {
            Ok(Some(frame)) => {
                handle_frame(frame, conn, state).await;
                if conn.overloaded {
                    return false;
                }
            }
            Ok(None) => return true,
            Err(e) => {
                warn!(connection = %conn.id, error = %e, "Undecodable frame");
                metrics::record_error("decode");
                conn.reply(Frame::error(codes::MALFORMED_FRAME, e.to_string()));
                return false;
            }
        }
    }
}

/// Handle a decoded frame.
async fn handle_frame(frame: Frame, conn: &mut Connection, state: &Arc<AppState>) {
    let heartbeat = u32::try_from(state.config.heartbeat.interval_ms).unwrap_or(u32::MAX);
    conn.refresh(&state.router);

    match frame {
        Frame::Connect { id, version, name } => {
            debug!(connection = %conn.id, name = %name, "Connect request");

            if conn.session.is_some() {
                conn.reply(Frame::error(
                    codes::ALREADY_CONNECTED,
                    "Connection already holds a name",
                ));
                return;
            }
            if let Err(e) = PROTOCOL_VERSION.accept_client(version) {
                conn.reply(Frame::error(codes::INCOMPATIBLE_VERSION, e.to_string()));
                return;
            }

            match state.router.connect(&name, Arc::clone(&conn.sink)).await {
                ConnectResult::Accepted(session) => {
                    conn.session = Some(session);
                    conn.reply(Frame::accepted(id, heartbeat));
                }
                ConnectResult::Rejected(reason) => {
                    debug!(connection = %conn.id, name = %name, reason = %reason, "Connect rejected");
                    conn.reply(Frame::rejected(id, reason.to_string(), heartbeat));
                }
            }
            metrics::record_router_stats(&state.router.stats());
        }

        Frame::Disconnect => match conn.session.take() {
            Some(session) => {
                debug!(connection = %conn.id, name = %session.name(), "Disconnect request");
                state.router.disconnect_session(&session).await;
                metrics::record_router_stats(&state.router.stats());
            }
            None => debug!(connection = %conn.id, "Disconnect without a name"),
        },

        Frame::SendGroup { body } => {
            let Some(sender) = conn.sender_name() else {
                conn.reply(not_connected());
                return;
            };
            let recipients = state.router.send_to_group(sender, &body).await;
            metrics::record_group(recipients);
        }

        Frame::SendPrivate { recipient, body } => {
            let Some(sender) = conn.sender_name() else {
                conn.reply(not_connected());
                return;
            };
            let outcome = state.router.send_private(sender, &recipient, &body).await;
            metrics::record_private(outcome);
        }

        Frame::Ping { timestamp } => conn.reply(Frame::pong(timestamp)),

        other => {
            warn!(connection = %conn.id, frame_type = ?other.frame_type(), "Unexpected frame type");
            conn.reply(Frame::error(
                codes::UNEXPECTED_FRAME,
                format!("Clients may not send {:?} frames", other.frame_type()),
            ));
        }
    }
}

fn not_connected() -> Frame {
    Frame::error(codes::NOT_CONNECTED, "Connect with a name first")
}

/// Turn a router push into its wire frame.
fn delivery_frame(delivery: Delivery) -> Frame {
    match delivery {
        Delivery::Message(text) => Frame::message(&*text),
        Delivery::Roster(roster) => Frame::roster(roster.revision, roster.names.clone()),
    }
}

/// Drain replies and router pushes to the socket until both queues close
/// or the socket fails.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut deliveries: mpsc::Receiver<Delivery>,
    mut replies: mpsc::Receiver<Frame>,
    connection_id: String,
) {
    loop {
        let frame = tokio::select! {
            biased;
            Some(frame) = replies.recv() => frame,
            Some(delivery) = deliveries.recv() => delivery_frame(delivery),
            else => break,
        };

        let data = match codec::encode(&frame) {
            Ok(data) => data,
            Err(e) => {
                error!(connection = %connection_id, error = %e, "Failed to encode frame");
                metrics::record_error("encode");
                continue;
            }
        };

        metrics::record_frame(data.len(), "outbound");
        if sender.send(Message::Binary(data.to_vec())).await.is_err() {
            debug!(connection = %connection_id, "Socket closed while writing");
            return;
        }
    }

    let _ = sender.close().await;
}
