//! Connection handlers for the Beacon server.
//!
//! One WebSocket connection maps to one hub registration plus two pumps: a
//! read pump feeding decoded frames to the connection's [`Session`], and a
//! write pump draining the connection's outbound queue onto the socket.
//! The pumps share nothing except those queues.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::store::MemoryStore;
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use beacon_core::{Hub, Session};
use beacon_protocol::{codec, ServerEvent, UserId};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Shared server state.
pub struct AppState {
    /// The chat hub.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state with the hub wired to the given store.
    #[must_use]
    pub fn new(config: Config, store: &Arc<MemoryStore>) -> Self {
        Self {
            hub: Hub::spawn(config.hub_config(), store.callbacks()),
            config,
        }
    }
}

/// Build the application router.
#[must_use]
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
    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(AppState::new(config.clone(), &store));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            warn!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Beacon server listening on {}", addr);
    info!(
        "Chat endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Connection parameters supplied by the (external) session layer.
///
/// The hub performs no authentication itself: whatever sits in front of
/// this server (session middleware, trusted proxy) resolves the cookie to
/// a user id before the upgrade.
#[derive(Debug, Deserialize)]
struct ConnectParams {
    user_id: UserId,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if params.user_id <= 0 {
        return StatusCode::BAD_REQUEST.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, params.user_id, state))
        .into_response()
}

/// Handle one WebSocket connection for its whole lifetime.
async fn handle_socket(socket: WebSocket, user_id: UserId, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (sender, mut receiver) = socket.split();
    let (mut session, outbound) = state.hub.attach(user_id);
    let connection_id = session.connection_id();

    debug!(connection = connection_id, user = user_id, "WebSocket connected");
    // The gauge reads hub state, so wait for the registration to land.
    state.hub.quiesce().await;
    metrics::set_online_users(state.hub.stats().online_users);

    let write_task = tokio::spawn(write_pump(sender, outbound));

    // Read pump: decode inbound text frames and feed the session. A decode
    // error means a broken peer and kills the connection; unknown frame
    // types were already mapped to ClientFrame::Unknown and are ignored
    // inside the session.
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if !handle_text(&mut session, &text).await {
                    break;
                }
            }
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => {
                    if !handle_text(&mut session, text).await {
                        break;
                    }
                }
                Err(_) => {
                    metrics::record_dropped_frame("not_utf8");
                    break;
                }
            },
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Keepalive is handled by the transport layer.
            }
            Ok(Message::Close(_)) => {
                debug!(connection = connection_id, "Received close frame");
                break;
            }
            Err(e) => {
                warn!(connection = connection_id, error = %e, "WebSocket error");
                metrics::record_error("websocket");
                break;
            }
        }
    }

    // Unregister; the hub drops the outbound queue's sender, which lets the
    // write pump drain whatever is already queued and then terminate.
    drop(session);
    let _ = write_task.await;

    state.hub.quiesce().await;
    metrics::set_online_users(state.hub.stats().online_users);
    debug!(connection = connection_id, user = user_id, "WebSocket disconnected");
}

/// Decode one text frame into the session. Returns `false` when the
/// connection should be torn down.
async fn handle_text(session: &mut Session, text: &str) -> bool {
    match codec::decode_client(text) {
        Ok(frame) => {
            metrics::record_event("inbound", frame.kind());
            session.handle_frame(frame).await;
            true
        }
        Err(e) => {
            debug!(
                connection = session.connection_id(),
                error = %e,
                "frame decode failed, closing connection"
            );
            metrics::record_dropped_frame("decode");
            false
        }
    }
}

/// Write pump: drain the outbound queue onto the socket in arrival order.
/// Terminates when the hub closes the queue or a write fails.
async fn write_pump(
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Arc<ServerEvent>>,
) {
    while let Some(event) = outbound.recv().await {
        match codec::encode_event(&event) {
            Ok(text) => {
                metrics::record_event("outbound", event.kind());
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to encode outbound event");
            }
        }
    }
    let _ = sender.close().await;
}
