//! HTTP surface: SSE and WebSocket endpoints plus health, stats, and
//! metrics. Thin plumbing — session semantics live in the managers.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use metrics::histogram;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use pulse_channels::OrganizationStats;
use pulse_core::{CloseReason, ConnectionId};

use crate::health;
use crate::metrics as metric_names;
use crate::server::AppState;
use crate::socket::SocketStats;
use crate::stream::{SseManager, StreamFrame, StreamStats};
use crate::transport::ChannelTransport;

/// Build the gateway router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/stats", get(stats_handler))
        .route("/v1/events", get(sse_handler))
        .route("/v1/ws", get(ws_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<health::HealthResponse> {
    let streaming = state.sse.get_connection_stats().await.total_connections;
    let sockets = state.socket.get_connection_stats().await.total_connections;
    Json(health::health_check(state.start_time, streaming, sockets))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// Stats query: optionally scope to one organization's channel registry.
#[derive(Debug, Deserialize)]
struct StatsParams {
    organization_id: Option<String>,
}

/// GET /v1/stats response body.
#[derive(Debug, Serialize)]
struct StatsResponse {
    streaming: StreamStats,
    socket: SocketStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<OrganizationStats>,
}

/// GET /v1/stats — read-only, non-authoritative snapshot for dashboards.
async fn stats_handler(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Json<StatsResponse> {
    Json(StatsResponse {
        streaming: state.sse.get_connection_stats().await,
        socket: state.socket.get_connection_stats().await,
        organization: params
            .organization_id
            .as_deref()
            .map(|org| state.registry.get_organization_stats(org)),
    })
}

/// SSE connect query.
#[derive(Debug, Deserialize)]
struct SseParams {
    organization_id: String,
    user_id: Option<String>,
    /// Comma-separated channel names (full or short form).
    channels: Option<String>,
}

/// Disconnects the SSE connection when the response stream is dropped.
struct StreamGuard {
    manager: Arc<SseManager>,
    id: ConnectionId,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let manager = self.manager.clone();
        let id = self.id.clone();
        drop(tokio::spawn(async move {
            manager.disconnect(&id).await;
        }));
    }
}

/// GET /v1/events — one-way streaming transport.
async fn sse_handler(
    State(state): State<AppState>,
    Query(params): Query<SseParams>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, (StatusCode, String)> {
    let channels: HashSet<String> = params
        .channels
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect();

    let connection = state
        .sse
        .connect(&params.organization_id, params.user_id.as_deref(), &channels)
        .await
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;

    let frames = state
        .sse
        .stream(&connection.connection_id)
        .await
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;

    info!(connection_id = %connection.connection_id, "streaming client connected");
    let guard = StreamGuard {
        manager: state.sse.clone(),
        id: connection.connection_id,
    };
    let stream = async_stream::stream! {
        let _guard = guard;
        futures::pin_mut!(frames);
        while let Some(frame) = frames.next().await {
            yield Ok(to_sse_event(&frame));
        }
    };
    Ok(Sse::new(stream))
}

/// Convert a manager frame into the axum SSE event representation.
fn to_sse_event(frame: &StreamFrame) -> SseEvent {
    match frame {
        StreamFrame::Heartbeat => SseEvent::default().comment("heartbeat"),
        StreamFrame::Data { event, data, id } => {
            let sse = SseEvent::default().event(event).data(data);
            match id {
                Some(id) => sse.id(id),
                None => sse,
            }
        }
    }
}

/// WebSocket connect query.
#[derive(Debug, Deserialize)]
struct WsParams {
    organization_id: String,
    user_id: Option<String>,
    /// Optional token; when present the handshake authenticates
    /// immediately instead of waiting for an `authenticate` message.
    token: Option<String>,
}

/// GET /v1/ws — bidirectional transport upgrade.
async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_socket_session(socket, state, params))
}

/// RFC 6455 close code for a close reason.
fn close_code(reason: CloseReason) -> u16 {
    match reason {
        CloseReason::ClientRequest | CloseReason::ServerShutdown => 1000,
        CloseReason::AuthTimeout | CloseReason::AuthFailed | CloseReason::CapacityExceeded => 1008,
        CloseReason::LivenessTimeout | CloseReason::TransportError => 1001,
    }
}

fn close_message(reason: CloseReason) -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code(reason),
        reason: reason.as_str().into(),
    }))
}

/// Drive one WebSocket session from upgrade through disconnect.
///
/// 1. Registers the connection (quota check + `Connected` frame)
/// 2. Authenticates from the query token, if supplied
/// 3. Writer task drains the outbound queue and pings for liveness
/// 4. Reader loop feeds inbound text to the manager
/// 5. Any manager-side disconnect cancels both loops via the close signal
#[instrument(skip_all, fields(organization_id = %params.organization_id))]
async fn run_socket_session(ws: WebSocket, state: AppState, params: WsParams) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::channel::<String>(state.config.outbound_buffer);
    let transport = Arc::new(ChannelTransport::new(tx));

    let connection = match state
        .socket
        .connect(
            transport.clone(),
            &params.organization_id,
            params.user_id.as_deref(),
            HashSet::new(),
        )
        .await
    {
        Ok(connection) => connection,
        Err(err) => {
            debug!(error = %err, "socket connect refused");
            let reason = transport
                .close_reason()
                .unwrap_or(CloseReason::TransportError);
            let _ = ws_tx.send(close_message(reason)).await;
            return;
        }
    };
    let connection_id = connection.id.clone();
    info!(connection_id = %connection_id, "socket client connected");
    let session_start = std::time::Instant::now();

    if let Some(token) = &params.token {
        // Failure closes the connection through the manager; the loops
        // below observe the close signal and exit.
        let _ = state.socket.authenticate(&connection_id, token).await;
    }

    // Outbound writer with liveness pings.
    let ping_interval = state.config.ping_interval();
    let pong_timeout = state.config.pong_timeout();
    let close_signal = transport.close_signal();
    let writer_transport = transport.clone();
    let writer_conn = connection.clone();
    let writer_manager = state.socket.clone();
    let outbound = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        // Skip the immediate first tick
        let _ = ping.tick().await;
        let writer_close = writer_transport.close_signal();

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                writer_manager
                                    .disconnect(&writer_conn.id, Some(CloseReason::TransportError))
                                    .await;
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping.tick() => {
                    if !writer_conn.check_alive()
                        && writer_conn.last_pong_elapsed() > pong_timeout
                    {
                        warn!(connection_id = %writer_conn.id, "client unresponsive, disconnecting");
                        writer_manager
                            .disconnect(&writer_conn.id, Some(CloseReason::LivenessTimeout))
                            .await;
                        let _ = ws_tx.send(close_message(CloseReason::LivenessTimeout)).await;
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        writer_manager
                            .disconnect(&writer_conn.id, Some(CloseReason::TransportError))
                            .await;
                        break;
                    }
                }
                () = writer_close.cancelled() => {
                    // Flush frames enqueued before the close (e.g. the
                    // auth-failure error) so the client sees them.
                    while let Ok(text) = rx.try_recv() {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    let reason = writer_transport
                        .close_reason()
                        .unwrap_or(CloseReason::ServerShutdown);
                    let _ = ws_tx.send(close_message(reason)).await;
                    break;
                }
            }
        }
    });

    // Inbound reader.
    loop {
        tokio::select! {
            () = close_signal.cancelled() => break,
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        state.socket.handle_message(&connection_id, text.as_str()).await;
                    }
                    Message::Binary(data) => {
                        // Some clients send text frames as binary
                        match std::str::from_utf8(&data) {
                            Ok(text) => state.socket.handle_message(&connection_id, text).await,
                            Err(_) => {
                                debug!(connection_id = %connection_id, len = data.len(),
                                    "non-UTF8 binary frame dropped");
                            }
                        }
                    }
                    Message::Ping(_) | Message::Pong(_) => connection.mark_alive(),
                    Message::Close(_) => {
                        info!(connection_id = %connection_id, "client sent close frame");
                        break;
                    }
                }
            }
        }
    }

    state
        .socket
        .disconnect(&connection_id, Some(CloseReason::ClientRequest))
        .await;
    outbound.abort();
    histogram!(metric_names::WS_CONNECTION_DURATION_SECONDS)
        .record(session_start.elapsed().as_secs_f64());
    info!(connection_id = %connection_id, "socket session ended");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
