//! Dashboard HTTP API
//!
//! REST endpoints over the published risk table and pipeline status.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use super::types::*;
use super::WebSocketBroadcaster;
use crate::monitor::MonitorLoop;
use crate::types::{Chain, CoverageType, ProductKey, Stablecoin};

type AppState = (Arc<MonitorLoop>, WebSocketBroadcaster);

/// Create the API router with all endpoints
pub fn create_router(monitor: Arc<MonitorLoop>, broadcaster: WebSocketBroadcaster) -> Router {
    Router::new()
        .route("/api/risk", get(get_risk_table))
        .route("/api/risk/:coverage/:chain/:stablecoin", get(get_product_risk))
        .route("/api/status", get(get_status))
        .route("/api/health", get(get_health))
        // WebSocket
        .route("/ws", get(websocket_handler))
        // State
        .with_state((monitor, broadcaster))
        // CORS for frontend
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

// ─────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────

/// GET /api/risk - Latest full risk table
async fn get_risk_table(State((monitor, _)): State<AppState>) -> impl IntoResponse {
    match monitor.table().current() {
        Some(pass) => (
            StatusCode::OK,
            Json(ApiResponse::success(RiskTableResponse::from(pass.as_ref()))),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error("risk table not computed yet")),
        ),
    }
}

/// GET /api/risk/:coverage/:chain/:stablecoin - One product
async fn get_product_risk(
    Path((coverage, chain, stablecoin)): Path<(String, String, String)>,
    State((monitor, _)): State<AppState>,
) -> impl IntoResponse {
    let product = match (
        CoverageType::from_str(&coverage),
        Chain::from_str(&chain),
        Stablecoin::from_str(&stablecoin),
    ) {
        (Some(c), Some(ch), Some(s)) => ProductKey::new(c, ch, s),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error(format!(
                    "unknown product {}/{}/{}",
                    coverage, chain, stablecoin
                ))),
            )
        }
    };

    if monitor.table().current().is_none() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::error("risk table not computed yet")),
        );
    }
    match monitor.table().get(&product) {
        Some(risk) => (StatusCode::OK, Json(ApiResponse::success(risk))),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("{} is not in the catalog", product))),
        ),
    }
}

/// GET /api/status - Breakers, data quality, monitor counters
async fn get_status(State((monitor, _)): State<AppState>) -> impl IntoResponse {
    let status = StatusResponse {
        aggregator: monitor.provider().status(),
        monitor: monitor.stats(),
    };
    Json(ApiResponse::success(status))
}

/// GET /api/health - Coarse liveness for load balancers
async fn get_health(State((monitor, _)): State<AppState>) -> impl IntoResponse {
    let halted = monitor.table().current().map(|p| p.circuit.is_halted());
    let health = HealthResponse::build(
        &monitor.provider().status(),
        &monitor.stats(),
        halted,
        chrono::Utc::now(),
    );
    Json(ApiResponse::success(health))
}

// ─────────────────────────────────────────────────────────────────
// WebSocket Handler
// ─────────────────────────────────────────────────────────────────

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::Response,
};

/// WebSocket upgrade handler
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State((monitor, broadcaster)): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, monitor, broadcaster))
}

/// Outgoing message type for WebSocket
enum OutgoingMessage {
    Text(String),
    Pong(Vec<u8>),
}

/// Handle WebSocket connection
async fn handle_websocket(
    socket: WebSocket,
    monitor: Arc<MonitorLoop>,
    broadcaster: WebSocketBroadcaster,
) {
    use futures_util::{SinkExt, StreamExt};

    tracing::info!("🖥️ New WebSocket connection");

    let (mut sender, mut receiver) = socket.split();

    // Send initial state
    if let Some(pass) = monitor.table().current() {
        let msg = WsMessage::FullState(RiskTableResponse::from(pass.as_ref()));
        if let Ok(json) = serde_json::to_string(&msg) {
            if sender.send(Message::Text(json)).await.is_err() {
                return;
            }
        }
    }

    // Subscribe to broadcasts
    let mut rx = broadcaster.subscribe();

    // Channel for outgoing messages
    let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<OutgoingMessage>(32);

    // Spawn task to send outgoing messages
    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let result = match msg {
                OutgoingMessage::Text(text) => sender.send(Message::Text(text)).await,
                OutgoingMessage::Pong(data) => sender.send(Message::Pong(data)).await,
            };
            if result.is_err() {
                break;
            }
        }
    });

    // Handle incoming messages (ping/pong) and broadcast updates
    loop {
        tokio::select! {
            broadcast_msg = rx.recv() => {
                match broadcast_msg {
                    Ok(msg) => {
                        if out_tx.send(OutgoingMessage::Text(msg)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        if out_tx.send(OutgoingMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received WebSocket message: {}", text);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }

    send_task.abort();
    tracing::info!("🖥️ WebSocket connection closed");
}
