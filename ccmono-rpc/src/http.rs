//! HTTP front-end for the RPC protocol
//!
//! Three endpoints share one agent: `GET /health`, `POST /api/rpc` (accepts
//! a single command, ack only — HTTP cannot deliver events), and
//! `GET /ws/rpc` where each WebSocket text frame carries one JSON line,
//! bridged onto the line server through an in-process pipe.

use crate::protocol::RpcCommand;
use crate::server::RpcServer;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use ccmono_core::{Agent, AgentContext, AgentLoopConfig, ModelRegistry};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub agent: Arc<Agent>,
    pub registry: Arc<ModelRegistry>,
    pub ctx: Arc<AgentContext>,
    pub loop_config: AgentLoopConfig,
}

/// Build the HTTP router.
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/rpc", post(rpc_http))
        .route("/ws/rpc", get(rpc_ws))
        .with_state(state)
}

/// Serve the HTTP front-end on `addr`.
pub async fn serve(addr: &str, state: HttpState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP RPC server listening on {addr}");
    axum::serve(listener, router(state)).await
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Single-command endpoint. Validates the command and acknowledges it; use
/// the WebSocket endpoint for event delivery.
async fn rpc_http(State(_state): State<HttpState>, body: String) -> impl IntoResponse {
    match serde_json::from_str::<RpcCommand>(&body) {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "message": "Command received, use the WebSocket endpoint for real-time updates",
            })),
        ),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("Invalid JSON: {err}")})),
        ),
    }
}

async fn rpc_ws(ws: WebSocketUpgrade, State(state): State<HttpState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Bridge one WebSocket connection onto a line server: frames in become
/// lines, lines out become frames.
async fn handle_socket(socket: WebSocket, state: HttpState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    // rpc_side belongs to the server, ws_side to the frame pumps.
    let (ws_side, rpc_side) = tokio::io::duplex(64 * 1024);
    let (rpc_read, rpc_write) = tokio::io::split(rpc_side);
    let (ws_read, mut ws_write) = tokio::io::split(ws_side);

    // Inbound: frame -> line.
    let inbound = tokio::spawn(async move {
        while let Some(Ok(frame)) = ws_stream.next().await {
            match frame {
                WsMessage::Text(text) => {
                    if ws_write.write_all(text.as_bytes()).await.is_err() {
                        return;
                    }
                    if ws_write.write_all(b"\n").await.is_err() {
                        return;
                    }
                }
                WsMessage::Close(_) => return,
                _ => {}
            }
        }
    });

    // Outbound: line -> frame.
    let outbound = tokio::spawn(async move {
        let mut lines = BufReader::new(ws_read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if ws_sink.send(WsMessage::Text(line)).await.is_err() {
                return;
            }
        }
    });

    let server = RpcServer::new(
        state.agent,
        state.registry,
        state.ctx,
        state.loop_config,
        rpc_write,
    );
    if let Err(err) = server.run(BufReader::new(rpc_read)).await {
        tracing::warn!("WebSocket RPC session ended with error: {err}");
    }

    inbound.abort();
    outbound.abort();
}
