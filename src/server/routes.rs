// ABOUTME: HTTP routes for the bridge server: the per-container WebSocket endpoint and a health check

use super::bridge::{run_session, Outbound};
use crate::docker::ContainerBackend;
use crate::terminal::protocol::Frame;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

/// How long the writer gets to flush a close frame after the session ends
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Control frames carry at most 125 payload bytes, two of which are the code
const MAX_CLOSE_REASON_BYTES: usize = 123;

#[derive(Clone)]
pub struct AppState {
    backend: Arc<dyn ContainerBackend>,
    image: String,
    active_sessions: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(backend: Arc<dyn ContainerBackend>, image: impl Into<String>) -> Self {
        Self {
            backend,
            image: image.into(),
            active_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_sessions: usize,
    pub image: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/:id", get(ws_route))
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_sessions: state.active_sessions(),
        image: state.image.clone(),
    })
}

async fn ws_route(
    Path(container_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| {
        let span = info_span!("ws_session", session = %Uuid::new_v4(), container = %container_id);
        handle_socket(socket, container_id, state).instrument(span)
    })
}

/// Cut `reason` to fit a close frame, on a char boundary
fn truncate_close_reason(mut reason: String) -> String {
    if reason.len() > MAX_CLOSE_REASON_BYTES {
        let mut end = MAX_CLOSE_REASON_BYTES;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

fn to_message(outbound: Outbound) -> Message {
    match outbound {
        Outbound::Data(Frame::Text(text)) => Message::Text(text),
        Outbound::Data(Frame::Binary(data)) => Message::Binary(data),
        Outbound::Close { code, reason } => Message::Close(Some(CloseFrame {
            code,
            reason: truncate_close_reason(reason).into(),
        })),
    }
}

async fn handle_socket(socket: WebSocket, container_id: String, state: AppState) {
    let active = state.active_sessions.fetch_add(1, Ordering::SeqCst) + 1;
    info!("Client connected ({} active)", active);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();

    let reader = tokio::spawn(
        async move {
            while let Some(msg) = ws_rx.next().await {
                let frame = match msg {
                    Ok(Message::Text(text)) => Frame::Text(text),
                    Ok(Message::Binary(data)) => Frame::Binary(data),
                    Ok(Message::Close(_)) => {
                        debug!("Client sent close");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("WebSocket read error: {}", e);
                        break;
                    }
                };
                if inbound_tx.send(frame).is_err() {
                    break;
                }
            }
        }
        .in_current_span(),
    );

    let writer = tokio::spawn(
        async move {
            while let Some(outbound) = outbound_rx.recv().await {
                let closing = matches!(outbound, Outbound::Close { .. });
                if let Err(e) = ws_tx.send(to_message(outbound)).await {
                    debug!("WebSocket write error: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        }
        .in_current_span(),
    );

    run_session(container_id, state.backend.clone(), inbound_rx, outbound_tx).await;

    reader.abort();
    if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, writer).await.is_err() {
        debug!("Timed out flushing close frame");
    }

    let active = state.active_sessions.fetch_sub(1, Ordering::SeqCst) - 1;
    info!("Client disconnected ({} active)", active);
}
