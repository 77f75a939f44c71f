//! Dashboard module.
//!
//! HTTP/WebSocket surface for real-time monitoring. The engine pushes
//! typed frames into a broadcast hub; connected clients receive every
//! frame, late joiners get the latest state immediately. Only compiled
//! with the `dashboard` feature.

mod types;

pub use types::{ActivityPayload, PositionView, StatePayload, TradeView, WinStats, WsFrame};

use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tokio::sync::{broadcast, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

/// Broadcast hub shared between the engine and the WS handlers.
#[derive(Clone)]
pub struct DashboardHub {
    tx: broadcast::Sender<String>,
    latest: Arc<RwLock<StatePayload>>,
}

impl DashboardHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            latest: Arc::new(RwLock::new(StatePayload::default())),
        }
    }

    /// Push the per-tick UI state.
    pub async fn publish_state(&self, payload: StatePayload) {
        *self.latest.write().await = payload.clone();
        self.send(&WsFrame::State(payload));
    }

    /// Push a notable event (trade open/close, reset, error).
    pub fn publish_activity(&self, msg: impl Into<String>, kind: &str) {
        self.send(&WsFrame::Activity(ActivityPayload {
            msg: msg.into(),
            kind: kind.to_string(),
        }));
    }

    fn send(&self, frame: &WsFrame) {
        if let Ok(json) = serde_json::to_string(frame) {
            // No receivers is fine.
            let _ = self.tx.send(json);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub async fn latest_state(&self) -> StatePayload {
        self.latest.read().await.clone()
    }
}

/// Build the dashboard router.
pub fn create_router(hub: DashboardHub) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/ws", get(websocket_handler))
        .with_state(hub)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Serve the router until the process exits.
pub async fn serve(hub: DashboardHub, port: u16) -> anyhow::Result<()> {
    let app = create_router(hub);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "Dashboard listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// GET /api/state - latest UI state for polling clients.
async fn get_state(State(hub): State<DashboardHub>) -> impl IntoResponse {
    Json(hub.latest_state().await)
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(hub): State<DashboardHub>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(mut socket: WebSocket, hub: DashboardHub) {
    // Late joiners get the current state immediately.
    let snapshot = WsFrame::State(hub.latest_state().await);
    if let Ok(json) = serde_json::to_string(&snapshot) {
        if socket.send(Message::Text(json)).await.is_err() {
            return;
        }
    }

    let mut rx = hub.subscribe();
    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Ok(json) => {
                        if socket.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    // Lagged receivers skip to the live edge.
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Dashboard client lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    // Client pings and stray messages are ignored.
                    _ => {}
                }
            }
        }
    }
}
