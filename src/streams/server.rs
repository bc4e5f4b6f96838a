//! WebSocket dashboard transport
//!
//! Each connection subscribes to the [`SignalBus`] and receives every engine
//! event as a JSON text frame. Inbound frames are parsed into
//! [`ClientMessage`] and queued for the orchestrator; the transport never
//! touches engine state directly.

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{debug, info, warn};

use crate::trading_core::bus::SignalBus;
use crate::types::ClientMessage;

/// Shared state handed to every connection
#[derive(Clone)]
pub struct AppState {
    pub bus: SignalBus,
    pub inbound: mpsc::UnboundedSender<ClientMessage>,
}

pub fn router(state: AppState, frontend: Option<PathBuf>) -> Router {
    let mut app = Router::new().route("/ws", get(ws_handler));
    if let Some(dir) = frontend {
        info!("Serving frontend from {:?}", dir);
        app = app.fallback_service(ServeDir::new(dir));
    }
    app.layer(CorsLayer::new().allow_origin(Any)).with_state(state)
}

/// Bind and serve until the listener fails
pub async fn serve(state: AppState, port: u16, frontend: Option<PathBuf>) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Dashboard running at http://{}", addr);
    info!("WebSocket endpoint ws://{}/ws", addr);

    axum::serve(listener, router(state, frontend))
        .await
        .context("Server error")?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Parse one inbound text frame
pub fn parse_client_message(text: &str) -> Option<ClientMessage> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!("Dropping unparseable client message: {} ({})", text, e);
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let subscription = state.bus.subscribe();
    let id = subscription.id;
    let mut rx = subscription.rx;
    info!("WebSocket client {} connected", id);

    // Forward engine events to this client
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Failed to serialize {}: {}", msg.tag(), e),
            }
        }
    });

    // Queue client messages for the orchestrator
    let inbound = state.inbound.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Some(client_msg) = parse_client_message(text.as_str()) {
                        debug!("Client {} -> {:?}", id, client_msg);
                        if inbound.send(client_msg).is_err() {
                            warn!("Engine stopped, closing client {}", id);
                            break;
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.bus.unsubscribe(id);
    info!("WebSocket client {} disconnected", id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_message() {
        assert_eq!(
            parse_client_message(r#"{"type":"toggle_trading","payload":{"enabled":true}}"#),
            Some(ClientMessage::ToggleTrading { enabled: Some(true) })
        );
        assert_eq!(parse_client_message("not json"), None);
        assert_eq!(parse_client_message(r#"{"type":"set_min_size","payload":{}}"#), None);
    }
}
