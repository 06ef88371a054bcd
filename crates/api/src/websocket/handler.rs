//! WebSocket handler for Axum
//!
//! Handles WebSocket connections, authentication, and event routing.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use livedesk_shared::Identity;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::state::AppState;

use super::events::{ClientEvent, ServerEvent};

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    token: Option<String>,
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
///
/// Authenticates via the `token` query parameter; a missing or invalid token
/// is answered with 401 and the connection is never upgraded.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    Query(params): Query<WebSocketQuery>,
) -> Result<Response, StatusCode> {
    let Some(token) = params.token.as_deref().filter(|t| !t.is_empty()) else {
        tracing::warn!("WebSocket auth failed: missing token");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let identity = match app_state.jwt.authenticate(token) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket auth failed: invalid token");
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    tracing::info!(
        user_id = %identity.user_id,
        role = %identity.role,
        "WebSocket connection upgrade requested"
    );

    // Upgrade the connection
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, identity, app_state)))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, identity: Identity, app_state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Create channel for sending events to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let router = app_state.router.clone();
    let conn = router.connect(identity, tx).await;
    let connection_id = conn.id;

    // Spawn task to send messages to client
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            // Serialize and send event
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, event = event.name(), "Failed to serialize WebSocket event");
                }
            }
        }
    });

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                break;
            }
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => router.handle_event(&conn, event).await,
                Err(e) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        error = %e,
                        "Failed to parse client event"
                    );
                    let _ = conn.send(ServerEvent::Error {
                        message: "Invalid event format".to_string(),
                    });
                }
            },
            Message::Close(_) => {
                tracing::info!(connection_id = %connection_id, "WebSocket close frame received");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Axum handles ping/pong automatically
            }
            Message::Binary(_) => {} // Ignore binary messages
        }
    }

    // Cleanup on disconnect
    tracing::info!(
        connection_id = %connection_id,
        user_id = %conn.user_id(),
        "WebSocket connection closing"
    );
    router.disconnect(&conn).await;

    // Registry no longer holds the sender; dropping ours ends the send task
    drop(conn);
    if let Err(e) = send_task.await {
        tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket send task ended abnormally");
    }
}
