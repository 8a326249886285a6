//! WebSocket push channel
//!
//! A client authenticates with its first message and from then on receives
//! every index change as `add` / `delete` events.

use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use hearth_core::Subscription;
use hearth_types::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub async fn handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection state once authenticated
struct Viewer {
    username: String,
    subscription_id: String,
    relay: JoinHandle<()>,
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    debug!("New WebSocket connection");

    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to this client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Forward messages from the channel to the socket
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Failed to encode server message: {}", e),
            }
        }
    });

    let mut viewer: Option<Viewer> = None;

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => {
                    if !handle_message(client_msg, &state, &mut viewer, &tx) {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to parse message: {}", e);
                    let _ = tx.send(ServerMessage::Error {
                        code: "invalid_message".to_string(),
                        message: format!("Failed to parse message: {}", e),
                    });
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
        }
    }

    if let Some(viewer) = viewer {
        disconnect(&state, viewer);
    }

    // Let pending messages (e.g. auth errors) flush; the task exits once `tx` is gone
    drop(tx);
    let _ = forward_task.await;
}

fn disconnect(state: &AppState, viewer: Viewer) {
    viewer.relay.abort();
    state.broadcaster.unsubscribe(&viewer.subscription_id);
    info!("Viewer disconnected: {}", viewer.username);
}

/// Returns false to disconnect
fn handle_message(
    msg: ClientMessage,
    state: &AppState,
    viewer: &mut Option<Viewer>,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) -> bool {
    match msg {
        ClientMessage::Authenticate { token } => {
            if let Some(current) = viewer {
                debug!("Ignoring repeated authenticate from {}", current.username);
                let _ = tx.send(ServerMessage::Authenticated {
                    username: current.username.clone(),
                });
                return true;
            }

            let username = match state.auth_service.validate_token(&token) {
                Ok(username) => username,
                Err(e) => {
                    warn!("WebSocket authentication failed: {}", e);
                    let _ = tx.send(ServerMessage::Error {
                        code: "unauthorized".to_string(),
                        message: format!("Invalid token: {}", e),
                    });
                    return false;
                }
            };

            let _ = tx.send(ServerMessage::Authenticated {
                username: username.clone(),
            });

            let Subscription {
                id: subscription_id,
                mut receiver,
            } = state.broadcaster.subscribe(&username);
            let relay_tx = tx.clone();
            let relay = tokio::spawn(async move {
                while let Some(event) = receiver.recv().await {
                    if relay_tx.send(ServerMessage::from(event)).is_err() {
                        break;
                    }
                }
            });

            *viewer = Some(Viewer {
                username,
                subscription_id,
                relay,
            });
            true
        }
        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong);
            true
        }
    }
}
