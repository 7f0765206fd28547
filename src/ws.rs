use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt, Sink};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::protocol::{ClientMessage, DashboardMessage};
use crate::state::AppState;

/// WebSocket upgrade handler for results dashboards
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::info!("Dashboard WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn current_view_message(state: &AppState) -> DashboardMessage {
    match state.dashboard().await {
        Ok(view) => DashboardMessage::welcome(view),
        Err(e) => {
            tracing::warn!("Could not build dashboard view: {}", e);
            DashboardMessage::error("STORE_UNAVAILABLE", e.to_string())
        }
    }
}

async fn send_message<S>(sender: &mut S, msg: &DashboardMessage) -> bool
where
    S: Sink<Message> + Unpin,
{
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to serialize dashboard message: {}", e);
            true
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the welcome so no update falls in between
    let mut broadcast_rx = state.dashboard_broadcast.subscribe();

    let welcome = current_view_message(&state).await;
    if !send_message(&mut sender, &welcome).await {
        tracing::error!("Failed to send welcome message");
        return;
    }

    loop {
        tokio::select! {
            broadcast_msg = broadcast_rx.recv() => {
                match broadcast_msg {
                    Ok(msg) => {
                        if !send_message(&mut sender, &msg).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Later standings messages are complete, nothing to replay
                        tracing::debug!("Dashboard client lagged by {} messages", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message: {}", text);

                        let response = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Refresh) => current_view_message(&state).await,
                            Err(e) => {
                                tracing::warn!("Failed to parse client message: {}", e);
                                DashboardMessage::error(
                                    "PARSE_ERROR",
                                    format!("Invalid message format: {}", e),
                                )
                            }
                        };
                        if !send_message(&mut sender, &response).await {
                            tracing::error!("Failed to send response");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    tracing::info!("Dashboard WebSocket connection closed");
}
