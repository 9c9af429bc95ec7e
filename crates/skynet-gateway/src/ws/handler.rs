use std::sync::Arc;

use axum::{
    extract::{ws::Message, ws::WebSocket, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::info;

use crate::app::AppState;
use crate::ws::hub;

/// Axum handler — upgrades HTTP to WebSocket at `GET /ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Per-connection task. One reader loop reads frames off the socket and
/// drives the hub; one writer loop drains the peer's outbound channel into
/// the socket sink. Either side ending tears down the connection.
async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (peer_id, mut outbox) = hub::connect(&state);
    info!(peer_id = %peer_id, "peer connected");

    let mut writer = tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let reader_state = state.clone();
    let reader_peer_id = peer_id.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => hub::handle_text(&reader_state, &reader_peer_id, &text).await,
                Ok(Message::Binary(data)) => hub::handle_bytes(&reader_state, &reader_peer_id, data.to_vec()).await,
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    hub::disconnect(&state, &peer_id);
    info!(peer_id = %peer_id, "peer disconnected");
}
