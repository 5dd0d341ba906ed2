use axum::extract::{
    State,
    ws::{self, WebSocket, WebSocketUpgrade},
};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::state::AppState;

const CLIENT_BUFFER_SIZE: usize = 64;

pub async fn ws_handler(
    ws_upgrade: WebSocketUpgrade,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    tracing::debug!("WebSocket: Connection attempt");
    ws_upgrade.on_upgrade(move |socket| handle_socket(socket, app_state))
}

/// Pumps one connection: outbound frames from the actors to the socket, inbound
/// text frames to the registry. The registry learns about the disconnect once
/// either direction ends.
#[tracing::instrument(skip(socket, app_state), fields(client.id = tracing::field::Empty))]
pub async fn handle_socket(socket: WebSocket, app_state: AppState) {
    let client_id = Uuid::new_v4();
    tracing::Span::current().record("client.id", tracing::field::display(client_id));
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let registry = app_state.registry;

    let (actor_to_client_tx, mut actor_to_client_rx) =
        mpsc::channel::<ws::Message>(CLIENT_BUFFER_SIZE);
    registry.client_connected(client_id, actor_to_client_tx).await;
    tracing::info!("WebSocket: Client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(message_to_send) = actor_to_client_rx.recv().await {
            if ws_sender.send(message_to_send).await.is_err() {
                tracing::info!("WS send error, client likely disconnected");
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let registry_recv = registry.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(ws::Message::Text(text_msg)) => {
                    if let Err(e) = registry_recv
                        .process_event(client_id, text_msg.to_string())
                        .await
                    {
                        tracing::error!(error = %e, "Error forwarding event to registry");
                        break;
                    }
                }
                Ok(ws::Message::Binary(_)) => {
                    tracing::debug!("Received binary message (ignored)");
                }
                Ok(ws::Message::Ping(_)) | Ok(ws::Message::Pong(_)) => {}
                Ok(ws::Message::Close(_)) => {
                    tracing::debug!("WebSocket closed by client");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket error (recv)");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    registry.client_disconnected(client_id).await;
    tracing::info!("WebSocket: Client disconnected");
}
