use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::registry::{ClientType, ConnectionId, ConnectionRegistry, Event};
use crate::utils::state::AppState;

pub const CONNECTION_ID_EVENT: &str = "connectionId";

/// Messages a client may send over its socket.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ClientMessage {
    client_type: ClientType,
}

pub async fn socket_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(socket: WebSocket, state: Arc<AppState>) {
    let registry = state.registry.clone();
    let (tx, mut rx) = ConnectionRegistry::channel();
    let id = registry.add_client(tx).await;
    registry
        .send_to(id, Event::new(CONNECTION_ID_EVENT, id.to_string()))
        .await;

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("failed to encode event {}: {e}", event.event);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                debug!(connection = %id, "write failed: {e}");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut reader = tokio::spawn({
        let registry = registry.clone();
        async move {
            while let Some(Ok(message)) = stream.next().await {
                match message {
                    Message::Text(text) => handle_message(&registry, id, text.as_str()).await,
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }
    registry.remove_client(id).await;
}

async fn handle_message(registry: &ConnectionRegistry, id: ConnectionId, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage { client_type }) => {
            if let Err(e) = registry.set_client_type(id, client_type).await {
                debug!("ignoring client type update: {e}");
            }
        }
        Err(e) => debug!(connection = %id, "ignoring unrecognised message: {e}"),
    }
}
