use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::engine::controller::PresenceController;
use crate::error::AppError;
use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(role): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let controller = state.controller(&role)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, controller)))
}

async fn handle_socket(socket: WebSocket, controller: Arc<PresenceController>) {
    let (mut sender, mut receiver) = socket.split();
    let mut changes = BroadcastStream::new(controller.subscribe_changes());
    let role = controller.role();

    info!(role = %role, "dashboard client connected");

    let send_task = tokio::spawn(async move {
        while let Some(change) = changes.next().await {
            let change = match change {
                Ok(change) => change,
                Err(err) => {
                    // Client fell behind; it should refetch the list view.
                    warn!(error = %err, "dashboard client lagged");
                    continue;
                }
            };

            let json = match serde_json::to_string(&change) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize change notice for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(role = %role, "dashboard client disconnected");
}
