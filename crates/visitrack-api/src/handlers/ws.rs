//! Persistent connection — the dashboard's live channel.
//!
//! On open the connection gets the current `sessions_update` snapshot.
//! After that, client frames are handled one at a time while every
//! broadcast is forwarded as it arrives. Closing the connection removes
//! the session it registered.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use visitrack_core::{ClientMessage, ServerMessage};
use visitrack_services::{ConnectionId, Tracker};

use super::ApiState;

/// Largest client frame accepted. Protocol frames are tiny.
const MAX_FRAME_SIZE: usize = 4 * 1024;

pub async fn handle_ws(State(state): State<ApiState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.max_message_size(MAX_FRAME_SIZE)
        .max_frame_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| serve_connection(socket, state.tracker))
}

async fn serve_connection(socket: WebSocket, tracker: Arc<Tracker>) {
    // Subscribe before the snapshot so nothing falls between them.
    let (connection, mut updates) = tracker.open_connection();
    let (mut sender, mut receiver) = socket.split();

    match tracker.run_blocking(|t| t.snapshot()).await {
        Ok(sessions) => {
            if send(&mut sender, &ServerMessage::SessionsUpdate { sessions })
                .await
                .is_err()
            {
                close(&tracker, connection).await;
                return;
            }
        }
        Err(e) => tracing::warn!(%connection, error = %e, "initial snapshot failed"),
    }

    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = dispatch(&tracker, connection, &text).await {
                        if send(&mut sender, &reply).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Ping/pong are answered by the transport; binary is not part of the protocol.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%connection, error = %e, "connection error");
                    break;
                }
            },
            update = updates.recv() => match update {
                Ok(sessions) => {
                    let message = ServerMessage::SessionsUpdate {
                        sessions: sessions.to_vec(),
                    };
                    if send(&mut sender, &message).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(%connection, skipped, "viewer lagged, skipping to newest update");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    close(&tracker, connection).await;
}

/// Handle one text frame and return the reply, if any.
async fn dispatch(
    tracker: &Arc<Tracker>,
    connection: ConnectionId,
    text: &str,
) -> Option<ServerMessage> {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(%connection, error = %e, "unparseable client frame");
            return Some(ServerMessage::Error {
                message: "invalid message".to_string(),
            });
        }
    };
    tracing::trace!(%connection, ?message, "client frame");

    match tracker
        .run_blocking(move |t| t.handle_message(connection, message))
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(%connection, error = %e, "client message failed");
            Some(ServerMessage::Error {
                message: "session store unavailable".to_string(),
            })
        }
    }
}

async fn close(tracker: &Arc<Tracker>, connection: ConnectionId) {
    if let Err(e) = tracker.run_blocking(move |t| t.disconnect(connection)).await {
        tracing::warn!(%connection, error = %e, "disconnect cleanup failed");
    }
}

async fn send(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode server message");
            return Ok(());
        }
    };
    sender.send(Message::Text(json.into())).await
}
