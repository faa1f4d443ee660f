//! WebSocket connection lifecycle.
//!
//! Each socket gets a reader loop and a writer task. The reader handles
//! inbound frames one at a time; everything outbound, replies and broadcasts
//! alike, goes through the connection's outbox to the writer.

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::handlers::{MessageResponse, handle_frame};
use super::protocol::ServerEvent;
use crate::state::AppState;

/// Handle a WebSocket connection until it closes, then clean up after it.
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let (outbox, queue) = mpsc::unbounded_channel();
    let conn_id = state.realtime().connect(outbox.clone());

    tracing::debug!(connection_id = %conn_id, "WebSocket connection established");

    let writer = tokio::spawn(write_loop(sender, queue));
    let idle_timeout = state.config().idle_timeout;
    let max_size = state.config().max_ws_message_size;

    loop {
        // Wait for next message with idle timeout
        let msg = match tokio::time::timeout(idle_timeout, receiver.next()).await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(_) => {
                tracing::info!(connection_id = %conn_id, "WebSocket connection closed due to idle timeout");
                let _ = outbox.send(ServerEvent::message_error(
                    None,
                    "Connection closed due to inactivity",
                ));
                break;
            }
        };

        // Binary frames are accepted when they carry UTF-8 JSON.
        let text = match msg {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    let _ = outbox.send(ServerEvent::message_error(
                        None,
                        "Binary data must be UTF-8",
                    ));
                    continue;
                }
            },
            // Pings are answered by the websocket layer itself.
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        };

        if text.len() > max_size {
            tracing::debug!(connection_id = %conn_id, size = text.len(), "Dropped oversized frame");
            let _ = outbox.send(ServerEvent::message_error(
                None,
                format!("Message exceeds {max_size} bytes"),
            ));
            continue;
        }

        match handle_frame(&text, conn_id, &state).await {
            MessageResponse::Single(event) => {
                if outbox.send(event).is_err() {
                    break;
                }
            }
            MessageResponse::None => {}
        }
    }

    state.realtime().disconnect(conn_id);

    // The writer drains what is queued and exits once the last outbox is gone.
    drop(outbox);
    let _ = writer.await;

    tracing::debug!(connection_id = %conn_id, "WebSocket connection closed");
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut queue: mpsc::UnboundedReceiver<ServerEvent>,
) {
    while let Some(event) = queue.recv().await {
        if send_event(&mut sender, &event).await.is_err() {
            break;
        }
    }
    let _ = sender.close().await;
}

/// Send an event over the WebSocket.
pub async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).map_err(axum::Error::new)?;
    sender
        .send(Message::Text(json.into()))
        .await
        .map_err(axum::Error::new)
}
