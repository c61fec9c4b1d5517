use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::connection::{ConnState, Connection};
use crate::engine::events::ServerEvent;

use super::app_state::AppState;

/// GET /ws: upgrade to the chat socket. Clients join a room with a `join`
/// frame after connecting.
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let max_frame = state.config.storage.max_frame_bytes;
    ws.max_message_size(max_frame)
        .max_frame_size(max_frame)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (conn, outbound) = Connection::open();
    let mut conn_state = ConnState::default();
    info!(conn_id = %conn.id, "websocket connected");

    let (sink, mut stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(sink, outbound));

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        state.relay.handle_frame(&conn, &mut conn_state, text.as_str()).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(conn_id = %conn.id, "ignoring binary frame");
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(conn_id = %conn.id, error = %e, "websocket read error");
                        break;
                    }
                }
            }
            _ = &mut writer => {
                debug!(conn_id = %conn.id, "write loop ended");
                break;
            }
            _ = state.shutdown.cancelled() => {
                debug!(conn_id = %conn.id, "closing websocket for shutdown");
                break;
            }
        }
    }

    let room_id = conn_state.room_id();
    state.relay.disconnect(&conn, &mut conn_state).await;
    writer.abort();
    info!(
        conn_id = %conn.id,
        room_id = ?room_id,
        connected_secs = (Utc::now() - conn.connected_at).num_seconds(),
        "websocket disconnected"
    );
}

/// Drain the connection's outbound queue into the socket.
async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut outbound: mpsc::Receiver<ServerEvent>) {
    while let Some(event) = outbound.recv().await {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize outbound event");
                continue;
            }
        };
        if sink.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}
