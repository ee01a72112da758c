use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{
    sink::{Sink, SinkExt},
    stream::StreamExt,
};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::messages::WsMessage;
use super::outbound::Outbound;
use super::session::Session;
use crate::errors::StreamError;
use crate::models::ConnectionId;
use crate::state::AppState;

/// Handle WebSocket upgrade request
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle WebSocket connection
///
/// The reader loop owns the session; a separate writer task drains the
/// outbound queue, so a slow socket never blocks ticks or other clients.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = ConnectionId::new();
    let (sender, mut receiver) = socket.split();

    let (outbound, rx) = Outbound::channel(state.config.outbound_capacity);
    let closed = outbound.closed_token();
    let writer = tokio::spawn(write_loop(connection_id, sender, rx, closed.clone()));

    let heartbeat_every = state.config.heartbeat_interval();
    let mut heartbeat = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
    let mut session = Session::new(connection_id, outbound.clone(), state);

    info!("WebSocket client connected: {}", connection_id);

    loop {
        select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = session.handle_text(&text) {
                            if !report_command_error(connection_id, e) {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket client disconnected: {}", connection_id);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error on {}: {}", connection_id, e);
                        break;
                    }
                    None => break,
                    // Protocol pings are answered by axum
                    _ => {}
                }
            }

            _ = closed.cancelled() => {
                debug!("Connection {} closed by server", connection_id);
                break;
            }

            _ = heartbeat.tick() => {
                let ping = WsMessage::Ping {
                    timestamp: chrono::Utc::now(),
                };
                if let Err(reason) = outbound.push(ping) {
                    warn!("Heartbeat to {} failed: {}", connection_id, reason);
                    break;
                }
            }
        }
    }

    session.close();
    if let Err(e) = writer.await {
        error!("Writer task for {} failed: {}", connection_id, e);
    }

    info!("WebSocket connection closed: {}", connection_id);
}

/// Forward queued events to the socket as JSON text frames
///
/// A failed send cancels `closed`, which ends the reader loop and unbinds
/// the connection.
async fn write_loop<S>(
    connection_id: ConnectionId,
    mut sender: S,
    mut rx: mpsc::Receiver<WsMessage>,
    closed: CancellationToken,
) where
    S: Sink<Message> + Unpin,
{
    loop {
        let message = select! {
            message = rx.recv() => message,
            _ = closed.cancelled() => None,
        };

        let Some(message) = message else {
            break;
        };

        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to encode event for {}: {}", connection_id, e);
                continue;
            }
        };

        if sender.send(Message::Text(json)).await.is_err() {
            debug!("Socket for {} went away", connection_id);
            break;
        }
    }

    // Unblock the reader if the socket died first
    closed.cancel();
    let _ = sender.close().await;
}

/// Log a failed command; returns whether the connection should stay open
fn report_command_error(connection_id: ConnectionId, error: StreamError) -> bool {
    if error.is_delivery_failure() {
        warn!("Dropping connection {}: {}", connection_id, error);
        return false;
    }

    match error {
        StreamError::UnknownSymbol(symbol) => {
            debug!("Connection {} asked for unknown symbol {}", connection_id, symbol);
        }
        other if other.is_protocol_misuse() => {
            warn!("Protocol misuse on {}: {}", connection_id, other);
        }
        other => {
            error!("Command failed on {}: {}", connection_id, other);
        }
    }
    true
}
