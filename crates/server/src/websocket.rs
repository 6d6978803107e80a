//! WebSocket handling
//!
//! Authentication is synchronous with the upgrade request: a rejected
//! credential gets a plain 401 and the socket never opens. Everything
//! after the upgrade goes through the relay.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use roomrelay_protocol::{ClientEvent, ServerEvent};

use crate::api::bearer_token;
use crate::error::RelayError;
use crate::state::AppState;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Messages that can be sent through the WebSocket
enum OutboundMessage {
    /// JSON-serialized ServerEvent
    Json(ServerEvent),
    /// Raw pong response
    Pong(Bytes),
}

/// Connection-time auth payload
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    token: Option<String>,
    room: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let credential = query.token.clone().or_else(|| bearer_token(&headers));

    match state.verifier.verify(credential.as_deref()).await {
        Ok(identity) => {
            let room = query.room.clone();
            ws.on_upgrade(move |socket| handle_socket(socket, state, identity, room))
                .into_response()
        }
        Err(reason) => {
            warn!(
                component = "websocket",
                event = "ws.auth.rejected",
                error = %RelayError::AuthRejected(reason),
                "Connection rejected before upgrade"
            );
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

/// Handle an authenticated WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    identity: roomrelay_protocol::Identity,
    requested_room: Option<String>,
) {
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    info!(
        component = "websocket",
        event = "ws.connection.opened",
        connection_id = conn_id,
        identity_id = %identity.id,
        "WebSocket connection opened"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Channel for sending messages to this client
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(100);

    // Spawn task to forward messages to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let result = match msg {
                OutboundMessage::Json(event) => match serde_json::to_string(&event) {
                    Ok(json) => ws_tx.send(Message::Text(json.into())).await,
                    Err(e) => {
                        error!(
                            component = "websocket",
                            event = "ws.send.serialize_failed",
                            connection_id = conn_id,
                            error = %e,
                            "Failed to serialize server event"
                        );
                        continue;
                    }
                },
                OutboundMessage::Pong(data) => ws_tx.send(Message::Pong(data)).await,
            };

            if result.is_err() {
                debug!(
                    component = "websocket",
                    event = "ws.send.disconnected",
                    connection_id = conn_id,
                    "WebSocket send failed, client disconnected"
                );
                break;
            }
        }
    });

    // Bind to a room and replay what the joiner should see
    let outcome = match state.relay.connect(conn_id, identity, requested_room).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(
                component = "websocket",
                event = "ws.connect.room_resolution_failed",
                connection_id = conn_id,
                error = %e,
                "Could not bind connection to a room"
            );
            send_task.abort();
            return;
        }
    };

    for event in outcome.events {
        send_json(&outbound_tx, event).await;
    }
    let mut forwarder =
        spawn_broadcast_forwarder(outcome.rx, outbound_tx.clone(), outcome.room_key.clone());

    // Handle incoming frames
    while let Some(result) = ws_rx.next().await {
        let msg = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                let _ = outbound_tx.send(OutboundMessage::Pong(data)).await;
                continue;
            }
            Ok(Message::Close(_)) => {
                info!(
                    component = "websocket",
                    event = "ws.connection.close_frame",
                    connection_id = conn_id,
                    "Client sent close frame"
                );
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.connection.error",
                    connection_id = conn_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
        };

        let client_event: ClientEvent = match serde_json::from_str(&msg) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.message.parse_failed",
                    connection_id = conn_id,
                    error = %e,
                    payload_bytes = msg.len(),
                    "Failed to parse client event"
                );
                send_json(
                    &outbound_tx,
                    ServerEvent::Error {
                        code: "parse_error".into(),
                        message: e.to_string(),
                    },
                )
                .await;
                continue;
            }
        };

        let ClientEvent::Chat {
            room,
            text,
            attachment_refs,
        } = client_event;

        match state.relay.submit(conn_id, room, text, attachment_refs).await {
            Ok(None) => {}
            Ok(Some(rebound)) => {
                // Room switch: move the broadcast subscription over
                forwarder.abort();
                for event in rebound.events {
                    send_json(&outbound_tx, event).await;
                }
                forwarder = spawn_broadcast_forwarder(
                    rebound.rx,
                    outbound_tx.clone(),
                    rebound.room_key.clone(),
                );
            }
            Err(e) => {
                // Room resolution failed; the submit degrades to a no-op
                error!(
                    component = "websocket",
                    event = "ws.submit.failed",
                    connection_id = conn_id,
                    error = %e,
                    "Submit dropped"
                );
            }
        }
    }

    state.relay.disconnect(conn_id);
    forwarder.abort();
    send_task.abort();

    info!(
        component = "websocket",
        event = "ws.connection.closed",
        connection_id = conn_id,
        "WebSocket connection closed"
    );
}

/// Send a ServerEvent through the outbound channel
async fn send_json(tx: &mpsc::Sender<OutboundMessage>, event: ServerEvent) {
    let _ = tx.send(OutboundMessage::Json(event)).await;
}

/// Spawn a task that drains a broadcast receiver and forwards events to
/// an outbound channel. When the outbound channel closes (client
/// disconnects), the task exits and the broadcast::Receiver is dropped.
/// Lagging subscribers get an `error{lagged}` event so the client can
/// reconnect for a fresh replay.
fn spawn_broadcast_forwarder(
    mut rx: tokio::sync::broadcast::Receiver<ServerEvent>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    room_key: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if outbound_tx.send(OutboundMessage::Json(event)).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        component = "websocket",
                        event = "ws.broadcast.lagged",
                        room_key = %room_key,
                        skipped = n,
                        "Broadcast subscriber lagged, skipped {n} events"
                    );
                    let _ = outbound_tx
                        .send(OutboundMessage::Json(ServerEvent::Error {
                            code: "lagged".to_string(),
                            message: format!("Subscriber lagged, skipped {n} events"),
                        }))
                        .await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
