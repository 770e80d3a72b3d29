use super::protocol as ws_protocol;
use crate::broker::MessageBroker;
use crate::connection::ConnectionManager;
use crate::error::{request_id_from_headers_or_generate, with_request_id_scope, ErrorCode};
use crate::history::HistoryService;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::Utc;
use commune_common::protocol::ws::WsMessage;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

pub(crate) const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub(crate) const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub(crate) const MAX_FRAME_BYTES: usize = 16_384;

#[derive(Clone)]
pub(crate) struct ChatSocketState {
    connections: Arc<ConnectionManager>,
    broker: Arc<MessageBroker>,
    history: HistoryService,
}

pub fn router(
    connections: Arc<ConnectionManager>,
    broker: Arc<MessageBroker>,
    history: HistoryService,
) -> Router {
    let state = ChatSocketState { connections, broker, history };

    Router::new().route("/v1/ws", get(ws_upgrade)).with_state(state)
}

async fn ws_upgrade(
    State(state): State<ChatSocketState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let request_id = request_id_from_headers_or_generate(&headers);

    ws.max_frame_size(MAX_FRAME_BYTES).on_upgrade(move |socket| async move {
        with_request_id_scope(request_id, handle_socket(state, socket)).await;
    })
}

fn frame_size_exceeded_reason() -> String {
    format!("websocket frame exceeds maximum size of {MAX_FRAME_BYTES} bytes")
}

fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
}

async fn close_frame_too_large(socket: &mut WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: frame_size_exceeded_reason().into(),
        })))
        .await;
}

async fn send_error(
    socket: &mut WebSocket,
    code: ErrorCode,
    message: impl Into<String>,
    room_id: Option<Uuid>,
) -> Result<(), ()> {
    ws_protocol::send_ws_message(
        socket,
        &WsMessage::Error {
            code: code.as_str().to_string(),
            message: message.into(),
            retryable: code.retryable(),
            room_id,
        },
    )
    .await
}

async fn handle_socket(state: ChatSocketState, mut socket: WebSocket) {
    let connection_id = state.connections.connect().await;

    let connected = WsMessage::Connected { connection_id, server_time: Utc::now() };
    if ws_protocol::send_ws_message(&mut socket, &connected).await.is_err() {
        state.connections.disconnect(connection_id).await;
        return;
    }

    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<WsMessage>();
    if !state.connections.register_outbound(connection_id, outbound_sender).await {
        state.connections.disconnect(connection_id).await;
        return;
    }

    debug!(connection_id = %connection_id, "client connected");

    // Heartbeat: server pings every HEARTBEAT_INTERVAL_MS and disconnects a
    // client that shows no life for a full interval plus the pong grace.
    let mut heartbeat_interval =
        tokio::time::interval(std::time::Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    heartbeat_interval.reset(); // skip immediate first tick
    let mut last_seen = Instant::now();
    let liveness_deadline =
        std::time::Duration::from_millis(HEARTBEAT_INTERVAL_MS + HEARTBEAT_TIMEOUT_MS);

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_seen.elapsed() > liveness_deadline {
                    warn!(connection_id = %connection_id, "heartbeat timeout, disconnecting");
                    break;
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(outbound_message) => {
                        if ws_protocol::send_ws_message(&mut socket, &outbound_message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        last_seen = Instant::now();
                        if raw_message.len() > MAX_FRAME_BYTES {
                            close_frame_too_large(&mut socket).await;
                            break;
                        }

                        let inbound = match ws_protocol::decode_message(&raw_message) {
                            Ok(message) => message,
                            Err(_) => {
                                if send_error(
                                    &mut socket,
                                    ErrorCode::ValidationFailed,
                                    "invalid websocket frame payload",
                                    None,
                                )
                                .await
                                .is_err()
                                {
                                    break;
                                }
                                continue;
                            }
                        };

                        if handle_inbound(&state, connection_id, &mut socket, inbound).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) | Ok(Message::Ping(_)) => {
                        last_seen = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(Message::Binary(_)) => {
                        if send_error(
                            &mut socket,
                            ErrorCode::ValidationFailed,
                            "binary frames are not part of the chat protocol",
                            None,
                        )
                        .await
                        .is_err()
                        {
                            break;
                        }
                    }
                    Err(error) if is_frame_size_violation(&error) => {
                        close_frame_too_large(&mut socket).await;
                        break;
                    }
                    Err(_) => break,
                }
            }
        }
    }

    state.connections.disconnect(connection_id).await;
    debug!(connection_id = %connection_id, "client disconnected");
}

/// Dispatch one decoded client frame. `Err` means the socket is beyond use
/// and the caller should tear the session down.
async fn handle_inbound(
    state: &ChatSocketState,
    connection_id: Uuid,
    socket: &mut WebSocket,
    inbound: WsMessage,
) -> Result<(), ()> {
    match inbound {
        WsMessage::Join { room_id } => {
            state.connections.join(connection_id, room_id).await;
            debug!(connection_id = %connection_id, room_id = %room_id, "joined room");
            Ok(())
        }
        WsMessage::Leave { room_id } => {
            state.connections.leave(connection_id, room_id).await;
            debug!(connection_id = %connection_id, room_id = %room_id, "left room");
            Ok(())
        }
        WsMessage::Publish { room_id, sender_id, content } => {
            match state.broker.publish(room_id, sender_id, &content).await {
                // The publisher hears about success the same way everyone
                // else does: through the fanned-out delivery frame.
                Ok(_outcome) => Ok(()),
                Err(error) => {
                    send_error(socket, error.error_code(), error.to_string(), Some(room_id)).await
                }
            }
        }
        WsMessage::FetchHistory { room_id } => {
            match state.history.history(room_id).await {
                Ok(messages) => {
                    ws_protocol::send_ws_message(
                        socket,
                        &WsMessage::History { room_id, messages },
                    )
                    .await
                }
                Err(error) => {
                    warn!(
                        connection_id = %connection_id,
                        room_id = %room_id,
                        error = %error,
                        "history fetch failed"
                    );
                    send_error(
                        socket,
                        ErrorCode::PersistenceFailed,
                        "room history is temporarily unavailable",
                        Some(room_id),
                    )
                    .await
                }
            }
        }
        WsMessage::Connected { .. }
        | WsMessage::MessageDelivered { .. }
        | WsMessage::History { .. }
        | WsMessage::Error { .. } => {
            send_error(
                socket,
                ErrorCode::ValidationFailed,
                "frame type is not accepted from clients",
                None,
            )
            .await
        }
    }
}
