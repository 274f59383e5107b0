use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};

use flocker_core::net::messages::{ClientMessage, JoinRoomResponseMsg, ServerMessage};
use flocker_core::net::protocol::{
    MAX_MESSAGE_SIZE, PROTOCOL_VERSION, ProtocolError, decode_client_message,
    decode_message_type, encode_server_message,
};
use flocker_core::participant::sanitize_display_name;

use crate::error::JoinError;
use crate::room_loop::{JoinTicket, ParticipantSender, RoomCommand};
use crate::scheduler::{JoinRequest, ParticipantCommand};
use crate::state::{AppState, ConnectionGuard};

type WsSink = futures::stream::SplitSink<WebSocket, Message>;
type WsStream = futures::stream::SplitStream<WebSocket>;
type RoomCommands = mpsc::UnboundedSender<RoomCommand>;

pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    let max_ws = state.config.limits.max_ws_connections;
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state))
        .into_response())
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Wait for the first message: must be a JoinRoom.
    let first_msg = match ws_receiver.next().await {
        Some(Ok(Message::Binary(data))) => data,
        _ => return,
    };
    let Ok(ClientMessage::JoinRoom(join)) = decode_client_message(&first_msg) else {
        tracing::debug!("First message was not a JoinRoom, dropping connection");
        return;
    };

    // Version 0 means the client did not declare one
    if join.protocol_version != 0 && join.protocol_version != PROTOCOL_VERSION {
        let err = JoinError::ProtocolMismatch {
            client: join.protocol_version,
            server: PROTOCOL_VERSION,
        };
        send_join_error(&mut ws_sender, &err).await;
        return;
    }

    let Some(display_name) = sanitize_display_name(&join.display_name) else {
        send_join_error(&mut ws_sender, &JoinError::InvalidName).await;
        return;
    };

    let (tx, rx) = mpsc::channel::<Bytes>(state.config.limits.player_message_buffer);
    let request = JoinRequest {
        display_name,
        session_id: join.session_id,
    };
    let (ticket, commands) = match attempt_join(&state, request, tx).await {
        Ok(joined) => joined,
        Err(err) => {
            send_join_error(&mut ws_sender, &err).await;
            return;
        },
    };

    let Ok(response) = encode_join_response(&ticket) else {
        tracing::warn!("Failed to encode JoinRoomResponse");
        send_leave(&commands, &ticket);
        return;
    };
    if ws_sender
        .send(Message::Binary(response.into()))
        .await
        .is_err()
    {
        send_leave(&commands, &ticket);
        return;
    }

    spawn_writer(ws_sender, rx);

    read_loop(&mut ws_receiver, &state, &commands, &ticket).await;

    send_leave(&commands, &ticket);
    tracing::info!(
        session_id = %ticket.session_id,
        connection_id = ticket.connection_id,
        "Participant connection closed"
    );
}

/// Hand the join to the current room. A room that closes mid-handshake is
/// replaced by the room manager, so the join is retried once.
async fn attempt_join(
    state: &AppState,
    request: JoinRequest,
    sender: ParticipantSender,
) -> Result<(JoinTicket, RoomCommands), JoinError> {
    for attempt in 1..=2 {
        let commands = {
            let mut rooms = state.rooms.write().await;
            rooms.room().commands.clone()
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        let cmd = RoomCommand::Join {
            request: request.clone(),
            sender: sender.clone(),
            reply: reply_tx,
        };
        if commands.send(cmd).is_err() {
            tracing::debug!(attempt, "Room closed before join was delivered");
            continue;
        }
        match reply_rx.await {
            Ok(result) => return result.map(|ticket| (ticket, commands)),
            Err(_) => tracing::debug!(attempt, "Room closed during join"),
        }
    }
    Err(JoinError::RoomUnavailable)
}

fn send_leave(commands: &RoomCommands, ticket: &JoinTicket) {
    let _ = commands.send(RoomCommand::Leave {
        session_id: ticket.session_id.clone(),
        connection_id: ticket.connection_id,
    });
}

pub fn encode_join_response(ticket: &JoinTicket) -> Result<Vec<u8>, ProtocolError> {
    encode_server_message(&ServerMessage::JoinRoomResponse(JoinRoomResponseMsg {
        success: true,
        session_id: Some(ticket.session_id.clone()),
        is_admin: ticket.is_admin,
        rejoined: ticket.rejoined,
        error: None,
    }))
}

pub fn encode_join_error(err: &JoinError) -> Result<Vec<u8>, ProtocolError> {
    encode_server_message(&ServerMessage::JoinRoomResponse(JoinRoomResponseMsg {
        success: false,
        session_id: None,
        is_admin: false,
        rejoined: false,
        error: Some(err.to_string()),
    }))
}

async fn send_join_error(ws_sender: &mut WsSink, err: &JoinError) {
    tracing::info!(error = %err, "Join refused");
    if let Ok(response) = encode_join_error(err)
        && let Err(e) = ws_sender.send(Message::Binary(response.into())).await
    {
        tracing::warn!(error = %e, "Failed to send join error response");
    }
}

/// Forward room output to the socket. When the room drops this connection's
/// sender the socket is closed.
fn spawn_writer(mut ws_sender: WsSink, mut rx: mpsc::Receiver<Bytes>) {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if ws_sender.send(Message::Binary(data)).await.is_err() {
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });
}

/// Per-connection rate limiter (token bucket).
struct RateLimiter {
    tokens: f64,
    last_refill: tokio::time::Instant,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
}

impl RateLimiter {
    fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            last_refill: tokio::time::Instant::now(),
            max_tokens,
            refill_rate,
        }
    }

    /// Returns true if the message is allowed; false if rate-limited.
    fn allow(&mut self) -> bool {
        let now = tokio::time::Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Map a decoded client message to a room command. `None` for messages that
/// are only valid during the handshake or that end the connection.
fn participant_command(msg: ClientMessage) -> Option<ParticipantCommand> {
    match msg {
        ClientMessage::Ready(_) => Some(ParticipantCommand::Ready),
        ClientMessage::SetReady(m) => Some(ParticipantCommand::SetReady(m.ready)),
        ClientMessage::Move(m) => Some(ParticipantCommand::Move { x: m.x, y: m.y }),
        ClientMessage::Emote(m) => Some(ParticipantCommand::Emote(m.emote)),
        ClientMessage::Survey(m) => Some(ParticipantCommand::Survey {
            completion_code: m.completion_code,
            strategy_text: m.strategy_text,
        }),
        ClientMessage::AdminStartGame(_) => Some(ParticipantCommand::AdminStartGame),
        ClientMessage::JoinRoom(_) | ClientMessage::LeaveRoom(_) => None,
    }
}

async fn read_loop(
    ws_receiver: &mut WsStream,
    state: &AppState,
    commands: &RoomCommands,
    ticket: &JoinTicket,
) {
    let session_id = ticket.session_id.as_str();
    let rate = state.config.limits.ws_rate_limit_per_sec;
    let mut rate_limiter = RateLimiter::new(rate, rate);

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let data = match msg {
            Message::Binary(d) => d,
            Message::Close(_) => break,
            _ => continue,
        };

        // Rate limit: drop messages that exceed per-connection rate
        if !rate_limiter.allow() {
            tracing::warn!(session_id, "Rate limited");
            continue;
        }

        if data.is_empty() || data.len() > MAX_MESSAGE_SIZE {
            continue;
        }

        let msg_type = match decode_message_type(&data) {
            Ok(t) => t,
            Err(_) => continue,
        };
        if msg_type.is_server_only() {
            tracing::warn!(session_id, ?msg_type, "Rejected server-only message from client");
            continue;
        }

        let client_msg = match decode_client_message(&data) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(session_id, error = %e, "Malformed client message");
                continue;
            },
        };
        if matches!(client_msg, ClientMessage::LeaveRoom(_)) {
            break;
        }
        let Some(command) = participant_command(client_msg) else {
            tracing::debug!(session_id, ?msg_type, "Handshake message after join ignored");
            continue;
        };

        let cmd = RoomCommand::Participant {
            session_id: ticket.session_id.clone(),
            connection_id: ticket.connection_id,
            command,
        };
        if commands.send(cmd).is_err() {
            break;
        }
    }
}
