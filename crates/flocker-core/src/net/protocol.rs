use serde::{Deserialize, Serialize};

use super::messages::{
    AdminStartGameMsg, ClientMessage, EmoteMsg, ErrorMsg, ExperimentEndInfoMsg, JoinRoomMsg,
    JoinRoomResponseMsg, LateJoinInfoMsg, LeaveRoomMsg, MessageType, MoveMsg, PlayerEmotedMsg,
    ReadyMsg, RoundEndInfoMsg, ServerMessage, SetReadyMsg, SurveyMsg,
};
use crate::session::SessionState;

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum message payload size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty message")]
    EmptyMessage,
    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),
    #[error("payload too large: {0} bytes (max {MAX_MESSAGE_SIZE})")]
    PayloadTooLarge(usize),
    #[error("serialize error: {0}")]
    SerializeError(String),
    #[error("deserialize error: {0}")]
    DeserializeError(String),
}

/// Encode a serializable payload with a 1-byte type prefix.
pub fn encode_message<T: Serialize>(
    msg_type: MessageType,
    payload: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let payload_bytes =
        rmp_serde::to_vec(payload).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    let total = 1 + payload_bytes.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(total));
    }
    let mut buf = Vec::with_capacity(total);
    buf.push(msg_type as u8);
    buf.extend_from_slice(&payload_bytes);
    Ok(buf)
}

/// Encode a `ClientMessage` to wire format.
pub fn encode_client_message(msg: &ClientMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        ClientMessage::JoinRoom(m) => encode_message(MessageType::JoinRoom, m),
        ClientMessage::LeaveRoom(m) => encode_message(MessageType::LeaveRoom, m),
        ClientMessage::Ready(m) => encode_message(MessageType::Ready, m),
        ClientMessage::SetReady(m) => encode_message(MessageType::SetReady, m),
        ClientMessage::Move(m) => encode_message(MessageType::Move, m),
        ClientMessage::Emote(m) => encode_message(MessageType::Emote, m),
        ClientMessage::Survey(m) => encode_message(MessageType::Survey, m),
        ClientMessage::AdminStartGame(m) => encode_message(MessageType::AdminStartGame, m),
    }
}

/// Encode a `ServerMessage` to wire format.
pub fn encode_server_message(msg: &ServerMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        ServerMessage::JoinRoomResponse(m) => encode_message(MessageType::JoinRoomResponse, m),
        ServerMessage::SessionState(m) => encode_message(MessageType::SessionState, m),
        ServerMessage::RoundEndInfo(m) => encode_message(MessageType::RoundEndInfo, m),
        ServerMessage::ExperimentEndInfo(m) => encode_message(MessageType::ExperimentEndInfo, m),
        ServerMessage::PlayerEmoted(m) => encode_message(MessageType::PlayerEmoted, m),
        ServerMessage::LateJoinInfo(m) => encode_message(MessageType::LateJoinInfo, m),
        ServerMessage::Error(m) => encode_message(MessageType::Error, m),
    }
}

/// Extract the message type byte from raw wire data.
pub fn decode_message_type(data: &[u8]) -> Result<MessageType, ProtocolError> {
    let Some(&first) = data.first() else {
        return Err(ProtocolError::EmptyMessage);
    };
    MessageType::from_byte(first).ok_or(ProtocolError::UnknownMessageType(first))
}

/// Decode a MessagePack payload (bytes after the type prefix).
pub fn decode_payload<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    rmp_serde::from_slice(&data[1..]).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

/// Decode raw wire data into a `ClientMessage`.
pub fn decode_client_message(data: &[u8]) -> Result<ClientMessage, ProtocolError> {
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::JoinRoom => Ok(ClientMessage::JoinRoom(decode_payload::<JoinRoomMsg>(
            data,
        )?)),
        MessageType::LeaveRoom => Ok(ClientMessage::LeaveRoom(decode_payload::<LeaveRoomMsg>(
            data,
        )?)),
        MessageType::Ready => Ok(ClientMessage::Ready(decode_payload::<ReadyMsg>(data)?)),
        MessageType::SetReady => Ok(ClientMessage::SetReady(decode_payload::<SetReadyMsg>(
            data,
        )?)),
        MessageType::Move => Ok(ClientMessage::Move(decode_payload::<MoveMsg>(data)?)),
        MessageType::Emote => Ok(ClientMessage::Emote(decode_payload::<EmoteMsg>(data)?)),
        MessageType::Survey => Ok(ClientMessage::Survey(decode_payload::<SurveyMsg>(data)?)),
        MessageType::AdminStartGame => Ok(ClientMessage::AdminStartGame(decode_payload::<
            AdminStartGameMsg,
        >(data)?)),
        _ => Err(ProtocolError::UnknownMessageType(data[0])),
    }
}

/// Decode raw wire data into a `ServerMessage`.
pub fn decode_server_message(data: &[u8]) -> Result<ServerMessage, ProtocolError> {
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::JoinRoomResponse => Ok(ServerMessage::JoinRoomResponse(decode_payload::<
            JoinRoomResponseMsg,
        >(data)?)),
        MessageType::SessionState => Ok(ServerMessage::SessionState(Box::new(decode_payload::<
            SessionState,
        >(data)?))),
        MessageType::RoundEndInfo => Ok(ServerMessage::RoundEndInfo(decode_payload::<
            RoundEndInfoMsg,
        >(data)?)),
        MessageType::ExperimentEndInfo => Ok(ServerMessage::ExperimentEndInfo(decode_payload::<
            ExperimentEndInfoMsg,
        >(data)?)),
        MessageType::PlayerEmoted => Ok(ServerMessage::PlayerEmoted(decode_payload::<
            PlayerEmotedMsg,
        >(data)?)),
        MessageType::LateJoinInfo => Ok(ServerMessage::LateJoinInfo(decode_payload::<
            LateJoinInfoMsg,
        >(data)?)),
        MessageType::Error => Ok(ServerMessage::Error(decode_payload::<ErrorMsg>(data)?)),
        _ => Err(ProtocolError::UnknownMessageType(data[0])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::Emote;
    use crate::test_helpers::make_session_state;
    use crate::zone::ZoneId;

    #[test]
    fn join_room_roundtrip() {
        let msg = ClientMessage::JoinRoom(JoinRoomMsg {
            display_name: "Ana".to_string(),
            session_id: Some("abc".to_string()),
            protocol_version: PROTOCOL_VERSION,
        });
        let bytes = encode_client_message(&msg).unwrap();
        assert_eq!(bytes[0], MessageType::JoinRoom as u8);
        assert_eq!(decode_client_message(&bytes).unwrap(), msg);
    }

    #[test]
    fn empty_payload_messages_roundtrip() {
        for msg in [
            ClientMessage::Ready(ReadyMsg {}),
            ClientMessage::LeaveRoom(LeaveRoomMsg {}),
            ClientMessage::AdminStartGame(AdminStartGameMsg {}),
        ] {
            let bytes = encode_client_message(&msg).unwrap();
            assert_eq!(decode_client_message(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn emote_and_move_roundtrip() {
        let emote = ClientMessage::Emote(EmoteMsg {
            emote: Emote::Question,
        });
        let bytes = encode_client_message(&emote).unwrap();
        assert_eq!(decode_client_message(&bytes).unwrap(), emote);

        let mv = ClientMessage::Move(MoveMsg { x: 12.5, y: -3.0 });
        let bytes = encode_client_message(&mv).unwrap();
        assert_eq!(decode_client_message(&bytes).unwrap(), mv);
    }

    #[test]
    fn session_state_roundtrip() {
        let state = make_session_state(3);
        let msg = ServerMessage::SessionState(Box::new(state));
        let bytes = encode_server_message(&msg).unwrap();
        assert_eq!(decode_server_message(&bytes).unwrap(), msg);
    }

    #[test]
    fn round_end_roundtrip() {
        let msg = ServerMessage::RoundEndInfo(RoundEndInfoMsg {
            round: 2,
            trial: 4,
            round_score: 3,
            total_score: 11,
            target_zone_id: Some(ZoneId::East),
            participants_in_target_zone: 3,
        });
        let bytes = encode_server_message(&msg).unwrap();
        assert_eq!(decode_server_message(&bytes).unwrap(), msg);
    }

    #[test]
    fn server_message_is_not_a_client_message() {
        let msg = ServerMessage::Error(ErrorMsg {
            message: "nope".to_string(),
        });
        let bytes = encode_server_message(&msg).unwrap();
        assert!(matches!(
            decode_client_message(&bytes),
            Err(ProtocolError::UnknownMessageType(0x16))
        ));
    }

    #[test]
    fn empty_message_rejected() {
        assert!(matches!(
            decode_message_type(&[]),
            Err(ProtocolError::EmptyMessage)
        ));
    }

    #[test]
    fn unknown_type_rejected() {
        assert!(matches!(
            decode_message_type(&[0xff]),
            Err(ProtocolError::UnknownMessageType(0xff))
        ));
    }

    #[test]
    fn truncated_payload_is_deserialize_error() {
        let msg = ClientMessage::Survey(SurveyMsg {
            completion_code: "C0DE".to_string(),
            strategy_text: "followed the crowd".to_string(),
        });
        let bytes = encode_client_message(&msg).unwrap();
        assert!(matches!(
            decode_client_message(&bytes[..bytes.len() - 4]),
            Err(ProtocolError::DeserializeError(_))
        ));
    }

    #[test]
    fn oversized_payload_rejected() {
        let msg = ClientMessage::Survey(SurveyMsg {
            completion_code: String::new(),
            strategy_text: "a".repeat(MAX_MESSAGE_SIZE),
        });
        assert!(matches!(
            encode_client_message(&msg),
            Err(ProtocolError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn server_only_types() {
        assert!(MessageType::SessionState.is_server_only());
        assert!(MessageType::Error.is_server_only());
        assert!(!MessageType::Move.is_server_only());
    }
}
