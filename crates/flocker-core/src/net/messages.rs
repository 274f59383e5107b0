use serde::{Deserialize, Serialize};

use crate::experiment::Phase;
use crate::participant::{Emote, SessionId};
use crate::session::SessionState;
use crate::zone::ZoneId;

/// Network message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Client -> Server
    JoinRoom = 0x01,
    LeaveRoom = 0x02,
    Ready = 0x03,
    SetReady = 0x04,
    Move = 0x05,
    Emote = 0x06,
    Survey = 0x07,
    AdminStartGame = 0x08,

    // Server -> Client
    JoinRoomResponse = 0x10,
    SessionState = 0x11,
    RoundEndInfo = 0x12,
    ExperimentEndInfo = 0x13,
    PlayerEmoted = 0x14,
    LateJoinInfo = 0x15,
    Error = 0x16,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::JoinRoom),
            0x02 => Some(Self::LeaveRoom),
            0x03 => Some(Self::Ready),
            0x04 => Some(Self::SetReady),
            0x05 => Some(Self::Move),
            0x06 => Some(Self::Emote),
            0x07 => Some(Self::Survey),
            0x08 => Some(Self::AdminStartGame),
            0x10 => Some(Self::JoinRoomResponse),
            0x11 => Some(Self::SessionState),
            0x12 => Some(Self::RoundEndInfo),
            0x13 => Some(Self::ExperimentEndInfo),
            0x14 => Some(Self::PlayerEmoted),
            0x15 => Some(Self::LateJoinInfo),
            0x16 => Some(Self::Error),
            _ => None,
        }
    }

    /// Messages only the server may send.
    pub fn is_server_only(self) -> bool {
        (self as u8) >= 0x10
    }
}

// ---- Client -> Server ----

/// First message on every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRoomMsg {
    pub display_name: String,
    /// Session to resume after a disconnect.
    pub session_id: Option<SessionId>,
    pub protocol_version: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeaveRoomMsg {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadyMsg {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetReadyMsg {
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveMsg {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmoteMsg {
    pub emote: Emote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyMsg {
    pub completion_code: String,
    pub strategy_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdminStartGameMsg {}

// ---- Server -> Client ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRoomResponseMsg {
    pub success: bool,
    pub session_id: Option<SessionId>,
    pub is_admin: bool,
    /// True when an existing session was resumed.
    pub rejoined: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundEndInfoMsg {
    pub round: u32,
    pub trial: u32,
    pub round_score: u32,
    pub total_score: u32,
    pub target_zone_id: Option<ZoneId>,
    pub participants_in_target_zone: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentEndInfoMsg {
    pub final_score: u32,
    pub total_rounds: u32,
    pub message: String,
    pub debrief: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerEmotedMsg {
    pub participant_id: SessionId,
    pub emote: Emote,
}

/// Catch-up info for participants joining after the lobby.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LateJoinInfoMsg {
    pub phase: Phase,
    pub round: u32,
    pub trial: u32,
    pub trial_end_time: u64,
    /// Only present for informed participants.
    pub target_zone_id: Option<ZoneId>,
    pub score: u32,
    pub is_informed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub message: String,
}

/// All messages a client can send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    JoinRoom(JoinRoomMsg),
    LeaveRoom(LeaveRoomMsg),
    Ready(ReadyMsg),
    SetReady(SetReadyMsg),
    Move(MoveMsg),
    Emote(EmoteMsg),
    Survey(SurveyMsg),
    AdminStartGame(AdminStartGameMsg),
}

/// All messages the server can send.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    JoinRoomResponse(JoinRoomResponseMsg),
    SessionState(Box<SessionState>),
    RoundEndInfo(RoundEndInfoMsg),
    ExperimentEndInfo(ExperimentEndInfoMsg),
    PlayerEmoted(PlayerEmotedMsg),
    LateJoinInfo(LateJoinInfoMsg),
    Error(ErrorMsg),
}
