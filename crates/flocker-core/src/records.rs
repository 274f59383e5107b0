use serde::{Deserialize, Serialize};

use crate::participant::{Emote, SessionId};
use crate::zone::ZoneId;

/// Why a position was logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSource {
    /// A participant's own move command.
    Move,
    /// The periodic sampler.
    Sample,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEvent {
    pub participant_id: SessionId,
    pub x: f64,
    pub y: f64,
    pub timestamp: u64,
    pub source: PositionSource,
    /// Zone containing the position, if any.
    pub zone: Option<ZoneId>,
    pub in_target_zone: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmoteEvent {
    pub participant_id: SessionId,
    pub emote: Emote,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    Join,
    Leave,
    Reconnect,
    /// Reconnection grace expired and the record was dropped.
    Purge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub participant_id: SessionId,
    pub event: ConnectionKind,
    pub timestamp: u64,
}

/// Everything observed during one trial. Sealed once, then persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub round: u32,
    pub trial: u32,
    pub target_zone_id: Option<ZoneId>,
    pub informed_ids: Vec<SessionId>,
    pub position_events: Vec<PositionEvent>,
    pub emote_events: Vec<EmoteEvent>,
    pub connection_events: Vec<ConnectionEvent>,
    pub start_time: u64,
    pub end_time: u64,
    pub score: u32,
}

/// Post-experiment questionnaire answer. One per participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndSurvey {
    pub participant_id: SessionId,
    pub completion_code: String,
    pub strategy_text: String,
    pub submitted_at: u64,
}
