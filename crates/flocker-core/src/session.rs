use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::experiment::Phase;
use crate::participant::{Participant, SessionId};
use crate::zone::{Zone, ZoneId};

/// Shared room state broadcast to every participant after each mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub phase: Phase,
    pub round: u32,
    pub trial: u32,
    pub target_zone_id: Option<ZoneId>,
    /// Epoch milliseconds; 0 until the first trial starts.
    pub trial_start_time: u64,
    pub trial_end_time: u64,
    pub score: u32,
    pub participants: BTreeMap<SessionId, Participant>,
    pub zones: Vec<Zone>,
    pub instruction_text: String,
    pub admin_id: Option<SessionId>,
}

impl SessionState {
    pub fn connected_count(&self) -> usize {
        self.participants.values().filter(|p| p.connected).count()
    }
}
