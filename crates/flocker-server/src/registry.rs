use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use flocker_core::participant::{Emote, Participant, Position, SessionId, pick_color};
use flocker_core::zone::Zone;

use crate::error::JoinError;

/// How a join was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Fresh record with a newly issued session id.
    Joined,
    /// A disconnected record within its grace window was restored.
    Rejoined,
    /// The session was still connected; the new connection replaces it.
    TookOver,
}

/// Participant record plus bookkeeping the broadcast view does not carry.
#[derive(Debug, Clone)]
struct Entry {
    participant: Participant,
    join_seq: u64,
    /// Bumped on every disconnect and reconnect; stale purge timers carry an
    /// older value.
    departure_seq: u64,
    /// Bumped on every emote change; stale clear timers carry an older value.
    emote_seq: u64,
}

/// Connected and recently disconnected participants of one room.
#[derive(Debug)]
pub struct ParticipantRegistry {
    entries: BTreeMap<SessionId, Entry>,
    next_join_seq: u64,
    max_participants: usize,
}

impl ParticipantRegistry {
    pub fn new(max_participants: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            next_join_seq: 0,
            max_participants,
        }
    }

    /// Join with an optional session id to resume. Unknown or purged ids fall
    /// through to a fresh join with a new id.
    pub fn join(
        &mut self,
        display_name: &str,
        session_id: Option<&str>,
        spawn: Position,
        now: u64,
    ) -> Result<(SessionId, JoinOutcome), JoinError> {
        if let Some(id) = session_id
            && let Some(entry) = self.entries.get_mut(id)
        {
            let p = &mut entry.participant;
            p.last_active_at = now;
            if p.connected {
                return Ok((p.id.clone(), JoinOutcome::TookOver));
            }
            p.connected = true;
            entry.departure_seq += 1;
            return Ok((p.id.clone(), JoinOutcome::Rejoined));
        }

        if self.entries.len() >= self.max_participants {
            return Err(JoinError::RoomFull);
        }

        let id = Uuid::new_v4().to_string();
        let join_seq = self.next_join_seq;
        self.next_join_seq += 1;
        let color = {
            let used: Vec<&str> = self
                .entries
                .values()
                .map(|e| e.participant.color.as_str())
                .collect();
            pick_color(&used, join_seq)
        };
        let participant = Participant {
            id: id.clone(),
            display_name: display_name.to_string(),
            color,
            is_informed: false,
            position: spawn,
            current_emote: Emote::None,
            connected: true,
            last_active_at: now,
            ready: false,
        };
        self.entries.insert(
            id.clone(),
            Entry {
                participant,
                join_seq,
                departure_seq: 0,
                emote_seq: 0,
            },
        );
        Ok((id, JoinOutcome::Joined))
    }

    /// Mark a participant disconnected. Returns the departure sequence to hand
    /// to the purge timer, or `None` if unknown or already disconnected.
    pub fn leave(&mut self, id: &str, now: u64) -> Option<u64> {
        let entry = self.entries.get_mut(id)?;
        if !entry.participant.connected {
            return None;
        }
        entry.participant.connected = false;
        entry.participant.ready = false;
        entry.participant.last_active_at = now;
        entry.departure_seq += 1;
        Some(entry.departure_seq)
    }

    /// Remove a record whose grace window expired, unless it reconnected (or
    /// left again) since `seq` was issued.
    pub fn purge_if_stale(&mut self, id: &str, seq: u64) -> bool {
        let stale = self
            .entries
            .get(id)
            .is_some_and(|e| !e.participant.connected && e.departure_seq == seq);
        if stale {
            self.entries.remove(id);
        }
        stale
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.entries.get(id).map(|e| &e.participant)
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.get(id).is_some_and(|p| p.connected)
    }

    pub fn touch(&mut self, id: &str, now: u64) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.participant.last_active_at = now;
        }
    }

    /// Rejects disconnected participants and non-finite coordinates.
    pub fn move_to(&mut self, id: &str, position: Position) -> bool {
        if !position.is_finite() {
            return false;
        }
        match self.entries.get_mut(id) {
            Some(entry) if entry.participant.connected => {
                entry.participant.position = position;
                true
            },
            _ => false,
        }
    }

    /// Set the current emote. Returns the new emote sequence for the clear
    /// timer.
    pub fn set_emote(&mut self, id: &str, emote: Emote) -> Option<u64> {
        let entry = self.entries.get_mut(id)?;
        if !entry.participant.connected {
            return None;
        }
        entry.participant.current_emote = emote;
        entry.emote_seq += 1;
        Some(entry.emote_seq)
    }

    /// Clear the emote only if it has not changed since `seq`.
    pub fn clear_emote_if_current(&mut self, id: &str, seq: u64) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) if entry.emote_seq == seq && !entry.participant.current_emote.is_none() => {
                entry.participant.current_emote = Emote::None;
                entry.emote_seq += 1;
                true
            },
            _ => false,
        }
    }

    /// Returns true when the flag changed.
    pub fn set_ready(&mut self, id: &str, ready: bool) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) if entry.participant.connected && entry.participant.ready != ready => {
                entry.participant.ready = ready;
                true
            },
            _ => false,
        }
    }

    /// Round-start reset: every record back to `spawn`, emotes cleared.
    pub fn reset_positions(&mut self, spawn: Position) {
        for entry in self.entries.values_mut() {
            entry.participant.position = spawn;
            if !entry.participant.current_emote.is_none() {
                entry.participant.current_emote = Emote::None;
                entry.emote_seq += 1;
            }
        }
    }

    /// Reset every record to uninformed, then flag `informed`.
    pub fn set_informed(&mut self, informed: &BTreeSet<SessionId>) {
        for (id, entry) in &mut self.entries {
            entry.participant.is_informed = informed.contains(id);
        }
    }

    /// Connected session ids in join order.
    pub fn connected_ids(&self) -> Vec<SessionId> {
        let mut connected: Vec<&Entry> = self
            .entries
            .values()
            .filter(|e| e.participant.connected)
            .collect();
        connected.sort_by_key(|e| e.join_seq);
        connected
            .into_iter()
            .map(|e| e.participant.id.clone())
            .collect()
    }

    /// Earliest-joined connected participant, used for admin handover.
    pub fn first_connected(&self) -> Option<SessionId> {
        self.entries
            .values()
            .filter(|e| e.participant.connected)
            .min_by_key(|e| e.join_seq)
            .map(|e| e.participant.id.clone())
    }

    pub fn connected_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.participant.connected)
            .count()
    }

    pub fn ready_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.participant.connected && e.participant.ready)
            .count()
    }

    /// Records (connected or within grace) whose last position is inside `zone`.
    pub fn count_in_zone(&self, zone: &Zone) -> u32 {
        self.entries
            .values()
            .filter(|e| zone.contains(e.participant.position.x, e.participant.position.y))
            .count() as u32
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.entries.values().map(|e| &e.participant)
    }

    pub fn snapshot(&self) -> BTreeMap<SessionId, Participant> {
        self.entries
            .iter()
            .map(|(id, e)| (id.clone(), e.participant.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
