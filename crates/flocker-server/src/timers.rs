use std::collections::BTreeMap;

use flocker_core::experiment::Phase;
use flocker_core::participant::SessionId;

/// Identifies the phase instance a timer was scheduled in. The epoch is bumped
/// on every transition, so a tag never matches a later visit to the same phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTag {
    pub phase: Phase,
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    /// End of the current phase's fixed duration.
    PhaseDeadline,
    /// Periodic position sampling during `round_active`.
    Sample,
    /// Clear an emote unless it changed since `seq`.
    EmoteClear { session_id: SessionId, seq: u64 },
    /// Purge a disconnected participant unless they came back since `seq`.
    ReconnectExpiry { session_id: SessionId, seq: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timer {
    pub kind: TimerKind,
    /// `Some` for timers owned by a phase; cancelled on every transition.
    pub tag: Option<PhaseTag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TimerId {
    due: u64,
    seq: u64,
}

/// Deadline queue ordered by due time, then scheduling order.
#[derive(Debug, Default)]
pub struct TimerQueue {
    entries: BTreeMap<TimerId, Timer>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due: u64, kind: TimerKind, tag: Option<PhaseTag>) {
        let id = TimerId {
            due,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(id, Timer { kind, tag });
    }

    /// Drop every phase-owned timer. Returns how many were removed.
    pub fn cancel_phase_timers(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, t| t.tag.is_none());
        before - self.entries.len()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.entries.keys().next().map(|id| id.due)
    }

    /// Remove and return the earliest timer due at or before `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<(u64, Timer)> {
        let (&id, _) = self.entries.first_key_value()?;
        if id.due > now {
            return None;
        }
        self.entries.remove(&id).map(|t| (id.due, t))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
