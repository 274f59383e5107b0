use std::collections::HashSet;

use flocker_core::participant::{Emote, Position, SessionId};
use flocker_core::records::{
    ConnectionEvent, ConnectionKind, EmoteEvent, EndSurvey, PositionEvent, PositionSource,
    TrialRecord,
};
use flocker_core::zone::ZoneId;

/// Accumulates events for the in-flight trial. Events arriving while no trial
/// is open are dropped.
#[derive(Debug, Default)]
pub struct TrialLogger {
    current: Option<TrialRecord>,
    surveyed: HashSet<SessionId>,
}

impl TrialLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start buffering a new trial. An unsealed previous trial is discarded.
    pub fn open_trial(
        &mut self,
        round: u32,
        trial: u32,
        target_zone_id: Option<ZoneId>,
        informed_ids: Vec<SessionId>,
        start_time: u64,
    ) {
        if let Some(prev) = &self.current {
            tracing::warn!(
                round = prev.round,
                trial = prev.trial,
                "Discarding unsealed trial record"
            );
        }
        self.current = Some(TrialRecord {
            round,
            trial,
            target_zone_id,
            informed_ids,
            position_events: Vec::new(),
            emote_events: Vec::new(),
            connection_events: Vec::new(),
            start_time,
            end_time: start_time,
            score: 0,
        });
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// `zone` is the zone containing `position`; target membership is derived
    /// from the open trial.
    pub fn record_position(
        &mut self,
        participant_id: &str,
        position: Position,
        zone: Option<ZoneId>,
        source: PositionSource,
        timestamp: u64,
    ) {
        if let Some(record) = &mut self.current {
            let in_target_zone = zone.is_some() && zone == record.target_zone_id;
            record.position_events.push(PositionEvent {
                participant_id: participant_id.to_string(),
                x: position.x,
                y: position.y,
                timestamp,
                source,
                zone,
                in_target_zone,
            });
        }
    }

    pub fn record_emote(&mut self, participant_id: &str, emote: Emote, timestamp: u64) {
        if let Some(record) = &mut self.current {
            record.emote_events.push(EmoteEvent {
                participant_id: participant_id.to_string(),
                emote,
                timestamp,
            });
        }
    }

    pub fn record_connection(&mut self, participant_id: &str, event: ConnectionKind, timestamp: u64) {
        if let Some(record) = &mut self.current {
            record.connection_events.push(ConnectionEvent {
                participant_id: participant_id.to_string(),
                event,
                timestamp,
            });
        }
    }

    /// Freeze the in-flight record and clear the buffers.
    pub fn seal_trial(&mut self, end_time: u64, score: u32) -> Option<TrialRecord> {
        let mut record = self.current.take()?;
        record.end_time = end_time;
        record.score = score;
        Some(record)
    }

    /// Accept a participant's survey once. Later submissions return `None`.
    pub fn record_survey(
        &mut self,
        participant_id: &str,
        completion_code: &str,
        strategy_text: &str,
        submitted_at: u64,
    ) -> Option<EndSurvey> {
        if !self.surveyed.insert(participant_id.to_string()) {
            return None;
        }
        Some(EndSurvey {
            participant_id: participant_id.to_string(),
            completion_code: completion_code.to_string(),
            strategy_text: strategy_text.to_string(),
            submitted_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_without_open_trial_are_dropped() {
        let mut log = TrialLogger::new();
        log.record_position("a", Position::new(1.0, 2.0), None, PositionSource::Move, 5);
        log.record_emote("a", Emote::Plus, 5);
        log.record_connection("a", ConnectionKind::Join, 5);
        assert!(!log.is_open());
        assert!(log.seal_trial(10, 0).is_none());
    }

    #[test]
    fn seal_returns_accumulated_events() {
        let mut log = TrialLogger::new();
        log.open_trial(1, 2, Some(ZoneId::East), vec!["a".to_string()], 1_000);
        log.record_position("a", Position::new(1.0, 2.0), None, PositionSource::Move, 1_100);
        log.record_position(
            "b",
            Position::new(3.0, 4.0),
            Some(ZoneId::East),
            PositionSource::Sample,
            1_200,
        );
        log.record_emote("a", Emote::Exclaim, 1_300);
        log.record_connection("b", ConnectionKind::Leave, 1_400);

        let record = log.seal_trial(91_000, 4).unwrap();
        assert_eq!(record.round, 1);
        assert_eq!(record.trial, 2);
        assert_eq!(record.target_zone_id, Some(ZoneId::East));
        assert_eq!(record.informed_ids, vec!["a".to_string()]);
        assert_eq!(record.start_time, 1_000);
        assert_eq!(record.end_time, 91_000);
        assert_eq!(record.score, 4);
        assert_eq!(record.position_events.len(), 2);
        assert_eq!(record.position_events[1].source, PositionSource::Sample);
        assert!(!record.position_events[0].in_target_zone);
        assert_eq!(record.position_events[1].zone, Some(ZoneId::East));
        assert!(record.position_events[1].in_target_zone);
        assert_eq!(record.emote_events.len(), 1);
        assert_eq!(record.connection_events[0].event, ConnectionKind::Leave);
    }

    #[test]
    fn position_outside_target_is_not_flagged() {
        let mut log = TrialLogger::new();
        log.open_trial(1, 1, Some(ZoneId::North), Vec::new(), 0);
        log.record_position(
            "a",
            Position::new(100.0, 300.0),
            Some(ZoneId::West),
            PositionSource::Sample,
            10,
        );
        let record = log.seal_trial(20, 0).unwrap();
        assert_eq!(record.position_events[0].zone, Some(ZoneId::West));
        assert!(!record.position_events[0].in_target_zone);
    }

    #[test]
    fn seal_clears_buffers() {
        let mut log = TrialLogger::new();
        log.open_trial(1, 1, None, Vec::new(), 0);
        log.record_emote("a", Emote::X, 1);
        assert!(log.seal_trial(2, 0).is_some());
        assert!(!log.is_open());
        log.record_emote("a", Emote::X, 3);

        log.open_trial(1, 2, None, Vec::new(), 4);
        let record = log.seal_trial(5, 0).unwrap();
        assert!(record.emote_events.is_empty());
    }

    #[test]
    fn survey_accepted_once_per_participant() {
        let mut log = TrialLogger::new();
        let survey = log.record_survey("a", "CODE1", "stayed put", 77).unwrap();
        assert_eq!(survey.participant_id, "a");
        assert_eq!(survey.completion_code, "CODE1");
        assert_eq!(survey.submitted_at, 77);
        assert!(log.record_survey("a", "CODE2", "changed mind", 78).is_none());
        assert!(log.record_survey("b", "CODE3", "", 79).is_some());
    }
}
