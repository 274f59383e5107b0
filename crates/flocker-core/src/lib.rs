pub mod experiment;
pub mod net;
pub mod participant;
pub mod records;
pub mod session;
pub mod time;
pub mod zone;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use std::collections::BTreeMap;

    use crate::experiment::{ExperimentConfig, Phase, StartPolicy};
    use crate::participant::{Emote, PALETTE, Participant, Position};
    use crate::session::SessionState;
    use crate::zone::{ZoneId, default_zones};

    /// Create a connected participant at the arena center.
    pub fn make_participant(id: &str, index: usize) -> Participant {
        Participant {
            id: id.to_string(),
            display_name: format!("Participant{}", index + 1),
            color: PALETTE[index % PALETTE.len()].to_string(),
            is_informed: false,
            position: Position::new(400.0, 300.0),
            current_emote: Emote::None,
            connected: true,
            last_active_at: 0,
            ready: false,
        }
    }

    /// Create a mid-round session state with `n` participants (`p1`, `p2`, ...).
    pub fn make_session_state(n: usize) -> SessionState {
        let participants: BTreeMap<_, _> = (0..n)
            .map(|i| {
                let id = format!("p{}", i + 1);
                let p = make_participant(&id, i);
                (id, p)
            })
            .collect();
        SessionState {
            phase: Phase::RoundActive,
            round: 1,
            trial: 1,
            target_zone_id: Some(ZoneId::North),
            trial_start_time: 1_000,
            trial_end_time: 91_000,
            score: 0,
            participants,
            zones: default_zones(),
            instruction_text: String::new(),
            admin_id: Some("p1".to_string()),
        }
    }

    /// Experiment config with short timings for driving the state machine in
    /// tests: one participant starts the lobby, 1 round of 2 trials.
    pub fn fast_config() -> ExperimentConfig {
        ExperimentConfig {
            total_rounds: 1,
            trials_per_round: 2,
            trial_duration_ms: 1_000,
            instructions_duration_ms: 200,
            post_round_delay_ms: 100,
            end_grace_ms: 300,
            emote_display_ms: 1_000,
            sample_interval_ms: 250,
            reconnect_grace_ms: 5_000,
            min_participants: 1,
            max_participants: 20,
            start_policy: StartPolicy::Ready,
            ..ExperimentConfig::default()
        }
    }
}
