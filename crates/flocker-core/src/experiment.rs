use serde::{Deserialize, Serialize};

use crate::participant::Position;
use crate::zone::{Zone, default_zones};

/// Session phase. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Lobby,
    Instructions,
    RoundStarting,
    RoundActive,
    RoundEnd,
    ExperimentEnd,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lobby => "lobby",
            Self::Instructions => "instructions",
            Self::RoundStarting => "round_starting",
            Self::RoundActive => "round_active",
            Self::RoundEnd => "round_end",
            Self::ExperimentEnd => "experiment_end",
        }
    }

    /// Whether `next` is an allowed successor of `self`.
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Lobby, Instructions)
                | (Instructions, RoundStarting)
                | (RoundStarting, RoundActive)
                | (RoundActive, RoundEnd)
                | (RoundEnd, RoundStarting)
                | (RoundEnd, Instructions)
                | (Instructions | RoundStarting | RoundActive | RoundEnd, ExperimentEnd)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == Self::ExperimentEnd
    }

    /// Phases in which emotes are accepted.
    pub fn accepts_emotes(self) -> bool {
        matches!(self, Self::Lobby | Self::Instructions | Self::RoundActive)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which participant count triggers the automatic lobby exit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    /// Count participants that declared themselves ready.
    #[default]
    Ready,
    /// Count every connected participant.
    Connected,
}

/// One step of the informed-fraction table: applies from `from_round` onward
/// until a later step takes over.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InformedStep {
    pub from_round: u32,
    pub fraction: f64,
}

pub fn default_informed_fractions() -> Vec<InformedStep> {
    vec![
        InformedStep {
            from_round: 1,
            fraction: 0.10,
        },
        InformedStep {
            from_round: 2,
            fraction: 0.25,
        },
        InformedStep {
            from_round: 3,
            fraction: 0.50,
        },
    ]
}

/// Upper bound for any configured duration (one day).
pub const MAX_DURATION_MS: u64 = 24 * 60 * 60 * 1000;

/// Experiment schedule and room parameters. All durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub total_rounds: u32,
    pub trials_per_round: u32,
    pub trial_duration_ms: u64,
    pub instructions_duration_ms: u64,
    pub post_round_delay_ms: u64,
    pub end_grace_ms: u64,
    pub emote_display_ms: u64,
    pub sample_interval_ms: u64,
    pub reconnect_grace_ms: u64,
    pub min_participants: usize,
    pub max_participants: usize,
    pub start_policy: StartPolicy,
    pub informed_fractions: Vec<InformedStep>,
    pub arena_width: f64,
    pub arena_height: f64,
    pub zones: Vec<Zone>,
    pub lobby_text: String,
    pub instruction_text: String,
    pub end_message: String,
    pub debrief_text: String,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            total_rounds: 3,
            trials_per_round: 5,
            trial_duration_ms: 90_000,
            instructions_duration_ms: 120_000,
            post_round_delay_ms: 5_000,
            end_grace_ms: 15_000,
            emote_display_ms: 1_000,
            sample_interval_ms: 1_000,
            reconnect_grace_ms: 120_000,
            min_participants: 10,
            max_participants: 20,
            start_policy: StartPolicy::Ready,
            informed_fractions: default_informed_fractions(),
            arena_width: 800.0,
            arena_height: 600.0,
            zones: default_zones(),
            lobby_text: "Waiting for players to join...".to_string(),
            instruction_text: "Welcome! In this experiment, you will move your circle using \
                               mouse clicks. Use keys 1-4 (!,+,x,?) to communicate. Your goal \
                               is to move to the correct zone as a group. Some players might \
                               know the target zone."
                .to_string(),
            end_message: "Experiment Complete. Thank you for participating.".to_string(),
            debrief_text: "This was an experiment on collective decision-making. Some \
                           participants were privately told the target zone each round; the \
                           share of informed participants grew from round to round."
                .to_string(),
        }
    }
}

impl ExperimentConfig {
    /// Informed fraction for `round`: the last step whose `from_round` is at or
    /// below the round. Rounds before the first step get 0.
    pub fn informed_fraction(&self, round: u32) -> f64 {
        self.informed_fractions
            .iter()
            .filter(|s| s.from_round <= round)
            .max_by_key(|s| s.from_round)
            .map_or(0.0, |s| s.fraction)
    }

    pub fn arena_center(&self) -> Position {
        Position::new(self.arena_width / 2.0, self.arena_height / 2.0)
    }

    /// Collect every configuration problem. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.total_rounds == 0 {
            problems.push("experiment.total_rounds must be > 0".to_string());
        }
        if self.trials_per_round == 0 {
            problems.push("experiment.trials_per_round must be > 0".to_string());
        }
        if self.trial_duration_ms == 0 {
            problems.push("experiment.trial_duration_ms must be > 0".to_string());
        }
        if self.sample_interval_ms == 0 {
            problems.push("experiment.sample_interval_ms must be > 0".to_string());
        }
        if self.emote_display_ms == 0 {
            problems.push("experiment.emote_display_ms must be > 0".to_string());
        }
        for (name, value) in [
            ("trial_duration_ms", self.trial_duration_ms),
            ("instructions_duration_ms", self.instructions_duration_ms),
            ("post_round_delay_ms", self.post_round_delay_ms),
            ("end_grace_ms", self.end_grace_ms),
            ("emote_display_ms", self.emote_display_ms),
            ("sample_interval_ms", self.sample_interval_ms),
            ("reconnect_grace_ms", self.reconnect_grace_ms),
        ] {
            if value > MAX_DURATION_MS {
                problems.push(format!("experiment.{name} must be <= {MAX_DURATION_MS}"));
            }
        }
        if self.min_participants == 0 {
            problems.push("experiment.min_participants must be > 0".to_string());
        }
        if self.max_participants < self.min_participants {
            problems.push(format!(
                "experiment.max_participants ({}) must be >= min_participants ({})",
                self.max_participants, self.min_participants
            ));
        }
        if self.zones.is_empty() {
            problems.push("experiment.zones must define at least one zone".to_string());
        }
        for zone in &self.zones {
            if !(zone.radius.is_finite() && zone.radius > 0.0) {
                problems.push(format!("zone {} must have a positive radius", zone.id));
            }
        }
        if !(self.arena_width > 0.0 && self.arena_height > 0.0) {
            problems.push("experiment.arena_width and arena_height must be > 0".to_string());
        }
        if self.informed_fractions.is_empty() {
            problems.push("experiment.informed_fractions must not be empty".to_string());
        }
        let mut last: Option<InformedStep> = None;
        for step in &self.informed_fractions {
            if !(0.0..=1.0).contains(&step.fraction) {
                problems.push(format!(
                    "informed fraction for round {} must be within [0, 1]",
                    step.from_round
                ));
            }
            if let Some(prev) = last
                && (step.from_round <= prev.from_round || step.fraction < prev.fraction)
            {
                problems.push(format!(
                    "informed_fractions must be ordered by round with non-decreasing \
                     fractions (step at round {})",
                    step.from_round
                ));
            }
            last = Some(*step);
        }
        problems
    }
}
