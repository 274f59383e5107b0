use rand::SeedableRng;
use rand::rngs::StdRng;

use flocker_core::experiment::{ExperimentConfig, Phase, StartPolicy};
use flocker_core::net::messages::{
    ErrorMsg, ExperimentEndInfoMsg, LateJoinInfoMsg, PlayerEmotedMsg, RoundEndInfoMsg,
    ServerMessage,
};
use flocker_core::participant::{Emote, Position, SessionId};
use flocker_core::records::{ConnectionKind, PositionSource};
use flocker_core::session::SessionState;
use flocker_core::zone::{ZoneId, ZoneRegistry};

use crate::error::JoinError;
use crate::persistence::PersistRecord;
use crate::registry::{JoinOutcome, ParticipantRegistry};
use crate::roles::assign_roles;
use crate::timers::{PhaseTag, Timer, TimerKind, TimerQueue};
use crate::trial_log::TrialLogger;

pub const UNAUTHORIZED_START: &str = "You are not authorized to start the experiment.";

/// Commands a joined participant can issue.
#[derive(Debug, Clone, PartialEq)]
pub enum ParticipantCommand {
    Ready,
    SetReady(bool),
    Move { x: f64, y: f64 },
    Emote(Emote),
    Survey {
        completion_code: String,
        strategy_text: String,
    },
    AdminStartGame,
}

/// Side effects produced by the scheduler, drained by the room loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Broadcast(ServerMessage),
    BroadcastExcept {
        except: SessionId,
        message: ServerMessage,
    },
    SendTo {
        session_id: SessionId,
        message: ServerMessage,
    },
    Persist(PersistRecord),
    /// Disconnect everyone; the room is finished.
    CloseAll,
}

/// Join handshake input, already validated by the transport.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub display_name: String,
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinAccepted {
    pub session_id: SessionId,
    pub outcome: JoinOutcome,
    pub is_admin: bool,
}

/// Text limits applied to survey submissions.
#[derive(Debug, Clone, Copy)]
pub struct SurveyLimits {
    pub max_completion_code_len: usize,
    pub max_strategy_text_len: usize,
}

impl Default for SurveyLimits {
    fn default() -> Self {
        Self {
            max_completion_code_len: 64,
            max_strategy_text_len: 4000,
        }
    }
}

/// Authoritative state machine for one experiment room.
///
/// Owns the session state exclusively. Every entry point takes the current
/// time in epoch milliseconds, mutates state, and queues `Outbound` effects;
/// a state snapshot is queued at most once per call. Time only advances
/// through [`Scheduler::advance`].
pub struct Scheduler {
    config: ExperimentConfig,
    survey_limits: SurveyLimits,
    zones: ZoneRegistry,
    registry: ParticipantRegistry,
    logger: TrialLogger,
    timers: TimerQueue,
    rng: StdRng,

    phase: Phase,
    phase_epoch: u64,
    round: u32,
    trial: u32,
    target_zone_id: Option<ZoneId>,
    trial_start_time: u64,
    trial_end_time: u64,
    score: u32,
    instruction_text: String,
    admin_id: Option<SessionId>,

    outbound: Vec<Outbound>,
    dirty: bool,
    closed: bool,
}

impl Scheduler {
    pub fn new(config: ExperimentConfig, survey_limits: SurveyLimits) -> Self {
        Self::with_rng(config, survey_limits, StdRng::from_os_rng())
    }

    pub fn with_rng(config: ExperimentConfig, survey_limits: SurveyLimits, rng: StdRng) -> Self {
        let zones = ZoneRegistry::new(config.zones.clone());
        let registry = ParticipantRegistry::new(config.max_participants);
        let instruction_text = config.lobby_text.clone();
        Self {
            config,
            survey_limits,
            zones,
            registry,
            logger: TrialLogger::new(),
            timers: TimerQueue::new(),
            rng,
            phase: Phase::Lobby,
            phase_epoch: 0,
            round: 1,
            trial: 1,
            target_zone_id: None,
            trial_start_time: 0,
            trial_end_time: 0,
            score: 0,
            instruction_text,
            admin_id: None,
            outbound: Vec::new(),
            dirty: false,
            closed: false,
        }
    }

    // ---- Accessors ----

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn trial(&self) -> u32 {
        self.trial
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn admin_id(&self) -> Option<&str> {
        self.admin_id.as_deref()
    }

    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn connected_count(&self) -> usize {
        self.registry.connected_count()
    }

    /// True once the end-of-experiment grace has elapsed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    pub fn take_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbound)
    }

    /// Current broadcast view of the session.
    pub fn state(&self) -> SessionState {
        SessionState {
            phase: self.phase,
            round: self.round,
            trial: self.trial,
            target_zone_id: self.target_zone_id,
            trial_start_time: self.trial_start_time,
            trial_end_time: self.trial_end_time,
            score: self.score,
            participants: self.registry.snapshot(),
            zones: self.zones.list_zones().to_vec(),
            instruction_text: self.instruction_text.clone(),
            admin_id: self.admin_id.clone(),
        }
    }

    // ---- Entry points ----

    pub fn join(&mut self, request: JoinRequest, now: u64) -> Result<JoinAccepted, JoinError> {
        self.fire_due(now);
        if self.phase.is_terminal() {
            self.flush();
            return Err(JoinError::ExperimentOver);
        }
        let spawn = self.config.arena_center();
        let joined = self.registry.join(
            &request.display_name,
            request.session_id.as_deref(),
            spawn,
            now,
        );
        let (session_id, outcome) = match joined {
            Ok(joined) => joined,
            Err(e) => {
                self.flush();
                return Err(e);
            },
        };

        match outcome {
            JoinOutcome::Joined => {
                self.logger
                    .record_connection(&session_id, ConnectionKind::Join, now);
                tracing::info!(
                    session_id = %session_id,
                    name = %request.display_name,
                    phase = %self.phase,
                    "Participant joined"
                );
            },
            JoinOutcome::Rejoined => {
                self.logger
                    .record_connection(&session_id, ConnectionKind::Reconnect, now);
                tracing::info!(session_id = %session_id, phase = %self.phase, "Participant rejoined");
            },
            JoinOutcome::TookOver => {
                tracing::info!(session_id = %session_id, "Session taken over by new connection");
            },
        }

        if self.admin_id.is_none() {
            tracing::info!(session_id = %session_id, "Admin assigned");
            self.admin_id = Some(session_id.clone());
        }

        if self.phase != Phase::Lobby {
            self.send_late_join_info(&session_id);
        }

        self.dirty = true;
        self.check_start_condition(now);
        self.flush();

        let is_admin = self.admin_id.as_deref() == Some(session_id.as_str());
        Ok(JoinAccepted {
            session_id,
            outcome,
            is_admin,
        })
    }

    pub fn leave(&mut self, session_id: &str, now: u64) {
        self.fire_due(now);
        let Some(seq) = self.registry.leave(session_id, now) else {
            tracing::debug!(session_id, "Leave for unknown or disconnected participant");
            self.flush();
            return;
        };
        self.logger
            .record_connection(session_id, ConnectionKind::Leave, now);
        self.timers.schedule(
            now.saturating_add(self.config.reconnect_grace_ms),
            TimerKind::ReconnectExpiry {
                session_id: session_id.to_string(),
                seq,
            },
            None,
        );
        tracing::info!(session_id, phase = %self.phase, "Participant disconnected");

        if self.admin_id.as_deref() == Some(session_id) {
            self.admin_id = self.registry.first_connected();
            match &self.admin_id {
                Some(next) => tracing::info!(admin = %next, "Admin reassigned"),
                None => tracing::info!("Admin left; no connected participant to promote"),
            }
        }

        self.dirty = true;
        if self.registry.connected_count() == 0
            && !matches!(self.phase, Phase::Lobby | Phase::ExperimentEnd)
        {
            tracing::info!(phase = %self.phase, "No participants remain, ending experiment");
            self.enter_experiment_end(now);
        }
        self.flush();
    }

    pub fn apply(&mut self, session_id: &str, command: ParticipantCommand, now: u64) {
        self.fire_due(now);
        if !self.registry.is_connected(session_id) {
            tracing::debug!(session_id, ?command, "Command from unknown participant ignored");
            self.flush();
            return;
        }
        self.registry.touch(session_id, now);

        match command {
            ParticipantCommand::Ready => self.handle_ready(session_id, true, now),
            ParticipantCommand::SetReady(ready) => self.handle_ready(session_id, ready, now),
            ParticipantCommand::Move { x, y } => self.handle_move(session_id, x, y, now),
            ParticipantCommand::Emote(emote) => self.handle_emote(session_id, emote, now),
            ParticipantCommand::Survey {
                completion_code,
                strategy_text,
            } => self.handle_survey(session_id, &completion_code, &strategy_text, now),
            ParticipantCommand::AdminStartGame => self.handle_admin_start(session_id, now),
        }
        self.flush();
    }

    /// Fire every timer due at or before `now`, in due order. Each timer runs
    /// at its own due time so catch-up after a late wakeup stays consistent.
    pub fn advance(&mut self, now: u64) {
        self.fire_due(now);
        self.flush();
    }

    /// Commands observe every deadline that passed before they arrived.
    fn fire_due(&mut self, now: u64) {
        while let Some((due, timer)) = self.timers.pop_due(now) {
            self.handle_timer(timer, due);
        }
    }

    // ---- Commands ----

    fn handle_ready(&mut self, session_id: &str, ready: bool, now: u64) {
        if self.phase != Phase::Lobby {
            tracing::debug!(session_id, phase = %self.phase, "Ready outside lobby ignored");
            return;
        }
        if self.registry.set_ready(session_id, ready) {
            self.dirty = true;
            self.check_start_condition(now);
        }
    }

    fn handle_move(&mut self, session_id: &str, x: f64, y: f64, now: u64) {
        if self.phase != Phase::RoundActive {
            tracing::trace!(session_id, phase = %self.phase, "Move outside round ignored");
            return;
        }
        let position = Position::new(x, y);
        if !self.registry.move_to(session_id, position) {
            tracing::debug!(session_id, x, y, "Rejected move");
            return;
        }
        let zone = self.zones.zone_at(position.x, position.y);
        self.logger
            .record_position(session_id, position, zone, PositionSource::Move, now);
        self.dirty = true;
    }

    fn handle_emote(&mut self, session_id: &str, emote: Emote, now: u64) {
        if !self.phase.accepts_emotes() {
            tracing::debug!(session_id, phase = %self.phase, "Emote ignored in this phase");
            return;
        }
        let Some(seq) = self.registry.set_emote(session_id, emote) else {
            return;
        };
        self.logger.record_emote(session_id, emote, now);
        if !emote.is_none() {
            self.timers.schedule(
                now.saturating_add(self.config.emote_display_ms),
                TimerKind::EmoteClear {
                    session_id: session_id.to_string(),
                    seq,
                },
                None,
            );
        }
        self.outbound.push(Outbound::BroadcastExcept {
            except: session_id.to_string(),
            message: ServerMessage::PlayerEmoted(PlayerEmotedMsg {
                participant_id: session_id.to_string(),
                emote,
            }),
        });
        self.dirty = true;
    }

    fn handle_survey(&mut self, session_id: &str, code: &str, text: &str, now: u64) {
        let code = code.trim();
        if code.chars().count() > self.survey_limits.max_completion_code_len
            || text.chars().count() > self.survey_limits.max_strategy_text_len
        {
            tracing::debug!(session_id, "Survey exceeds length limits, ignored");
            return;
        }
        match self.logger.record_survey(session_id, code, text, now) {
            Some(survey) => {
                tracing::info!(session_id, "Survey received");
                self.outbound
                    .push(Outbound::Persist(PersistRecord::Survey(survey)));
            },
            None => tracing::debug!(session_id, "Duplicate survey ignored"),
        }
    }

    fn handle_admin_start(&mut self, session_id: &str, now: u64) {
        if self.admin_id.as_deref() != Some(session_id) {
            tracing::warn!(session_id, "Unauthorized start request");
            self.outbound.push(Outbound::SendTo {
                session_id: session_id.to_string(),
                message: ServerMessage::Error(ErrorMsg {
                    message: UNAUTHORIZED_START.to_string(),
                }),
            });
            return;
        }
        if self.phase != Phase::Lobby || self.registry.connected_count() == 0 {
            tracing::debug!(session_id, phase = %self.phase, "Start request ignored");
            return;
        }
        tracing::info!(session_id, "Admin started the experiment");
        self.enter_instructions(now);
    }

    // ---- Timers ----

    fn handle_timer(&mut self, timer: Timer, due: u64) {
        if let Some(tag) = timer.tag
            && (tag.epoch != self.phase_epoch || tag.phase != self.phase)
        {
            tracing::trace!(?tag, phase = %self.phase, "Stale phase timer ignored");
            return;
        }

        match timer.kind {
            TimerKind::PhaseDeadline => match self.phase {
                Phase::Instructions => self.start_trial(due),
                Phase::RoundActive => self.end_trial(due),
                Phase::RoundEnd => self.after_trial(due),
                Phase::ExperimentEnd => {
                    tracing::info!("End grace elapsed, closing room");
                    self.closed = true;
                    self.outbound.push(Outbound::CloseAll);
                },
                Phase::Lobby | Phase::RoundStarting => {},
            },
            TimerKind::Sample => {
                for p in self.registry.participants().filter(|p| p.connected) {
                    let zone = self.zones.zone_at(p.position.x, p.position.y);
                    self.logger.record_position(
                        &p.id,
                        p.position,
                        zone,
                        PositionSource::Sample,
                        due,
                    );
                }
                self.timers.schedule(
                    due.saturating_add(self.config.sample_interval_ms),
                    TimerKind::Sample,
                    timer.tag,
                );
            },
            TimerKind::EmoteClear { session_id, seq } => {
                if self.registry.clear_emote_if_current(&session_id, seq) {
                    self.dirty = true;
                }
            },
            TimerKind::ReconnectExpiry { session_id, seq } => {
                if self.registry.purge_if_stale(&session_id, seq) {
                    self.logger
                        .record_connection(&session_id, ConnectionKind::Purge, due);
                    tracing::info!(session_id = %session_id, "Reconnection grace expired, record purged");
                    self.dirty = true;
                }
            },
        }
    }

    // ---- Transitions ----

    fn transition(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal transition {} -> {}",
            self.phase,
            next
        );
        let cancelled = self.timers.cancel_phase_timers();
        self.phase_epoch += 1;
        tracing::info!(
            from = %self.phase,
            to = %next,
            round = self.round,
            trial = self.trial,
            cancelled_timers = cancelled,
            "Phase transition"
        );
        self.phase = next;
        self.dirty = true;
    }

    fn current_tag(&self) -> Option<PhaseTag> {
        Some(PhaseTag {
            phase: self.phase,
            epoch: self.phase_epoch,
        })
    }

    fn schedule_phase_deadline(&mut self, due: u64) {
        let tag = self.current_tag();
        self.timers.schedule(due, TimerKind::PhaseDeadline, tag);
    }

    fn check_start_condition(&mut self, now: u64) {
        if self.phase != Phase::Lobby {
            return;
        }
        let count = match self.config.start_policy {
            StartPolicy::Ready => self.registry.ready_count(),
            StartPolicy::Connected => self.registry.connected_count(),
        };
        if count > 0 && count >= self.config.min_participants {
            tracing::info!(count, policy = ?self.config.start_policy, "Start condition met");
            self.enter_instructions(now);
        }
    }

    /// Lobby exit starts round 1; later entries come from `after_trial`, which
    /// has already advanced the round.
    fn enter_instructions(&mut self, now: u64) {
        if self.phase == Phase::Lobby {
            self.round = 1;
            self.trial = 1;
            self.score = 0;
        }
        self.transition(Phase::Instructions);
        self.instruction_text = self.config.instruction_text.clone();
        self.target_zone_id = None;
        self.schedule_phase_deadline(now.saturating_add(self.config.instructions_duration_ms));
    }

    fn start_trial(&mut self, now: u64) {
        self.transition(Phase::RoundStarting);
        self.registry.reset_positions(self.config.arena_center());

        if self.trial == 1 {
            let candidates = self.registry.connected_ids();
            let fraction = self.config.informed_fraction(self.round);
            let informed = assign_roles(&mut self.rng, fraction, &candidates);
            tracing::info!(
                round = self.round,
                eligible = candidates.len(),
                informed = informed.len(),
                "Roles assigned"
            );
            self.registry.set_informed(&informed);
        }

        self.target_zone_id = self.zones.random_zone(&mut self.rng);
        self.trial_start_time = now;
        self.trial_end_time = now.saturating_add(self.config.trial_duration_ms);
        let informed_ids: Vec<SessionId> = self
            .registry
            .participants()
            .filter(|p| p.is_informed)
            .map(|p| p.id.clone())
            .collect();
        self.logger.open_trial(
            self.round,
            self.trial,
            self.target_zone_id,
            informed_ids,
            now,
        );

        self.transition(Phase::RoundActive);
        self.schedule_phase_deadline(self.trial_end_time);
        let tag = self.current_tag();
        self.timers.schedule(
            now.saturating_add(self.config.sample_interval_ms),
            TimerKind::Sample,
            tag,
        );
        tracing::info!(
            round = self.round,
            trial = self.trial,
            target = ?self.target_zone_id,
            "Trial started"
        );
    }

    fn trial_score(&self) -> u32 {
        self.target_zone_id
            .and_then(|id| self.zones.get(id))
            .map_or(0, |zone| self.registry.count_in_zone(zone))
    }

    fn end_trial(&mut self, now: u64) {
        self.transition(Phase::RoundEnd);
        let trial_score = self.trial_score();
        self.score += trial_score;
        if let Some(record) = self.logger.seal_trial(now, trial_score) {
            self.outbound
                .push(Outbound::Persist(PersistRecord::Trial(record)));
        }
        tracing::info!(
            round = self.round,
            trial = self.trial,
            trial_score,
            total = self.score,
            "Trial ended"
        );
        self.outbound
            .push(Outbound::Broadcast(ServerMessage::RoundEndInfo(
                RoundEndInfoMsg {
                    round: self.round,
                    trial: self.trial,
                    round_score: trial_score,
                    total_score: self.score,
                    target_zone_id: self.target_zone_id,
                    participants_in_target_zone: trial_score,
                },
            )));
        self.schedule_phase_deadline(now.saturating_add(self.config.post_round_delay_ms));
    }

    fn after_trial(&mut self, now: u64) {
        if self.trial < self.config.trials_per_round {
            self.trial += 1;
            self.start_trial(now);
        } else if self.round < self.config.total_rounds {
            self.round += 1;
            self.trial = 1;
            self.enter_instructions(now);
        } else {
            self.enter_experiment_end(now);
        }
    }

    fn enter_experiment_end(&mut self, now: u64) {
        if self.phase.is_terminal() {
            return;
        }
        // A trial cut short is still recorded, without counting toward the total
        if self.logger.is_open() {
            let partial = self.trial_score();
            if let Some(record) = self.logger.seal_trial(now, partial) {
                self.outbound
                    .push(Outbound::Persist(PersistRecord::Trial(record)));
            }
        }
        self.transition(Phase::ExperimentEnd);
        self.outbound
            .push(Outbound::Broadcast(ServerMessage::ExperimentEndInfo(
                ExperimentEndInfoMsg {
                    final_score: self.score,
                    total_rounds: self.config.total_rounds,
                    message: self.config.end_message.clone(),
                    debrief: self.config.debrief_text.clone(),
                },
            )));
        self.schedule_phase_deadline(now.saturating_add(self.config.end_grace_ms));
    }

    fn send_late_join_info(&mut self, session_id: &str) {
        let Some(p) = self.registry.get(session_id) else {
            return;
        };
        let is_informed = p.is_informed;
        self.outbound.push(Outbound::SendTo {
            session_id: session_id.to_string(),
            message: ServerMessage::LateJoinInfo(LateJoinInfoMsg {
                phase: self.phase,
                round: self.round,
                trial: self.trial,
                trial_end_time: self.trial_end_time,
                target_zone_id: if is_informed {
                    self.target_zone_id
                } else {
                    None
                },
                score: self.score,
                is_informed,
            }),
        });
    }

    /// Queue one snapshot if anything changed since the last flush.
    fn flush(&mut self) {
        if self.dirty {
            self.dirty = false;
            let state = self.state();
            self.outbound
                .push(Outbound::Broadcast(ServerMessage::SessionState(Box::new(
                    state,
                ))));
        }
    }
}
