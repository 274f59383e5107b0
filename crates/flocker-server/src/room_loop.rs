use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use flocker_core::experiment::Phase;
use flocker_core::net::messages::ServerMessage;
use flocker_core::net::protocol::encode_server_message;
use flocker_core::participant::SessionId;
use flocker_core::time::now_millis;

use crate::error::JoinError;
use crate::persistence::RecordSink;
use crate::registry::JoinOutcome;
use crate::scheduler::{JoinRequest, Outbound, ParticipantCommand, Scheduler};

/// Per-participant sender for outbound WebSocket binary messages.
/// Bounded so a slow client cannot grow memory without limit.
pub type ParticipantSender = mpsc::Sender<Bytes>;

/// Commands sent from WebSocket handlers to the room loop.
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        request: JoinRequest,
        sender: ParticipantSender,
        reply: oneshot::Sender<Result<JoinTicket, JoinError>>,
    },
    Leave {
        session_id: SessionId,
        connection_id: u64,
    },
    Participant {
        session_id: SessionId,
        connection_id: u64,
        command: ParticipantCommand,
    },
    Stop,
}

/// Handed back to the connection that completed a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTicket {
    pub session_id: SessionId,
    /// Distinguishes this connection from an earlier one for the same session.
    pub connection_id: u64,
    pub is_admin: bool,
    pub rejoined: bool,
}

/// Summary published after every loop iteration, read by health checks.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RoomStatus {
    pub room_id: u64,
    pub phase: Phase,
    pub round: u32,
    pub trial: u32,
    pub score: u32,
    pub connected: usize,
    pub participants: usize,
}

impl RoomStatus {
    fn of(room_id: u64, scheduler: &Scheduler) -> Self {
        Self {
            room_id,
            phase: scheduler.phase(),
            round: scheduler.round(),
            trial: scheduler.trial(),
            score: scheduler.score(),
            connected: scheduler.connected_count(),
            participants: scheduler.registry().len(),
        }
    }
}

pub struct RoomHandle {
    pub room_id: u64,
    pub commands: mpsc::UnboundedSender<RoomCommand>,
    pub status: watch::Receiver<RoomStatus>,
    pub task: JoinHandle<()>,
}

impl RoomHandle {
    /// True once the loop has exited and stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    pub fn status(&self) -> RoomStatus {
        self.status.borrow().clone()
    }
}

struct Connection {
    id: u64,
    sender: ParticipantSender,
}

struct RoomLoop {
    room_id: u64,
    scheduler: Scheduler,
    connections: HashMap<SessionId, Connection>,
    sink: Arc<dyn RecordSink>,
    status: watch::Sender<RoomStatus>,
    next_connection_id: u64,
}

/// Spawn a room loop as a tokio task owning `scheduler`.
pub fn spawn_room(room_id: u64, scheduler: Scheduler, sink: Arc<dyn RecordSink>) -> RoomHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(RoomStatus::of(room_id, &scheduler));

    let room = RoomLoop {
        room_id,
        scheduler,
        connections: HashMap::new(),
        sink,
        status: status_tx,
        next_connection_id: 1,
    };
    let task = tokio::spawn(run_room_loop(room, cmd_rx));
    tracing::info!(room_id, "Room opened");

    RoomHandle {
        room_id,
        commands: cmd_tx,
        status: status_rx,
        task,
    }
}

async fn run_room_loop(mut room: RoomLoop, mut cmd_rx: mpsc::UnboundedReceiver<RoomCommand>) {
    loop {
        let wait = room
            .scheduler
            .next_deadline()
            .map(|due| Duration::from_millis(due.saturating_sub(now_millis())));

        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(RoomCommand::Stop) | None => break,
                    Some(cmd) => room.handle_command(cmd),
                }
            }
            _ = tokio::time::sleep(wait.unwrap_or_default()), if wait.is_some() => {
                room.scheduler.advance(now_millis());
            }
        }

        room.dispatch();
        room.status
            .send_replace(RoomStatus::of(room.room_id, &room.scheduler));
        if room.scheduler.is_closed() {
            break;
        }
    }
    tracing::info!(room_id = room.room_id, "Room closed");
}

impl RoomLoop {
    fn handle_command(&mut self, cmd: RoomCommand) {
        let now = now_millis();
        match cmd {
            RoomCommand::Join {
                request,
                sender,
                reply,
            } => {
                let accepted = match self.scheduler.join(request, now) {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::info!(room_id = self.room_id, error = %e, "Join rejected");
                        let _ = reply.send(Err(e));
                        return;
                    },
                };
                let connection_id = self.next_connection_id;
                self.next_connection_id += 1;
                let ticket = JoinTicket {
                    session_id: accepted.session_id.clone(),
                    connection_id,
                    is_admin: accepted.is_admin,
                    rejoined: accepted.outcome != JoinOutcome::Joined,
                };
                if reply.send(Ok(ticket)).is_err() {
                    // Handshake abandoned before the response went out
                    if accepted.outcome != JoinOutcome::TookOver {
                        self.scheduler.leave(&accepted.session_id, now);
                    }
                    return;
                }
                let previous = self.connections.insert(
                    accepted.session_id.clone(),
                    Connection {
                        id: connection_id,
                        sender,
                    },
                );
                if previous.is_some() {
                    tracing::debug!(
                        session_id = %accepted.session_id,
                        "Previous connection replaced"
                    );
                }
            },
            RoomCommand::Leave {
                session_id,
                connection_id,
            } => {
                if !self.is_current(&session_id, connection_id) {
                    return;
                }
                self.connections.remove(&session_id);
                self.scheduler.leave(&session_id, now);
            },
            RoomCommand::Participant {
                session_id,
                connection_id,
                command,
            } => {
                if self.is_current(&session_id, connection_id) {
                    self.scheduler.apply(&session_id, command, now);
                }
            },
            RoomCommand::Stop => {},
        }
    }

    fn is_current(&self, session_id: &str, connection_id: u64) -> bool {
        self.connections
            .get(session_id)
            .is_some_and(|c| c.id == connection_id)
    }

    fn dispatch(&mut self) {
        for out in self.scheduler.take_outbound() {
            match out {
                Outbound::Broadcast(message) => self.broadcast(&message, None),
                Outbound::BroadcastExcept { except, message } => {
                    self.broadcast(&message, Some(&except));
                },
                Outbound::SendTo {
                    session_id,
                    message,
                } => {
                    if let Some(conn) = self.connections.get(&session_id)
                        && let Some(data) = encode(&message)
                    {
                        deliver(&session_id, conn, data);
                    }
                },
                Outbound::Persist(record) => self.sink.persist(record),
                Outbound::CloseAll => {
                    tracing::info!(
                        room_id = self.room_id,
                        count = self.connections.len(),
                        "Disconnecting all participants"
                    );
                    // Dropping the senders ends each writer task, which closes the socket
                    self.connections.clear();
                },
            }
        }
    }

    /// Encode once and fan out to every connection except `except`.
    fn broadcast(&self, message: &ServerMessage, except: Option<&str>) {
        let Some(data) = encode(message) else {
            return;
        };
        for (session_id, conn) in &self.connections {
            if except == Some(session_id.as_str()) {
                continue;
            }
            deliver(session_id, conn, data.clone());
        }
    }
}

fn encode(message: &ServerMessage) -> Option<Bytes> {
    match encode_server_message(message) {
        Ok(data) => Some(Bytes::from(data)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server message");
            None
        },
    }
}

fn deliver(session_id: &str, conn: &Connection, data: Bytes) {
    if let Err(mpsc::error::TrySendError::Full(_)) = conn.sender.try_send(data) {
        tracing::debug!(session_id, "Outbound buffer full, dropping message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flocker_core::experiment::ExperimentConfig;
    use flocker_core::net::protocol::decode_server_message;
    use flocker_core::test_helpers::fast_config;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use crate::persistence::{MemorySink, PersistRecord};
    use crate::scheduler::SurveyLimits;

    fn quick_config() -> ExperimentConfig {
        ExperimentConfig {
            trial_duration_ms: 150,
            instructions_duration_ms: 50,
            post_round_delay_ms: 50,
            end_grace_ms: 50,
            sample_interval_ms: 40,
            ..fast_config()
        }
    }

    fn spawn(config: ExperimentConfig) -> (RoomHandle, MemorySink) {
        let sink = MemorySink::default();
        let scheduler =
            Scheduler::with_rng(config, SurveyLimits::default(), StdRng::seed_from_u64(7));
        let handle = spawn_room(1, scheduler, Arc::new(sink.clone()));
        (handle, sink)
    }

    async fn join(
        handle: &RoomHandle,
        name: &str,
        session_id: Option<SessionId>,
    ) -> (Result<JoinTicket, JoinError>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(64);
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .commands
            .send(RoomCommand::Join {
                request: JoinRequest {
                    display_name: name.to_string(),
                    session_id,
                },
                sender: tx,
                reply: reply_tx,
            })
            .unwrap();
        (reply_rx.await.unwrap(), rx)
    }

    async fn next_message(rx: &mut mpsc::Receiver<Bytes>) -> ServerMessage {
        let data = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("channel closed");
        decode_server_message(&data).unwrap()
    }

    #[tokio::test]
    async fn join_receives_ticket_and_snapshot() {
        let (handle, _sink) = spawn(ExperimentConfig {
            min_participants: 5,
            ..quick_config()
        });
        let (ticket, mut rx) = join(&handle, "Alice", None).await;
        let ticket = ticket.unwrap();
        assert!(ticket.is_admin);
        assert!(!ticket.rejoined);

        match next_message(&mut rx).await {
            ServerMessage::SessionState(state) => {
                assert_eq!(state.phase, Phase::Lobby);
                assert!(state.participants.contains_key(&ticket.session_id));
            },
            other => panic!("Expected SessionState, got: {other:?}"),
        }

        let _ = handle.commands.send(RoomCommand::Stop);
        let _ = handle.task.await;
    }

    #[tokio::test]
    async fn stale_connection_leave_is_ignored() {
        let (handle, _sink) = spawn(ExperimentConfig {
            min_participants: 5,
            ..quick_config()
        });
        let (first, _rx1) = join(&handle, "Alice", None).await;
        let first = first.unwrap();
        let (second, mut rx2) = join(&handle, "Alice", Some(first.session_id.clone())).await;
        let second = second.unwrap();
        assert_eq!(second.session_id, first.session_id);
        assert!(second.rejoined);
        assert_ne!(second.connection_id, first.connection_id);

        // The replaced connection reports its departure late
        handle
            .commands
            .send(RoomCommand::Leave {
                session_id: first.session_id.clone(),
                connection_id: first.connection_id,
            })
            .unwrap();
        handle
            .commands
            .send(RoomCommand::Participant {
                session_id: second.session_id.clone(),
                connection_id: second.connection_id,
                command: ParticipantCommand::SetReady(true),
            })
            .unwrap();

        loop {
            if let ServerMessage::SessionState(state) = next_message(&mut rx2).await
                && state.participants[&second.session_id].ready
            {
                assert!(state.participants[&second.session_id].connected);
                break;
            }
        }
        let _ = handle.commands.send(RoomCommand::Stop);
        let _ = handle.task.await;
    }

    #[tokio::test]
    async fn emote_not_echoed_to_sender() {
        let (handle, _sink) = spawn(ExperimentConfig {
            min_participants: 5,
            ..quick_config()
        });
        let (a, mut rx_a) = join(&handle, "A", None).await;
        let a = a.unwrap();
        let (_b, mut rx_b) = join(&handle, "B", None).await;
        handle
            .commands
            .send(RoomCommand::Participant {
                session_id: a.session_id.clone(),
                connection_id: a.connection_id,
                command: ParticipantCommand::Emote(flocker_core::participant::Emote::Plus),
            })
            .unwrap();

        let mut saw_emote = false;
        for _ in 0..4 {
            if let ServerMessage::PlayerEmoted(m) = next_message(&mut rx_b).await {
                assert_eq!(m.participant_id, a.session_id);
                saw_emote = true;
                break;
            }
        }
        assert!(saw_emote);

        // A sees snapshots only
        while let Ok(data) = rx_a.try_recv() {
            let msg = decode_server_message(&data).unwrap();
            assert!(!matches!(msg, ServerMessage::PlayerEmoted(_)));
        }
        let _ = handle.commands.send(RoomCommand::Stop);
        let _ = handle.task.await;
    }

    #[tokio::test]
    async fn full_experiment_persists_trials_and_closes() {
        let (handle, sink) = spawn(quick_config());
        let (ticket, mut rx) = join(&handle, "Solo", None).await;
        let ticket = ticket.unwrap();
        handle
            .commands
            .send(RoomCommand::Participant {
                session_id: ticket.session_id.clone(),
                connection_id: ticket.connection_id,
                command: ParticipantCommand::Ready,
            })
            .unwrap();

        let mut round_ends = 0;
        let mut saw_end = false;
        // Runs until CloseAll drops our sender
        while let Ok(Some(data)) = tokio::time::timeout(Duration::from_secs(3), rx.recv()).await {
            match decode_server_message(&data).unwrap() {
                ServerMessage::RoundEndInfo(_) => round_ends += 1,
                ServerMessage::ExperimentEndInfo(info) => {
                    assert_eq!(info.total_rounds, 1);
                    saw_end = true;
                },
                _ => {},
            }
        }
        assert_eq!(round_ends, 2);
        assert!(saw_end);

        tokio::time::timeout(Duration::from_secs(1), handle.task)
            .await
            .expect("room loop should exit")
            .unwrap();
        let trials = sink
            .records()
            .into_iter()
            .filter(|r| matches!(r, PersistRecord::Trial(_)))
            .count();
        assert_eq!(trials, 2);
        assert!(handle.commands.is_closed());
    }

    #[tokio::test]
    async fn join_after_end_is_rejected() {
        let (handle, _sink) = spawn(ExperimentConfig {
            end_grace_ms: 5_000,
            ..quick_config()
        });
        let (ticket, _rx) = join(&handle, "Solo", None).await;
        let ticket = ticket.unwrap();
        handle
            .commands
            .send(RoomCommand::Participant {
                session_id: ticket.session_id.clone(),
                connection_id: ticket.connection_id,
                command: ParticipantCommand::Ready,
            })
            .unwrap();
        handle
            .commands
            .send(RoomCommand::Leave {
                session_id: ticket.session_id.clone(),
                connection_id: ticket.connection_id,
            })
            .unwrap();

        let (result, _rx) = join(&handle, "Late", None).await;
        assert_eq!(result.unwrap_err(), JoinError::ExperimentOver);
        assert_eq!(handle.status().phase, Phase::ExperimentEnd);

        let _ = handle.commands.send(RoomCommand::Stop);
        let _ = handle.task.await;
    }
}
