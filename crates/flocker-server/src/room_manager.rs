use std::sync::Arc;

use flocker_core::experiment::ExperimentConfig;

use crate::persistence::RecordSink;
use crate::room_loop::{RoomCommand, RoomHandle, RoomStatus, spawn_room};
use crate::scheduler::{Scheduler, SurveyLimits};

/// Owns the single active experiment room. When a room finishes its end
/// grace and closes, the next join opens a fresh one.
pub struct RoomManager {
    experiment: ExperimentConfig,
    survey_limits: SurveyLimits,
    sink: Arc<dyn RecordSink>,
    current: Option<RoomHandle>,
    next_room_id: u64,
}

impl RoomManager {
    pub fn new(
        experiment: ExperimentConfig,
        survey_limits: SurveyLimits,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            experiment,
            survey_limits,
            sink,
            current: None,
            next_room_id: 1,
        }
    }

    /// The open room, spawning a new one if none is running.
    pub fn room(&mut self) -> &RoomHandle {
        if self.current.as_ref().is_some_and(RoomHandle::is_closed) {
            self.current = None;
        }
        self.current.get_or_insert_with(|| {
            let room_id = self.next_room_id;
            self.next_room_id += 1;
            let scheduler = Scheduler::new(self.experiment.clone(), self.survey_limits);
            spawn_room(room_id, scheduler, Arc::clone(&self.sink))
        })
    }

    /// Status of the current room, if one is open.
    pub fn status(&self) -> Option<RoomStatus> {
        self.current
            .as_ref()
            .filter(|h| !h.is_closed())
            .map(RoomHandle::status)
    }

    /// Stop the current room and wait for its loop to exit.
    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.current.take() {
            let _ = handle.commands.send(RoomCommand::Stop);
            if let Err(e) = handle.task.await {
                tracing::warn!(room_id = handle.room_id, error = %e, "Room task failed");
            }
        }
    }
}
