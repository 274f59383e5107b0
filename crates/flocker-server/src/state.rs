use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::RwLock;

use crate::config::ServerConfig;
use crate::persistence::RecordSink;
use crate::room_manager::RoomManager;
use crate::scheduler::SurveyLimits;

pub type SharedRoomManager = Arc<RwLock<RoomManager>>;

#[derive(Clone)]
pub struct AppState {
    pub rooms: SharedRoomManager,
    pub config: Arc<ServerConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(config: ServerConfig, sink: Arc<dyn RecordSink>) -> Self {
        let survey_limits = SurveyLimits {
            max_completion_code_len: config.limits.max_completion_code_len,
            max_strategy_text_len: config.limits.max_strategy_text_len,
        };
        let rooms = RoomManager::new(config.experiment.clone(), survey_limits, sink);
        Self {
            rooms: Arc::new(RwLock::new(rooms)),
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Counts a live WebSocket connection for as long as it is held.
pub struct ConnectionGuard {
    count: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self { count }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}
