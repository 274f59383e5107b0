use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::error::AppError;
use crate::room_loop::RoomStatus;
use crate::state::AppState;

/// Structured health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub connections: ConnectionInfo,
    /// Absent until the first participant opens a room.
    pub room: Option<RoomStatus>,
}

#[derive(Serialize)]
pub struct ConnectionInfo {
    pub websocket: usize,
}

/// Server status, connection count and current room summary as JSON.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let ws = state.ws_connection_count.load(Ordering::Relaxed);
    let room = state.rooms.read().await.status();

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        connections: ConnectionInfo { websocket: ws },
        room,
    })
}

/// Readiness check: records can only be written if the data directory exists.
pub async fn readiness_check(State(state): State<AppState>) -> Result<&'static str, AppError> {
    let dir = &state.config.data_dir;
    match tokio::fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => Ok("ready"),
        Ok(_) => Err(AppError::ServiceUnavailable(format!(
            "data_dir '{dir}' is not a directory"
        ))),
        Err(e) => Err(AppError::ServiceUnavailable(format!(
            "data_dir '{dir}' unavailable: {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flocker_core::experiment::Phase;

    #[test]
    fn health_response_serializes() {
        let resp = HealthResponse {
            status: "healthy",
            version: "0.1.0",
            connections: ConnectionInfo { websocket: 5 },
            room: Some(RoomStatus {
                room_id: 1,
                phase: Phase::RoundActive,
                round: 2,
                trial: 3,
                score: 7,
                connected: 4,
                participants: 5,
            }),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"healthy\""));
        assert!(json.contains("\"websocket\":5"));
        assert!(json.contains("\"phase\":\"round_active\""));
    }

    #[test]
    fn health_response_without_room() {
        let resp = HealthResponse {
            status: "healthy",
            version: "0.1.0",
            connections: ConnectionInfo { websocket: 0 },
            room: None,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"room\":null"));
    }
}
