use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Reasons a join handshake is refused. The `Display` text is sent to the
/// client in `JoinRoomResponse.error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("Invalid display name")]
    InvalidName,
    #[error("Protocol version mismatch: client={client}, server={server}")]
    ProtocolMismatch { client: u8, server: u8 },
    #[error("Room is full")]
    RoomFull,
    #[error("The experiment has already ended")]
    ExperimentOver,
    #[error("Room unavailable, try again")]
    RoomUnavailable,
}

/// HTTP-facing errors.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    ServiceUnavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
