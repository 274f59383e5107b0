pub mod config;
pub mod error;
pub mod health;
pub mod persistence;
pub mod registry;
pub mod roles;
pub mod room_loop;
pub mod room_manager;
pub mod scheduler;
pub mod state;
pub mod timers;
pub mod trial_log;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use tower_http::services::ServeDir;

use config::ServerConfig;
use persistence::{FileRecordSink, RecordSink};
use state::AppState;

/// Build the Axum router and application state from a config. Records are
/// written under `config.data_dir`.
pub fn build_app(config: ServerConfig) -> (Router<()>, AppState) {
    let sink = Arc::new(FileRecordSink::new(&config.data_dir));
    build_app_with_sink(config, sink)
}

/// Build the router with a custom record sink.
pub fn build_app_with_sink(
    config: ServerConfig,
    sink: Arc<dyn RecordSink>,
) -> (Router<()>, AppState) {
    let web_root = config.web_root.clone();
    let state = AppState::new(config, sink);

    let app = Router::new()
        .route("/ws", axum::routing::get(ws::ws_handler))
        .route("/health", axum::routing::get(health::health_check))
        .route("/ready", axum::routing::get(health::readiness_check))
        .fallback_service(ServeDir::new(&web_root))
        .with_state(state.clone());

    (app, state)
}
