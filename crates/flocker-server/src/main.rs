use tracing_subscriber::EnvFilter;

use flocker_server::build_app;
use flocker_server::config::ServerConfig;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("FLOCKER_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() {
    init_tracing();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Flocker server starting");

    let config = ServerConfig::load();
    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            tracing::error!(%problem, "Invalid configuration");
        }
        std::process::exit(1);
    }

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        tracing::error!(data_dir = %config.data_dir, error = %e, "Cannot create data directory");
        std::process::exit(1);
    }

    let addr = config.listen_addr.clone();
    tracing::info!(
        data_dir = %config.data_dir,
        web_root = %config.web_root,
        min_participants = config.experiment.min_participants,
        total_rounds = config.experiment.total_rounds,
        trials_per_round = config.experiment.trials_per_round,
        "Configuration loaded"
    );
    let (app, state) = build_app(config);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind");
            std::process::exit(1);
        },
    };
    tracing::info!(%addr, "Listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
    }

    state.rooms.write().await.shutdown().await;
    tracing::info!("Flocker server stopped");
}
