use serde::Deserialize;

use flocker_core::experiment::{ExperimentConfig, StartPolicy};

/// Config file looked up in the working directory unless `FLOCKER_CONFIG` is set.
pub const DEFAULT_CONFIG_PATH: &str = "flocker.toml";

/// Top-level server configuration, loaded from `flocker.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub web_root: String,
    /// Directory receiving trial and survey records.
    pub data_dir: String,
    /// Forces `min_participants = 1` so a single tester can run the schedule.
    pub debug_mode: bool,
    pub experiment: ExperimentConfig,
    pub limits: LimitsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:2567".to_string(),
            web_root: "web".to_string(),
            data_dir: "data".to_string(),
            debug_mode: false,
            experiment: ExperimentConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    pub ws_rate_limit_per_sec: f64,
    pub player_message_buffer: usize,
    /// Survey completion code cap, in characters.
    pub max_completion_code_len: usize,
    /// Survey free-text cap, in characters.
    pub max_strategy_text_len: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 100,
            ws_rate_limit_per_sec: 50.0,
            player_message_buffer: 256,
            max_completion_code_len: 64,
            max_strategy_text_len: 4000,
        }
    }
}

impl ServerConfig {
    /// Collect every configuration problem. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            problems.push(format!(
                "listen_addr '{}' is not a valid socket address",
                self.listen_addr
            ));
        }
        if self.data_dir.trim().is_empty() {
            problems.push("data_dir must not be empty".to_string());
        }
        if self.limits.max_ws_connections == 0 {
            problems.push("limits.max_ws_connections must be > 0".to_string());
        }
        if self.limits.ws_rate_limit_per_sec <= 0.0 {
            problems.push("limits.ws_rate_limit_per_sec must be > 0".to_string());
        }
        if self.limits.player_message_buffer == 0 {
            problems.push("limits.player_message_buffer must be > 0".to_string());
        }
        if self.limits.max_ws_connections < self.experiment.max_participants {
            tracing::warn!(
                max_ws = self.limits.max_ws_connections,
                max_participants = self.experiment.max_participants,
                "max_ws_connections is below max_participants"
            );
        }
        problems.extend(self.experiment.validate());
        problems
    }

    /// Load config from `flocker.toml` (or `$FLOCKER_CONFIG`) if it exists, then
    /// apply env var overrides.
    pub fn load() -> Self {
        let path =
            std::env::var("FLOCKER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!(path = %path, "Loaded configuration");
                    cfg
                },
                Err(e) => {
                    tracing::warn!(path = %path, "Failed to parse config: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!(path = %path, "No config file found, using defaults");
                ServerConfig::default()
            },
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.apply_debug_mode();
        config
    }

    /// Apply `FLOCKER_*` overrides from `lookup`. Empty or unparsable values
    /// are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(addr) = get("FLOCKER_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(root) = get("FLOCKER_WEB_ROOT") {
            self.web_root = root;
        }
        if let Some(dir) = get("FLOCKER_DATA_DIR") {
            self.data_dir = dir;
        }
        if let Some(val) = get("FLOCKER_DEBUG_MODE") {
            self.debug_mode = matches!(val.as_str(), "1" | "true" | "yes");
        }

        // Experiment overrides
        if let Some(val) = get("FLOCKER_MIN_PARTICIPANTS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.experiment.min_participants = n;
        }
        if let Some(val) = get("FLOCKER_MAX_PARTICIPANTS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.experiment.max_participants = n;
        }
        if let Some(val) = get("FLOCKER_TOTAL_ROUNDS")
            && let Ok(n) = val.parse::<u32>()
        {
            self.experiment.total_rounds = n;
        }
        if let Some(val) = get("FLOCKER_TRIALS_PER_ROUND")
            && let Ok(n) = val.parse::<u32>()
        {
            self.experiment.trials_per_round = n;
        }
        if let Some(val) = get("FLOCKER_TRIAL_DURATION_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.experiment.trial_duration_ms = n;
        }
        if let Some(val) = get("FLOCKER_START_POLICY") {
            match val.as_str() {
                "ready" => self.experiment.start_policy = StartPolicy::Ready,
                "connected" => self.experiment.start_policy = StartPolicy::Connected,
                other => tracing::warn!(value = other, "Unknown FLOCKER_START_POLICY, ignoring"),
            }
        }

        // Limits overrides
        if let Some(val) = get("FLOCKER_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.limits.max_ws_connections = n;
        }
        if let Some(val) = get("FLOCKER_WS_RATE_LIMIT")
            && let Ok(n) = val.parse::<f64>()
        {
            self.limits.ws_rate_limit_per_sec = n;
        }
    }

    /// Debug mode lets a single participant start the experiment.
    pub fn apply_debug_mode(&mut self) {
        if self.debug_mode {
            tracing::warn!("Debug mode enabled: min_participants forced to 1");
            self.experiment.min_participants = 1;
        }
    }
}
