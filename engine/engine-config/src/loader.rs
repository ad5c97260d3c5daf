//! Configuration loading logic.
//!
//! Handles loading config from files and applying environment variable overrides.

use crate::CentralConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Standard locations to search for config.toml
pub const CONFIG_SEARCH_PATHS: &[&str] = &[
    "config.toml",      // Current directory
    "../config.toml",   // Parent directory (when running from a crate directory)
    "/app/config.toml", // Docker container
];

/// Load the central configuration.
///
/// `DRAUGHTS_CONFIG` wins over the search paths. Environment overrides are
/// applied last in every case, including when no file is found.
pub fn load_config() -> CentralConfig {
    if let Ok(path) = std::env::var("DRAUGHTS_CONFIG") {
        let path = PathBuf::from(&path);
        if path.exists() {
            info!("Loading config from DRAUGHTS_CONFIG: {}", path.display());
            return load_from_path(&path);
        }
        warn!(
            "DRAUGHTS_CONFIG={} not found, searching defaults",
            path.display()
        );
    }

    for path_str in CONFIG_SEARCH_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading config from {}", path.display());
            return load_from_path(&path);
        }
    }

    debug!("No config.toml found, using built-in defaults");
    apply_env_overrides(CentralConfig::default())
}

/// Load configuration from a specific path, falling back to defaults on
/// read or parse errors.
pub fn load_from_path(path: &Path) -> CentralConfig {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => apply_env_overrides(config),
            Err(e) => {
                warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                apply_env_overrides(CentralConfig::default())
            }
        },
        Err(e) => {
            warn!("Failed to read {}: {}, using defaults", path.display(), e);
            apply_env_overrides(CentralConfig::default())
        }
    }
}

macro_rules! env_override {
    // String field
    ($config:expr, $section:ident . $field:ident, $key:expr) => {
        if let Ok(v) = std::env::var($key) {
            $config.$section.$field = v;
        }
    };
    // Parseable field (usize, u64, f64, bool, ...)
    ($config:expr, $section:ident . $field:ident, $key:expr, parse) => {
        if let Ok(v) =
            std::env::var($key).and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent))
        {
            $config.$section.$field = v;
        }
    };
    // Comma-separated list
    ($config:expr, $section:ident . $field:ident, $key:expr, list) => {
        if let Ok(v) = std::env::var($key) {
            $config.$section.$field = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    };
}

/// Apply environment variable overrides to a configuration.
///
/// Environment variables follow the pattern: DRAUGHTS_<SECTION>_<KEY>
pub fn apply_env_overrides(mut config: CentralConfig) -> CentralConfig {
    // Common
    env_override!(config, common.data_dir, "DRAUGHTS_COMMON_DATA_DIR");
    env_override!(config, common.log_level, "DRAUGHTS_COMMON_LOG_LEVEL");
    env_override!(config, common.agent_color, "DRAUGHTS_COMMON_AGENT_COLOR");

    // Model
    env_override!(config, model.architecture, "DRAUGHTS_MODEL_ARCHITECTURE");
    env_override!(config, model.checkpoint_dir, "DRAUGHTS_MODEL_CHECKPOINT_DIR");
    env_override!(config, model.channels, "DRAUGHTS_MODEL_CHANNELS", parse);
    env_override!(
        config,
        model.residual_blocks,
        "DRAUGHTS_MODEL_RESIDUAL_BLOCKS",
        parse
    );

    // Training
    env_override!(
        config,
        training.learning_rate,
        "DRAUGHTS_TRAINING_LEARNING_RATE",
        parse
    );
    env_override!(config, training.gamma, "DRAUGHTS_TRAINING_GAMMA", parse);
    env_override!(
        config,
        training.value_loss_coef,
        "DRAUGHTS_TRAINING_VALUE_LOSS_COEF",
        parse
    );
    env_override!(
        config,
        training.entropy_coef,
        "DRAUGHTS_TRAINING_ENTROPY_COEF",
        parse
    );
    env_override!(
        config,
        training.aux_loss_coef,
        "DRAUGHTS_TRAINING_AUX_LOSS_COEF",
        parse
    );
    env_override!(
        config,
        training.max_grad_norm,
        "DRAUGHTS_TRAINING_MAX_GRAD_NORM",
        parse
    );
    env_override!(
        config,
        training.max_loss_threshold,
        "DRAUGHTS_TRAINING_MAX_LOSS_THRESHOLD",
        parse
    );
    env_override!(
        config,
        training.loss_window,
        "DRAUGHTS_TRAINING_LOSS_WINDOW",
        parse
    );
    env_override!(
        config,
        training.batch_size,
        "DRAUGHTS_TRAINING_BATCH_SIZE",
        parse
    );
    env_override!(
        config,
        training.interval_secs,
        "DRAUGHTS_TRAINING_INTERVAL_SECS",
        parse
    );
    env_override!(
        config,
        training.save_interval,
        "DRAUGHTS_TRAINING_SAVE_INTERVAL",
        parse
    );
    env_override!(
        config,
        training.max_consecutive_errors,
        "DRAUGHTS_TRAINING_MAX_CONSECUTIVE_ERRORS",
        parse
    );
    env_override!(
        config,
        training.prioritized_replay,
        "DRAUGHTS_TRAINING_PRIORITIZED_REPLAY",
        parse
    );
    env_override!(
        config,
        training.priority_temperature,
        "DRAUGHTS_TRAINING_PRIORITY_TEMPERATURE",
        parse
    );
    env_override!(
        config,
        training.recent_ratio,
        "DRAUGHTS_TRAINING_RECENT_RATIO",
        parse
    );
    env_override!(
        config,
        training.use_curriculum,
        "DRAUGHTS_TRAINING_USE_CURRICULUM",
        parse
    );

    // Replay
    env_override!(config, replay.db_path, "DRAUGHTS_REPLAY_DB_PATH");
    env_override!(config, replay.max_games, "DRAUGHTS_REPLAY_MAX_GAMES", parse);

    // Exploration
    env_override!(
        config,
        exploration.base_epsilon,
        "DRAUGHTS_EXPLORATION_BASE_EPSILON",
        parse
    );
    env_override!(
        config,
        exploration.min_epsilon,
        "DRAUGHTS_EXPLORATION_MIN_EPSILON",
        parse
    );
    env_override!(
        config,
        exploration.max_epsilon,
        "DRAUGHTS_EXPLORATION_MAX_EPSILON",
        parse
    );
    env_override!(
        config,
        exploration.decay_rate,
        "DRAUGHTS_EXPLORATION_DECAY_RATE",
        parse
    );
    env_override!(
        config,
        exploration.win_rate_window,
        "DRAUGHTS_EXPLORATION_WIN_RATE_WINDOW",
        parse
    );

    // Trainer
    env_override!(
        config,
        trainer.health_port,
        "DRAUGHTS_TRAINER_HEALTH_PORT",
        parse
    );
    env_override!(config, trainer.stats_path, "DRAUGHTS_TRAINER_STATS_PATH");

    // Web
    env_override!(config, web.host, "DRAUGHTS_WEB_HOST");
    env_override!(config, web.port, "DRAUGHTS_WEB_PORT", parse);
    env_override!(
        config,
        web.allowed_origins,
        "DRAUGHTS_WEB_ALLOWED_ORIGINS",
        list
    );
    env_override!(
        config,
        web.embedded_training,
        "DRAUGHTS_WEB_EMBEDDED_TRAINING",
        parse
    );
    env_override!(
        config,
        web.model_poll_secs,
        "DRAUGHTS_WEB_MODEL_POLL_SECS",
        parse
    );

    config
}
