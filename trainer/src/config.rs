//! Configuration for the trainer process
//!
//! Defaults come from the central config (config.toml plus `DRAUGHTS_*`
//! overrides). Each flag can also be set through its `TRAINER_*` variable or
//! on the command line, which wins.

use anyhow::{anyhow, Result};
use clap::Parser;
use engine_config::{load_config, CentralConfig};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::level_filters::LevelFilter;

static CENTRAL_CONFIG: Lazy<CentralConfig> = Lazy::new(load_config);

fn default_log_level() -> String {
    CENTRAL_CONFIG.common.log_level.clone()
}

fn default_db_path() -> String {
    CENTRAL_CONFIG.replay.db_path.clone()
}

fn default_checkpoint_dir() -> String {
    CENTRAL_CONFIG.model.checkpoint_dir.clone()
}

fn default_architecture() -> String {
    CENTRAL_CONFIG.model.architecture.clone()
}

fn default_batch_size() -> usize {
    CENTRAL_CONFIG.training.batch_size
}

fn default_interval_secs() -> u64 {
    CENTRAL_CONFIG.training.interval_secs
}

fn default_save_interval() -> u64 {
    CENTRAL_CONFIG.training.save_interval
}

fn default_learning_rate() -> f64 {
    CENTRAL_CONFIG.training.learning_rate
}

fn default_prioritized_replay() -> bool {
    CENTRAL_CONFIG.training.prioritized_replay
}

fn default_health_port() -> u16 {
    CENTRAL_CONFIG.trainer.health_port
}

fn default_stats_path() -> String {
    CENTRAL_CONFIG.trainer.stats_path.clone()
}

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "trainer")]
#[command(about = "Online actor-critic trainer for the draughts agent")]
#[command(
    long_about = "Samples transitions recorded by the web service, trains the policy/value
network on a fixed interval and writes checkpoints the web service hot-reloads.

Configuration is loaded from config.toml with environment variable overrides.
CLI arguments take highest priority."
)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TRAINER_LOG_LEVEL", default_value_t = default_log_level())]
    pub log_level: String,

    /// Path to the SQLite experience store
    #[arg(long, env = "TRAINER_DB_PATH", default_value_t = default_db_path())]
    pub db_path: String,

    /// Directory for checkpoints
    #[arg(long, env = "TRAINER_CHECKPOINT_DIR", default_value_t = default_checkpoint_dir())]
    pub checkpoint_dir: String,

    /// Network architecture (baseline or enhanced)
    #[arg(long, env = "TRAINER_ARCHITECTURE", default_value_t = default_architecture())]
    pub architecture: String,

    /// Transitions per training step
    #[arg(long, env = "TRAINER_BATCH_SIZE", default_value_t = default_batch_size())]
    pub batch_size: usize,

    /// Seconds between training iterations
    #[arg(long, env = "TRAINER_INTERVAL_SECS", default_value_t = default_interval_secs())]
    pub interval_secs: u64,

    /// Save a checkpoint every N successful syncs
    #[arg(long, env = "TRAINER_SAVE_INTERVAL", default_value_t = default_save_interval())]
    pub save_interval: u64,

    #[arg(long, env = "TRAINER_LEARNING_RATE", default_value_t = default_learning_rate())]
    pub learning_rate: f64,

    /// Sample by priority instead of the recent/random mix
    #[arg(
        long,
        env = "TRAINER_PRIORITIZED_REPLAY",
        action = clap::ArgAction::Set,
        default_value_t = default_prioritized_replay()
    )]
    pub prioritized_replay: bool,

    /// Port for /health, /ready and /metrics (0 to disable)
    #[arg(long, env = "TRAINER_HEALTH_PORT", default_value_t = default_health_port())]
    pub health_port: u16,

    /// Where the JSON stats snapshot is written
    #[arg(long, env = "TRAINER_STATS_PATH", default_value_t = default_stats_path())]
    pub stats_path: String,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.db_path.is_empty() {
            return Err(anyhow!("db_path cannot be empty"));
        }

        if self.checkpoint_dir.is_empty() {
            return Err(anyhow!("checkpoint_dir cannot be empty"));
        }

        if self.architecture.parse::<learner::Architecture>().is_err() {
            return Err(anyhow!(
                "invalid architecture '{}', expected baseline or enhanced",
                self.architecture
            ));
        }

        if self.batch_size == 0 {
            return Err(anyhow!("batch_size must be greater than 0"));
        }

        if self.interval_secs == 0 {
            return Err(anyhow!("interval_secs must be greater than 0"));
        }

        if self.save_interval == 0 {
            return Err(anyhow!("save_interval must be greater than 0"));
        }

        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(anyhow!("learning_rate must be a positive number"));
        }

        if self.log_level.parse::<LevelFilter>().is_err() {
            return Err(anyhow!(
                "invalid log level '{}', expected one of trace, debug, info, warn, error",
                self.log_level
            ));
        }

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// The central config with this process's overrides applied.
    pub fn central(&self) -> CentralConfig {
        let mut central = CENTRAL_CONFIG.clone();
        central.common.log_level = self.log_level.clone();
        central.replay.db_path = self.db_path.clone();
        central.model.checkpoint_dir = self.checkpoint_dir.clone();
        central.model.architecture = self.architecture.clone();
        central.training.batch_size = self.batch_size;
        central.training.interval_secs = self.interval_secs;
        central.training.save_interval = self.save_interval;
        central.training.learning_rate = self.learning_rate;
        central.training.prioritized_replay = self.prioritized_replay;
        central.trainer.health_port = self.health_port;
        central.trainer.stats_path = self.stats_path.clone();
        central
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            log_level: "info".into(),
            db_path: "./data/replay.db".into(),
            checkpoint_dir: "./data/checkpoints".into(),
            architecture: "enhanced".into(),
            batch_size: 32,
            interval_secs: 60,
            save_interval: 10,
            learning_rate: 1e-4,
            prioritized_replay: true,
            health_port: 8081,
            stats_path: "./data/trainer_stats.json".into(),
        }
    }

    #[test]
    fn validate_accepts_valid_configuration() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_unknown_architecture() {
        let mut cfg = base_config();
        cfg.architecture = "transformer".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("architecture"));
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let mut cfg = base_config();
        cfg.batch_size = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut cfg = base_config();
        cfg.interval_secs = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("interval_secs"));
    }

    #[test]
    fn validate_rejects_bad_learning_rate() {
        let mut cfg = base_config();
        cfg.learning_rate = f64::NAN;
        assert!(cfg.validate().is_err());
        cfg.learning_rate = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut cfg = base_config();
        cfg.log_level = "nope".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("invalid log level"));
    }

    #[test]
    fn central_carries_overrides() {
        let mut cfg = base_config();
        cfg.batch_size = 8;
        cfg.architecture = "baseline".into();
        let central = cfg.central();
        assert_eq!(central.training.batch_size, 8);
        assert_eq!(central.model.architecture, "baseline");
        assert_eq!(central.trainer.health_port, 8081);
    }

    #[test]
    fn interval_returns_correct_duration() {
        assert_eq!(base_config().interval(), Duration::from_secs(60));
    }
}
