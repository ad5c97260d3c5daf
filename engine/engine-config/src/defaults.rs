//! Default configuration values loaded from config.defaults.toml.
//!
//! The TOML file is embedded at compile time so every binary shares one
//! source of truth for defaults.

use once_cell::sync::Lazy;
use serde::Deserialize;

/// The embedded defaults TOML file (loaded at compile time)
const DEFAULTS_TOML: &str = include_str!("../../../config.defaults.toml");

/// Parsed defaults structure (parsed once at first use)
static DEFAULTS: Lazy<DefaultsConfig> = Lazy::new(|| {
    toml::from_str(DEFAULTS_TOML).expect("config.defaults.toml should be valid TOML")
});

// ============================================================================
// Internal structs for parsing config.defaults.toml
// ============================================================================

#[derive(Debug, Deserialize)]
struct DefaultsConfig {
    common: CommonDefaults,
    model: ModelDefaults,
    training: TrainingDefaults,
    replay: ReplayDefaults,
    exploration: ExplorationDefaults,
    trainer: TrainerDefaults,
    web: WebDefaults,
}

#[derive(Debug, Deserialize)]
struct CommonDefaults {
    data_dir: String,
    log_level: String,
    agent_color: String,
}

#[derive(Debug, Deserialize)]
struct ModelDefaults {
    architecture: String,
    checkpoint_dir: String,
    channels: usize,
    residual_blocks: usize,
}

#[derive(Debug, Deserialize)]
struct TrainingDefaults {
    learning_rate: f64,
    gamma: f64,
    value_loss_coef: f64,
    entropy_coef: f64,
    aux_loss_coef: f64,
    max_grad_norm: f64,
    max_loss_threshold: f64,
    loss_window: usize,
    batch_size: usize,
    interval_secs: u64,
    save_interval: u64,
    max_consecutive_errors: u32,
    prioritized_replay: bool,
    priority_temperature: f64,
    recent_ratio: f64,
    use_curriculum: bool,
}

#[derive(Debug, Deserialize)]
struct ReplayDefaults {
    db_path: String,
    max_games: usize,
}

#[derive(Debug, Deserialize)]
struct ExplorationDefaults {
    base_epsilon: f64,
    min_epsilon: f64,
    max_epsilon: f64,
    decay_rate: f64,
    win_rate_window: usize,
}

#[derive(Debug, Deserialize)]
struct TrainerDefaults {
    health_port: u16,
    stats_path: String,
}

#[derive(Debug, Deserialize)]
struct WebDefaults {
    host: String,
    port: u16,
    allowed_origins: Vec<String>,
    embedded_training: bool,
    model_poll_secs: u64,
}

// ============================================================================
// Public accessor functions
// ============================================================================

// Common
pub fn data_dir() -> &'static str {
    &DEFAULTS.common.data_dir
}
pub fn log_level() -> &'static str {
    &DEFAULTS.common.log_level
}
pub fn agent_color() -> &'static str {
    &DEFAULTS.common.agent_color
}

// Model
pub fn architecture() -> &'static str {
    &DEFAULTS.model.architecture
}
pub fn checkpoint_dir() -> &'static str {
    &DEFAULTS.model.checkpoint_dir
}
pub fn channels() -> usize {
    DEFAULTS.model.channels
}
pub fn residual_blocks() -> usize {
    DEFAULTS.model.residual_blocks
}

// Training
pub fn learning_rate() -> f64 {
    DEFAULTS.training.learning_rate
}
pub fn gamma() -> f64 {
    DEFAULTS.training.gamma
}
pub fn value_loss_coef() -> f64 {
    DEFAULTS.training.value_loss_coef
}
pub fn entropy_coef() -> f64 {
    DEFAULTS.training.entropy_coef
}
pub fn aux_loss_coef() -> f64 {
    DEFAULTS.training.aux_loss_coef
}
pub fn max_grad_norm() -> f64 {
    DEFAULTS.training.max_grad_norm
}
pub fn max_loss_threshold() -> f64 {
    DEFAULTS.training.max_loss_threshold
}
pub fn loss_window() -> usize {
    DEFAULTS.training.loss_window
}
pub fn batch_size() -> usize {
    DEFAULTS.training.batch_size
}
pub fn interval_secs() -> u64 {
    DEFAULTS.training.interval_secs
}
pub fn save_interval() -> u64 {
    DEFAULTS.training.save_interval
}
pub fn max_consecutive_errors() -> u32 {
    DEFAULTS.training.max_consecutive_errors
}
pub fn prioritized_replay() -> bool {
    DEFAULTS.training.prioritized_replay
}
pub fn priority_temperature() -> f64 {
    DEFAULTS.training.priority_temperature
}
pub fn recent_ratio() -> f64 {
    DEFAULTS.training.recent_ratio
}
pub fn use_curriculum() -> bool {
    DEFAULTS.training.use_curriculum
}

// Replay
pub fn db_path() -> &'static str {
    &DEFAULTS.replay.db_path
}
pub fn max_games() -> usize {
    DEFAULTS.replay.max_games
}

// Exploration
pub fn base_epsilon() -> f64 {
    DEFAULTS.exploration.base_epsilon
}
pub fn min_epsilon() -> f64 {
    DEFAULTS.exploration.min_epsilon
}
pub fn max_epsilon() -> f64 {
    DEFAULTS.exploration.max_epsilon
}
pub fn decay_rate() -> f64 {
    DEFAULTS.exploration.decay_rate
}
pub fn win_rate_window() -> usize {
    DEFAULTS.exploration.win_rate_window
}

// Trainer
pub fn health_port() -> u16 {
    DEFAULTS.trainer.health_port
}
pub fn stats_path() -> &'static str {
    &DEFAULTS.trainer.stats_path
}

// Web
pub fn host() -> &'static str {
    &DEFAULTS.web.host
}
pub fn port() -> u16 {
    DEFAULTS.web.port
}
pub fn allowed_origins() -> &'static [String] {
    &DEFAULTS.web.allowed_origins
}
pub fn embedded_training() -> bool {
    DEFAULTS.web.embedded_training
}
pub fn model_poll_secs() -> u64 {
    DEFAULTS.web.model_poll_secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse() {
        assert_eq!(data_dir(), "./data");
        assert_eq!(log_level(), "info");
        assert_eq!(agent_color(), "black");
    }

    #[test]
    fn test_training_defaults() {
        assert!((learning_rate() - 0.0001).abs() < f64::EPSILON);
        assert!((gamma() - 0.99).abs() < f64::EPSILON);
        assert!((max_grad_norm() - 0.5).abs() < f64::EPSILON);
        assert_eq!(loss_window(), 100);
        assert_eq!(max_consecutive_errors(), 5);
        assert_eq!(interval_secs(), 60);
    }

    #[test]
    fn test_exploration_defaults() {
        assert!((base_epsilon() - 0.1).abs() < f64::EPSILON);
        assert!((min_epsilon() - 0.01).abs() < f64::EPSILON);
        assert!((max_epsilon() - 0.3).abs() < f64::EPSILON);
        assert_eq!(win_rate_window(), 50);
    }

    #[test]
    fn test_web_defaults() {
        assert_eq!(port(), 8000);
        assert!(!allowed_origins().is_empty());
        assert!(embedded_training());
    }
}
