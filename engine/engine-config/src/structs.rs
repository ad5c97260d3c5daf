//! Configuration struct definitions.
//!
//! All config structs with serde deserialization support and default values.

use crate::defaults;
use serde::Deserialize;

// ============================================================================
// Serde default functions (required for #[serde(default = "...")])
// ============================================================================

fn d_data_dir() -> String {
    defaults::data_dir().into()
}
fn d_log_level() -> String {
    defaults::log_level().into()
}
fn d_agent_color() -> String {
    defaults::agent_color().into()
}
fn d_architecture() -> String {
    defaults::architecture().into()
}
fn d_checkpoint_dir() -> String {
    defaults::checkpoint_dir().into()
}
fn d_channels() -> usize {
    defaults::channels()
}
fn d_residual_blocks() -> usize {
    defaults::residual_blocks()
}
fn d_lr() -> f64 {
    defaults::learning_rate()
}
fn d_gamma() -> f64 {
    defaults::gamma()
}
fn d_value_coef() -> f64 {
    defaults::value_loss_coef()
}
fn d_entropy_coef() -> f64 {
    defaults::entropy_coef()
}
fn d_aux_coef() -> f64 {
    defaults::aux_loss_coef()
}
fn d_grad_norm() -> f64 {
    defaults::max_grad_norm()
}
fn d_loss_threshold() -> f64 {
    defaults::max_loss_threshold()
}
fn d_loss_window() -> usize {
    defaults::loss_window()
}
fn d_batch_size() -> usize {
    defaults::batch_size()
}
fn d_interval() -> u64 {
    defaults::interval_secs()
}
fn d_save_interval() -> u64 {
    defaults::save_interval()
}
fn d_max_errors() -> u32 {
    defaults::max_consecutive_errors()
}
fn d_prioritized() -> bool {
    defaults::prioritized_replay()
}
fn d_priority_temp() -> f64 {
    defaults::priority_temperature()
}
fn d_recent_ratio() -> f64 {
    defaults::recent_ratio()
}
fn d_use_curriculum() -> bool {
    defaults::use_curriculum()
}
fn d_db_path() -> String {
    defaults::db_path().into()
}
fn d_max_games() -> usize {
    defaults::max_games()
}
fn d_base_eps() -> f64 {
    defaults::base_epsilon()
}
fn d_min_eps() -> f64 {
    defaults::min_epsilon()
}
fn d_max_eps() -> f64 {
    defaults::max_epsilon()
}
fn d_decay() -> f64 {
    defaults::decay_rate()
}
fn d_win_window() -> usize {
    defaults::win_rate_window()
}
fn d_health_port() -> u16 {
    defaults::health_port()
}
fn d_stats_path() -> String {
    defaults::stats_path().into()
}
fn d_host() -> String {
    defaults::host().into()
}
fn d_port() -> u16 {
    defaults::port()
}
fn d_allowed_origins() -> Vec<String> {
    defaults::allowed_origins().to_vec()
}
fn d_embedded_training() -> bool {
    defaults::embedded_training()
}
fn d_model_poll() -> u64 {
    defaults::model_poll_secs()
}

// ============================================================================
// Config structs
// ============================================================================

/// Root configuration structure matching config.toml
#[derive(Debug, Deserialize, Default, Clone)]
pub struct CentralConfig {
    #[serde(default)]
    pub common: CommonConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub exploration: ExplorationConfig,
    #[serde(default)]
    pub trainer: TrainerConfig,
    #[serde(default)]
    pub web: WebConfig,
}

/// Common configuration shared by all components
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CommonConfig {
    #[serde(default = "d_data_dir")]
    pub data_dir: String,
    #[serde(default = "d_log_level")]
    pub log_level: String,
    #[serde(default = "d_agent_color")]
    pub agent_color: String,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            data_dir: defaults::data_dir().into(),
            log_level: defaults::log_level().into(),
            agent_color: defaults::agent_color().into(),
        }
    }
}

/// Approximator selection and checkpoint location
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    #[serde(default = "d_architecture")]
    pub architecture: String,
    #[serde(default = "d_checkpoint_dir")]
    pub checkpoint_dir: String,
    #[serde(default = "d_channels")]
    pub channels: usize,
    #[serde(default = "d_residual_blocks")]
    pub residual_blocks: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            architecture: defaults::architecture().into(),
            checkpoint_dir: defaults::checkpoint_dir().into(),
            channels: defaults::channels(),
            residual_blocks: defaults::residual_blocks(),
        }
    }
}

/// Actor-critic optimisation and loop cadence
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrainingConfig {
    #[serde(default = "d_lr")]
    pub learning_rate: f64,
    #[serde(default = "d_gamma")]
    pub gamma: f64,
    #[serde(default = "d_value_coef")]
    pub value_loss_coef: f64,
    #[serde(default = "d_entropy_coef")]
    pub entropy_coef: f64,
    #[serde(default = "d_aux_coef")]
    pub aux_loss_coef: f64,
    #[serde(default = "d_grad_norm")]
    pub max_grad_norm: f64,
    #[serde(default = "d_loss_threshold")]
    pub max_loss_threshold: f64,
    #[serde(default = "d_loss_window")]
    pub loss_window: usize,
    #[serde(default = "d_batch_size")]
    pub batch_size: usize,
    #[serde(default = "d_interval")]
    pub interval_secs: u64,
    #[serde(default = "d_save_interval")]
    pub save_interval: u64,
    #[serde(default = "d_max_errors")]
    pub max_consecutive_errors: u32,
    #[serde(default = "d_prioritized")]
    pub prioritized_replay: bool,
    #[serde(default = "d_priority_temp")]
    pub priority_temperature: f64,
    #[serde(default = "d_recent_ratio")]
    pub recent_ratio: f64,
    #[serde(default = "d_use_curriculum")]
    pub use_curriculum: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: defaults::learning_rate(),
            gamma: defaults::gamma(),
            value_loss_coef: defaults::value_loss_coef(),
            entropy_coef: defaults::entropy_coef(),
            aux_loss_coef: defaults::aux_loss_coef(),
            max_grad_norm: defaults::max_grad_norm(),
            max_loss_threshold: defaults::max_loss_threshold(),
            loss_window: defaults::loss_window(),
            batch_size: defaults::batch_size(),
            interval_secs: defaults::interval_secs(),
            save_interval: defaults::save_interval(),
            max_consecutive_errors: defaults::max_consecutive_errors(),
            prioritized_replay: defaults::prioritized_replay(),
            priority_temperature: defaults::priority_temperature(),
            recent_ratio: defaults::recent_ratio(),
            use_curriculum: defaults::use_curriculum(),
        }
    }
}

/// Experience store location and retention
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReplayConfig {
    #[serde(default = "d_db_path")]
    pub db_path: String,
    #[serde(default = "d_max_games")]
    pub max_games: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            db_path: defaults::db_path().into(),
            max_games: defaults::max_games(),
        }
    }
}

/// Adaptive epsilon bounds
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExplorationConfig {
    #[serde(default = "d_base_eps")]
    pub base_epsilon: f64,
    #[serde(default = "d_min_eps")]
    pub min_epsilon: f64,
    #[serde(default = "d_max_eps")]
    pub max_epsilon: f64,
    #[serde(default = "d_decay")]
    pub decay_rate: f64,
    #[serde(default = "d_win_window")]
    pub win_rate_window: usize,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            base_epsilon: defaults::base_epsilon(),
            min_epsilon: defaults::min_epsilon(),
            max_epsilon: defaults::max_epsilon(),
            decay_rate: defaults::decay_rate(),
            win_rate_window: defaults::win_rate_window(),
        }
    }
}

/// Stand-alone trainer process settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrainerConfig {
    #[serde(default = "d_health_port")]
    pub health_port: u16,
    #[serde(default = "d_stats_path")]
    pub stats_path: String,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            health_port: defaults::health_port(),
            stats_path: defaults::stats_path().into(),
        }
    }
}

/// Web server configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WebConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "d_embedded_training")]
    pub embedded_training: bool,
    #[serde(default = "d_model_poll")]
    pub model_poll_secs: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: defaults::host().into(),
            port: defaults::port(),
            allowed_origins: defaults::allowed_origins().to_vec(),
            embedded_training: defaults::embedded_training(),
            model_poll_secs: defaults::model_poll_secs(),
        }
    }
}
