//! Response types for the web API.

use learner::{PerformanceSummary, StageInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database_accessible: bool,
    pub games_in_buffer: u64,
}

#[derive(Serialize, Deserialize)]
pub struct MoveResponse {
    /// One entry of the request's `legal_moves`, verbatim
    pub ai_move: String,
    /// `v{training_steps}` of the serving model
    pub model_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

#[derive(Serialize, Deserialize)]
pub struct ResultResponse {
    pub status: String,
    pub game_id: String,
}

#[derive(Serialize, Deserialize)]
pub struct ControlResponse {
    pub status: String,
    pub learning_paused: bool,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub total_games: u64,
    pub total_trajectories: u64,
    /// Game counts keyed by winner label
    pub wins: BTreeMap<String, u64>,
    pub average_moves: f64,
    pub learning_active: bool,
    pub learning_paused: bool,
    pub learning_iterations: u64,
    pub current_loss: Option<f32>,
    pub model_healthy: bool,
    pub model_version: String,
    pub curriculum: Option<StageInfo>,
    pub exploration_rate: f64,
    pub performance: Option<PerformanceSummary>,
}
