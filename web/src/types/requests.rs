//! Request types for the web API.

use learner::TrajectoryStep;
use serde::Deserialize;
use serde_json::Value;

/// Ask the agent for a move.
#[derive(Deserialize)]
pub struct MoveRequest {
    pub game_id: String,
    /// 10x10 grid, or the same grid serialized as a JSON string
    pub board_state: Value,
    /// Legal moves in `"r,c->r,c"` notation, as computed by the client
    pub legal_moves: Vec<String>,
    /// Side to move; defaults to the agent's colour
    #[serde(default)]
    pub player: Option<String>,
    #[serde(default)]
    pub move_number: Option<u32>,
}

/// Report a finished game.
#[derive(Deserialize)]
pub struct ResultRequest {
    pub game_id: String,
    /// "ai", "human" or "draw"; anything else counts as a draw
    pub winner: String,
    #[serde(default)]
    pub trajectory: Vec<TrajectoryStep>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub total_moves: Option<u32>,
}
