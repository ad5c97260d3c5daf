use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use draughts_core::{Color, Move, Outcome};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One finished game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub game_id: String,
    pub outcome: Outcome,
    pub total_moves: u32,
    pub duration_seconds: f64,
    pub agent_color: Color,
    /// Seconds since the Unix epoch; orders games for recency and eviction.
    pub timestamp: f64,
}

impl GameRecord {
    /// New record stamped with the current time.
    pub fn new(game_id: impl Into<String>, outcome: Outcome, agent_color: Color) -> Self {
        Self {
            game_id: game_id.into(),
            outcome,
            total_moves: 0,
            duration_seconds: 0.0,
            agent_color,
            timestamp: now_secs(),
        }
    }

    pub fn with_moves(mut self, total_moves: u32) -> Self {
        self.total_moves = total_moves;
        self
    }

    pub fn with_duration(mut self, duration_seconds: f64) -> Self {
        self.duration_seconds = duration_seconds;
        self
    }

    pub fn at(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A transition about to be written. Boards are kept as the JSON text the
/// client sent so malformed boards survive storage untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransition {
    pub move_number: u32,
    pub board_state: String,
    pub action: Move,
    pub reward: f32,
    pub next_state: String,
    pub done: bool,
    pub player: Color,
    pub priority: f32,
    pub heuristic_score: Option<f32>,
    pub heuristic_move: Option<String>,
}

/// A transition read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTransition {
    pub id: i64,
    pub game_id: String,
    pub move_number: u32,
    pub board_state: String,
    pub action: Move,
    pub reward: f32,
    pub next_state: String,
    pub done: bool,
    pub player: Color,
    pub priority: f32,
    pub heuristic_score: Option<f32>,
    pub heuristic_move: Option<String>,
}

/// Aggregate counts used for health reporting and the training gate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_games: u64,
    pub total_transitions: u64,
    /// Outcome label ("ai", "human", "draw") -> game count.
    pub outcomes: BTreeMap<String, u64>,
    pub average_moves: f64,
}

/// The two halves of a mixed sample, before shuffling.
#[derive(Debug, Clone, Default)]
pub struct MixedSample {
    pub recent: Vec<StoredTransition>,
    pub random: Vec<StoredTransition>,
}

impl MixedSample {
    pub fn len(&self) -> usize {
        self.recent.len() + self.random.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenate both halves and shuffle.
    pub fn into_shuffled<R: Rng + ?Sized>(self, rng: &mut R) -> Vec<StoredTransition> {
        let mut all = self.recent;
        all.extend(self.random);
        all.shuffle(rng);
        all
    }
}

pub(crate) fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
