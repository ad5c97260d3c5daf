//! Curriculum stages keyed by cumulative games completed.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stage {
    pub name: &'static str,
    /// Inclusive lower bound on games completed.
    pub min_games: u64,
    /// Exclusive upper bound; `None` for the open-ended final stage.
    pub max_games: Option<u64>,
    pub focus: &'static str,
    /// Informational reward emphasis for this stage.
    pub multipliers: &'static [(&'static str, f32)],
}

impl Stage {
    pub fn contains(&self, games: u64) -> bool {
        games >= self.min_games && self.max_games.map_or(true, |max| games < max)
    }
}

pub static STAGES: [Stage; 5] = [
    Stage {
        name: "basic_captures",
        min_games: 0,
        max_games: Some(100),
        focus: "capture_opportunities",
        multipliers: &[("captures", 2.0), ("material", 1.5)],
    },
    Stage {
        name: "multi_capture_chains",
        min_games: 100,
        max_games: Some(300),
        focus: "multi_captures",
        multipliers: &[("multi_captures", 2.5), ("chain_length", 2.0)],
    },
    Stage {
        name: "defensive_positioning",
        min_games: 300,
        max_games: Some(600),
        focus: "defense",
        multipliers: &[
            ("gap_closure", 2.0),
            ("cohesion", 2.0),
            ("support", 1.5),
            ("isolation_penalty", 1.5),
        ],
    },
    Stage {
        name: "king_endgames",
        min_games: 600,
        max_games: Some(1000),
        focus: "king_play",
        multipliers: &[
            ("king_activity", 2.0),
            ("king_promotion", 1.5),
            ("king_safety", 1.5),
        ],
    },
    Stage {
        name: "mastery",
        min_games: 1000,
        max_games: None,
        focus: "all",
        multipliers: &[],
    },
];

/// First stage whose bounds contain `games`, defaulting to mastery.
pub fn current_stage(games: u64) -> &'static Stage {
    STAGES
        .iter()
        .find(|s| s.contains(games))
        .unwrap_or(&STAGES[STAGES.len() - 1])
}

pub fn stage_index(stage: &Stage) -> usize {
    STAGES
        .iter()
        .position(|s| s.name == stage.name)
        .unwrap_or(STAGES.len() - 1)
}

pub fn is_first_stage(stage: &Stage) -> bool {
    stage_index(stage) == 0
}

pub fn is_final_stage(stage: &Stage) -> bool {
    stage.max_games.is_none()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageInfo {
    pub stage: &'static str,
    pub focus: &'static str,
    pub games_completed: u64,
    pub progress_percent: f64,
    pub next_threshold: Option<u64>,
    pub should_advance: bool,
    pub multipliers: Vec<(&'static str, f32)>,
}

/// Tracks the furthest point reached so the stage never moves backwards,
/// even if the store later evicts games.
#[derive(Debug, Default)]
pub struct CurriculumManager {
    high_water: AtomicU64,
}

impl CurriculumManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `games` completed and return the (monotonic) current stage.
    pub fn observe(&self, games: u64) -> &'static Stage {
        let previous = self.high_water.fetch_max(games, Ordering::SeqCst);
        current_stage(previous.max(games))
    }

    pub fn games_completed(&self) -> u64 {
        self.high_water.load(Ordering::SeqCst)
    }

    pub fn stage(&self) -> &'static Stage {
        current_stage(self.games_completed())
    }

    pub fn stage_info(&self) -> StageInfo {
        let games = self.games_completed();
        let stage = current_stage(games);
        let (progress_percent, should_advance) = match stage.max_games {
            Some(max) => {
                let span = (max - stage.min_games) as f64;
                let done = (games - stage.min_games) as f64;
                ((done / span * 100.0).min(100.0), games >= max)
            }
            None => (100.0, false),
        };
        StageInfo {
            stage: stage.name,
            focus: stage.focus,
            games_completed: games,
            progress_percent,
            next_threshold: stage.max_games,
            should_advance,
            multipliers: stage.multipliers.to_vec(),
        }
    }
}
