//! Rolling performance statistics over recorded games and training steps.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use draughts_core::{Board, BoardMetrics, Color, Outcome};
use serde::{Deserialize, Serialize};
use tracing::debug;

const TRAILING: usize = 100;
const SNAPSHOT_EVERY: u64 = 10;
const TREND_WINDOW: usize = 50;
const TREND_SLOPE: f64 = 0.01;

/// Per-game tactical counts, built up one transition at a time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GameAnalysis {
    pub moves: u32,
    pub single_captures: u32,
    pub multi_captures: u32,
    pub max_chain: u32,
    pub pieces_captured: u32,
    pub kings_promoted: u32,
    pub kings_lost: u32,
    cohesion_sum: f64,
    cohesion_samples: u32,
}

impl GameAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one transition. Captures and promotions count on the agent's
    /// own moves; king losses count on any move.
    pub fn observe(&mut self, before: &Board, after: &Board, mover: Color, agent: Color) {
        self.moves += 1;
        let them = agent.opponent();

        if mover == agent {
            let captured = before.count(them).saturating_sub(after.count(them)) as u32;
            match captured {
                0 => {}
                1 => self.single_captures += 1,
                n => {
                    self.multi_captures += 1;
                    self.max_chain = self.max_chain.max(n);
                }
            }
            self.pieces_captured += captured;
            if after.count_kings(agent) > before.count_kings(agent) {
                self.kings_promoted += 1;
            }
        }

        let lost = before
            .count_kings(agent)
            .saturating_sub(after.count_kings(agent));
        self.kings_lost += lost as u32;

        self.cohesion_sum += f64::from(BoardMetrics::compute(after, agent).cohesion);
        self.cohesion_samples += 1;
    }

    pub fn average_cohesion(&self) -> Option<f64> {
        (self.cohesion_samples > 0).then(|| self.cohesion_sum / f64::from(self.cohesion_samples))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
    pub timestamp: u64,
    pub total_games: u64,
    pub win_rate: f64,
    pub avg_cohesion: f64,
    pub multi_capture_rate: f64,
    pub avg_game_length: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_games: u64,
    pub win_rate: f64,
    pub wins: u64,
    pub losses: u64,
    pub draws: u64,
    pub single_captures: u64,
    pub multi_captures: u64,
    pub multi_capture_rate: f64,
    pub max_capture_chain: u32,
    pub total_pieces_captured: u64,
    pub kings_promoted: u64,
    pub kings_lost: u64,
    pub avg_cohesion: f64,
    pub avg_game_length: f64,
    pub avg_policy_entropy: Option<f64>,
    pub avg_value_error: Option<f64>,
    pub avg_advantage_accuracy: Option<f64>,
    pub training_steps: u64,
    pub trend: Trend,
}

#[derive(Debug, Default)]
struct EvaluatorState {
    wins: u64,
    losses: u64,
    draws: u64,
    single_captures: u64,
    multi_captures: u64,
    max_chain: u32,
    pieces_captured: u64,
    kings_promoted: u64,
    kings_lost: u64,
    cohesion: VecDeque<f64>,
    game_lengths: VecDeque<f64>,
    entropy: VecDeque<f64>,
    value_error: VecDeque<f64>,
    advantage_accuracy: VecDeque<f64>,
    training_steps: u64,
    history: Vec<PerformanceSnapshot>,
}

impl EvaluatorState {
    fn total_games(&self) -> u64 {
        self.wins + self.losses + self.draws
    }

    fn snapshot(&self) -> PerformanceSnapshot {
        let total = self.total_games().max(1) as f64;
        PerformanceSnapshot {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            total_games: self.total_games(),
            win_rate: self.wins as f64 / total,
            avg_cohesion: mean(&self.cohesion).unwrap_or(0.0),
            multi_capture_rate: self.multi_captures as f64 / total,
            avg_game_length: mean(&self.game_lengths).unwrap_or(0.0),
        }
    }
}

fn push_bounded(window: &mut VecDeque<f64>, value: f64) {
    window.push_back(value);
    while window.len() > TRAILING {
        window.pop_front();
    }
}

fn mean(values: &VecDeque<f64>) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Least-squares slope of `ys` against their index.
fn slope(ys: &[f64]) -> f64 {
    let n = ys.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = ys.iter().sum::<f64>() / n;
    let (mut num, mut den) = (0.0, 0.0);
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

fn trend_of(history: &[PerformanceSnapshot]) -> Trend {
    if history.len() < 2 {
        return Trend::InsufficientData;
    }
    let start = history.len().saturating_sub(TREND_WINDOW);
    let rates: Vec<f64> = history[start..].iter().map(|s| s.win_rate).collect();
    let s = slope(&rates);
    if s > TREND_SLOPE {
        Trend::Improving
    } else if s < -TREND_SLOPE {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

#[derive(Debug, Default)]
pub struct PerformanceEvaluator {
    state: Mutex<EvaluatorState>,
}

impl PerformanceEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_game(&self, outcome: Outcome, analysis: &GameAnalysis) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match outcome {
            Outcome::AgentWin => state.wins += 1,
            Outcome::OpponentWin => state.losses += 1,
            Outcome::Draw => state.draws += 1,
        }
        state.single_captures += u64::from(analysis.single_captures);
        state.multi_captures += u64::from(analysis.multi_captures);
        state.max_chain = state.max_chain.max(analysis.max_chain);
        state.pieces_captured += u64::from(analysis.pieces_captured);
        state.kings_promoted += u64::from(analysis.kings_promoted);
        state.kings_lost += u64::from(analysis.kings_lost);
        if let Some(cohesion) = analysis.average_cohesion() {
            push_bounded(&mut state.cohesion, cohesion);
        }
        push_bounded(&mut state.game_lengths, f64::from(analysis.moves));

        if state.total_games() % SNAPSHOT_EVERY == 0 {
            let snapshot = state.snapshot();
            debug!(
                games = snapshot.total_games,
                win_rate = snapshot.win_rate,
                "Performance snapshot"
            );
            state.history.push(snapshot);
        }
    }

    pub fn record_training(&self, entropy: f32, value_error: f32, advantage_accuracy: f32) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        push_bounded(&mut state.entropy, f64::from(entropy));
        push_bounded(&mut state.value_error, f64::from(value_error));
        push_bounded(&mut state.advantage_accuracy, f64::from(advantage_accuracy));
        state.training_steps += 1;
    }

    pub fn trend(&self) -> Trend {
        trend_of(&self.state.lock().unwrap_or_else(|e| e.into_inner()).history)
    }

    pub fn history(&self) -> Vec<PerformanceSnapshot> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .history
            .clone()
    }

    /// `None` until a game or a training step has been recorded. Game
    /// rates are zero while no game has been seen.
    pub fn summary(&self) -> Option<PerformanceSummary> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let total = state.total_games();
        if total == 0 && state.training_steps == 0 {
            return None;
        }
        let games = total.max(1) as f64;
        Some(PerformanceSummary {
            total_games: total,
            win_rate: state.wins as f64 / games,
            wins: state.wins,
            losses: state.losses,
            draws: state.draws,
            single_captures: state.single_captures,
            multi_captures: state.multi_captures,
            multi_capture_rate: state.multi_captures as f64 / games,
            max_capture_chain: state.max_chain,
            total_pieces_captured: state.pieces_captured,
            kings_promoted: state.kings_promoted,
            kings_lost: state.kings_lost,
            avg_cohesion: mean(&state.cohesion).unwrap_or(0.0),
            avg_game_length: mean(&state.game_lengths).unwrap_or(0.0),
            avg_policy_entropy: mean(&state.entropy),
            avg_value_error: mean(&state.value_error),
            avg_advantage_accuracy: mean(&state.advantage_accuracy),
            training_steps: state.training_steps,
            trend: trend_of(&state.history),
        })
    }
}
