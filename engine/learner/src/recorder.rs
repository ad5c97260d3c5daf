//! Turns a finished game reported by a client into stored transitions.
//!
//! Rewards are always computed here from the board pair; any reward the
//! client sends is ignored.

use std::sync::Arc;

use draughts_core::{parse_move, Board, Color, Move, Outcome, RewardEngine};
use replay_store::{ExperienceStore, GameRecord, NewTransition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::curriculum::CurriculumManager;
use crate::error::Result;
use crate::evaluator::{GameAnalysis, PerformanceEvaluator};
use crate::exploration::AdaptiveExploration;

const INITIAL_PRIORITY: f32 = 1.0;

/// One move as reported by the client. Every field is optional on the wire;
/// steps missing a board or the action are skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStep {
    #[serde(default)]
    pub board_state: Option<Value>,
    /// `{"from": [r, c], "to": [r, c]}` or `"r,c->r,c"`.
    #[serde(default)]
    pub action: Option<Value>,
    #[serde(default)]
    pub next_state: Option<Value>,
    #[serde(default)]
    pub player: Option<String>,
    #[serde(default)]
    pub heuristic_score: Option<f32>,
    #[serde(default)]
    pub heuristic_move: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameResult {
    pub game_id: String,
    pub outcome: Outcome,
    pub trajectory: Vec<TrajectoryStep>,
    pub duration_seconds: f64,
    /// Client-reported move count; the trajectory length is used when zero.
    pub total_moves: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSummary {
    pub game_id: String,
    pub transitions: usize,
    pub skipped: usize,
    pub evicted: usize,
    pub total_games: u64,
}

fn present(value: &Option<Value>) -> Option<&Value> {
    value.as_ref().filter(|v| !v.is_null())
}

/// Board text as stored: string payloads keep their text, grids are
/// serialised.
fn board_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn parse_action(value: &Value) -> Option<Move> {
    match value {
        Value::String(text) => parse_move(text).ok(),
        other => serde_json::from_value(other.clone()).ok(),
    }
}

struct ParsedStep<'a> {
    before_text: String,
    after_text: String,
    before: Board,
    after: Board,
    action: Move,
    player: Color,
    step: &'a TrajectoryStep,
}

pub struct GameRecorder {
    store: Arc<ExperienceStore>,
    rewards: RewardEngine,
    agent: Color,
    exploration: Arc<AdaptiveExploration>,
    evaluator: Arc<PerformanceEvaluator>,
    curriculum: Arc<CurriculumManager>,
}

impl GameRecorder {
    pub fn new(
        store: Arc<ExperienceStore>,
        agent: Color,
        exploration: Arc<AdaptiveExploration>,
        evaluator: Arc<PerformanceEvaluator>,
        curriculum: Arc<CurriculumManager>,
    ) -> Self {
        Self {
            store,
            rewards: RewardEngine::new(agent),
            agent,
            exploration,
            evaluator,
            curriculum,
        }
    }

    pub fn agent(&self) -> Color {
        self.agent
    }

    fn parse_step<'a>(&self, i: usize, step: &'a TrajectoryStep) -> Option<ParsedStep<'a>> {
        let (Some(before), Some(after), Some(action)) = (
            present(&step.board_state),
            present(&step.next_state),
            present(&step.action),
        ) else {
            warn!(step = i, "Skipping trajectory step with missing fields");
            return None;
        };
        let Some(action) = parse_action(action) else {
            warn!(step = i, action = %action, "Skipping trajectory step with unreadable action");
            return None;
        };
        let player = match step.player.as_deref() {
            None => self.agent,
            Some(label) => match label.parse::<Color>() {
                Ok(color) => color,
                Err(e) => {
                    warn!(step = i, error = %e, "Skipping trajectory step with unknown player");
                    return None;
                }
            },
        };
        Some(ParsedStep {
            before_text: board_text(before),
            after_text: board_text(after),
            before: Board::from_value(before),
            after: Board::from_value(after),
            action,
            player,
            step,
        })
    }

    /// Store the game and its transitions, then update the exploration
    /// window, the evaluator and the curriculum.
    pub fn record(&self, result: &GameResult) -> Result<RecordSummary> {
        let parsed: Vec<ParsedStep<'_>> = result
            .trajectory
            .iter()
            .enumerate()
            .filter_map(|(i, step)| self.parse_step(i, step))
            .collect();
        let skipped = result.trajectory.len() - parsed.len();

        let mut analysis = GameAnalysis::new();
        let last = parsed.len().saturating_sub(1);
        let transitions: Vec<NewTransition> = parsed
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let done = i == last;
                analysis.observe(&p.before, &p.after, p.player, self.agent);
                NewTransition {
                    move_number: i as u32,
                    board_state: p.before_text.clone(),
                    action: p.action,
                    reward: self.rewards.reward(&p.before, &p.after, done, result.outcome),
                    next_state: p.after_text.clone(),
                    done,
                    player: p.player,
                    priority: INITIAL_PRIORITY,
                    heuristic_score: p.step.heuristic_score,
                    heuristic_move: p.step.heuristic_move.as_ref().map(board_text),
                }
            })
            .collect();

        let total_moves = if result.total_moves > 0 {
            result.total_moves
        } else {
            result.trajectory.len() as u32
        };
        let record = GameRecord::new(result.game_id.clone(), result.outcome, self.agent)
            .with_moves(total_moves)
            .with_duration(result.duration_seconds);
        let evicted = self.store.add_game(&record, &transitions)?;

        self.exploration
            .record_result(result.outcome == Outcome::AgentWin);
        self.evaluator.record_game(result.outcome, &analysis);
        let total_games = self.store.stats()?.total_games;
        let stage = self.curriculum.observe(total_games);

        if skipped > 0 {
            debug!(game_id = %result.game_id, skipped, "Some trajectory steps were skipped");
        }
        info!(
            game_id = %result.game_id,
            outcome = %result.outcome,
            transitions = transitions.len(),
            total_games,
            stage = stage.name,
            "Recorded game"
        );

        Ok(RecordSummary {
            game_id: result.game_id.clone(),
            transitions: transitions.len(),
            skipped,
            evicted,
            total_games,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use draughts_core::Piece;
    use serde_json::json;
    use tempfile::tempdir;

    fn recorder(dir: &std::path::Path) -> (GameRecorder, Arc<ExperienceStore>, Arc<AdaptiveExploration>) {
        let store = Arc::new(ExperienceStore::open(dir.join("replay.db"), 100).unwrap());
        let exploration = Arc::new(AdaptiveExploration::default());
        let recorder = GameRecorder::new(
            Arc::clone(&store),
            Color::Black,
            Arc::clone(&exploration),
            Arc::new(PerformanceEvaluator::new()),
            Arc::new(CurriculumManager::new()),
        );
        (recorder, store, exploration)
    }

    fn step(before: &Board, after: &Board, action: Value) -> TrajectoryStep {
        TrajectoryStep {
            board_state: Some(before.to_value()),
            action: Some(action),
            next_state: Some(after.to_value()),
            player: Some("black".into()),
            ..TrajectoryStep::default()
        }
    }

    #[test]
    fn test_records_with_server_side_rewards() {
        let dir = tempdir().unwrap();
        let (recorder, store, exploration) = recorder(dir.path());

        let before = Board::empty()
            .place(6, 1, Piece::man(Color::Black))
            .place(0, 1, Piece::man(Color::Red));
        let after = Board::empty()
            .place(5, 2, Piece::man(Color::Black))
            .place(0, 1, Piece::man(Color::Red));
        let result = GameResult {
            game_id: "g1".into(),
            outcome: Outcome::AgentWin,
            trajectory: vec![
                step(&before, &after, json!({"from": [6, 1], "to": [5, 2]})),
                TrajectoryStep::default(),
                step(&after, &Board::empty().place(4, 3, Piece::man(Color::Black)), json!("5,2->4,3")),
            ],
            duration_seconds: 12.5,
            total_moves: 0,
        };
        let summary = recorder.record(&result).unwrap();
        assert_eq!(summary.transitions, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total_games, 1);

        let stored = store.game_trajectory("g1").unwrap();
        assert_eq!(stored.len(), 2);
        assert!(!stored[0].done);
        assert!(stored[1].done);
        assert_eq!(stored[1].reward, 1.0);
        assert_eq!(stored[0].action, Move::new(6, 1, 5, 2));
        assert_eq!(exploration.games_in_window(), 1);
        assert_eq!(exploration.win_rate(), 1.0);
    }

    #[test]
    fn test_client_reward_is_ignored() {
        let dir = tempdir().unwrap();
        let (recorder, store, _) = recorder(dir.path());
        let step: TrajectoryStep = serde_json::from_value(json!({
            "board_state": Board::initial().to_value(),
            "action": {"from": [6, 1], "to": [5, 0]},
            "next_state": Board::initial().to_value(),
            "reward": 99.0
        }))
        .unwrap();
        let result = GameResult {
            game_id: "g2".into(),
            outcome: Outcome::OpponentWin,
            trajectory: vec![step],
            duration_seconds: 0.0,
            total_moves: 3,
        };
        recorder.record(&result).unwrap();
        let stored = store.game_trajectory("g2").unwrap();
        assert_eq!(stored[0].reward, -1.0);
        assert_eq!(stored[0].player, Color::Black);
        assert_eq!(store.stats().unwrap().average_moves, 3.0);
    }

    #[test]
    fn test_board_given_as_json_text_is_stored_verbatim() {
        let dir = tempdir().unwrap();
        let (recorder, store, _) = recorder(dir.path());
        let text = Board::initial().to_value().to_string();
        let result = GameResult {
            game_id: "g3".into(),
            outcome: Outcome::Draw,
            trajectory: vec![TrajectoryStep {
                board_state: Some(Value::String(text.clone())),
                action: Some(json!("6,1->5,0")),
                next_state: Some(Value::String(text.clone())),
                ..TrajectoryStep::default()
            }],
            duration_seconds: 0.0,
            total_moves: 0,
        };
        recorder.record(&result).unwrap();
        let stored = store.game_trajectory("g3").unwrap();
        assert_eq!(stored[0].board_state, text);
        assert_eq!(Board::from_json_str(&stored[0].board_state), Board::initial());
    }

    #[test]
    fn test_game_without_trajectory_still_counts() {
        let dir = tempdir().unwrap();
        let (recorder, store, exploration) = recorder(dir.path());
        let result = GameResult {
            game_id: "g4".into(),
            outcome: Outcome::OpponentWin,
            trajectory: Vec::new(),
            duration_seconds: 0.0,
            total_moves: 20,
        };
        let summary = recorder.record(&result).unwrap();
        assert_eq!(summary.transitions, 0);
        assert_eq!(store.stats().unwrap().total_games, 1);
        assert_eq!(exploration.win_rate(), 0.0);
    }
}
