//! Shaped reward for one board transition.
//!
//! Terminal transitions score the outcome exactly (+1, -1, 0). Anything
//! else is a sum of six tiers computed from the before/after metrics of
//! the agent's side, clamped to `[-1, 1]`. The engine is a pure function
//! of its inputs; rewards are never taken from callers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::board::{Board, Color};
use crate::metrics::{BoardMetrics, Phase};

/// Final result of a game from the agent's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "ai")]
    AgentWin,
    #[serde(rename = "human")]
    OpponentWin,
    #[serde(rename = "draw")]
    Draw,
}

impl Outcome {
    pub const ALL: [Outcome; 3] = [Outcome::AgentWin, Outcome::OpponentWin, Outcome::Draw];

    /// Wire label used by clients and the store.
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::AgentWin => "ai",
            Outcome::OpponentWin => "human",
            Outcome::Draw => "draw",
        }
    }

    /// Lenient conversion: unknown labels are treated as a draw.
    pub fn from_label(label: &str) -> Self {
        label.parse().unwrap_or(Outcome::Draw)
    }

    pub fn terminal_reward(self) -> f32 {
        match self {
            Outcome::AgentWin => 1.0,
            Outcome::OpponentWin => -1.0,
            Outcome::Draw => 0.0,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai" => Ok(Outcome::AgentWin),
            "human" => Ok(Outcome::OpponentWin),
            "draw" => Ok(Outcome::Draw),
            other => Err(format!("unknown outcome '{}'", other)),
        }
    }
}

/// Reward for capturing `captures` pieces in one move.
///
/// A single capture is worth 0.08; chains grow superlinearly as
/// `0.2c + 0.05(c-1)^2`.
pub fn material_reward(captures: usize) -> f32 {
    match captures {
        0 => 0.0,
        1 => 0.08,
        c => {
            let c = c as f32;
            0.2 * c + 0.05 * (c - 1.0).powi(2)
        }
    }
}

/// Tier weights for the non-material terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardWeights {
    pub gap: f32,
    pub cohesion: f32,
    pub support: f32,
    pub promotion: f32,
    pub king_threat: f32,
    pub king_loss: f32,
    pub isolation: f32,
    pub back_rank: f32,
    pub tempo: f32,
    pub opening_back_rank: f32,
    pub endgame_king: f32,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            gap: 0.02,
            cohesion: 0.1,
            support: 0.02,
            promotion: 0.15,
            king_threat: 0.05,
            king_loss: 0.2,
            isolation: 0.03,
            back_rank: 0.1,
            tempo: 0.005,
            opening_back_rank: 0.01,
            endgame_king: 0.05,
        }
    }
}

/// Per-tier contributions of a non-terminal reward, before clamping.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RewardBreakdown {
    pub captures: usize,
    pub material: f32,
    pub positional: f32,
    pub promotion: f32,
    pub defensive: f32,
    pub tempo: f32,
    pub phase: f32,
}

impl RewardBreakdown {
    pub fn total(&self) -> f32 {
        self.material + self.positional + self.promotion + self.defensive + self.tempo + self.phase
    }
}

#[derive(Debug, Clone)]
pub struct RewardEngine {
    me: Color,
    weights: RewardWeights,
}

impl RewardEngine {
    pub fn new(me: Color) -> Self {
        Self::with_weights(me, RewardWeights::default())
    }

    pub fn with_weights(me: Color, weights: RewardWeights) -> Self {
        Self { me, weights }
    }

    pub fn side(&self) -> Color {
        self.me
    }

    pub fn reward(&self, before: &Board, after: &Board, terminal: bool, outcome: Outcome) -> f32 {
        if terminal {
            return outcome.terminal_reward();
        }
        self.breakdown(before, after).total().clamp(-1.0, 1.0)
    }

    /// Same as [`reward`](Self::reward) for raw JSON boards in either form.
    pub fn reward_json(
        &self,
        before: &Value,
        after: &Value,
        terminal: bool,
        outcome: Outcome,
    ) -> f32 {
        if terminal {
            return outcome.terminal_reward();
        }
        self.reward(
            &Board::from_value(before),
            &Board::from_value(after),
            false,
            outcome,
        )
    }

    pub fn breakdown(&self, before: &Board, after: &Board) -> RewardBreakdown {
        let w = &self.weights;
        let b = BoardMetrics::compute(before, self.me);
        let a = BoardMetrics::compute(after, self.me);

        let captures = b.opp_pieces.saturating_sub(a.opp_pieces);
        let material = material_reward(captures);

        let positional = w.gap * delta(b.formation_gaps, a.formation_gaps)
            + w.cohesion * (a.cohesion - b.cohesion)
            + w.support * delta(a.supported, b.supported);

        let mut promotion = 0.0;
        if a.own_kings > b.own_kings {
            let sparsity = 1.0 - (a.total_pieces as f32 / 40.0).min(1.0);
            promotion += w.promotion * (a.own_kings - b.own_kings) as f32 * (1.0 + sparsity);
        }
        promotion -= w.king_threat * a.threatened_kings.saturating_sub(b.threatened_kings) as f32;
        promotion -= w.king_loss * b.own_kings.saturating_sub(a.own_kings) as f32;

        let mut defensive = -w.isolation * a.isolated.saturating_sub(b.isolated) as f32;
        if a.back_rank_violated() && !b.back_rank_violated() {
            defensive -= w.back_rank;
        }

        let tempo = w.tempo * delta(b.opponent_mobility, a.opponent_mobility);

        let phase = match a.phase() {
            Phase::Opening => w.opening_back_rank * a.back_rank as f32,
            Phase::Endgame => w.endgame_king * a.central_kings as f32,
            Phase::Midgame => 0.0,
        };

        RewardBreakdown {
            captures,
            material,
            positional,
            promotion,
            defensive,
            tempo,
            phase,
        }
    }
}

/// `from - to` as a signed float.
fn delta(from: usize, to: usize) -> f32 {
    from as f32 - to as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Cell, Piece, BOARD_SIZE};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;
    use serde_json::json;

    fn engine() -> RewardEngine {
        RewardEngine::new(Color::Black)
    }

    fn random_board(rng: &mut ChaCha20Rng) -> Board {
        let mut board = Board::empty();
        for row in 0..BOARD_SIZE {
            for col in 0..BOARD_SIZE {
                let cell = match rng.gen_range(0..10) {
                    0 => Cell::Piece(Piece::man(Color::Black)),
                    1 => Cell::Piece(Piece::man(Color::Red)),
                    2 => Cell::Piece(Piece::king(Color::Black)),
                    3 => Cell::Piece(Piece::king(Color::Red)),
                    4 => Cell::Unknown,
                    _ => Cell::Empty,
                };
                board.set(row, col, cell);
            }
        }
        board
    }

    #[test]
    fn test_material_tier_values() {
        assert_eq!(material_reward(0), 0.0);
        assert!((material_reward(1) - 0.08).abs() < 1e-6);
        assert!((material_reward(2) - 0.45).abs() < 1e-6);
        assert!((material_reward(3) - 0.8).abs() < 1e-6);
        assert!(material_reward(3) > material_reward(1));
    }

    #[test]
    fn test_terminal_rewards_are_exact() {
        let e = engine();
        let boards = [Board::empty(), Board::initial()];
        for before in &boards {
            for after in &boards {
                assert_eq!(e.reward(before, after, true, Outcome::AgentWin), 1.0);
                assert_eq!(e.reward(before, after, true, Outcome::OpponentWin), -1.0);
                assert_eq!(e.reward(before, after, true, Outcome::Draw), 0.0);
            }
        }
        assert_eq!(
            e.reward_json(&json!("garbage"), &json!(null), true, Outcome::AgentWin),
            1.0
        );
    }

    #[test]
    fn test_reward_is_pure_and_bounded() {
        let e = engine();
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        for _ in 0..200 {
            let before = random_board(&mut rng);
            let after = random_board(&mut rng);
            let r1 = e.reward(&before, &after, false, Outcome::Draw);
            let r2 = e.reward(&before, &after, false, Outcome::AgentWin);
            assert!((-1.0..=1.0).contains(&r1), "reward {} out of range", r1);
            assert_eq!(r1, r2, "non-terminal reward must not depend on outcome");
            assert_eq!(r1, e.reward(&before, &after, false, Outcome::Draw));
        }
    }

    #[test]
    fn test_three_captures_beat_one() {
        let e = engine();
        let before = Board::empty()
            .place(8, 1, Piece::man(Color::Black))
            .place(7, 2, Piece::man(Color::Red))
            .place(5, 4, Piece::man(Color::Red))
            .place(3, 6, Piece::man(Color::Red));
        let one = Board::empty()
            .place(6, 3, Piece::man(Color::Black))
            .place(5, 4, Piece::man(Color::Red))
            .place(3, 6, Piece::man(Color::Red));
        let three = Board::empty().place(2, 7, Piece::man(Color::Black));

        let r1 = e.reward(&before, &one, false, Outcome::Draw);
        let r3 = e.reward(&before, &three, false, Outcome::Draw);
        assert_eq!(e.breakdown(&before, &one).captures, 1);
        assert_eq!(e.breakdown(&before, &three).captures, 3);
        assert!(r3 > r1, "3 captures ({}) should beat 1 ({})", r3, r1);
    }

    #[test]
    fn test_double_capture_scores_at_least_chain_value() {
        let e = engine();
        let before = Board::empty()
            .place(6, 1, Piece::man(Color::Black))
            .place(5, 2, Piece::man(Color::Red))
            .place(3, 4, Piece::man(Color::Red));
        let after = Board::empty().place(2, 5, Piece::man(Color::Black));

        let parts = e.breakdown(&before, &after);
        assert_eq!(parts.captures, 2);
        assert!(parts.tempo > 0.0);
        assert!(e.reward(&before, &after, false, Outcome::AgentWin) >= 0.45);
    }

    #[test]
    fn test_quiet_move_is_near_zero() {
        let e = engine();
        let before = Board::empty()
            .place(7, 2, Piece::man(Color::Black))
            .place(5, 2, Piece::man(Color::Red))
            .place(3, 4, Piece::man(Color::Red));
        let after = Board::empty()
            .place(6, 1, Piece::man(Color::Black))
            .place(5, 2, Piece::man(Color::Red))
            .place(3, 4, Piece::man(Color::Red));
        let r = e.reward(&before, &after, false, Outcome::AgentWin);
        assert!(r.abs() < 0.05, "quiet move reward {}", r);
    }

    #[test]
    fn test_promotion_worth_more_in_sparse_endgame() {
        let e = engine();
        let sparse_before = Board::empty().place(1, 2, Piece::man(Color::Black));
        let sparse_after = Board::empty().place(0, 1, Piece::king(Color::Black));
        let crowded_before = Board::initial()
            .place(5, 0, Piece::man(Color::Black))
            .place(1, 2, Piece::man(Color::Black));
        let crowded_after = Board::initial()
            .place(5, 0, Piece::man(Color::Black))
            .place(0, 1, Piece::king(Color::Black));

        let sparse = e.breakdown(&sparse_before, &sparse_after).promotion;
        let crowded = e.breakdown(&crowded_before, &crowded_after).promotion;
        assert!(sparse > 0.0);
        assert!(sparse > crowded);
    }

    #[test]
    fn test_king_loss_is_penalised() {
        let e = engine();
        let before = Board::empty()
            .place(5, 4, Piece::king(Color::Black))
            .place(0, 1, Piece::man(Color::Red));
        let after = Board::empty().place(0, 1, Piece::man(Color::Red));
        assert!(e.breakdown(&before, &after).promotion <= -0.2 + 1e-6);
    }

    #[test]
    fn test_back_rank_break_penalised_once() {
        let e = engine();
        let home = |cols: &[usize]| {
            cols.iter().fold(Board::empty(), |b, &c| {
                b.place(9, c, Piece::man(Color::Black))
            })
        };
        let intact = home(&[0, 2, 4]);
        let broken = home(&[0, 2]).place(8, 5, Piece::man(Color::Black));
        let still_broken = home(&[0]).place(8, 3, Piece::man(Color::Black));

        let first = e.breakdown(&intact, &broken).defensive;
        let second = e.breakdown(&broken, &still_broken).defensive;
        assert!(first <= -0.1 + 1e-6);
        assert!(second > -0.1);
    }

    #[test]
    fn test_malformed_boards_do_not_break_reward() {
        let e = engine();
        let garbage = [
            json!("not a board"),
            json!(12),
            json!([[1, 2, 3], "row", null]),
            json!([[{"color": "blue"}, {"king": true}]]),
        ];
        for before in &garbage {
            for after in &garbage {
                let r = e.reward_json(before, after, false, Outcome::Draw);
                assert!(r.is_finite());
                assert!((-1.0..=1.0).contains(&r));
            }
        }
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Outcome::from_label("ai"), Outcome::AgentWin);
        assert_eq!(Outcome::from_label("human"), Outcome::OpponentWin);
        assert_eq!(Outcome::from_label("draw"), Outcome::Draw);
        assert_eq!(Outcome::from_label("robot"), Outcome::Draw);
        assert_eq!(
            serde_json::to_string(&Outcome::OpponentWin).unwrap(),
            "\"human\""
        );
    }
}
