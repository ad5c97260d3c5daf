//! Move selection from the serving model.

use draughts_core::{encode_state, parse_move, Board, Color};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::warn;

use crate::approximator::Approximator;
use crate::error::{LearnerError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoveChoice {
    /// The chosen entry, verbatim from the request.
    pub notation: String,
    pub index: Option<usize>,
    /// Renormalised probability of the chosen move among the legal ones.
    pub confidence: Option<f32>,
    pub explored: bool,
    /// The model could not be consulted and the first legal move was used.
    pub fallback: bool,
}

impl MoveChoice {
    fn fallback(notation: &str) -> Self {
        Self {
            notation: notation.to_string(),
            index: None,
            confidence: None,
            explored: false,
            fallback: true,
        }
    }
}

/// Choose one of `legal_moves` for `me`.
///
/// The policy is masked to the legal action indices and renormalised; the
/// argmax wins, ties going to the earliest entry. With probability `epsilon`
/// a uniformly random legal entry is played instead. Entries that do not
/// encode are ignored, and if none encode (or inference fails) the first
/// entry is returned.
pub fn select_move<R: Rng + ?Sized>(
    model: &dyn Approximator,
    board: &Board,
    me: Color,
    legal_moves: &[String],
    epsilon: f64,
    rng: &mut R,
) -> Result<MoveChoice> {
    let first = legal_moves.first().ok_or(LearnerError::NoLegalMoves)?;

    let candidates: Vec<(&String, usize)> = legal_moves
        .iter()
        .filter_map(|text| {
            let index = parse_move(text).and_then(|m| m.encode()).ok()?;
            Some((text, index))
        })
        .collect();
    if candidates.is_empty() {
        warn!(moves = ?legal_moves, "No legal move encodes, playing first legal move");
        return Ok(MoveChoice::fallback(first));
    }

    let evaluation = match model.forward(&encode_state(board, me)) {
        Ok(evaluation) => evaluation,
        Err(e) => {
            warn!(error = %e, "Inference failed, playing first legal move");
            return Ok(MoveChoice::fallback(first));
        }
    };

    let masked: Vec<f32> = candidates
        .iter()
        .map(|(_, index)| {
            let p = evaluation.policy.get(*index).copied().unwrap_or(0.0);
            if p.is_finite() {
                p.max(0.0)
            } else {
                0.0
            }
        })
        .collect();
    let total: f32 = masked.iter().sum();
    let probs: Vec<f32> = if total > 0.0 && total.is_finite() {
        masked.iter().map(|p| p / total).collect()
    } else {
        vec![1.0 / candidates.len() as f32; candidates.len()]
    };

    let explored = rng.gen::<f64>() < epsilon;
    let pick = if explored {
        let positions: Vec<usize> = (0..candidates.len()).collect();
        positions.choose(rng).copied().unwrap_or(0)
    } else {
        let mut best = 0;
        for (i, p) in probs.iter().enumerate() {
            if *p > probs[best] {
                best = i;
            }
        }
        best
    };

    let (notation, index) = candidates[pick];
    Ok(MoveChoice {
        notation: notation.clone(),
        index: Some(index),
        confidence: Some(probs[pick]),
        explored,
        fallback: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approximator::{build, ModelOutput, ModelSpec};
    use candle_core::{Device, Tensor};
    use candle_nn::VarMap;
    use draughts_core::{encode, ACTION_SPACE_SIZE};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Returns the same logits for every state.
    struct FixedPolicy {
        logits: Vec<f32>,
        varmap: VarMap,
        device: Device,
    }

    impl FixedPolicy {
        fn favouring(index: usize) -> Self {
            let mut logits = vec![0.0; ACTION_SPACE_SIZE];
            logits[index] = 5.0;
            Self {
                logits,
                varmap: VarMap::new(),
                device: Device::Cpu,
            }
        }
    }

    impl Approximator for FixedPolicy {
        fn spec(&self) -> ModelSpec {
            ModelSpec::baseline()
        }

        fn varmap(&self) -> &VarMap {
            &self.varmap
        }

        fn device(&self) -> &Device {
            &self.device
        }

        fn forward_batch(&self, states: &Tensor) -> candle_core::Result<ModelOutput> {
            let b = states.dim(0)?;
            let row = Tensor::from_slice(&self.logits, (1, ACTION_SPACE_SIZE), &self.device)?;
            Ok(ModelOutput {
                logits: row.broadcast_as((b, ACTION_SPACE_SIZE))?.contiguous()?,
                value: Tensor::zeros(b, candle_core::DType::F32, &self.device)?,
                material_logits: None,
                threat_logits: None,
            })
        }
    }

    fn moves(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_picks_masked_argmax() {
        let favoured = encode(6, 3, 5, 4).unwrap();
        let model = FixedPolicy::favouring(favoured);
        let legal = moves(&["6,1->5,0", "6,3->5,4", "6,3->5,2"]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let choice =
            select_move(&model, &Board::initial(), Color::Black, &legal, 0.0, &mut rng).unwrap();
        assert_eq!(choice.notation, "6,3->5,4");
        assert_eq!(choice.index, Some(favoured));
        assert!(!choice.explored && !choice.fallback);
        // Renormalised over the three legal moves only.
        assert!(choice.confidence.unwrap() > 0.9);
    }

    #[test]
    fn test_illegal_favourite_is_masked_out() {
        // The favourite is not among the legal moves.
        let model = FixedPolicy::favouring(encode(3, 0, 4, 1).unwrap());
        let legal = moves(&["6,5->5,6", "6,1->5,0"]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let choice =
            select_move(&model, &Board::initial(), Color::Black, &legal, 0.0, &mut rng).unwrap();
        // Uniform over the legal pair, so the first entry wins the tie.
        assert_eq!(choice.notation, "6,5->5,6");
        assert!((choice.confidence.unwrap() - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_exploration_stays_legal() {
        let model = build(ModelSpec::baseline(), &Device::Cpu).unwrap();
        let legal = moves(&["6,1->5,0", "6,1->5,2", "6,3->5,2", "6,3->5,4"]);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..20 {
            let choice = select_move(
                model.as_ref(),
                &Board::initial(),
                Color::Black,
                &legal,
                1.0,
                &mut rng,
            )
            .unwrap();
            assert!(choice.explored);
            assert!(legal.contains(&choice.notation));
        }
    }

    #[test]
    fn test_fallback_and_empty() {
        let model = FixedPolicy::favouring(0);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let legal = moves(&["garbage", "0,0->1,1"]);
        let choice =
            select_move(&model, &Board::initial(), Color::Black, &legal, 0.0, &mut rng).unwrap();
        assert_eq!(choice.notation, "garbage");
        assert!(choice.fallback);

        let err = select_move(&model, &Board::initial(), Color::Black, &[], 0.0, &mut rng);
        assert!(matches!(err, Err(LearnerError::NoLegalMoves)));
    }

    #[test]
    fn test_unencodable_entries_are_skipped() {
        let favoured = encode(6, 1, 5, 0).unwrap();
        let model = FixedPolicy::favouring(favoured);
        let legal = moves(&["bad", "6,1->5,0"]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let choice =
            select_move(&model, &Board::initial(), Color::Black, &legal, 0.0, &mut rng).unwrap();
        assert_eq!(choice.notation, "6,1->5,0");
        assert!(!choice.fallback);
    }
}
