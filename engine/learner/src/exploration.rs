//! Adaptive epsilon for move selection.
//!
//! epsilon = clamp(max(min, base * decay^steps) * performance * curriculum,
//!                 min, max)

use std::collections::VecDeque;
use std::sync::Mutex;

use engine_config::ExplorationConfig;
use serde::{Deserialize, Serialize};

use crate::curriculum::{is_final_stage, is_first_stage, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExplorationParams {
    pub base_epsilon: f64,
    pub min_epsilon: f64,
    pub max_epsilon: f64,
    pub decay_rate: f64,
    pub win_rate_window: usize,
}

impl Default for ExplorationParams {
    fn default() -> Self {
        Self {
            base_epsilon: 0.1,
            min_epsilon: 0.01,
            max_epsilon: 0.3,
            decay_rate: 0.995,
            win_rate_window: 50,
        }
    }
}

impl From<&ExplorationConfig> for ExplorationParams {
    fn from(config: &ExplorationConfig) -> Self {
        Self {
            base_epsilon: config.base_epsilon,
            min_epsilon: config.min_epsilon,
            max_epsilon: config.max_epsilon.max(config.min_epsilon),
            decay_rate: config.decay_rate,
            win_rate_window: config.win_rate_window.max(1),
        }
    }
}

pub fn performance_multiplier(win_rate: f64) -> f64 {
    if win_rate < 0.3 {
        1.5
    } else if win_rate > 0.7 {
        0.7
    } else {
        1.0
    }
}

pub fn curriculum_multiplier(stage: &Stage) -> f64 {
    if is_first_stage(stage) {
        1.5
    } else if is_final_stage(stage) {
        0.6
    } else {
        1.0
    }
}

/// Pure epsilon for the given training progress, win rate and stage. With
/// no stage (curriculum disabled) the curriculum multiplier is neutral.
pub fn epsilon(
    params: &ExplorationParams,
    training_steps: u64,
    win_rate: f64,
    stage: Option<&Stage>,
) -> f64 {
    let steps = training_steps.min(i32::MAX as u64) as i32;
    let decayed = (params.base_epsilon * params.decay_rate.powi(steps)).max(params.min_epsilon);
    let eps = decayed * performance_multiplier(win_rate) * stage.map_or(1.0, curriculum_multiplier);
    eps.clamp(params.min_epsilon, params.max_epsilon)
}

/// Trailing window of game results feeding [`epsilon`].
#[derive(Debug)]
pub struct AdaptiveExploration {
    params: ExplorationParams,
    recent: Mutex<VecDeque<bool>>,
}

impl AdaptiveExploration {
    pub fn new(params: ExplorationParams) -> Self {
        Self {
            params,
            recent: Mutex::new(VecDeque::with_capacity(params.win_rate_window)),
        }
    }

    pub fn params(&self) -> &ExplorationParams {
        &self.params
    }

    /// Record one finished game from the agent's side.
    pub fn record_result(&self, agent_won: bool) {
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent.push_back(agent_won);
        while recent.len() > self.params.win_rate_window {
            recent.pop_front();
        }
    }

    /// Win rate over the trailing window; 0.5 while the window is empty.
    pub fn win_rate(&self) -> f64 {
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        if recent.is_empty() {
            return 0.5;
        }
        recent.iter().filter(|won| **won).count() as f64 / recent.len() as f64
    }

    pub fn games_in_window(&self) -> usize {
        self.recent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn epsilon(&self, training_steps: u64, stage: Option<&Stage>) -> f64 {
        epsilon(&self.params, training_steps, self.win_rate(), stage)
    }
}

impl Default for AdaptiveExploration {
    fn default() -> Self {
        Self::new(ExplorationParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curriculum::{current_stage, STAGES};

    #[test]
    fn test_epsilon_monotone_and_bounded() {
        let params = ExplorationParams::default();
        for stage in STAGES.iter() {
            for win_rate in [0.0, 0.2, 0.5, 0.8, 1.0] {
                let mut previous = f64::INFINITY;
                for steps in (0..5000).step_by(7) {
                    let eps = epsilon(&params, steps, win_rate, Some(stage));
                    assert!(eps <= previous + 1e-12, "not monotone at {steps}");
                    assert!(eps >= params.min_epsilon && eps <= params.max_epsilon);
                    previous = eps;
                }
            }
        }
    }

    #[test]
    fn test_epsilon_multipliers() {
        let params = ExplorationParams::default();
        let mid = current_stage(300);
        assert!((epsilon(&params, 0, 0.5, Some(mid)) - 0.1).abs() < 1e-12);
        assert!((epsilon(&params, 0, 0.1, Some(mid)) - 0.15).abs() < 1e-12);
        assert!((epsilon(&params, 0, 0.9, Some(mid)) - 0.07).abs() < 1e-12);
        assert!((epsilon(&params, 0, 0.5, Some(current_stage(0))) - 0.15).abs() < 1e-12);
        assert!((epsilon(&params, 0, 0.5, Some(current_stage(2000))) - 0.06).abs() < 1e-12);
        // Losing badly in the first stage hits the ceiling.
        let high = ExplorationParams {
            base_epsilon: 0.25,
            ..params
        };
        assert_eq!(epsilon(&high, 0, 0.0, Some(current_stage(0))), high.max_epsilon);
        // Long training floors at min before multipliers, then clamps.
        assert_eq!(
            epsilon(&params, 1_000_000, 0.9, Some(current_stage(2000))),
            params.min_epsilon
        );
    }

    #[test]
    fn test_curriculum_disabled_is_neutral() {
        let params = ExplorationParams::default();
        assert!((epsilon(&params, 0, 0.5, None) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_win_rate_window() {
        let exploration = AdaptiveExploration::new(ExplorationParams {
            win_rate_window: 4,
            ..ExplorationParams::default()
        });
        assert_eq!(exploration.win_rate(), 0.5);
        for won in [false, false, true, true, true, true] {
            exploration.record_result(won);
        }
        assert_eq!(exploration.games_in_window(), 4);
        assert_eq!(exploration.win_rate(), 1.0);
    }
}
