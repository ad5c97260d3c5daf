//! Learning side of the draughts agent.
//!
//! - [`approximator`]: the [`Approximator`] trait and its two networks
//! - [`coordinator`]: training/serving split, health checks, kill switch
//! - [`training`]: actor-critic steps and the periodic training loop
//! - [`checkpoint`]: safetensors checkpoints with compatibility metadata
//! - [`inference`]: masked move selection for the serving model
//! - [`recorder`]: client games to stored transitions
//! - [`curriculum`], [`exploration`], [`evaluator`]: adaptive controls and
//!   performance tracking

pub mod approximator;
pub mod checkpoint;
pub mod coordinator;
pub mod curriculum;
pub mod error;
pub mod evaluator;
pub mod exploration;
pub mod inference;
mod networks;
pub mod optimizer;
pub mod recorder;
pub mod training;

pub use approximator::{build, Approximator, Architecture, Evaluation, ModelOutput, ModelSpec};
pub use checkpoint::{CheckpointMeta, CheckpointStore, TrainingModel};
pub use coordinator::{health_check, Coordinator, HealthReport, LearningStatus};
pub use curriculum::{current_stage, CurriculumManager, Stage, StageInfo};
pub use error::{LearnerError, Result};
pub use evaluator::{GameAnalysis, PerformanceEvaluator, PerformanceSummary, Trend};
pub use exploration::{AdaptiveExploration, ExplorationParams};
pub use inference::{select_move, MoveChoice};
pub use optimizer::{Adam, AdamParams};
pub use recorder::{GameRecorder, GameResult, RecordSummary, TrajectoryStep};
pub use training::{
    IterationOutcome, StepReport, TrainingLoop, TrainingSession, TrainingSettings,
};
