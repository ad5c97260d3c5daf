use replay_store::StoreError;
use thiserror::Error;

/// Errors raised by the learning pipeline.
#[derive(Debug, Error)]
pub enum LearnerError {
    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checkpoint mismatch: {0}")]
    CheckpointMismatch(String),

    #[error("No checkpoint found in {0}")]
    NoCheckpoint(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Request has no legal moves")]
    NoLegalMoves,

    #[error("Non-finite loss: {0}")]
    NonFiniteLoss(f32),

    #[error("Batch had no usable transitions")]
    EmptyBatch,

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Training loop stopped after {count} consecutive errors: {last}")]
    TooManyFailures { count: u32, last: String },
}

pub type Result<T> = std::result::Result<T, LearnerError>;
