//! Core types for the online draughts learner
//!
//! This crate provides the game-facing building blocks shared by the
//! learner, the trainer and the web service:
//! - `Board`: tolerant parser for the 10x10 JSON board exchanged with clients
//! - `codec`: bidirectional mapping between (from, to) squares and the flat
//!   2,500-entry action space
//! - `encoder`: 5-channel state tensor layout consumed by the approximator
//! - `metrics`: structural board measurements (cohesion, gaps, threats, ...)
//! - `RewardEngine`: pure shaped-reward function over board transitions
//!
//! Move generation is deliberately absent: legal moves always come from the
//! caller.

pub mod board;
pub mod codec;
pub mod encoder;
pub mod error;
pub mod metrics;
pub mod reward;

// Re-export main types for convenience
pub use board::{Board, Cell, Color, Piece, BOARD_SIZE};
pub use codec::{decode, encode, parse_move, Move, ACTION_SPACE_SIZE, PLAYABLE_SQUARES};
pub use encoder::{encode_state, NUM_CHANNELS, STATE_SIZE};
pub use error::CoreError;
pub use metrics::{threat_map, BoardMetrics, Phase};
pub use reward::{Outcome, RewardEngine, RewardWeights};
