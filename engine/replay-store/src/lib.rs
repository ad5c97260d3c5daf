//! Experience store for the online learner.
//!
//! Finished games and their per-move transitions are appended to a SQLite
//! database shared by the web service (writer) and the trainer (reader).
//!
//! # Usage
//!
//! ```rust,ignore
//! use replay_store::{ExperienceStore, GameRecord};
//!
//! let store = ExperienceStore::open("./data/replay.db", 10_000)?;
//! store.add_game(&game, &transitions)?;
//! let batch = store.mixed(32, 0.8, Color::Black)?;
//! ```

mod error;
mod sampling;
mod store;
mod types;

pub use error::StoreError;
pub use sampling::{mixed_counts, weighted_sample_without_replacement};
pub use store::ExperienceStore;
pub use types::{GameRecord, MixedSample, NewTransition, StoreStats, StoredTransition};
