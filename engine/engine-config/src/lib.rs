//! Centralized configuration loading from config.toml.
//!
//! This crate provides configuration structs and loading logic shared
//! across all Rust components (trainer, web, learner).
//!
//! # Configuration Priority
//!
//! Settings are loaded with the following priority (highest to lowest):
//! 1. Environment variables (`DRAUGHTS_<SECTION>_<KEY>`)
//! 2. config.toml file
//! 3. Built-in defaults (config.defaults.toml, embedded at compile time)
//!
//! # Environment Variable Override Pattern
//!
//! ```text
//! DRAUGHTS_<SECTION>_<KEY>=value
//!
//! Examples:
//!     DRAUGHTS_COMMON_DATA_DIR=/data
//!     DRAUGHTS_MODEL_ARCHITECTURE=baseline
//!     DRAUGHTS_TRAINING_BATCH_SIZE=64
//!     DRAUGHTS_REPLAY_MAX_GAMES=5000
//!     DRAUGHTS_WEB_PORT=3000
//! ```

mod defaults;
mod loader;
mod structs;

pub use defaults::*;
pub use loader::{apply_env_overrides, load_config, load_from_path, CONFIG_SEARCH_PATHS};
pub use structs::*;

#[cfg(test)]
mod tests;
