//! HTTP request handlers.

mod ai;
mod health;
mod stats;

pub use ai::*;
pub use health::*;
pub use stats::*;
