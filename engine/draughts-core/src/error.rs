use thiserror::Error;

/// Errors raised by the board and move helpers.
///
/// Reward computation never returns these: malformed input there is
/// absorbed into best-effort board metrics.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid move notation {0:?}, expected \"r,c->r,c\"")]
    InvalidMoveNotation(String),

    #[error("square ({row}, {col}) is not a playable square")]
    UnplayableSquare { row: i64, col: i64 },

    #[error("action index {0} is outside the action space")]
    InvalidActionIndex(usize),

    #[error("malformed board: {0}")]
    MalformedBoard(String),
}
