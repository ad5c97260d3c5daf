//! Board model and the tolerant JSON parser for client-supplied boards.
//!
//! Clients send a 10x10 grid where each cell is `null` or
//! `{"color": "red" | "black", "king": bool}`, either as a JSON array or as
//! that array serialized into a string. Parsing never aborts on a bad cell:
//! anything that is not `null` and not a recognizable piece becomes
//! [`Cell::Unknown`], an occupied square of unknown ownership.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::CoreError;

/// Side length of the board.
pub const BOARD_SIZE: usize = 10;

/// Piece color. Black starts on rows 6..=9 and moves toward row 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Red,
    Black,
}

impl Color {
    pub fn opponent(self) -> Color {
        match self {
            Color::Red => Color::Black,
            Color::Black => Color::Red,
        }
    }

    /// Row the side starts on and defends.
    pub fn home_row(self) -> usize {
        match self {
            Color::Red => 0,
            Color::Black => BOARD_SIZE - 1,
        }
    }

    /// Row delta of a forward step.
    pub fn forward(self) -> i32 {
        match self {
            Color::Red => 1,
            Color::Black => -1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Color::Red => "red",
            Color::Black => "black",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "red" => Ok(Color::Red),
            "black" => Ok(Color::Black),
            other => Err(format!("unknown color '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    pub color: Color,
    #[serde(default)]
    pub king: bool,
}

impl Piece {
    pub fn man(color: Color) -> Self {
        Self { color, king: false }
    }

    pub fn king(color: Color) -> Self {
        Self { color, king: true }
    }
}

/// Content of one square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Piece(Piece),
    /// Occupied by something that could not be decoded.
    Unknown,
}

impl Cell {
    pub fn is_empty(self) -> bool {
        matches!(self, Cell::Empty)
    }

    pub fn piece(self) -> Option<Piece> {
        match self {
            Cell::Piece(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_color(self, color: Color) -> bool {
        matches!(self, Cell::Piece(p) if p.color == color)
    }

    fn from_json(value: &Value) -> Cell {
        match value {
            Value::Null => Cell::Empty,
            Value::Object(map) => {
                let color = map
                    .get("color")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<Color>().ok());
                match color {
                    Some(color) => Cell::Piece(Piece {
                        color,
                        king: map.get("king").and_then(Value::as_bool).unwrap_or(false),
                    }),
                    None => Cell::Unknown,
                }
            }
            _ => Cell::Unknown,
        }
    }

    fn to_json(self) -> Value {
        match self {
            Cell::Empty => Value::Null,
            Cell::Piece(p) => json!({ "color": p.color.as_str(), "king": p.king }),
            Cell::Unknown => json!({}),
        }
    }
}

/// True for the dark squares pieces may stand on.
#[inline]
pub fn is_playable(row: usize, col: usize) -> bool {
    row < BOARD_SIZE && col < BOARD_SIZE && (row + col) % 2 == 1
}

/// A 10x10 board snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Board {
    cells: [[Cell; BOARD_SIZE]; BOARD_SIZE],
}

impl Board {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Standard opening position: red on rows 0..=3, black on rows 6..=9.
    pub fn initial() -> Self {
        let mut board = Self::empty();
        for row in 0..BOARD_SIZE {
            for col in 0..BOARD_SIZE {
                if !is_playable(row, col) {
                    continue;
                }
                if row <= 3 {
                    board.set(row, col, Cell::Piece(Piece::man(Color::Red)));
                } else if row >= 6 {
                    board.set(row, col, Cell::Piece(Piece::man(Color::Black)));
                }
            }
        }
        board
    }

    /// Parse a board from a JSON grid or a JSON string holding one.
    ///
    /// Fails only when the value is not a grid at all. Rows that are not
    /// arrays read as empty, cells beyond 10x10 are ignored, and missing
    /// cells are empty.
    pub fn try_from_value(value: &Value) -> Result<Self, CoreError> {
        match value {
            Value::String(text) => {
                let inner: Value = serde_json::from_str(text)
                    .map_err(|e| CoreError::MalformedBoard(e.to_string()))?;
                match inner {
                    Value::Array(_) => Self::try_from_value(&inner),
                    _ => Err(CoreError::MalformedBoard(
                        "string does not encode a grid".into(),
                    )),
                }
            }
            Value::Array(rows) => {
                let mut board = Self::empty();
                for (row, row_value) in rows.iter().take(BOARD_SIZE).enumerate() {
                    if let Value::Array(cells) = row_value {
                        for (col, cell) in cells.iter().take(BOARD_SIZE).enumerate() {
                            board.cells[row][col] = Cell::from_json(cell);
                        }
                    }
                }
                Ok(board)
            }
            other => Err(CoreError::MalformedBoard(format!(
                "expected grid, got {}",
                json_kind(other)
            ))),
        }
    }

    /// Best-effort parse: anything unreadable becomes an empty board.
    pub fn from_value(value: &Value) -> Self {
        Self::try_from_value(value).unwrap_or_default()
    }

    /// Best-effort parse of serialized board text.
    pub fn from_json_str(text: &str) -> Self {
        serde_json::from_str::<Value>(text)
            .map(|v| Self::from_value(&v))
            .unwrap_or_default()
    }

    pub fn to_value(&self) -> Value {
        Value::Array(
            self.cells
                .iter()
                .map(|row| Value::Array(row.iter().map(|c| c.to_json()).collect()))
                .collect(),
        )
    }

    #[inline]
    pub fn cell(&self, row: usize, col: usize) -> Cell {
        self.cells[row][col]
    }

    /// Signed lookup; `None` when off the board.
    #[inline]
    pub fn get(&self, row: i32, col: i32) -> Option<Cell> {
        if row < 0 || col < 0 || row >= BOARD_SIZE as i32 || col >= BOARD_SIZE as i32 {
            return None;
        }
        Some(self.cells[row as usize][col as usize])
    }

    pub fn set(&mut self, row: usize, col: usize, cell: Cell) {
        self.cells[row][col] = cell;
    }

    pub fn place(mut self, row: usize, col: usize, piece: Piece) -> Self {
        self.set(row, col, Cell::Piece(piece));
        self
    }

    /// Iterate over all squares in row-major order.
    pub fn squares(&self) -> impl Iterator<Item = (usize, usize, Cell)> + '_ {
        self.cells.iter().enumerate().flat_map(|(r, row)| {
            row.iter().enumerate().map(move |(c, cell)| (r, c, *cell))
        })
    }

    /// Pieces of one color, as (row, col, piece).
    pub fn pieces(&self, color: Color) -> impl Iterator<Item = (usize, usize, Piece)> + '_ {
        self.squares().filter_map(move |(r, c, cell)| match cell {
            Cell::Piece(p) if p.color == color => Some((r, c, p)),
            _ => None,
        })
    }

    pub fn count(&self, color: Color) -> usize {
        self.pieces(color).count()
    }

    pub fn count_kings(&self, color: Color) -> usize {
        self.pieces(color).filter(|(_, _, p)| p.king).count()
    }

    /// All occupied squares, unknown cells included.
    pub fn total_pieces(&self) -> usize {
        self.squares().filter(|(_, _, c)| !c.is_empty()).count()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
