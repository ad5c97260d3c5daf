//! Move codec: (from square, to square) <-> flat action index.
//!
//! Only the 50 playable squares take part. The index is
//! `from_playable * 50 + to_playable`, so every (from, to) pair gets its own
//! slot; long flying-king moves along one diagonal never collide.

use serde::{Deserialize, Serialize};

use crate::board::{is_playable, BOARD_SIZE};
use crate::error::CoreError;

/// Number of playable squares on the board.
pub const PLAYABLE_SQUARES: usize = BOARD_SIZE * BOARD_SIZE / 2;

/// Size of the policy output.
pub const ACTION_SPACE_SIZE: usize = PLAYABLE_SQUARES * PLAYABLE_SQUARES;

/// Index of a playable square in row-major order, or `None`.
#[inline]
pub fn playable_index(row: i64, col: i64) -> Option<usize> {
    if row < 0 || col < 0 {
        return None;
    }
    let (row, col) = (row as usize, col as usize);
    if !is_playable(row, col) {
        return None;
    }
    Some(row * (BOARD_SIZE / 2) + col / 2)
}

/// Coordinates of the `index`-th playable square.
#[inline]
pub fn playable_square(index: usize) -> Option<(usize, usize)> {
    if index >= PLAYABLE_SQUARES {
        return None;
    }
    let row = index / (BOARD_SIZE / 2);
    let col = 2 * (index % (BOARD_SIZE / 2)) + (1 - row % 2);
    Some((row, col))
}

/// Encode a move; `None` when either end is not a playable square.
pub fn encode(from_row: i64, from_col: i64, to_row: i64, to_col: i64) -> Option<usize> {
    let from = playable_index(from_row, from_col)?;
    let to = playable_index(to_row, to_col)?;
    Some(from * PLAYABLE_SQUARES + to)
}

/// Inverse of [`encode`].
pub fn decode(index: usize) -> Option<(usize, usize, usize, usize)> {
    if index >= ACTION_SPACE_SIZE {
        return None;
    }
    let (fr, fc) = playable_square(index / PLAYABLE_SQUARES)?;
    let (tr, tc) = playable_square(index % PLAYABLE_SQUARES)?;
    Some((fr, fc, tr, tc))
}

/// A move as stored in transitions: `{"from": [r, c], "to": [r, c]}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub from: [i64; 2],
    pub to: [i64; 2],
}

impl Move {
    pub fn new(from_row: i64, from_col: i64, to_row: i64, to_col: i64) -> Self {
        Self {
            from: [from_row, from_col],
            to: [to_row, to_col],
        }
    }

    pub fn encode(&self) -> Result<usize, CoreError> {
        if playable_index(self.from[0], self.from[1]).is_none() {
            return Err(CoreError::UnplayableSquare {
                row: self.from[0],
                col: self.from[1],
            });
        }
        encode(self.from[0], self.from[1], self.to[0], self.to[1]).ok_or(
            CoreError::UnplayableSquare {
                row: self.to[0],
                col: self.to[1],
            },
        )
    }

    pub fn decode(index: usize) -> Result<Self, CoreError> {
        let (fr, fc, tr, tc) = decode(index).ok_or(CoreError::InvalidActionIndex(index))?;
        Ok(Self::new(fr as i64, fc as i64, tr as i64, tc as i64))
    }

    /// Caller notation, `"r,c->r,c"`.
    pub fn notation(&self) -> String {
        format!(
            "{},{}->{},{}",
            self.from[0], self.from[1], self.to[0], self.to[1]
        )
    }
}

/// Parse caller notation `"fromRow,fromCol->toRow,toCol"`.
pub fn parse_move(text: &str) -> Result<Move, CoreError> {
    let invalid = || CoreError::InvalidMoveNotation(text.to_string());

    let (from, to) = text.split_once("->").ok_or_else(invalid)?;
    let coords = |part: &str| -> Result<[i64; 2], CoreError> {
        let (r, c) = part.split_once(',').ok_or_else(invalid)?;
        let r = r.trim().parse().map_err(|_| invalid())?;
        let c = c.trim().parse().map_err(|_| invalid())?;
        Ok([r, c])
    };

    Ok(Move {
        from: coords(from)?,
        to: coords(to)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_playable() -> Vec<(usize, usize)> {
        (0..BOARD_SIZE)
            .flat_map(|r| (0..BOARD_SIZE).map(move |c| (r, c)))
            .filter(|&(r, c)| is_playable(r, c))
            .collect()
    }

    #[test]
    fn test_playable_square_layout() {
        let squares = all_playable();
        assert_eq!(squares.len(), PLAYABLE_SQUARES);
        for (i, &(r, c)) in squares.iter().enumerate() {
            assert_eq!(playable_index(r as i64, c as i64), Some(i));
            assert_eq!(playable_square(i), Some((r, c)));
        }
        assert_eq!(playable_square(PLAYABLE_SQUARES), None);
    }

    #[test]
    fn test_roundtrip_over_all_pairs() {
        let squares = all_playable();
        for &(fr, fc) in &squares {
            for &(tr, tc) in &squares {
                let idx = encode(fr as i64, fc as i64, tr as i64, tc as i64).unwrap();
                assert!(idx < ACTION_SPACE_SIZE);
                assert_eq!(decode(idx), Some((fr, fc, tr, tc)));
            }
        }
    }

    #[test]
    fn test_flying_king_landings_do_not_collide() {
        // King on (9, 0) sliding up the long diagonal.
        let from = (9i64, 0i64);
        let landings: Vec<usize> = (1..=9)
            .map(|d| encode(from.0, from.1, from.0 - d, from.1 + d).unwrap())
            .collect();
        let mut unique = landings.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), landings.len());
    }

    #[test]
    fn test_encode_rejects_unplayable() {
        assert_eq!(encode(0, 0, 1, 1), None); // light square origin
        assert_eq!(encode(0, 1, 1, 1), None); // light square target
        assert_eq!(encode(-1, 0, 0, 1), None);
        assert_eq!(encode(9, 10, 8, 9), None);
        assert_eq!(decode(ACTION_SPACE_SIZE), None);
    }

    #[test]
    fn test_parse_move_notation() {
        let mv = parse_move("6,1->5,0").unwrap();
        assert_eq!(mv, Move::new(6, 1, 5, 0));
        assert_eq!(mv.notation(), "6,1->5,0");
        assert_eq!(parse_move(" 6, 1 -> 5 ,0 ").unwrap(), mv);

        assert!(parse_move("6,1-5,0").is_err());
        assert!(parse_move("6->5,0").is_err());
        assert!(parse_move("a,b->c,d").is_err());
    }

    #[test]
    fn test_move_encode_errors_name_the_square() {
        let err = Move::new(6, 1, 5, 1).encode().unwrap_err();
        assert_eq!(err, CoreError::UnplayableSquare { row: 5, col: 1 });
        let err = Move::new(0, 0, 1, 0).encode().unwrap_err();
        assert_eq!(err, CoreError::UnplayableSquare { row: 0, col: 0 });
        assert!(matches!(
            Move::decode(ACTION_SPACE_SIZE + 3),
            Err(CoreError::InvalidActionIndex(_))
        ));
    }

    #[test]
    fn test_move_json_shape() {
        let mv = Move::new(6, 1, 5, 0);
        let text = serde_json::to_string(&mv).unwrap();
        assert_eq!(text, r#"{"from":[6,1],"to":[5,0]}"#);
        let back: Move = serde_json::from_str(&text).unwrap();
        assert_eq!(back, mv);
    }
}
