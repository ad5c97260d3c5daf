//! State encoder: board -> flat `[5, 10, 10]` f32 tensor data.
//!
//! Channels, from the perspective of `me`:
//! 0. own men
//! 1. own kings
//! 2. opponent men
//! 3. opponent kings
//! 4. playable-square mask
//!
//! Unknown cells carry no ownership and are left out of every channel.

use crate::board::{is_playable, Board, Cell, Color, BOARD_SIZE};

pub const NUM_CHANNELS: usize = 5;

/// Number of f32 values per encoded state.
pub const STATE_SIZE: usize = NUM_CHANNELS * BOARD_SIZE * BOARD_SIZE;

const PLANE: usize = BOARD_SIZE * BOARD_SIZE;

pub fn encode_state(board: &Board, me: Color) -> Vec<f32> {
    let mut out = vec![0.0f32; STATE_SIZE];
    for (row, col, cell) in board.squares() {
        let offset = row * BOARD_SIZE + col;
        if is_playable(row, col) {
            out[4 * PLANE + offset] = 1.0;
        }
        if let Cell::Piece(p) = cell {
            let channel = match (p.color == me, p.king) {
                (true, false) => 0,
                (true, true) => 1,
                (false, false) => 2,
                (false, true) => 3,
            };
            out[channel * PLANE + offset] = 1.0;
        }
    }
    out
}
