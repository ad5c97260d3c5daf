//! Structural measurements of a board from one side's point of view.
//!
//! Every measurement works on the fixed four diagonal neighbours of a
//! square. Unknown cells occupy squares (they block movement and count
//! toward the total) but belong to nobody.

use serde::Serialize;

use crate::board::{is_playable, Board, Cell, Color, BOARD_SIZE};

const DIAGONALS: [(i32, i32); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];

/// Back-rank integrity holds while at least this many pieces stay home.
pub const BACK_RANK_MIN: usize = 3;

/// Game phase derived from the total piece count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Opening,
    Midgame,
    Endgame,
}

impl Phase {
    pub fn from_total(total_pieces: usize) -> Self {
        if total_pieces >= 15 {
            Phase::Opening
        } else if total_pieces < 8 {
            Phase::Endgame
        } else {
            Phase::Midgame
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardMetrics {
    pub own_pieces: usize,
    pub opp_pieces: usize,
    pub own_kings: usize,
    pub opp_kings: usize,
    pub total_pieces: usize,
    /// Empty playable squares flanked on one diagonal by two own pieces.
    pub formation_gaps: usize,
    /// Fraction of own pieces with at least one own diagonal neighbour.
    pub cohesion: f32,
    /// Own pieces backed by an own piece on a rear diagonal.
    pub supported: usize,
    /// Own pieces with no own diagonal neighbour.
    pub isolated: usize,
    /// Own kings that the opponent could capture right now.
    pub threatened_kings: usize,
    pub back_rank: usize,
    /// Pseudo-legal destination squares available to the opponent.
    pub opponent_mobility: usize,
    /// Own kings on the central 4x4 block.
    pub central_kings: usize,
}

impl BoardMetrics {
    pub fn compute(board: &Board, me: Color) -> Self {
        let them = me.opponent();

        let mut own_pieces = 0;
        let mut own_kings = 0;
        let mut with_neighbour = 0;
        let mut supported = 0;
        let mut isolated = 0;
        let mut threatened_kings = 0;
        let mut back_rank = 0;
        let mut central_kings = 0;

        for (row, col, piece) in board.pieces(me) {
            own_pieces += 1;
            let (r, c) = (row as i32, col as i32);

            let neighbours = DIAGONALS
                .iter()
                .filter(|(dr, dc)| is_own(board, r + dr, c + dc, me))
                .count();
            if neighbours > 0 {
                with_neighbour += 1;
            } else {
                isolated += 1;
            }

            let behind = r - me.forward();
            if is_own(board, behind, c - 1, me) || is_own(board, behind, c + 1, me) {
                supported += 1;
            }

            if row == me.home_row() {
                back_rank += 1;
            }

            if piece.king {
                own_kings += 1;
                if is_threatened(board, r, c, them) {
                    threatened_kings += 1;
                }
                if (3..=6).contains(&row) && (3..=6).contains(&col) {
                    central_kings += 1;
                }
            }
        }

        let cohesion = if own_pieces == 0 {
            0.0
        } else {
            with_neighbour as f32 / own_pieces as f32
        };

        Self {
            own_pieces,
            opp_pieces: board.count(them),
            own_kings,
            opp_kings: board.count_kings(them),
            total_pieces: board.total_pieces(),
            formation_gaps: formation_gaps(board, me),
            cohesion,
            supported,
            isolated,
            threatened_kings,
            back_rank,
            opponent_mobility: mobility(board, them),
            central_kings,
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_total(self.total_pieces)
    }

    pub fn back_rank_violated(&self) -> bool {
        self.back_rank < BACK_RANK_MIN
    }
}

/// Row-major 10x10 map with 1.0 on every own piece the opponent could
/// capture immediately.
pub fn threat_map(board: &Board, me: Color) -> Vec<f32> {
    let mut map = vec![0.0; BOARD_SIZE * BOARD_SIZE];
    for (row, col, _) in board.pieces(me) {
        if is_threatened(board, row as i32, col as i32, me.opponent()) {
            map[row * BOARD_SIZE + col] = 1.0;
        }
    }
    map
}

fn is_own(board: &Board, row: i32, col: i32, me: Color) -> bool {
    matches!(board.get(row, col), Some(cell) if cell.is_color(me))
}

fn is_free(board: &Board, row: i32, col: i32) -> bool {
    matches!(board.get(row, col), Some(Cell::Empty))
}

fn formation_gaps(board: &Board, me: Color) -> usize {
    let mut gaps = 0;
    for (row, col, cell) in board.squares() {
        if !cell.is_empty() || !is_playable(row, col) {
            continue;
        }
        let (r, c) = (row as i32, col as i32);
        let flanked = (is_own(board, r - 1, c - 1, me) && is_own(board, r + 1, c + 1, me))
            || (is_own(board, r - 1, c + 1, me) && is_own(board, r + 1, c - 1, me));
        if flanked {
            gaps += 1;
        }
    }
    gaps
}

/// Whether `attacker` can jump the piece on (row, col) immediately.
///
/// Men capture in all four directions; kings capture from any distance
/// along an open diagonal.
fn is_threatened(board: &Board, row: i32, col: i32, attacker: Color) -> bool {
    DIAGONALS.iter().any(|&(dr, dc)| {
        if !is_free(board, row - dr, col - dc) {
            return false;
        }
        let mut distance = 1;
        loop {
            let (r, c) = (row + dr * distance, col + dc * distance);
            match board.get(r, c) {
                Some(Cell::Empty) => distance += 1,
                Some(Cell::Piece(p)) if p.color == attacker => {
                    return distance == 1 || p.king;
                }
                _ => return false,
            }
        }
    })
}

/// Destination squares reachable by `color` in one move, ignoring the
/// mandatory-capture rule.
fn mobility(board: &Board, color: Color) -> usize {
    let mut total = 0;
    for (row, col, piece) in board.pieces(color) {
        let (r, c) = (row as i32, col as i32);
        for &(dr, dc) in &DIAGONALS {
            if piece.king {
                let mut distance = 1;
                loop {
                    let (nr, nc) = (r + dr * distance, c + dc * distance);
                    match board.get(nr, nc) {
                        Some(Cell::Empty) => {
                            total += 1;
                            distance += 1;
                        }
                        Some(cell) if cell.is_color(color.opponent()) => {
                            if is_free(board, nr + dr, nc + dc) {
                                total += 1;
                            }
                            break;
                        }
                        _ => break,
                    }
                }
            } else {
                match board.get(r + dr, c + dc) {
                    Some(Cell::Empty) if dr == color.forward() => total += 1,
                    Some(cell) if cell.is_color(color.opponent()) => {
                        if is_free(board, r + 2 * dr, c + 2 * dc) {
                            total += 1;
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Piece;

    fn black(r: usize, c: usize, board: Board) -> Board {
        board.place(r, c, Piece::man(Color::Black))
    }

    #[test]
    fn test_initial_position_metrics() {
        let m = BoardMetrics::compute(&Board::initial(), Color::Black);
        assert_eq!(m.own_pieces, 20);
        assert_eq!(m.opp_pieces, 20);
        assert_eq!(m.total_pieces, 40);
        assert_eq!(m.back_rank, 5);
        assert_eq!(m.isolated, 0);
        assert!((m.cohesion - 1.0).abs() < 1e-6);
        assert_eq!(m.phase(), Phase::Opening);
        assert!(!m.back_rank_violated());
        // Red's front row (row 3) has 5 men; each has two forward squares on row 4,
        // except the man on (3, 0) at the edge.
        assert_eq!(m.opponent_mobility, 9);
    }

    #[test]
    fn test_isolated_and_cohesion() {
        let board = black(6, 1, black(5, 2, black(9, 8, Board::empty())));
        let m = BoardMetrics::compute(&board, Color::Black);
        assert_eq!(m.own_pieces, 3);
        assert_eq!(m.isolated, 1);
        assert!((m.cohesion - 2.0 / 3.0).abs() < 1e-6);
        // (5, 2) is backed by (6, 1); (6, 1) has nothing behind it.
        assert_eq!(m.supported, 1);
        assert_eq!(m.back_rank, 1);
        assert!(m.back_rank_violated());
    }

    #[test]
    fn test_formation_gap() {
        let board = black(7, 2, black(5, 4, Board::empty()));
        let m = BoardMetrics::compute(&board, Color::Black);
        assert_eq!(m.formation_gaps, 1); // (6, 3)
        let closed = black(6, 3, board);
        assert_eq!(BoardMetrics::compute(&closed, Color::Black).formation_gaps, 0);
    }

    #[test]
    fn test_king_threat_by_adjacent_man() {
        let board = Board::empty()
            .place(5, 4, Piece::king(Color::Black))
            .place(4, 3, Piece::man(Color::Red));
        let m = BoardMetrics::compute(&board, Color::Black);
        assert_eq!(m.threatened_kings, 1);
        assert_eq!(m.central_kings, 1);

        // Blocking the landing square removes the threat.
        let blocked = board.place(6, 5, Piece::man(Color::Black));
        assert_eq!(BoardMetrics::compute(&blocked, Color::Black).threatened_kings, 0);
    }

    #[test]
    fn test_king_threat_by_flying_king() {
        let board = Board::empty()
            .place(5, 4, Piece::king(Color::Black))
            .place(1, 0, Piece::king(Color::Red));
        assert_eq!(BoardMetrics::compute(&board, Color::Black).threatened_kings, 1);

        let man_far = Board::empty()
            .place(5, 4, Piece::king(Color::Black))
            .place(1, 0, Piece::man(Color::Red));
        assert_eq!(BoardMetrics::compute(&man_far, Color::Black).threatened_kings, 0);
    }

    #[test]
    fn test_mobility_counts_captures_and_king_slides() {
        // Red man on (4, 3) facing a black man on (5, 4) with (6, 5) empty.
        let board = Board::empty()
            .place(4, 3, Piece::man(Color::Red))
            .place(5, 4, Piece::man(Color::Black));
        let m = BoardMetrics::compute(&board, Color::Black);
        // forward (5, 2) plus the capture landing on (6, 5)
        assert_eq!(m.opponent_mobility, 2);

        let king = Board::empty().place(0, 1, Piece::king(Color::Red));
        let m = BoardMetrics::compute(&king, Color::Black);
        // (1,0) one way, (1,2)..(8,9) the other
        assert_eq!(m.opponent_mobility, 9);
    }

    #[test]
    fn test_unknown_cells_block_but_belong_to_nobody() {
        let mut board = black(6, 1, Board::empty());
        board.set(5, 2, Cell::Unknown);
        let m = BoardMetrics::compute(&board, Color::Black);
        assert_eq!(m.total_pieces, 2);
        assert_eq!(m.own_pieces, 1);
        assert_eq!(m.isolated, 1);
    }

    #[test]
    fn test_threat_map_marks_capturable_pieces() {
        let board = Board::empty()
            .place(5, 4, Piece::man(Color::Black))
            .place(4, 3, Piece::man(Color::Red))
            .place(8, 1, Piece::man(Color::Black));
        let map = threat_map(&board, Color::Black);
        assert_eq!(map.len(), 100);
        assert_eq!(map[5 * 10 + 4], 1.0);
        assert_eq!(map[8 * 10 + 1], 0.0);
        assert_eq!(map.iter().sum::<f32>(), 1.0);
    }

    #[test]
    fn test_phase_thresholds() {
        assert_eq!(Phase::from_total(15), Phase::Opening);
        assert_eq!(Phase::from_total(14), Phase::Midgame);
        assert_eq!(Phase::from_total(8), Phase::Midgame);
        assert_eq!(Phase::from_total(7), Phase::Endgame);
    }
}
