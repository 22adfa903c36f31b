//! The maze board.
//!
//! A square grid of `dim × dim` cells, each empty, holding a treasure, or
//! occupied by exactly one member. The board knows nothing about scores or
//! membership; `GameState` keeps those consistent with it.

use crate::member::MemberId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a cell, `row` counted from the top, `col` from the left.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Coord {
    pub row: usize,
    pub col: usize,
}

impl Coord {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Content of one cell.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Cell {
    Empty,
    Treasure,
    Member(MemberId),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }
}

/// Row-major grid of cells.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Board {
    dim: usize,
    cells: Vec<Cell>,
}

impl Board {
    /// Create an all-empty board of `dim × dim` cells.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            cells: vec![Cell::Empty; dim * dim],
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Total number of cells.
    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    pub fn contains(&self, coord: Coord) -> bool {
        coord.row < self.dim && coord.col < self.dim
    }

    pub fn get(&self, coord: Coord) -> Option<&Cell> {
        if !self.contains(coord) {
            return None;
        }
        self.cells.get(coord.row * self.dim + coord.col)
    }

    /// Overwrite a cell, returning what it held before. Out-of-bounds
    /// coordinates are left untouched and yield `None`.
    pub(crate) fn replace(&mut self, coord: Coord, cell: Cell) -> Option<Cell> {
        if !self.contains(coord) {
            return None;
        }
        let idx = coord.row * self.dim + coord.col;
        Some(std::mem::replace(&mut self.cells[idx], cell))
    }

    /// Iterate rows from top to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &[Cell]> {
        // chunks(0) panics, an empty board simply has no rows
        self.cells.chunks(self.dim.max(1))
    }

    pub fn treasure_count(&self) -> usize {
        self.cells.iter().filter(|c| matches!(c, Cell::Treasure)).count()
    }

    pub fn member_cell_count(&self) -> usize {
        self.cells.iter().filter(|c| matches!(c, Cell::Member(_))).count()
    }

    pub fn empty_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_empty()).count()
    }

    /// Coordinates of every treasure, in row-major order.
    pub fn treasures(&self) -> Vec<Coord> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, Cell::Treasure))
            .map(|(idx, _)| Coord::new(idx / self.dim, idx % self.dim))
            .collect()
    }

    /// Draw a uniformly random empty cell.
    ///
    /// Rejection-sampled: coordinates are redrawn until an empty one comes up.
    /// Returns `None` only when the board has no empty cell at all.
    pub fn random_empty_cell<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Coord> {
        if self.empty_count() == 0 {
            return None;
        }
        loop {
            let coord = Coord::new(rng.gen_range(0..self.dim), rng.gen_range(0..self.dim));
            if self.get(coord).map_or(false, Cell::is_empty) {
                return Some(coord);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_new_board_is_empty() {
        let board = Board::new(4);
        assert_eq!(board.capacity(), 16);
        assert_eq!(board.empty_count(), 16);
        assert_eq!(board.rows().count(), 4);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut board = Board::new(3);
        assert!(board.get(Coord::new(3, 0)).is_none());
        assert!(board.replace(Coord::new(0, 3), Cell::Treasure).is_none());
        assert_eq!(board.treasure_count(), 0);
    }

    #[test]
    fn test_random_empty_cell_finds_last_hole() {
        let mut board = Board::new(3);
        for row in 0..3 {
            for col in 0..3 {
                board.replace(Coord::new(row, col), Cell::Treasure);
            }
        }
        board.replace(Coord::new(2, 1), Cell::Empty);

        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(board.random_empty_cell(&mut rng), Some(Coord::new(2, 1)));

        board.replace(Coord::new(2, 1), Cell::Treasure);
        assert_eq!(board.random_empty_cell(&mut rng), None);
    }
}
