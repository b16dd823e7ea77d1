//! Grid Model Builder: flat puzzle arrays -> 2-D addressable cells.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::puzzle::Puzzle;

/// Cell coordinate. Its string key `"{row},{col}"` is the unit of
/// synchronization on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pos {
    pub row: usize,
    pub col: usize,
}

impl Pos {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.row, self.col)
    }
}

/// Error parsing a `"{row},{col}"` cell key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cell key: {0:?}")]
pub struct ParsePosError(pub String);

impl FromStr for Pos {
    type Err = ParsePosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (row, col) = s.split_once(',').ok_or_else(|| ParsePosError(s.to_string()))?;
        let row = row.trim().parse().map_err(|_| ParsePosError(s.to_string()))?;
        let col = col.trim().parse().map_err(|_| ParsePosError(s.to_string()))?;
        Ok(Pos { row, col })
    }
}

/// Derived per-cell metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub pos: Pos,
    pub blocked: bool,
    pub number: Option<u32>,
    pub circled: bool,
    pub shaded: bool,
}

/// Row-major cell table, rebuilt whenever a puzzle is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    rows: usize,
    cols: usize,
    cells: Vec<Cell>,
}

impl Grid {
    /// O(rows·cols), no side effects. The puzzle should already be
    /// validated; missing trailing entries are treated as blocks.
    pub fn build(puzzle: &Puzzle) -> Self {
        let rows = puzzle.rows();
        let cols = puzzle.cols();
        let flag = |list: &Option<Vec<u8>>, i: usize| {
            list.as_ref().and_then(|v| v.get(i)).is_some_and(|f| *f != 0)
        };

        let cells = (0..rows * cols)
            .map(|i| {
                let number = puzzle.gridnums.get(i).copied().filter(|n| *n != 0);
                Cell {
                    pos: Pos::new(i / cols, i % cols),
                    blocked: puzzle.is_block_at(i),
                    number,
                    circled: flag(&puzzle.circles, i),
                    shaded: flag(&puzzle.shades, i),
                }
            })
            .collect();

        Self { rows, cols, cells }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Cell> {
        if row < self.rows && col < self.cols {
            self.cells.get(row * self.cols + col)
        } else {
            None
        }
    }

    pub fn cell(&self, pos: Pos) -> Option<&Cell> {
        self.get(pos.row, pos.col)
    }

    /// In range and not blocked.
    pub fn is_open(&self, pos: Pos) -> bool {
        self.cell(pos).is_some_and(|c| !c.blocked)
    }

    pub fn index_of(&self, pos: Pos) -> Option<usize> {
        (pos.row < self.rows && pos.col < self.cols).then(|| pos.row * self.cols + pos.col)
    }

    /// One row as a slice.
    pub fn row(&self, row: usize) -> &[Cell] {
        if row >= self.rows {
            return &[];
        }
        &self.cells[row * self.cols..(row + 1) * self.cols]
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn open_cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter().filter(|c| !c.blocked)
    }
}
