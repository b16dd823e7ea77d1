use std::sync::Arc;

use crate::clues::ClueMap;
use crate::grid::Grid;
use crate::navigation::Navigator;
use crate::puzzle::{Puzzle, PuzzleError};

/// A loaded puzzle: the immutable description plus its derived grid and
/// clue map. Shared by reference between the store, the navigator and the
/// sync layer; never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Board {
    pub puzzle_id: String,
    pub puzzle: Puzzle,
    pub grid: Grid,
    pub clues: ClueMap,
}

impl Board {
    /// Validate and derive. Fails fast on malformed payloads.
    pub fn new(puzzle_id: impl Into<String>, puzzle: Puzzle) -> Result<Arc<Self>, PuzzleError> {
        puzzle.validate()?;
        let grid = Grid::build(&puzzle);
        let clues = ClueMap::build(&puzzle, &grid)?;
        Ok(Arc::new(Self {
            puzzle_id: puzzle_id.into(),
            puzzle,
            grid,
            clues,
        }))
    }

    pub fn navigator(&self) -> Navigator<'_> {
        Navigator::new(&self.grid, &self.clues)
    }
}
