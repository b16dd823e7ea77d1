//! Clue-Cell Mapper: word spans and their clue numbers.
//!
//! Across and down starts are both consumed in row-major scan order. This
//! matches the archive format's numbering; other puzzle sources may order
//! down clues column-major and would need their own mapper.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::grid::{Grid, Pos};
use crate::puzzle::{Puzzle, PuzzleError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Across,
    Down,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Across => Direction::Down,
            Direction::Down => Direction::Across,
        }
    }

    /// (row delta, col delta) of one step along the word.
    pub fn delta(self) -> (usize, usize) {
        match self {
            Direction::Across => (0, 1),
            Direction::Down => (1, 0),
        }
    }

    fn slot(self) -> usize {
        match self {
            Direction::Across => 0,
            Direction::Down => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Across => "across",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `"{number}-{direction}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClueKey {
    pub number: u32,
    pub direction: Direction,
}

impl fmt::Display for ClueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.number, self.direction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClueSpan {
    pub number: u32,
    pub direction: Direction,
    pub clue: String,
    pub answer: String,
    pub cells: Vec<Pos>,
}

impl ClueSpan {
    pub fn key(&self) -> ClueKey {
        ClueKey {
            number: self.number,
            direction: self.direction,
        }
    }

    pub fn first(&self) -> Pos {
        self.cells[0]
    }

    pub fn last(&self) -> Pos {
        self.cells[self.cells.len() - 1]
    }

    pub fn position_of(&self, pos: Pos) -> Option<usize> {
        self.cells.iter().position(|p| *p == pos)
    }
}

/// All spans of a puzzle, read-only after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClueMap {
    across: Vec<ClueSpan>,
    down: Vec<ClueSpan>,
    /// Per cell index: [across span index, down span index].
    membership: Vec<[Option<usize>; 2]>,
}

impl ClueMap {
    /// Scan the grid in row-major order collecting span starts.
    ///
    /// A start needs an open cell, a blocked-or-absent predecessor and an
    /// open successor in the word direction. Clue text and answers are
    /// consumed in order from the puzzle's lists; a count mismatch is a
    /// data error.
    pub fn build(puzzle: &Puzzle, grid: &Grid) -> Result<Self, PuzzleError> {
        let mut across = Vec::new();
        let mut down = Vec::new();
        let mut membership = vec![[None, None]; grid.rows() * grid.cols()];

        for cell in grid.cells() {
            if cell.blocked {
                continue;
            }
            for direction in [Direction::Across, Direction::Down] {
                if !starts_span(grid, cell.pos, direction) {
                    continue;
                }
                let number = cell.number.ok_or(PuzzleError::UnnumberedSpan {
                    row: cell.pos.row,
                    col: cell.pos.col,
                })?;
                let spans = match direction {
                    Direction::Across => &mut across,
                    Direction::Down => &mut down,
                };
                let cells = walk(grid, cell.pos, direction);
                for pos in &cells {
                    if let Some(i) = grid.index_of(*pos) {
                        membership[i][direction.slot()] = Some(spans.len());
                    }
                }
                spans.push(ClueSpan {
                    number,
                    direction,
                    clue: String::new(),
                    answer: String::new(),
                    cells,
                });
            }
        }

        attach_text(&mut across, &puzzle.clues.across, &puzzle.answers.across, "across")?;
        attach_text(&mut down, &puzzle.clues.down, &puzzle.answers.down, "down")?;

        log::debug!("mapped {} across / {} down spans", across.len(), down.len());
        Ok(Self {
            across,
            down,
            membership,
        })
    }

    /// Spans of one direction, in scan order (also the tab order).
    pub fn spans(&self, direction: Direction) -> &[ClueSpan] {
        match direction {
            Direction::Across => &self.across,
            Direction::Down => &self.down,
        }
    }

    pub fn get(&self, key: ClueKey) -> Option<&ClueSpan> {
        self.spans(key.direction).iter().find(|s| s.number == key.number)
    }

    /// Index (within `spans(direction)`) of the span through `pos`.
    pub fn span_index_at(&self, grid: &Grid, pos: Pos, direction: Direction) -> Option<usize> {
        let i = grid.index_of(pos)?;
        self.membership.get(i)?[direction.slot()]
    }

    pub fn span_at(&self, grid: &Grid, pos: Pos, direction: Direction) -> Option<&ClueSpan> {
        let index = self.span_index_at(grid, pos, direction)?;
        self.spans(direction).get(index)
    }

    pub fn len(&self) -> usize {
        self.across.len() + self.down.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClueSpan> {
        self.across.iter().chain(self.down.iter())
    }
}

fn step(grid: &Grid, pos: Pos, direction: Direction) -> Option<Pos> {
    let (dr, dc) = direction.delta();
    let next = Pos::new(pos.row + dr, pos.col + dc);
    (next.row < grid.rows() && next.col < grid.cols()).then_some(next)
}

fn step_back(pos: Pos, direction: Direction) -> Option<Pos> {
    match direction {
        Direction::Across => pos.col.checked_sub(1).map(|c| Pos::new(pos.row, c)),
        Direction::Down => pos.row.checked_sub(1).map(|r| Pos::new(r, pos.col)),
    }
}

fn starts_span(grid: &Grid, pos: Pos, direction: Direction) -> bool {
    let before_closed = step_back(pos, direction).map_or(true, |p| !grid.is_open(p));
    let after_open = step(grid, pos, direction).is_some_and(|p| grid.is_open(p));
    before_closed && after_open
}

fn walk(grid: &Grid, start: Pos, direction: Direction) -> Vec<Pos> {
    let mut cells = vec![start];
    let mut cur = start;
    while let Some(next) = step(grid, cur, direction).filter(|p| grid.is_open(*p)) {
        cells.push(next);
        cur = next;
    }
    cells
}

fn attach_text(
    spans: &mut [ClueSpan],
    clues: &[String],
    answers: &[String],
    direction: &'static str,
) -> Result<(), PuzzleError> {
    if clues.len() != spans.len() {
        return Err(PuzzleError::ClueCountMismatch {
            direction,
            expected: spans.len(),
            actual: clues.len(),
        });
    }
    for (i, span) in spans.iter_mut().enumerate() {
        span.clue = clues[i].clone();
        // Older archive entries sometimes omit answers.
        span.answer = answers.get(i).cloned().unwrap_or_default();
    }
    Ok(())
}
