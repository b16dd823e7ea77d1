//! Immutable puzzle description in the archive JSON format.
//!
//! ```json
//! {
//!   "size": { "rows": 15, "cols": 15 },
//!   "grid": ["A", "B", ".", ...],
//!   "gridnums": [1, 2, 0, ...],
//!   "clues":   { "across": ["1. ..."], "down": ["1. ..."] },
//!   "answers": { "across": ["AB"],     "down": ["..."] },
//!   "title": "...", "author": "...", "date": "2014-05-02"
//! }
//! ```
//!
//! A cell whose grid value equals [`BLOCK`] is a black square. Decorative
//! `circles` / `shades` arrays are optional and, when present, parallel
//! `grid`.

use serde::{Deserialize, Serialize};

/// Sentinel grid value for a blocked cell.
pub const BLOCK: &str = ".";

/// Grid dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuzzleSize {
    pub rows: usize,
    pub cols: usize,
}

/// Per-direction ordered lists (clue text or answers).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClueLists {
    #[serde(default)]
    pub across: Vec<String>,
    #[serde(default)]
    pub down: Vec<String>,
}

/// Optional descriptive metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuzzleMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    /// Publication date, `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Day of week.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dow: Option<String>,
}

/// Complete puzzle payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Puzzle {
    pub size: PuzzleSize,
    pub grid: Vec<String>,
    pub gridnums: Vec<u32>,
    #[serde(default)]
    pub clues: ClueLists,
    #[serde(default)]
    pub answers: ClueLists,
    #[serde(flatten)]
    pub metadata: PuzzleMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circles: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shades: Option<Vec<u8>>,
}

/// Malformed puzzle payloads. Raised at load time, before any state exists.
#[derive(Debug, thiserror::Error)]
pub enum PuzzleError {
    #[error("invalid puzzle json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("puzzle has zero rows or columns")]
    EmptyGrid,
    #[error("puzzle size {rows}x{cols} is too large")]
    TooLarge { rows: usize, cols: usize },
    #[error("{field} has {actual} entries, expected {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{direction} clue list has {actual} entries for {expected} spans")]
    ClueCountMismatch {
        direction: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("word starting at ({row},{col}) has no clue number")]
    UnnumberedSpan { row: usize, col: usize },
}

impl Puzzle {
    /// Parse and validate a JSON payload.
    pub fn from_json(json: &str) -> Result<Self, PuzzleError> {
        let puzzle: Puzzle = serde_json::from_str(json)?;
        puzzle.validate()?;
        Ok(puzzle)
    }

    pub fn rows(&self) -> usize {
        self.size.rows
    }

    pub fn cols(&self) -> usize {
        self.size.cols
    }

    /// Check that every parallel array matches `rows * cols`.
    pub fn validate(&self) -> Result<(), PuzzleError> {
        if self.size.rows == 0 || self.size.cols == 0 {
            return Err(PuzzleError::EmptyGrid);
        }
        let expected = self
            .size
            .rows
            .checked_mul(self.size.cols)
            .ok_or(PuzzleError::TooLarge {
                rows: self.size.rows,
                cols: self.size.cols,
            })?;
        check_len("grid", expected, self.grid.len())?;
        check_len("gridnums", expected, self.gridnums.len())?;
        if let Some(circles) = &self.circles {
            check_len("circles", expected, circles.len())?;
        }
        if let Some(shades) = &self.shades {
            check_len("shades", expected, shades.len())?;
        }
        Ok(())
    }

    /// Linear index for in-range coordinates.
    pub fn index(&self, row: usize, col: usize) -> Option<usize> {
        (row < self.size.rows && col < self.size.cols).then(|| row * self.size.cols + col)
    }

    pub fn is_block_at(&self, index: usize) -> bool {
        self.grid.get(index).map_or(true, |v| v == BLOCK)
    }

    /// Answer character for an open cell. Multi-letter (rebus) answers
    /// contribute their first character.
    pub fn answer_at(&self, row: usize, col: usize) -> Option<char> {
        let index = self.index(row, col)?;
        if self.is_block_at(index) {
            return None;
        }
        self.grid[index].chars().next()
    }

    /// Number of non-blocked cells.
    pub fn open_cell_count(&self) -> usize {
        self.grid.iter().filter(|v| v.as_str() != BLOCK).count()
    }
}

fn check_len(field: &'static str, expected: usize, actual: usize) -> Result<(), PuzzleError> {
    if expected == actual {
        Ok(())
    } else {
        Err(PuzzleError::LengthMismatch {
            field,
            expected,
            actual,
        })
    }
}

/// Build a puzzle from row strings (`#` marks a block). Numbers, clue
/// placeholders and answers are derived from the layout.
#[cfg(any(test, feature = "test-util"))]
pub fn puzzle_from_rows(rows: &[&str]) -> Puzzle {
    let n_rows = rows.len();
    let n_cols = rows.first().map_or(0, |r| r.chars().count());
    let cells: Vec<Vec<char>> = rows.iter().map(|r| r.chars().collect()).collect();
    let open = |r: usize, c: usize| cells[r][c] != '#';

    let mut grid = Vec::with_capacity(n_rows * n_cols);
    let mut gridnums = Vec::with_capacity(n_rows * n_cols);
    let mut clues = ClueLists::default();
    let mut answers = ClueLists::default();
    let mut next_number = 1;

    for r in 0..n_rows {
        for c in 0..n_cols {
            if !open(r, c) {
                grid.push(BLOCK.to_string());
                gridnums.push(0);
                continue;
            }
            grid.push(cells[r][c].to_string());
            let starts_across = (c == 0 || !open(r, c - 1)) && c + 1 < n_cols && open(r, c + 1);
            let starts_down = (r == 0 || !open(r - 1, c)) && r + 1 < n_rows && open(r + 1, c);
            if starts_across || starts_down {
                gridnums.push(next_number);
                if starts_across {
                    let word: String = (c..n_cols).take_while(|&cc| open(r, cc)).map(|cc| cells[r][cc]).collect();
                    clues.across.push(format!("{next_number}. across {word}"));
                    answers.across.push(word);
                }
                if starts_down {
                    let word: String = (r..n_rows).take_while(|&rr| open(rr, c)).map(|rr| cells[rr][c]).collect();
                    clues.down.push(format!("{next_number}. down {word}"));
                    answers.down.push(word);
                }
                next_number += 1;
            } else {
                gridnums.push(0);
            }
        }
    }

    Puzzle {
        size: PuzzleSize { rows: n_rows, cols: n_cols },
        grid,
        gridnums,
        clues,
        answers,
        metadata: PuzzleMetadata::default(),
        circles: None,
        shades: None,
    }
}
