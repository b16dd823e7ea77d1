//! Validation Engine: entered letters against the answer key.
//!
//! Checks return reports; reveals return the [`Action`]s the store should
//! dispatch. Nothing here mutates state.

use crate::board::Board;
use crate::clues::ClueSpan;
use crate::grid::Pos;
use crate::puzzle::Puzzle;
use crate::state::{Action, EntryMode, PuzzleState};

/// Result of checking a set of cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    /// Every checked cell and its verdict, in row-major order.
    pub marks: Vec<(Pos, bool)>,
    pub incorrect: Vec<Pos>,
    /// Every cell in scope holds a committed entry.
    pub complete: bool,
    /// Complete and nothing incorrect.
    pub all_correct: bool,
    puzzle_wide: bool,
}

impl CheckReport {
    /// Store actions recording this report's marks. A whole-puzzle check
    /// that comes back all-correct also sets completion.
    pub fn actions(&self) -> Vec<Action> {
        let mut actions: Vec<Action> = self
            .marks
            .iter()
            .map(|(pos, correct)| Action::CheckCell {
                pos: *pos,
                correct: *correct,
            })
            .collect();
        if self.puzzle_wide && self.all_correct {
            actions.push(Action::SetComplete(true));
        }
        actions
    }
}

/// Blocked cells are never correct; otherwise a case-insensitive match.
pub fn check_cell(puzzle: &Puzzle, pos: Pos, entered: char) -> bool {
    puzzle
        .answer_at(pos.row, pos.col)
        .is_some_and(|answer| answer.to_uppercase().eq(entered.to_uppercase()))
}

/// Check the filled, committed cells of one span. Empty cells are skipped.
pub fn check_word(board: &Board, state: &PuzzleState, span: &ClueSpan) -> CheckReport {
    let mut report = check_cells(board, state, span.cells.iter().copied());
    report.complete = report.marks.len() == span.cells.len();
    report.all_correct = report.complete && report.incorrect.is_empty();
    report
}

/// Check every filled, committed cell of the puzzle.
pub fn check_puzzle(board: &Board, state: &PuzzleState) -> CheckReport {
    let open = board.grid.open_cells().map(|c| c.pos);
    let mut report = check_cells(board, state, open);
    report.complete = is_complete(board, state);
    report.all_correct = report.complete && report.incorrect.is_empty();
    report.puzzle_wide = true;
    report
}

fn check_cells(board: &Board, state: &PuzzleState, cells: impl Iterator<Item = Pos>) -> CheckReport {
    let mut report = CheckReport::default();
    for pos in cells {
        if state.pencil.contains(&pos) {
            continue;
        }
        let Some(entered) = state.entry(pos) else {
            continue;
        };
        let correct = check_cell(&board.puzzle, pos, entered);
        if !correct {
            report.incorrect.push(pos);
        }
        report.marks.push((pos, correct));
    }
    report
}

/// Every open cell holds a committed (non-pencil) entry.
pub fn is_complete(board: &Board, state: &PuzzleState) -> bool {
    board
        .grid
        .open_cells()
        .all(|c| state.is_filled(c.pos) && !state.pencil.contains(&c.pos))
}

/// Complete and every committed entry matches the answer key.
pub fn is_solved(board: &Board, state: &PuzzleState) -> bool {
    board.grid.open_cells().all(|c| {
        !state.pencil.contains(&c.pos)
            && state
                .entry(c.pos)
                .is_some_and(|v| check_cell(&board.puzzle, c.pos, v))
    })
}

/// Committed entries / open cells.
pub fn progress(board: &Board, state: &PuzzleState) -> (usize, usize) {
    let total = board.grid.open_cells().count();
    let filled = state
        .committed()
        .filter(|(pos, _)| board.grid.is_open(**pos))
        .count();
    (filled, total)
}

pub fn reveal_cell(board: &Board, pos: Pos) -> Vec<Action> {
    let Some(answer) = board.puzzle.answer_at(pos.row, pos.col) else {
        return Vec::new();
    };
    vec![
        Action::SetCell {
            pos,
            value: Some(answer),
            mode: EntryMode::Force,
        },
        Action::CheckCell { pos, correct: true },
    ]
}

pub fn reveal_word(board: &Board, span: &ClueSpan) -> Vec<Action> {
    span.cells.iter().flat_map(|pos| reveal_cell(board, *pos)).collect()
}

/// Fill every cell, then drop all marks and mark the puzzle complete.
pub fn reveal_puzzle(board: &Board) -> Vec<Action> {
    let mut actions: Vec<Action> = board
        .grid
        .open_cells()
        .filter_map(|c| {
            board.puzzle.answer_at(c.pos.row, c.pos.col).map(|answer| Action::SetCell {
                pos: c.pos,
                value: Some(answer),
                mode: EntryMode::Force,
            })
        })
        .collect();
    actions.push(Action::ClearChecks);
    actions.push(Action::SetComplete(true));
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clues::Direction;
    use crate::puzzle::puzzle_from_rows;
    use crate::state::{reduce, Origin};
    use std::sync::Arc;

    fn setup() -> (Arc<Board>, PuzzleState) {
        let board = Board::new("t", puzzle_from_rows(&["CAT", "O#O"])).unwrap();
        let state = reduce(
            &PuzzleState::default(),
            &Action::LoadPuzzle { board: Arc::clone(&board), saved: None },
            Origin::Local,
        );
        (board, state)
    }

    fn fill(state: &PuzzleState, cells: &[((usize, usize), char)]) -> PuzzleState {
        cells.iter().fold(state.clone(), |s, ((r, c), v)| {
            reduce(
                &s,
                &Action::SetCell { pos: Pos::new(*r, *c), value: Some(*v), mode: EntryMode::Auto },
                Origin::Remote,
            )
        })
    }

    #[test]
    fn test_check_cell_case_insensitive() {
        let (board, _) = setup();
        assert!(check_cell(&board.puzzle, Pos::new(0, 0), 'c'));
        assert!(check_cell(&board.puzzle, Pos::new(0, 0), 'C'));
        assert!(!check_cell(&board.puzzle, Pos::new(0, 0), 'X'));
        assert!(!check_cell(&board.puzzle, Pos::new(1, 1), '.'));
    }

    #[test]
    fn test_check_word_skips_empty_cells() {
        let (board, state) = setup();
        let state = fill(&state, &[((0, 0), 'C'), ((0, 1), 'X')]);
        let span = &board.clues.spans(Direction::Across)[0];
        let report = check_word(&board, &state, span);
        assert_eq!(report.marks, vec![(Pos::new(0, 0), true), (Pos::new(0, 1), false)]);
        assert_eq!(report.incorrect, vec![Pos::new(0, 1)]);
        assert!(!report.complete);
    }

    #[test]
    fn test_check_puzzle_all_correct() {
        let (board, state) = setup();
        let state = fill(&state, &[((0, 0), 'C'), ((0, 1), 'A'), ((0, 2), 'T'), ((1, 0), 'O'), ((1, 2), 'O')]);
        let report = check_puzzle(&board, &state);
        assert!(report.complete);
        assert!(report.all_correct);
        assert!(report.incorrect.is_empty());
        assert_eq!(report.actions().last(), Some(&Action::SetComplete(true)));
    }

    #[test]
    fn test_pencil_cells_excluded() {
        let (board, state) = setup();
        let state = reduce(&state, &Action::TogglePencil, Origin::Local);
        let state = reduce(
            &state,
            &Action::SetCell { pos: Pos::new(0, 0), value: Some('Z'), mode: EntryMode::Auto },
            Origin::Local,
        );
        let report = check_puzzle(&board, &state);
        assert!(report.marks.is_empty());
        assert!(!is_complete(&board, &state));
        assert_eq!(progress(&board, &state), (0, 5));
    }

    #[test]
    fn test_reveal_cell_forces_and_marks() {
        let (board, _) = setup();
        let actions = reveal_cell(&board, Pos::new(1, 2));
        assert_eq!(
            actions,
            vec![
                Action::SetCell { pos: Pos::new(1, 2), value: Some('O'), mode: EntryMode::Force },
                Action::CheckCell { pos: Pos::new(1, 2), correct: true },
            ]
        );
        assert!(reveal_cell(&board, Pos::new(1, 1)).is_empty());
    }

    #[test]
    fn test_reveal_puzzle_completes_regardless_of_entries() {
        let (board, state) = setup();
        let mut state = fill(&state, &[((0, 0), 'Q'), ((0, 1), 'Q')]);
        state = reduce(&state, &Action::CheckCell { pos: Pos::new(0, 0), correct: false }, Origin::Local);
        for action in reveal_puzzle(&board) {
            state = reduce(&state, &action, Origin::Local);
        }
        assert!(state.complete);
        assert!(state.checks.is_empty());
        assert!(is_solved(&board, &state));
    }
}
