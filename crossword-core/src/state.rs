//! Local puzzle state and its pure transition function.
//!
//! ```text
//!   Action ──► reduce(&state, &action, origin) ──► state'
//!                                                   │
//!                             EffectRunner::plan ◄──┘  (persistence / publish)
//! ```
//!
//! `reduce` never performs I/O and never fails: requests that reference
//! out-of-range or blocked cells return the state unchanged.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::board::Board;
use crate::grid::Pos;
use crate::navigation::Selection;
use crate::validation;

/// Where an action came from. Remote actions are never re-published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Local,
    Remote,
}

/// How a cell write interacts with pencil mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryMode {
    /// Tagged as a pencil mark when pencil mode is on.
    #[default]
    Auto,
    /// Always a committed entry (reveals).
    Force,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    pub elapsed_seconds: u64,
    pub paused: bool,
}

/// A full copy of the shareable parts of a state: restored saves,
/// fetched room state and inbound `state_sync` payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub entries: BTreeMap<Pos, char>,
    pub checks: BTreeMap<Pos, bool>,
    pub pencil: BTreeSet<Pos>,
    pub elapsed_seconds: u64,
    pub paused: bool,
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    LoadPuzzle {
        board: Arc<Board>,
        saved: Option<Snapshot>,
    },
    SetCell {
        pos: Pos,
        value: Option<char>,
        mode: EntryMode,
    },
    SetSelection(Selection),
    ToggleDirection,
    CheckCell {
        pos: Pos,
        correct: bool,
    },
    ClearChecks,
    SetComplete(bool),
    TickTimer,
    ResetTimer,
    TogglePause,
    /// Overwrite the timer from a shared clock.
    SyncTimer {
        elapsed_seconds: u64,
        paused: bool,
    },
    ClearGrid,
    TogglePencil,
    /// `replace` discards local entries/checks first (authoritative fetch);
    /// otherwise snapshot values are layered over the local ones.
    ApplySnapshot {
        snapshot: Snapshot,
        replace: bool,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::LoadPuzzle { .. } => "load_puzzle",
            Action::SetCell { .. } => "set_cell",
            Action::SetSelection(_) => "set_selection",
            Action::ToggleDirection => "toggle_direction",
            Action::CheckCell { .. } => "check_cell",
            Action::ClearChecks => "clear_checks",
            Action::SetComplete(_) => "set_complete",
            Action::TickTimer => "tick_timer",
            Action::ResetTimer => "reset_timer",
            Action::TogglePause => "toggle_pause",
            Action::SyncTimer { .. } => "sync_timer",
            Action::ClearGrid => "clear_grid",
            Action::TogglePencil => "toggle_pencil",
            Action::ApplySnapshot { .. } => "apply_snapshot",
        }
    }
}

/// Client-local view of one puzzle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PuzzleState {
    pub board: Option<Arc<Board>>,
    pub entries: BTreeMap<Pos, char>,
    pub checks: BTreeMap<Pos, bool>,
    pub pencil: BTreeSet<Pos>,
    pub pencil_mode: bool,
    pub selection: Option<Selection>,
    pub highlighted: Vec<Pos>,
    pub complete: bool,
    pub timer: TimerState,
}

impl PuzzleState {
    pub fn puzzle_id(&self) -> Option<&str> {
        self.board.as_deref().map(|b| b.puzzle_id.as_str())
    }

    pub fn entry(&self, pos: Pos) -> Option<char> {
        self.entries.get(&pos).copied()
    }

    pub fn is_filled(&self, pos: Pos) -> bool {
        self.entries.contains_key(&pos)
    }

    /// Committed (non-pencil) entries.
    pub fn committed(&self) -> impl Iterator<Item = (&Pos, &char)> {
        self.entries.iter().filter(|(pos, _)| !self.pencil.contains(pos))
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            entries: self.entries.clone(),
            checks: self.checks.clone(),
            pencil: self.pencil.clone(),
            elapsed_seconds: self.timer.elapsed_seconds,
            paused: self.timer.paused,
            complete: self.complete,
        }
    }

    fn is_open(&self, pos: Pos) -> bool {
        self.board.as_deref().is_some_and(|b| b.grid.is_open(pos))
    }

    fn refresh_highlight(&mut self) {
        self.highlighted = match (self.board.as_deref(), self.selection) {
            (Some(board), Some(sel)) => board.navigator().highlighted(sel),
            _ => Vec::new(),
        };
    }
}

/// Pure transition. Always returns a fresh state; the input is untouched.
pub fn reduce(state: &PuzzleState, action: &Action, origin: Origin) -> PuzzleState {
    let mut next = state.clone();
    match action {
        Action::LoadPuzzle { board, saved } => {
            next = PuzzleState {
                board: Some(Arc::clone(board)),
                selection: board.navigator().first_selection(),
                ..PuzzleState::default()
            };
            if let Some(saved) = saved {
                restore(&mut next, saved, board);
            }
            next.refresh_highlight();
        }
        Action::SetCell { pos, value, mode } => {
            if !state.is_open(*pos) {
                log::trace!("ignoring write to closed cell {pos}");
                return next;
            }
            match value.and_then(|c| c.to_uppercase().next()) {
                Some(letter) => {
                    next.entries.insert(*pos, letter);
                    let pencil = origin == Origin::Local && *mode == EntryMode::Auto && state.pencil_mode;
                    if pencil {
                        next.pencil.insert(*pos);
                    } else {
                        next.pencil.remove(pos);
                    }
                }
                None => {
                    next.entries.remove(pos);
                    next.pencil.remove(pos);
                }
            }
            if origin == Origin::Local {
                if !next.complete {
                    next.timer.paused = false;
                }
                if let Some(board) = state.board.as_deref() {
                    if !next.complete && value.is_some() && validation::is_solved(board, &next) {
                        log::info!("puzzle {} solved", board.puzzle_id);
                        next.complete = true;
                    }
                }
            }
        }
        Action::SetSelection(selection) => {
            let Some(board) = state.board.as_deref() else {
                return next;
            };
            if let Some(sel) = board.navigator().normalize(*selection) {
                next.selection = Some(sel);
                next.refresh_highlight();
            }
        }
        Action::ToggleDirection => {
            let toggled = state
                .board
                .as_deref()
                .zip(state.selection)
                .and_then(|(board, sel)| board.navigator().toggle(sel));
            if let Some(sel) = toggled {
                next.selection = Some(sel);
                next.refresh_highlight();
            }
        }
        Action::CheckCell { pos, correct } => {
            if state.is_open(*pos) {
                next.checks.insert(*pos, *correct);
            }
        }
        Action::ClearChecks => next.checks.clear(),
        Action::SetComplete(complete) => next.complete = *complete,
        Action::TickTimer => {
            if !state.timer.paused && !state.complete {
                next.timer.elapsed_seconds += 1;
            }
        }
        Action::ResetTimer => next.timer = TimerState::default(),
        Action::TogglePause => next.timer.paused = !state.timer.paused,
        Action::SyncTimer {
            elapsed_seconds,
            paused,
        } => {
            next.timer = TimerState {
                elapsed_seconds: *elapsed_seconds,
                paused: *paused,
            };
        }
        Action::ClearGrid => {
            next.entries.clear();
            next.checks.clear();
            next.pencil.clear();
            next.complete = false;
        }
        Action::TogglePencil => next.pencil_mode = !state.pencil_mode,
        Action::ApplySnapshot { snapshot, replace } => {
            let Some(board) = state.board.clone() else {
                return next;
            };
            if *replace {
                next.entries.clear();
                next.checks.clear();
                next.pencil.clear();
                next.complete = false;
            }
            restore(&mut next, snapshot, &board);
        }
    }
    next
}

/// Layer a snapshot over `state`, dropping keys that are not open cells.
fn restore(state: &mut PuzzleState, snapshot: &Snapshot, board: &Board) {
    for (pos, value) in &snapshot.entries {
        if board.grid.is_open(*pos) {
            state.entries.insert(*pos, value.to_ascii_uppercase());
            state.pencil.remove(pos);
        }
    }
    for (pos, correct) in &snapshot.checks {
        if board.grid.is_open(*pos) {
            state.checks.insert(*pos, *correct);
        }
    }
    state
        .pencil
        .extend(snapshot.pencil.iter().filter(|p| state.entries.contains_key(p)));
    state.complete |= snapshot.complete;
    state.timer.elapsed_seconds = state.timer.elapsed_seconds.max(snapshot.elapsed_seconds);
    state.timer.paused = snapshot.paused;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clues::Direction;
    use crate::puzzle::puzzle_from_rows;

    fn loaded() -> PuzzleState {
        let board = Board::new("t", puzzle_from_rows(&["CAT#", "O#OX", "WHEN"])).unwrap();
        reduce(
            &PuzzleState::default(),
            &Action::LoadPuzzle { board, saved: None },
            Origin::Local,
        )
    }

    fn set(pos: Pos, value: char) -> Action {
        Action::SetCell {
            pos,
            value: Some(value),
            mode: EntryMode::Auto,
        }
    }

    #[test]
    fn test_load_selects_first_across_span() {
        let state = loaded();
        let sel = state.selection.unwrap();
        assert_eq!(sel.pos(), Pos::new(0, 0));
        assert_eq!(sel.direction, Direction::Across);
        assert_eq!(state.highlighted, vec![Pos::new(0, 0), Pos::new(0, 1), Pos::new(0, 2)]);
    }

    #[test]
    fn test_load_restores_saved_progress() {
        let board = Board::new("t", puzzle_from_rows(&["CAT#", "O#OX", "WHEN"])).unwrap();
        let mut saved = Snapshot {
            elapsed_seconds: 42,
            ..Snapshot::default()
        };
        saved.entries.insert(Pos::new(0, 0), 'c');
        saved.entries.insert(Pos::new(0, 3), 'Z'); // blocked: dropped
        saved.checks.insert(Pos::new(0, 0), true);
        let state = reduce(
            &PuzzleState::default(),
            &Action::LoadPuzzle { board, saved: Some(saved) },
            Origin::Local,
        );
        assert_eq!(state.entry(Pos::new(0, 0)), Some('C'));
        assert_eq!(state.entry(Pos::new(0, 3)), None);
        assert_eq!(state.checks.get(&Pos::new(0, 0)), Some(&true));
        assert_eq!(state.timer.elapsed_seconds, 42);
    }

    #[test]
    fn test_set_cell_is_idempotent() {
        let state = loaded();
        let once = reduce(&state, &set(Pos::new(1, 0), 'q'), Origin::Remote);
        let twice = reduce(&once, &set(Pos::new(1, 0), 'q'), Origin::Remote);
        assert_eq!(once, twice);
        assert_eq!(twice.entry(Pos::new(1, 0)), Some('Q'));
    }

    #[test]
    fn test_write_to_blocked_cell_is_ignored() {
        let state = loaded();
        assert_eq!(reduce(&state, &set(Pos::new(1, 1), 'X'), Origin::Local), state);
        assert_eq!(reduce(&state, &set(Pos::new(7, 7), 'X'), Origin::Local), state);
    }

    #[test]
    fn test_pencil_marks_and_commit() {
        let state = reduce(&loaded(), &Action::TogglePencil, Origin::Local);
        let pos = Pos::new(0, 0);
        let penciled = reduce(&state, &set(pos, 'C'), Origin::Local);
        assert!(penciled.pencil.contains(&pos));

        let committed = reduce(&reduce(&penciled, &Action::TogglePencil, Origin::Local), &set(pos, 'C'), Origin::Local);
        assert!(!committed.pencil.contains(&pos));

        let forced = reduce(
            &penciled,
            &Action::SetCell { pos, value: Some('C'), mode: EntryMode::Force },
            Origin::Local,
        );
        assert!(!forced.pencil.contains(&pos));
    }

    #[test]
    fn test_typing_unpauses_timer() {
        let paused = reduce(&loaded(), &Action::TogglePause, Origin::Local);
        assert!(paused.timer.paused);
        let typed = reduce(&paused, &set(Pos::new(0, 0), 'C'), Origin::Local);
        assert!(!typed.timer.paused);
        // Remote edits leave the local pause alone.
        let remote = reduce(&paused, &set(Pos::new(0, 0), 'C'), Origin::Remote);
        assert!(remote.timer.paused);
    }

    #[test]
    fn test_tick_stops_when_paused_or_complete() {
        let state = loaded();
        let ticked = reduce(&state, &Action::TickTimer, Origin::Local);
        assert_eq!(ticked.timer.elapsed_seconds, 1);
        let paused = reduce(&ticked, &Action::TogglePause, Origin::Local);
        assert_eq!(reduce(&paused, &Action::TickTimer, Origin::Local).timer.elapsed_seconds, 1);
        let done = reduce(&ticked, &Action::SetComplete(true), Origin::Local);
        assert_eq!(reduce(&done, &Action::TickTimer, Origin::Local).timer.elapsed_seconds, 1);
    }

    #[test]
    fn test_local_fill_completes_puzzle() {
        let mut state = loaded();
        let answers = [
            ((0, 0), 'C'), ((0, 1), 'A'), ((0, 2), 'T'),
            ((1, 0), 'O'), ((1, 2), 'O'), ((1, 3), 'X'),
            ((2, 0), 'W'), ((2, 1), 'H'), ((2, 2), 'E'),
        ];
        for ((r, c), v) in answers {
            state = reduce(&state, &set(Pos::new(r, c), v), Origin::Local);
            assert!(!state.complete);
        }
        state = reduce(&state, &set(Pos::new(2, 3), 'n'), Origin::Local);
        assert!(state.complete);
    }

    #[test]
    fn test_toggle_direction_guarded() {
        let state = loaded();
        let toggled = reduce(&state, &Action::ToggleDirection, Origin::Local);
        assert_eq!(toggled.selection.unwrap().direction, Direction::Down);
        let at_a = reduce(
            &state,
            &Action::SetSelection(Selection::new(Pos::new(0, 1), Direction::Across)),
            Origin::Local,
        );
        assert_eq!(reduce(&at_a, &Action::ToggleDirection, Origin::Local), at_a);
    }

    #[test]
    fn test_set_selection_rejects_blocked() {
        let state = loaded();
        let bad = Action::SetSelection(Selection::new(Pos::new(1, 1), Direction::Across));
        assert_eq!(reduce(&state, &bad, Origin::Local), state);
    }

    #[test]
    fn test_clear_grid_keeps_timer() {
        let mut state = reduce(&loaded(), &set(Pos::new(0, 0), 'C'), Origin::Local);
        state = reduce(&state, &Action::TickTimer, Origin::Local);
        state = reduce(&state, &Action::CheckCell { pos: Pos::new(0, 0), correct: true }, Origin::Local);
        let cleared = reduce(&state, &Action::ClearGrid, Origin::Local);
        assert!(cleared.entries.is_empty());
        assert!(cleared.checks.is_empty());
        assert_eq!(cleared.timer.elapsed_seconds, 1);
    }

    #[test]
    fn test_snapshot_replace_vs_merge() {
        let state = reduce(&loaded(), &set(Pos::new(0, 0), 'X'), Origin::Local);
        let mut snap = Snapshot::default();
        snap.entries.insert(Pos::new(2, 0), 'W');

        let merged = reduce(&state, &Action::ApplySnapshot { snapshot: snap.clone(), replace: false }, Origin::Remote);
        assert_eq!(merged.entry(Pos::new(0, 0)), Some('X'));
        assert_eq!(merged.entry(Pos::new(2, 0)), Some('W'));

        let replaced = reduce(&state, &Action::ApplySnapshot { snapshot: snap, replace: true }, Origin::Remote);
        assert_eq!(replaced.entry(Pos::new(0, 0)), None);
        assert_eq!(replaced.entry(Pos::new(2, 0)), Some('W'));
    }

    #[test]
    fn test_actions_before_load_are_noops() {
        let empty = PuzzleState::default();
        assert_eq!(reduce(&empty, &set(Pos::new(0, 0), 'A'), Origin::Local), empty);
        assert_eq!(reduce(&empty, &Action::ToggleDirection, Origin::Local), empty);
    }
}
