//! Navigation Engine: a pure state machine over `(row, col, direction)`.
//!
//! Every transition is a function of (grid, clue map, selection, input).
//! Nothing here touches I/O or the store; callers turn a [`NavOutcome`]
//! into store actions.
//!
//! ```text
//!  input ──► Navigator::apply(selection, filled?, input)
//!                 │
//!                 ├── selection'   (None = no change)
//!                 └── cell write   (letter / clear)
//! ```

use serde::{Deserialize, Serialize};

use crate::clues::{ClueMap, ClueSpan, Direction};
use crate::grid::{Grid, Pos};

/// The single active cursor of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub row: usize,
    pub col: usize,
    pub direction: Direction,
}

impl Selection {
    pub fn new(pos: Pos, direction: Direction) -> Self {
        Self {
            row: pos.row,
            col: pos.col,
            direction,
        }
    }

    pub fn pos(&self) -> Pos {
        Pos::new(self.row, self.col)
    }

    fn with_pos(self, pos: Pos) -> Self {
        Self::new(pos, self.direction)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrow {
    Up,
    Down,
    Left,
    Right,
}

impl Arrow {
    fn delta(self) -> (isize, isize) {
        match self {
            Arrow::Up => (-1, 0),
            Arrow::Down => (1, 0),
            Arrow::Left => (0, -1),
            Arrow::Right => (0, 1),
        }
    }

    fn direction(self) -> Direction {
        match self {
            Arrow::Up | Arrow::Down => Direction::Down,
            Arrow::Left | Arrow::Right => Direction::Across,
        }
    }
}

/// Discrete navigation inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavInput {
    Arrow(Arrow),
    Letter(char),
    Backspace,
    Delete,
    Tab,
    ShiftTab,
    Home,
    End,
    /// Space / Enter.
    ToggleDirection,
    Click(Pos),
}

/// A cell write requested by a transition. `None` clears the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellWrite {
    pub pos: Pos,
    pub value: Option<char>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavOutcome {
    pub selection: Selection,
    pub write: Option<CellWrite>,
}

impl NavOutcome {
    fn moved(selection: Selection) -> Self {
        Self {
            selection,
            write: None,
        }
    }
}

/// Borrowing view over a board's grid and clue map.
#[derive(Debug, Clone, Copy)]
pub struct Navigator<'a> {
    grid: &'a Grid,
    clues: &'a ClueMap,
}

impl<'a> Navigator<'a> {
    pub fn new(grid: &'a Grid, clues: &'a ClueMap) -> Self {
        Self { grid, clues }
    }

    /// Starting cursor after a load: first across span, else first down
    /// span, else the first open cell.
    pub fn first_selection(&self) -> Option<Selection> {
        if let Some(span) = self.clues.spans(Direction::Across).first() {
            return Some(Selection::new(span.first(), Direction::Across));
        }
        if let Some(span) = self.clues.spans(Direction::Down).first() {
            return Some(Selection::new(span.first(), Direction::Down));
        }
        self.grid
            .open_cells()
            .next()
            .map(|c| Selection::new(c.pos, Direction::Across))
    }

    /// Enforce the selection invariant: an open cell, and a direction with a
    /// span through it when one exists. Preference: requested direction,
    /// then the opposite, then across.
    pub fn normalize(&self, selection: Selection) -> Option<Selection> {
        let pos = selection.pos();
        if !self.grid.is_open(pos) {
            return None;
        }
        Some(Selection::new(pos, self.resolve_direction(pos, selection.direction)))
    }

    fn resolve_direction(&self, pos: Pos, preferred: Direction) -> Direction {
        if self.has_span(pos, preferred) {
            preferred
        } else if self.has_span(pos, preferred.opposite()) {
            preferred.opposite()
        } else {
            Direction::Across
        }
    }

    fn has_span(&self, pos: Pos, direction: Direction) -> bool {
        self.clues.span_index_at(self.grid, pos, direction).is_some()
    }

    pub fn span_of(&self, selection: Selection) -> Option<&'a ClueSpan> {
        self.clues.span_at(self.grid, selection.pos(), selection.direction)
    }

    /// Cells of the span containing the selection in its direction.
    pub fn highlighted(&self, selection: Selection) -> Vec<Pos> {
        self.span_of(selection)
            .map(|s| s.cells.clone())
            .unwrap_or_default()
    }

    /// Arrow step, skipping blocks. No wrap: `None` at the edge.
    pub fn step(&self, selection: Selection, arrow: Arrow) -> Option<Selection> {
        let (dr, dc) = arrow.delta();
        let mut row = selection.row as isize;
        let mut col = selection.col as isize;
        loop {
            row += dr;
            col += dc;
            if row < 0 || col < 0 || row as usize >= self.grid.rows() || col as usize >= self.grid.cols() {
                return None;
            }
            let pos = Pos::new(row as usize, col as usize);
            if self.grid.is_open(pos) {
                return self.normalize(Selection::new(pos, arrow.direction()));
            }
        }
    }

    /// Next cell after a letter: the following cell of the span, else the
    /// first cell of the next span in this direction (wrapping).
    pub fn advance(&self, selection: Selection) -> Selection {
        let Some(span) = self.span_of(selection) else {
            return selection;
        };
        match span.position_of(selection.pos()) {
            Some(i) if i + 1 < span.cells.len() => selection.with_pos(span.cells[i + 1]),
            _ => self.jump_span(selection, true).unwrap_or(selection),
        }
    }

    /// Previous cell: the preceding cell of the span, else the last cell of
    /// the previous span (wrapping).
    pub fn retreat(&self, selection: Selection) -> Selection {
        let Some(span) = self.span_of(selection) else {
            return selection;
        };
        match span.position_of(selection.pos()) {
            Some(i) if i > 0 => selection.with_pos(span.cells[i - 1]),
            _ => {
                let spans = self.clues.spans(selection.direction);
                match self.neighbor_span_index(selection, false) {
                    Some(j) => selection.with_pos(spans[j].last()),
                    None => selection,
                }
            }
        }
    }

    /// Tab / Shift+Tab: first cell of the next / previous span, wrapping.
    pub fn jump_span(&self, selection: Selection, forward: bool) -> Option<Selection> {
        let spans = self.clues.spans(selection.direction);
        let j = self.neighbor_span_index(selection, forward)?;
        Some(Selection::new(spans[j].first(), selection.direction))
    }

    fn neighbor_span_index(&self, selection: Selection, forward: bool) -> Option<usize> {
        let n = self.clues.spans(selection.direction).len();
        if n == 0 {
            return None;
        }
        match self.clues.span_index_at(self.grid, selection.pos(), selection.direction) {
            Some(i) if forward => Some((i + 1) % n),
            Some(i) => Some((i + n - 1) % n),
            None => Some(0),
        }
    }

    /// Home.
    pub fn span_start(&self, selection: Selection) -> Option<Selection> {
        self.span_of(selection).map(|s| selection.with_pos(s.first()))
    }

    /// End.
    pub fn span_end(&self, selection: Selection) -> Option<Selection> {
        self.span_of(selection).map(|s| selection.with_pos(s.last()))
    }

    /// Flip direction in place; `None` when no span exists that way.
    pub fn toggle(&self, selection: Selection) -> Option<Selection> {
        let flipped = selection.direction.opposite();
        self.has_span(selection.pos(), flipped)
            .then(|| Selection::new(selection.pos(), flipped))
    }

    /// Clicking the selected cell again toggles; otherwise move there,
    /// keeping the active direction when a span allows it.
    pub fn click(&self, current: Option<Selection>, pos: Pos) -> Option<Selection> {
        if !self.grid.is_open(pos) {
            return None;
        }
        match current {
            Some(sel) if sel.pos() == pos => self.toggle(sel),
            Some(sel) => Some(Selection::new(pos, self.resolve_direction(pos, sel.direction))),
            None => Some(Selection::new(pos, self.resolve_direction(pos, Direction::Across))),
        }
    }

    /// Apply one input. `filled` reports whether a cell currently holds a
    /// value. `None` means nothing changes.
    pub fn apply(
        &self,
        selection: Selection,
        filled: impl Fn(Pos) -> bool,
        input: NavInput,
    ) -> Option<NavOutcome> {
        match input {
            NavInput::Arrow(arrow) => self.step(selection, arrow).map(NavOutcome::moved),
            NavInput::Letter(letter) => {
                let value = letter.to_uppercase().next().unwrap_or(letter);
                Some(NavOutcome {
                    selection: self.advance(selection),
                    write: Some(CellWrite {
                        pos: selection.pos(),
                        value: Some(value),
                    }),
                })
            }
            NavInput::Backspace => {
                let target = if filled(selection.pos()) {
                    selection
                } else {
                    self.retreat(selection)
                };
                Some(NavOutcome {
                    selection: target,
                    write: Some(CellWrite {
                        pos: target.pos(),
                        value: None,
                    }),
                })
            }
            NavInput::Delete => Some(NavOutcome {
                selection,
                write: Some(CellWrite {
                    pos: selection.pos(),
                    value: None,
                }),
            }),
            NavInput::Tab => self.jump_span(selection, true).map(NavOutcome::moved),
            NavInput::ShiftTab => self.jump_span(selection, false).map(NavOutcome::moved),
            NavInput::Home => self.span_start(selection).map(NavOutcome::moved),
            NavInput::End => self.span_end(selection).map(NavOutcome::moved),
            NavInput::ToggleDirection => self.toggle(selection).map(NavOutcome::moved),
            NavInput::Click(pos) => self.click(Some(selection), pos).map(NavOutcome::moved),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Board;
    use crate::puzzle::puzzle_from_rows;
    use std::sync::Arc;

    // CAT#
    // O#OX
    // WHEN
    fn board() -> Arc<Board> {
        Board::new("t", puzzle_from_rows(&["CAT#", "O#OX", "WHEN"])).unwrap()
    }

    fn sel(row: usize, col: usize, direction: Direction) -> Selection {
        Selection::new(Pos::new(row, col), direction)
    }

    fn never_filled(_: Pos) -> bool {
        false
    }

    #[test]
    fn test_first_selection_is_first_across() {
        let b = board();
        assert_eq!(b.navigator().first_selection(), Some(sel(0, 0, Direction::Across)));
    }

    #[test]
    fn test_arrow_skips_blocks() {
        let b = board();
        let nav = b.navigator();
        // (1,0) -> right over the block at (1,1) -> (1,2)
        let moved = nav.step(sel(1, 0, Direction::Down), Arrow::Right).unwrap();
        assert_eq!(moved.pos(), Pos::new(1, 2));
        // Horizontal arrow forces across when a span exists.
        assert_eq!(moved.direction, Direction::Across);
    }

    #[test]
    fn test_arrow_stops_at_edge() {
        let b = board();
        let nav = b.navigator();
        assert!(nav.step(sel(0, 0, Direction::Across), Arrow::Up).is_none());
        assert!(nav.step(sel(0, 0, Direction::Across), Arrow::Left).is_none());
        // Right from (0,2) hits the block at (0,3) then the edge.
        assert!(nav.step(sel(0, 2, Direction::Across), Arrow::Right).is_none());
    }

    #[test]
    fn test_vertical_arrow_forces_down() {
        let b = board();
        let moved = b.navigator().step(sel(0, 0, Direction::Across), Arrow::Down).unwrap();
        assert_eq!(moved, sel(1, 0, Direction::Down));
    }

    #[test]
    fn test_letter_advances_within_span() {
        let b = board();
        let out = b
            .navigator()
            .apply(sel(0, 0, Direction::Across), never_filled, NavInput::Letter('c'))
            .unwrap();
        assert_eq!(out.write, Some(CellWrite { pos: Pos::new(0, 0), value: Some('C') }));
        assert_eq!(out.selection, sel(0, 1, Direction::Across));
    }

    #[test]
    fn test_letter_at_last_cell_of_last_span_wraps() {
        let b = board();
        let nav = b.navigator();
        let across = b.clues.spans(Direction::Across);
        let last = across.last().unwrap();
        let out = nav
            .apply(Selection::new(last.last(), Direction::Across), never_filled, NavInput::Letter('N'))
            .unwrap();
        assert_eq!(out.selection, Selection::new(across[0].first(), Direction::Across));

        let down = b.clues.spans(Direction::Down);
        let last_down = down.last().unwrap();
        let out = nav
            .apply(Selection::new(last_down.last(), Direction::Down), never_filled, NavInput::Letter('N'))
            .unwrap();
        assert_eq!(out.selection, Selection::new(down[0].first(), Direction::Down));
    }

    #[test]
    fn test_tab_then_shift_tab_returns_to_span_start() {
        let b = board();
        let nav = b.navigator();
        for dir in [Direction::Across, Direction::Down] {
            for span in b.clues.spans(dir) {
                let start = Selection::new(span.first(), dir);
                let next = nav.jump_span(start, true).unwrap();
                let back = nav.jump_span(next, false).unwrap();
                assert_eq!(back, start);
            }
        }
    }

    #[test]
    fn test_backspace_clears_filled_cell_in_place() {
        let b = board();
        let out = b
            .navigator()
            .apply(sel(0, 1, Direction::Across), |_| true, NavInput::Backspace)
            .unwrap();
        assert_eq!(out.selection, sel(0, 1, Direction::Across));
        assert_eq!(out.write, Some(CellWrite { pos: Pos::new(0, 1), value: None }));
    }

    #[test]
    fn test_backspace_on_empty_moves_back_and_clears() {
        let b = board();
        let nav = b.navigator();
        let out = nav.apply(sel(0, 1, Direction::Across), never_filled, NavInput::Backspace).unwrap();
        assert_eq!(out.selection, sel(0, 0, Direction::Across));
        assert_eq!(out.write.unwrap().pos, Pos::new(0, 0));

        // At the start of the first span: wrap to the last cell of the last span.
        let out = nav.apply(sel(0, 0, Direction::Across), never_filled, NavInput::Backspace).unwrap();
        let last = b.clues.spans(Direction::Across).last().unwrap().last();
        assert_eq!(out.selection.pos(), last);
    }

    #[test]
    fn test_delete_does_not_move() {
        let b = board();
        let out = b
            .navigator()
            .apply(sel(2, 2, Direction::Across), never_filled, NavInput::Delete)
            .unwrap();
        assert_eq!(out.selection, sel(2, 2, Direction::Across));
        assert_eq!(out.write.unwrap().value, None);
    }

    #[test]
    fn test_home_end() {
        let b = board();
        let nav = b.navigator();
        assert_eq!(nav.span_start(sel(2, 2, Direction::Across)), Some(sel(2, 0, Direction::Across)));
        assert_eq!(nav.span_end(sel(2, 1, Direction::Across)), Some(sel(2, 3, Direction::Across)));
        assert_eq!(nav.span_end(sel(0, 0, Direction::Down)), Some(sel(2, 0, Direction::Down)));
    }

    #[test]
    fn test_toggle_guard() {
        let b = board();
        let nav = b.navigator();
        assert_eq!(nav.toggle(sel(0, 0, Direction::Across)), Some(sel(0, 0, Direction::Down)));
        // (0,1) 'A' sits above a block: no down span.
        assert_eq!(nav.toggle(sel(0, 1, Direction::Across)), None);
    }

    #[test]
    fn test_click_prefers_active_direction() {
        let b = board();
        let nav = b.navigator();
        let current = Some(sel(0, 0, Direction::Down));
        // (2,2) has both; keeps down.
        assert_eq!(nav.click(current, Pos::new(2, 2)), Some(sel(2, 2, Direction::Down)));
        // (0,1) has only across.
        assert_eq!(nav.click(current, Pos::new(0, 1)), Some(sel(0, 1, Direction::Across)));
        // Blocked cells are rejected.
        assert_eq!(nav.click(current, Pos::new(1, 1)), None);
        // Out of range is rejected.
        assert_eq!(nav.click(current, Pos::new(9, 9)), None);
    }

    #[test]
    fn test_click_same_cell_toggles() {
        let b = board();
        let nav = b.navigator();
        let current = Some(sel(2, 2, Direction::Across));
        assert_eq!(nav.click(current, Pos::new(2, 2)), Some(sel(2, 2, Direction::Down)));
        let across_only = Some(sel(0, 1, Direction::Across));
        assert_eq!(nav.click(across_only, Pos::new(0, 1)), None);
    }

    #[test]
    fn test_highlighted_cells() {
        let b = board();
        let nav = b.navigator();
        assert_eq!(
            nav.highlighted(sel(0, 2, Direction::Down)),
            vec![Pos::new(0, 2), Pos::new(1, 2), Pos::new(2, 2)]
        );
        assert!(nav.highlighted(sel(1, 1, Direction::Down)).is_empty());
    }

    #[test]
    fn test_normalize_falls_back() {
        let b = board();
        let nav = b.navigator();
        assert_eq!(nav.normalize(sel(0, 1, Direction::Down)), Some(sel(0, 1, Direction::Across)));
        assert_eq!(nav.normalize(sel(1, 1, Direction::Across)), None);
    }
}
