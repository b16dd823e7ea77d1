//! Keyboard / pointer routing with an explicit attach lifecycle.
//!
//! Exactly one dispatcher is active per puzzle view. `attach` on mount or
//! puzzle change, `detach` on unmount; a detached dispatcher swallows
//! nothing and changes nothing.

use crate::grid::Pos;
use crate::navigation::{Arrow, NavInput};
use crate::state::Action;
use crate::store::Store;

/// Platform-neutral key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Backspace,
    Delete,
    Tab,
    BackTab,
    Enter,
    Space,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
}

impl Key {
    /// Navigation meaning of a key, if any.
    pub fn to_nav(self) -> Option<NavInput> {
        Some(match self {
            Key::Char(' ') | Key::Space | Key::Enter => NavInput::ToggleDirection,
            Key::Char(c) if c.is_alphanumeric() => NavInput::Letter(c),
            Key::Char(_) => return None,
            Key::Backspace => NavInput::Backspace,
            Key::Delete => NavInput::Delete,
            Key::Tab => NavInput::Tab,
            Key::BackTab => NavInput::ShiftTab,
            Key::Up => NavInput::Arrow(Arrow::Up),
            Key::Down => NavInput::Arrow(Arrow::Down),
            Key::Left => NavInput::Arrow(Arrow::Left),
            Key::Right => NavInput::Arrow(Arrow::Right),
            Key::Home => NavInput::Home,
            Key::End => NavInput::End,
        })
    }
}

#[derive(Debug, Default)]
pub struct InputDispatcher {
    attached: Option<String>,
}

impl InputDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to a puzzle, replacing any previous binding.
    pub fn attach(&mut self, puzzle_id: impl Into<String>) {
        let puzzle_id = puzzle_id.into();
        if let Some(previous) = self.attached.replace(puzzle_id.clone()) {
            log::debug!("input dispatcher moved from {previous} to {puzzle_id}");
        }
    }

    pub fn detach(&mut self) {
        self.attached = None;
    }

    pub fn is_active(&self) -> bool {
        self.attached.is_some()
    }

    /// Only routes while attached to the store's current puzzle.
    fn bound_to(&self, store: &Store) -> bool {
        match (&self.attached, store.state().puzzle_id()) {
            (Some(attached), Some(loaded)) => attached == loaded,
            _ => false,
        }
    }

    /// Returns whether the key was consumed.
    pub fn handle_key(&self, store: &mut Store, key: Key) -> bool {
        if !self.bound_to(store) {
            return false;
        }
        match key.to_nav() {
            Some(input) => {
                store.navigate(input);
                true
            }
            None => false,
        }
    }

    pub fn handle_click(&self, store: &mut Store, pos: Pos) -> bool {
        self.bound_to(store) && store.navigate(NavInput::Click(pos))
    }

    /// Toggle pencil mode (bound to a toolbar button or shortcut).
    pub fn toggle_pencil(&self, store: &mut Store) -> bool {
        self.bound_to(store) && store.dispatch(Action::TogglePencil)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clues::Direction;
    use crate::puzzle::puzzle_from_rows;

    fn store() -> Store {
        let mut store = Store::ephemeral();
        store.load_puzzle("p1", puzzle_from_rows(&["CAT", "O#O"])).unwrap();
        store
    }

    #[test]
    fn test_detached_dispatcher_ignores_input() {
        let mut store = store();
        let input = InputDispatcher::new();
        assert!(!input.is_active());
        assert!(!input.handle_key(&mut store, Key::Char('C')));
        assert!(store.state().entries.is_empty());
    }

    #[test]
    fn test_attached_routes_keys() {
        let mut store = store();
        let mut input = InputDispatcher::new();
        input.attach("p1");
        assert!(input.handle_key(&mut store, Key::Char('c')));
        assert_eq!(store.state().entry(Pos::new(0, 0)), Some('C'));
        assert!(input.handle_key(&mut store, Key::Enter));
        assert!(!input.handle_key(&mut store, Key::Char('?')));
    }

    #[test]
    fn test_stale_binding_after_puzzle_switch() {
        let mut store = store();
        let mut input = InputDispatcher::new();
        input.attach("p1");
        store.load_puzzle("p2", puzzle_from_rows(&["AB", "CD"])).unwrap();
        assert!(!input.handle_key(&mut store, Key::Char('A')));
        input.attach("p2");
        assert!(input.handle_key(&mut store, Key::Char('A')));
        input.detach();
        assert!(!input.is_active());
    }

    #[test]
    fn test_double_click_toggles() {
        let mut store = store();
        let mut input = InputDispatcher::new();
        input.attach("p1");
        assert!(input.handle_click(&mut store, Pos::new(0, 2)));
        assert_eq!(store.state().selection.unwrap().direction, Direction::Across);
        assert!(input.handle_click(&mut store, Pos::new(0, 2)));
        assert_eq!(store.state().selection.unwrap().direction, Direction::Down);
    }
}
