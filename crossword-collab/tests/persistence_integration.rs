//! Persistence integration tests.
//!
//! Verifies:
//! - Progress written by one store is restored by a fresh one
//! - Check marks, pencil state and the timer survive a restart
//! - The saves listing and deletion work through the store

use std::sync::Arc;

use crossword_collab::FileCache;
use crossword_core::puzzle::puzzle_from_rows;
use crossword_core::{Action, EntryMode, NavInput, Pos, ProgressCache, Puzzle, Store};
use tempfile::tempdir;

fn mini() -> Puzzle {
    puzzle_from_rows(&["CAT", "O#O", "WET"])
}

fn store_at(path: &std::path::Path) -> Store {
    let cache: Arc<dyn ProgressCache> = Arc::new(FileCache::open(path).unwrap());
    Store::new(cache)
}

#[test]
fn test_progress_survives_restart() {
    let dir = tempdir().unwrap();
    {
        let mut store = store_at(dir.path());
        store.load_puzzle("mini", mini()).unwrap();
        store.navigate(NavInput::Letter('c'));
        store.navigate(NavInput::Letter('a'));
        store.dispatch(Action::SetCell {
            pos: Pos::new(2, 2),
            value: Some('x'),
            mode: EntryMode::Auto,
        });
        store.check_cell(Pos::new(2, 2));
        store.dispatch(Action::TickTimer);
        store.dispatch(Action::TickTimer);
    }

    let mut store = store_at(dir.path());
    store.load_puzzle("mini", mini()).unwrap();
    let state = store.state();
    assert_eq!(state.entry(Pos::new(0, 0)), Some('C'));
    assert_eq!(state.entry(Pos::new(0, 1)), Some('A'));
    assert_eq!(state.checks.get(&Pos::new(2, 2)), Some(&false));
    assert_eq!(state.timer.elapsed_seconds, 2);
    assert!(!state.complete);
}

#[test]
fn test_pencil_marks_restored() {
    let dir = tempdir().unwrap();
    {
        let mut store = store_at(dir.path());
        store.load_puzzle("mini", mini()).unwrap();
        store.dispatch(Action::TogglePencil);
        store.navigate(NavInput::Letter('q'));
    }
    let mut store = store_at(dir.path());
    store.load_puzzle("mini", mini()).unwrap();
    assert_eq!(store.state().entry(Pos::new(0, 0)), Some('Q'));
    assert!(store.state().pencil.contains(&Pos::new(0, 0)));
}

#[test]
fn test_saves_listing_and_delete() {
    let dir = tempdir().unwrap();
    let mut store = store_at(dir.path());
    store.load_puzzle("first", mini()).unwrap();
    store.navigate(NavInput::Letter('c'));
    store.load_puzzle("second", puzzle_from_rows(&["AB", "CD"])).unwrap();
    store.navigate(NavInput::Letter('a'));

    let saves = store.saves().unwrap();
    assert_eq!(saves.len(), 2);
    assert!(saves.iter().all(|s| s.cells_filled == 1));

    assert!(store.delete_save("first").unwrap());
    assert!(!store.delete_save("first").unwrap());
    let remaining: Vec<String> = store.saves().unwrap().into_iter().map(|s| s.puzzle_id).collect();
    assert_eq!(remaining, vec!["second"]);
}

#[test]
fn test_unrelated_puzzle_starts_empty() {
    let dir = tempdir().unwrap();
    {
        let mut store = store_at(dir.path());
        store.load_puzzle("mini", mini()).unwrap();
        store.navigate(NavInput::Letter('c'));
    }
    let mut store = store_at(dir.path());
    store.load_puzzle("other", mini()).unwrap();
    assert!(store.state().entries.is_empty());
}
