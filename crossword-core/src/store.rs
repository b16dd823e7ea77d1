//! Local Puzzle State Store: the only mutation path for puzzle state.
//!
//! ```text
//!  UI / InputDispatcher ──┐
//!                          ├──► Store::dispatch(action, origin)
//!  CollabSession (remote) ─┘          │
//!                                     ├── reduce()           pure
//!                                     ├── EffectRunner       save / outbox
//!                                     └── listeners          re-render
//! ```

use std::sync::Arc;

use crate::board::Board;
use crate::clues::ClueSpan;
use crate::effects::{Change, EffectRunner};
use crate::grid::Pos;
use crate::navigation::{NavInput, Selection};
use crate::persistence::{CacheError, ProgressCache, SaveSummary};
use crate::puzzle::{Puzzle, PuzzleError};
use crate::state::{reduce, Action, EntryMode, Origin, PuzzleState};
use crate::validation::{self, CheckReport};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Puzzle(#[from] PuzzleError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("no puzzle loaded")]
    NoPuzzle,
}

pub type Listener = Box<dyn FnMut(&PuzzleState) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct Store {
    state: PuzzleState,
    runner: EffectRunner,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
}

impl Store {
    /// A store persisting through `cache`.
    pub fn new(cache: Arc<dyn ProgressCache>) -> Self {
        Self::build(Some(cache))
    }

    /// A store without a local cache (collaborative mode persists
    /// through the room instead).
    pub fn ephemeral() -> Self {
        Self::build(None)
    }

    fn build(cache: Option<Arc<dyn ProgressCache>>) -> Self {
        Self {
            state: PuzzleState::default(),
            runner: EffectRunner::new(cache),
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn state(&self) -> &PuzzleState {
        &self.state
    }

    pub fn board(&self) -> Option<&Arc<Board>> {
        self.state.board.as_ref()
    }

    /// Local dispatch.
    pub fn dispatch(&mut self, action: Action) -> bool {
        self.dispatch_from(action, Origin::Local)
    }

    /// Apply one action. Returns whether the state changed.
    pub fn dispatch_from(&mut self, action: Action, origin: Origin) -> bool {
        let next = reduce(&self.state, &action, origin);
        if next == self.state {
            log::trace!("{} ({origin:?}) left state unchanged", action.name());
            return false;
        }
        let effects = EffectRunner::plan(&action, origin, &self.state, &next);
        self.state = next;
        self.runner.run(effects, &self.state);
        for (_, listener) in &mut self.listeners {
            listener(&self.state);
        }
        true
    }

    pub fn dispatch_all(&mut self, actions: impl IntoIterator<Item = Action>, origin: Origin) -> bool {
        actions
            .into_iter()
            .fold(false, |changed, action| self.dispatch_from(action, origin) | changed)
    }

    pub fn subscribe(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) {
        self.listeners.retain(|(lid, _)| *lid != id);
    }

    /// Changes to publish, drained.
    pub fn take_changes(&mut self) -> Vec<Change> {
        self.runner.take_changes()
    }

    // ── Loading ─────────────────────────────────────────────────

    /// Validate, derive the board and restore any saved progress.
    pub fn load_puzzle(&mut self, puzzle_id: &str, puzzle: Puzzle) -> Result<Arc<Board>, StoreError> {
        let board = Board::new(puzzle_id, puzzle)?;
        self.load_board(Arc::clone(&board));
        Ok(board)
    }

    pub fn load_board(&mut self, board: Arc<Board>) {
        let saved = match self.runner.cache().map(|c| c.load(&board.puzzle_id)) {
            Some(Ok(saved)) => saved.map(|s| s.to_snapshot()),
            Some(Err(e)) => {
                log::warn!("could not restore progress for {}: {e}", board.puzzle_id);
                None
            }
            None => None,
        };
        log::info!(
            "loaded puzzle {} ({}x{}, restored: {})",
            board.puzzle_id,
            board.grid.rows(),
            board.grid.cols(),
            saved.is_some()
        );
        self.dispatch(Action::LoadPuzzle { board, saved });
    }

    pub fn saves(&self) -> Result<Vec<SaveSummary>, StoreError> {
        match self.runner.cache() {
            Some(cache) => Ok(cache.list()?),
            None => Ok(Vec::new()),
        }
    }

    pub fn delete_save(&self, puzzle_id: &str) -> Result<bool, StoreError> {
        match self.runner.cache() {
            Some(cache) => Ok(cache.delete(puzzle_id)?),
            None => Ok(false),
        }
    }

    // ── Navigation ──────────────────────────────────────────────

    /// Run one navigation input through the engine and dispatch the
    /// resulting write and selection.
    pub fn navigate(&mut self, input: NavInput) -> bool {
        let Some(board) = self.state.board.clone() else {
            return false;
        };
        let nav = board.navigator();
        let Some(current) = self.state.selection else {
            return match input {
                NavInput::Click(pos) => match nav.click(None, pos) {
                    Some(sel) => self.dispatch(Action::SetSelection(sel)),
                    None => false,
                },
                _ => false,
            };
        };
        let state = &self.state;
        let Some(outcome) = nav.apply(current, |p| state.is_filled(p), input) else {
            return false;
        };
        let mut changed = false;
        if let Some(write) = outcome.write {
            changed |= self.dispatch(Action::SetCell {
                pos: write.pos,
                value: write.value,
                mode: EntryMode::Auto,
            });
        }
        if outcome.selection != current {
            changed |= self.dispatch(Action::SetSelection(outcome.selection));
        }
        changed
    }

    pub fn select(&mut self, selection: Selection) -> bool {
        self.dispatch(Action::SetSelection(selection))
    }

    // ── Validation ──────────────────────────────────────────────

    pub fn check_cell(&mut self, pos: Pos) -> Option<bool> {
        let board = self.state.board.clone()?;
        let entered = self.state.entry(pos)?;
        if self.state.pencil.contains(&pos) {
            return None;
        }
        let correct = validation::check_cell(&board.puzzle, pos, entered);
        self.dispatch(Action::CheckCell { pos, correct });
        Some(correct)
    }

    /// Check the span under the current selection.
    pub fn check_word(&mut self) -> Option<CheckReport> {
        let (board, span) = self.current_span()?;
        let report = validation::check_word(&board, &self.state, &span);
        self.dispatch_all(report.actions(), Origin::Local);
        Some(report)
    }

    pub fn check_puzzle(&mut self) -> Result<CheckReport, StoreError> {
        let board = self.state.board.clone().ok_or(StoreError::NoPuzzle)?;
        let report = validation::check_puzzle(&board, &self.state);
        self.dispatch_all(report.actions(), Origin::Local);
        Ok(report)
    }

    pub fn reveal_cell(&mut self, pos: Pos) -> bool {
        let Some(board) = self.state.board.clone() else {
            return false;
        };
        self.dispatch_all(validation::reveal_cell(&board, pos), Origin::Local)
    }

    pub fn reveal_word(&mut self) -> bool {
        let Some((board, span)) = self.current_span() else {
            return false;
        };
        self.dispatch_all(validation::reveal_word(&board, &span), Origin::Local)
    }

    pub fn reveal_puzzle(&mut self) -> Result<(), StoreError> {
        let board = self.state.board.clone().ok_or(StoreError::NoPuzzle)?;
        self.dispatch_all(validation::reveal_puzzle(&board), Origin::Local);
        Ok(())
    }

    fn current_span(&self) -> Option<(Arc<Board>, ClueSpan)> {
        let board = self.state.board.clone()?;
        let span = board.navigator().span_of(self.state.selection?)?.clone();
        Some((board, span))
    }
}
