//! Effect planning: what a transition means for the outside world.
//!
//! `reduce` stays pure; [`EffectRunner::plan`] inspects `(action, origin,
//! before, after)` and lists the side effects, and [`EffectRunner::run`]
//! carries them out. Remote-origin actions never produce a publish.

use std::sync::Arc;

use crate::grid::Pos;
use crate::navigation::Selection;
use crate::persistence::{now_millis, ProgressCache, SavedProgress};
use crate::state::{Action, Origin, PuzzleState};

/// A locally originated mutation worth telling peers about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    CellEdited { pos: Pos, value: Option<char> },
    CellChecked { pos: Pos, correct: bool },
    ChecksCleared,
    Completed,
    PauseToggled { paused: bool },
    SelectionChanged(Option<Selection>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    SaveProgress,
    Publish(Change),
}

/// Executes planned effects against the injected cache and collects
/// publishable changes in an outbox.
pub struct EffectRunner {
    cache: Option<Arc<dyn ProgressCache>>,
    outbox: Vec<Change>,
}

impl EffectRunner {
    pub fn new(cache: Option<Arc<dyn ProgressCache>>) -> Self {
        Self {
            cache,
            outbox: Vec::new(),
        }
    }

    pub fn cache(&self) -> Option<&Arc<dyn ProgressCache>> {
        self.cache.as_ref()
    }

    pub fn plan(action: &Action, origin: Origin, before: &PuzzleState, after: &PuzzleState) -> Vec<Effect> {
        let mut effects = Vec::new();
        if persists(action) && before != after && after.board.is_some() {
            effects.push(Effect::SaveProgress);
        }
        if origin == Origin::Remote {
            return effects;
        }

        let mut publish = |change| effects.push(Effect::Publish(change));
        match action {
            Action::SetCell { pos, .. } => {
                if before.entry(*pos) != after.entry(*pos) {
                    publish(Change::CellEdited {
                        pos: *pos,
                        value: after.entry(*pos),
                    });
                }
            }
            Action::CheckCell { pos, correct } if after.checks.contains_key(pos) => {
                publish(Change::CellChecked {
                    pos: *pos,
                    correct: *correct,
                });
            }
            Action::ClearChecks => publish(Change::ChecksCleared),
            Action::ClearGrid => {
                for pos in before.entries.keys() {
                    publish(Change::CellEdited { pos: *pos, value: None });
                }
                publish(Change::ChecksCleared);
            }
            _ => {}
        }
        if before.timer.paused != after.timer.paused && !matches!(action, Action::SyncTimer { .. } | Action::LoadPuzzle { .. }) {
            publish(Change::PauseToggled {
                paused: after.timer.paused,
            });
        }
        if !before.complete && after.complete {
            publish(Change::Completed);
        }
        if before.selection != after.selection {
            publish(Change::SelectionChanged(after.selection));
        }
        effects
    }

    pub fn run(&mut self, effects: Vec<Effect>, state: &PuzzleState) {
        for effect in effects {
            match effect {
                Effect::SaveProgress => self.save(state),
                Effect::Publish(change) => self.outbox.push(change),
            }
        }
    }

    fn save(&self, state: &PuzzleState) {
        let Some(cache) = &self.cache else {
            return;
        };
        let Some(progress) = SavedProgress::from_state(state, now_millis()) else {
            return;
        };
        if let Err(e) = cache.save(&progress) {
            log::warn!("failed to save progress for {}: {e}", progress.puzzle_id);
        }
    }

    /// Drain changes published since the last call.
    pub fn take_changes(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.outbox)
    }
}

fn persists(action: &Action) -> bool {
    !matches!(
        action,
        Action::LoadPuzzle { .. }
            | Action::SetSelection(_)
            | Action::ToggleDirection
            | Action::TogglePencil
    )
}
