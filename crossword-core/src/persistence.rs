//! Local progress cache: one record per puzzle id.
//!
//! The cache is an injected collaborator. [`MemoryCache`] lives here; the
//! file-backed implementation lives in the collab crate next to its
//! compression stack.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::grid::Pos;
use crate::state::{PuzzleState, Snapshot};
use crate::validation;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode progress: {0}")]
    Encode(String),
    #[error("failed to decode progress for {puzzle_id}: {reason}")]
    Decode { puzzle_id: String, reason: String },
    #[error("cache full ({capacity} saves)")]
    QuotaExceeded { capacity: usize },
    #[error("cache lock poisoned")]
    Poisoned,
}

/// Persisted progress for one puzzle. Cell keys are `"{row},{col}"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedProgress {
    pub puzzle_id: String,
    pub user_grid: Vec<(String, String)>,
    pub checked_cells: Vec<(String, bool)>,
    pub pencil_cells: Vec<String>,
    pub elapsed_seconds: u64,
    pub is_complete: bool,
    pub cells_filled: usize,
    pub total_cells: usize,
    pub completion_pct: u32,
    /// Unix millis of the last save.
    pub last_played: u64,
}

impl SavedProgress {
    /// Capture a loaded state. `None` before any puzzle is loaded.
    pub fn from_state(state: &PuzzleState, now_ms: u64) -> Option<Self> {
        let board = state.board.as_deref()?;
        let (cells_filled, total_cells) = validation::progress(board, state);
        let completion_pct = if total_cells == 0 {
            0
        } else {
            (cells_filled * 100 / total_cells) as u32
        };
        Some(Self {
            puzzle_id: board.puzzle_id.clone(),
            user_grid: state
                .entries
                .iter()
                .map(|(pos, v)| (pos.key(), v.to_string()))
                .collect(),
            checked_cells: state.checks.iter().map(|(pos, ok)| (pos.key(), *ok)).collect(),
            pencil_cells: state.pencil.iter().map(Pos::key).collect(),
            elapsed_seconds: state.timer.elapsed_seconds,
            is_complete: state.complete,
            cells_filled,
            total_cells,
            completion_pct,
            last_played: now_ms,
        })
    }

    /// Back to a state snapshot. Unparseable keys and empty values are
    /// skipped.
    pub fn to_snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot {
            elapsed_seconds: self.elapsed_seconds,
            complete: self.is_complete,
            paused: false,
            ..Snapshot::default()
        };
        for (key, value) in &self.user_grid {
            match (key.parse::<Pos>(), value.chars().next()) {
                (Ok(pos), Some(c)) => {
                    snapshot.entries.insert(pos, c);
                }
                (Err(e), _) => log::warn!("skipping saved entry: {e}"),
                _ => {}
            }
        }
        for (key, correct) in &self.checked_cells {
            if let Ok(pos) = key.parse::<Pos>() {
                snapshot.checks.insert(pos, *correct);
            }
        }
        snapshot.pencil = self.pencil_cells.iter().filter_map(|k| k.parse().ok()).collect();
        snapshot
    }

    pub fn summary(&self) -> SaveSummary {
        SaveSummary {
            puzzle_id: self.puzzle_id.clone(),
            elapsed_seconds: self.elapsed_seconds,
            is_complete: self.is_complete,
            cells_filled: self.cells_filled,
            total_cells: self.total_cells,
            completion_pct: self.completion_pct,
            last_played: self.last_played,
        }
    }
}

/// Listing entry for the saves screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSummary {
    pub puzzle_id: String,
    pub elapsed_seconds: u64,
    pub is_complete: bool,
    pub cells_filled: usize,
    pub total_cells: usize,
    pub completion_pct: u32,
    pub last_played: u64,
}

/// Single-coordinator cache for a user's puzzle progress.
pub trait ProgressCache: Send + Sync {
    fn load(&self, puzzle_id: &str) -> Result<Option<SavedProgress>, CacheError>;
    fn save(&self, progress: &SavedProgress) -> Result<(), CacheError>;
    /// Most recently played first.
    fn list(&self) -> Result<Vec<SaveSummary>, CacheError>;
    /// `true` if a save existed.
    fn delete(&self, puzzle_id: &str) -> Result<bool, CacheError>;
}

/// In-process cache, optionally capped to model a storage quota.
#[derive(Debug, Default)]
pub struct MemoryCache {
    saves: Mutex<HashMap<String, SavedProgress>>,
    capacity: Option<usize>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            saves: Mutex::new(HashMap::new()),
            capacity: Some(capacity),
        }
    }
}

impl ProgressCache for MemoryCache {
    fn load(&self, puzzle_id: &str) -> Result<Option<SavedProgress>, CacheError> {
        let saves = self.saves.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(saves.get(puzzle_id).cloned())
    }

    fn save(&self, progress: &SavedProgress) -> Result<(), CacheError> {
        let mut saves = self.saves.lock().map_err(|_| CacheError::Poisoned)?;
        if let Some(capacity) = self.capacity {
            if saves.len() >= capacity && !saves.contains_key(&progress.puzzle_id) {
                return Err(CacheError::QuotaExceeded { capacity });
            }
        }
        saves.insert(progress.puzzle_id.clone(), progress.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<SaveSummary>, CacheError> {
        let saves = self.saves.lock().map_err(|_| CacheError::Poisoned)?;
        let mut summaries: Vec<SaveSummary> = saves.values().map(SavedProgress::summary).collect();
        summaries.sort_by(|a, b| b.last_played.cmp(&a.last_played));
        Ok(summaries)
    }

    fn delete(&self, puzzle_id: &str) -> Result<bool, CacheError> {
        let mut saves = self.saves.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(saves.remove(puzzle_id).is_some())
    }
}

/// Wall-clock unix millis.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Board;
    use crate::puzzle::puzzle_from_rows;
    use crate::state::{reduce, Action, EntryMode, Origin};

    fn state_with_entries() -> PuzzleState {
        let board = Board::new("2014-05-02", puzzle_from_rows(&["CAT", "O#O"])).unwrap();
        let mut state = reduce(&PuzzleState::default(), &Action::LoadPuzzle { board, saved: None }, Origin::Local);
        for (pos, v) in [(Pos::new(0, 0), 'C'), (Pos::new(0, 1), 'A')] {
            state = reduce(&state, &Action::SetCell { pos, value: Some(v), mode: EntryMode::Auto }, Origin::Local);
        }
        reduce(&state, &Action::CheckCell { pos: Pos::new(0, 0), correct: true }, Origin::Local)
    }

    #[test]
    fn test_from_state_computes_summary_fields() {
        let saved = SavedProgress::from_state(&state_with_entries(), 1000).unwrap();
        assert_eq!(saved.puzzle_id, "2014-05-02");
        assert_eq!(saved.user_grid, vec![("0,0".to_string(), "C".to_string()), ("0,1".to_string(), "A".to_string())]);
        assert_eq!(saved.checked_cells, vec![("0,0".to_string(), true)]);
        assert_eq!(saved.cells_filled, 2);
        assert_eq!(saved.total_cells, 5);
        assert_eq!(saved.completion_pct, 40);
        assert_eq!(saved.last_played, 1000);
    }

    #[test]
    fn test_snapshot_survives_save() {
        let state = state_with_entries();
        let saved = SavedProgress::from_state(&state, 0).unwrap();
        let snap = saved.to_snapshot();
        assert_eq!(snap.entries, state.entries);
        assert_eq!(snap.checks, state.checks);
    }

    #[test]
    fn test_bad_keys_are_skipped() {
        let saved = SavedProgress {
            user_grid: vec![("zz".into(), "A".into()), ("1,2".into(), "".into()), ("0,0".into(), "B".into())],
            ..SavedProgress::default()
        };
        let snap = saved.to_snapshot();
        assert_eq!(snap.entries.len(), 1);
        assert_eq!(snap.entries.get(&Pos::new(0, 0)), Some(&'B'));
    }

    #[test]
    fn test_memory_cache_list_and_delete() {
        let cache = MemoryCache::new();
        for (id, at) in [("a", 5), ("b", 9), ("c", 1)] {
            cache
                .save(&SavedProgress { puzzle_id: id.into(), last_played: at, ..SavedProgress::default() })
                .unwrap();
        }
        let ids: Vec<String> = cache.list().unwrap().into_iter().map(|s| s.puzzle_id).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert!(cache.delete("a").unwrap());
        assert!(!cache.delete("a").unwrap());
        assert!(cache.load("a").unwrap().is_none());
    }

    #[test]
    fn test_memory_cache_quota() {
        let cache = MemoryCache::with_capacity(1);
        cache.save(&SavedProgress { puzzle_id: "a".into(), ..SavedProgress::default() }).unwrap();
        // Overwriting an existing save is always allowed.
        cache.save(&SavedProgress { puzzle_id: "a".into(), elapsed_seconds: 3, ..SavedProgress::default() }).unwrap();
        assert!(matches!(
            cache.save(&SavedProgress { puzzle_id: "b".into(), ..SavedProgress::default() }),
            Err(CacheError::QuotaExceeded { capacity: 1 })
        ));
    }
}
