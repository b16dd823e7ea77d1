//! Puzzle model, navigation, validation and the local state store.
//!
//! ```text
//!  Puzzle ──► Grid ──► ClueMap ──► Board (Arc, immutable)
//!                                    │
//!        Key ──► InputDispatcher ──► Navigator ──► Store::dispatch ──► reduce
//!                                                      │
//!                                   EffectRunner ◄─────┘ (cache / outbox)
//! ```
//!
//! Everything here is synchronous; the collab crate drives the async side.

pub mod board;
pub mod clues;
pub mod effects;
pub mod grid;
pub mod input;
pub mod navigation;
pub mod persistence;
pub mod puzzle;
pub mod source;
pub mod state;
pub mod store;
pub mod validation;

pub use board::Board;
pub use clues::{ClueKey, ClueMap, ClueSpan, Direction};
pub use effects::{Change, Effect, EffectRunner};
pub use grid::{Cell, Grid, ParsePosError, Pos};
pub use input::{InputDispatcher, Key};
pub use navigation::{Arrow, CellWrite, NavInput, NavOutcome, Navigator, Selection};
pub use persistence::{CacheError, MemoryCache, ProgressCache, SaveSummary, SavedProgress};
pub use puzzle::{ClueLists, Puzzle, PuzzleError, PuzzleMetadata, PuzzleSize, BLOCK};
pub use source::{FetchedPuzzle, MemorySource, PuzzleQuery, PuzzleSource, SourceError};
pub use state::{reduce, Action, EntryMode, Origin, PuzzleState, Snapshot, TimerState};
pub use store::{ListenerId, Store, StoreError};
pub use validation::CheckReport;
