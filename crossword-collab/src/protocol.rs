//! JSON wire protocol for room channels.
//!
//! Channel events (one JSON object per message):
//! ```text
//! { "type": "cell_edit", "userId": "u1", "timestamp": 1715000000000,
//!   "tabId": "…", "row": 0, "col": 2, "value": "T" }
//! ```
//!
//! Relay frames wrap events and presence for the WebSocket hop:
//! ```text
//! client ──► { "op": "subscribe" | "publish" | "presence_update" | "leave" | "ping" }
//! server ──► { "op": "subscribed" | "event" | "presence" | "error" | "pong" }
//! ```

use serde::{Deserialize, Serialize};

use crossword_core::{Pos, Snapshot};

pub use crossword_core::Selection as WireSelection;

/// The closed set of room events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum WireEvent {
    /// `value` is a single character, or empty to clear.
    CellEdit { row: usize, col: usize, value: String },
    CheckCell { row: usize, col: usize, is_correct: bool },
    ClearChecks {},
    TimerToggle {
        is_paused: bool,
        accumulated_seconds: u64,
        started_at: Option<u64>,
    },
    PuzzleComplete {},
    StateSync {
        user_grid: Vec<(String, String)>,
        checked_cells: Vec<(String, bool)>,
        accumulated_seconds: u64,
        is_complete: bool,
    },
}

impl WireEvent {
    pub fn cell_edit(pos: Pos, value: Option<char>) -> Self {
        WireEvent::CellEdit {
            row: pos.row,
            col: pos.col,
            value: value.map(String::from).unwrap_or_default(),
        }
    }

    pub fn state_sync(snapshot: &Snapshot) -> Self {
        WireEvent::StateSync {
            user_grid: snapshot
                .entries
                .iter()
                .map(|(pos, v)| (pos.key(), v.to_string()))
                .collect(),
            checked_cells: snapshot.checks.iter().map(|(pos, ok)| (pos.key(), *ok)).collect(),
            accumulated_seconds: snapshot.elapsed_seconds,
            is_complete: snapshot.complete,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WireEvent::CellEdit { .. } => "cell_edit",
            WireEvent::CheckCell { .. } => "check_cell",
            WireEvent::ClearChecks {} => "clear_checks",
            WireEvent::TimerToggle { .. } => "timer_toggle",
            WireEvent::PuzzleComplete {} => "puzzle_complete",
            WireEvent::StateSync { .. } => "state_sync",
        }
    }

    /// Cell targeted by a per-cell event.
    pub fn cell(&self) -> Option<Pos> {
        match self {
            WireEvent::CellEdit { row, col, .. } | WireEvent::CheckCell { row, col, .. } => {
                Some(Pos::new(*row, *col))
            }
            _ => None,
        }
    }
}

/// Decode `[key, value]` pairs into a snapshot; bad keys are dropped.
pub fn snapshot_from_pairs(
    user_grid: &[(String, String)],
    checked_cells: &[(String, bool)],
) -> Snapshot {
    let mut snapshot = Snapshot::default();
    for (key, value) in user_grid {
        if let (Ok(pos), Some(c)) = (key.parse::<Pos>(), value.chars().next()) {
            snapshot.entries.insert(pos, c);
        }
    }
    for (key, correct) in checked_cells {
        if let Ok(pos) = key.parse::<Pos>() {
            snapshot.checks.insert(pos, *correct);
        }
    }
    snapshot
}

/// An event plus its sender metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub user_id: String,
    /// Unix millis, monotonic per sender.
    pub timestamp: u64,
    /// Per-session identifier for echo suppression.
    pub tab_id: String,
    #[serde(flatten)]
    pub event: WireEvent,
}

/// Ephemeral per-connection presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceData {
    pub user_id: String,
    pub display_name: String,
    pub color: String,
    pub selection: Option<WireSelection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe {
        channel: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        presence: PresenceData,
    },
    Publish { envelope: Envelope },
    PresenceUpdate { presence: PresenceData },
    Leave,
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServerFrame {
    Subscribed { channel: String },
    Event { envelope: Envelope },
    Presence { members: Vec<PresenceData> },
    Error { message: String },
    Pong,
}

macro_rules! json_codec {
    ($ty:ty) => {
        impl $ty {
            pub fn encode(&self) -> Result<String, ProtocolError> {
                serde_json::to_string(self).map_err(ProtocolError::Encode)
            }

            pub fn decode(text: &str) -> Result<Self, ProtocolError> {
                serde_json::from_str(text).map_err(ProtocolError::Decode)
            }
        }
    };
}

json_codec!(Envelope);
json_codec!(ClientFrame);
json_codec!(ServerFrame);

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("encode error: {0}")]
    Encode(serde_json::Error),
    #[error("decode error: {0}")]
    Decode(serde_json::Error),
}
