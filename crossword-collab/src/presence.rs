//! Presence tracking: who is in the room and where their cursor is.
//!
//! ```text
//! local Selection change
//!       │
//!       ▼
//! PresenceRoom::set_local_selection() ──► PresenceData ──► transport
//!
//! transport presence list (full refresh)
//!       │
//!       ▼
//! PresenceRoom::replace_all() ──► RemoteCursor { selection, highlighted }
//! ```
//!
//! Presence is ephemeral: the transport drops members when their
//! connection goes away and nothing here is ever persisted.

use std::collections::BTreeMap;

use crossword_core::{Board, Pos, Selection};

use crate::protocol::PresenceData;

// ───────────────────────────────────────────────────────────────────
// Colors
// ───────────────────────────────────────────────────────────────────

/// Colors handed to peers whose presence carries none. The first four
/// match the directory's member palette.
const FALLBACK_PALETTE: [&str; 12] = [
    "#4A90D9", "#E74C3C", "#2ECC71", "#9B59B6", "#F39C12", "#1ABC9C",
    "#D35400", "#34495E", "#E84393", "#16A085", "#8E44AD", "#C0392B",
];

/// Stable `#RRGGBB` color for a user id: FNV-1a over the id bytes picks a
/// palette slot, so every client derives the same color for a peer.
pub fn fallback_color(user_id: &str) -> String {
    let hash = user_id
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3));
    FALLBACK_PALETTE[(hash % FALLBACK_PALETTE.len() as u64) as usize].to_string()
}

// ───────────────────────────────────────────────────────────────────
// Remote cursors
// ───────────────────────────────────────────────────────────────────

/// Render data for one remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCursor {
    pub user_id: String,
    pub display_name: String,
    pub color: String,
    pub selection: Option<Selection>,
    /// Cells of the word under `selection`.
    pub highlighted: Vec<Pos>,
}

impl RemoteCursor {
    fn from_presence(data: &PresenceData, board: Option<&Board>) -> Self {
        let color = if data.color.is_empty() {
            fallback_color(&data.user_id)
        } else {
            data.color.clone()
        };
        let highlighted = match (board, data.selection) {
            (Some(board), Some(sel)) => board.navigator().highlighted(sel),
            _ => Vec::new(),
        };
        Self {
            user_id: data.user_id.clone(),
            display_name: data.display_name.clone(),
            color,
            selection: data.selection,
            highlighted,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Presence room
// ───────────────────────────────────────────────────────────────────

/// Local presence plus the latest view of every remote member.
pub struct PresenceRoom {
    local: PresenceData,
    /// Remote peers keyed by user id.
    peers: BTreeMap<String, RemoteCursor>,
}

impl PresenceRoom {
    pub fn new(local: PresenceData) -> Self {
        Self {
            local,
            peers: BTreeMap::new(),
        }
    }

    pub fn local(&self) -> &PresenceData {
        &self.local
    }

    /// Returns the payload to publish when the selection actually moved.
    pub fn set_local_selection(&mut self, selection: Option<Selection>) -> Option<PresenceData> {
        if self.local.selection == selection {
            return None;
        }
        self.local.selection = selection;
        Some(self.local.clone())
    }

    pub fn set_local_color(&mut self, color: impl Into<String>) -> PresenceData {
        self.local.color = color.into();
        self.local.clone()
    }

    /// Replace the remote view with a full presence list and return the
    /// user ids that were not present before. Our own entries (from this
    /// or another tab) are skipped.
    pub fn replace_all(&mut self, members: &[PresenceData], board: Option<&Board>) -> Vec<String> {
        let previous = std::mem::take(&mut self.peers);
        let mut joined = Vec::new();
        for member in members.iter().filter(|m| m.user_id != self.local.user_id) {
            if !previous.contains_key(&member.user_id) && !joined.contains(&member.user_id) {
                joined.push(member.user_id.clone());
            }
            self.peers
                .insert(member.user_id.clone(), RemoteCursor::from_presence(member, board));
        }
        for gone in previous.keys().filter(|id| !self.peers.contains_key(*id)) {
            log::debug!("presence: {gone} left");
        }
        joined
    }

    /// Recompute highlights after the board changed.
    pub fn rehighlight(&mut self, board: Option<&Board>) {
        for cursor in self.peers.values_mut() {
            cursor.highlighted = match (board, cursor.selection) {
                (Some(board), Some(sel)) => board.navigator().highlighted(sel),
                _ => Vec::new(),
            };
        }
    }

    pub fn remote_cursors(&self) -> impl Iterator<Item = &RemoteCursor> {
        self.peers.values()
    }

    pub fn peer(&self, user_id: &str) -> Option<&RemoteCursor> {
        self.peers.get(user_id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Whether the local user has the lowest id among everyone present.
    pub fn is_lowest_member(&self) -> bool {
        self.peers
            .keys()
            .next()
            .map_or(true, |lowest| self.local.user_id < *lowest)
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}
