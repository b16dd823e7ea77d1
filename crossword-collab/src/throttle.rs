//! Outbound flow control: the cell-edit rate limiter and the offline queue.
//!
//! ```text
//! cell edit ──► EditThrottle::offer ──► send now       (≤ limit per window)
//!                     │
//!                     └─► pending[cell] = latest  ──► poll() every flush delay
//! ```
//!
//! Excess edits are never dropped: only the newest value per cell is kept
//! and flushed once the window has room.

use std::collections::VecDeque;
use std::time::Duration;

use crossword_core::Pos;

use crate::protocol::WireEvent;
use crate::scheduler::FlushTimer;

pub type CellEdit = (Pos, Option<char>);

/// Sliding-window limiter with per-cell coalescing.
#[derive(Debug, Clone)]
pub struct EditThrottle {
    limit: usize,
    window_ms: u64,
    sent: VecDeque<u64>,
    pending: VecDeque<CellEdit>,
    flush: FlushTimer,
    coalesced: u64,
}

impl EditThrottle {
    pub fn new(limit: usize, window: Duration, flush_delay: Duration) -> Self {
        Self {
            limit,
            window_ms: window.as_millis() as u64,
            sent: VecDeque::with_capacity(limit),
            pending: VecDeque::new(),
            flush: FlushTimer::new(flush_delay),
            coalesced: 0,
        }
    }

    fn prune(&mut self, now: u64) {
        while self.sent.front().is_some_and(|t| now.saturating_sub(*t) >= self.window_ms) {
            self.sent.pop_front();
        }
    }

    /// Returns the edit when it may be sent immediately; otherwise it is
    /// queued (replacing any queued edit for the same cell).
    pub fn offer(&mut self, pos: Pos, value: Option<char>, now: u64) -> Option<CellEdit> {
        self.prune(now);
        if let Some(slot) = self.pending.iter_mut().find(|(p, _)| *p == pos) {
            // A newer value must not overtake the queued one.
            slot.1 = value;
            self.coalesced += 1;
            self.flush.arm(now);
            return None;
        }
        if self.sent.len() < self.limit {
            self.sent.push_back(now);
            return Some((pos, value));
        }
        log::debug!("rate limit hit, queueing edit for {pos}");
        self.pending.push_back((pos, value));
        self.flush.arm(now);
        None
    }

    /// Edits that may go out now. Re-arms itself while edits remain.
    pub fn poll(&mut self, now: u64) -> Vec<CellEdit> {
        if !self.flush.fire_if_due(now) {
            return Vec::new();
        }
        self.prune(now);
        let budget = self.limit.saturating_sub(self.sent.len()).min(self.pending.len());
        let ready: Vec<CellEdit> = self.pending.drain(..budget).collect();
        for _ in &ready {
            self.sent.push_back(now);
        }
        if !self.pending.is_empty() {
            self.flush.arm(now);
        }
        ready
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.flush.deadline()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Edits folded into an already-queued edit.
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }

    /// Take everything still queued, e.g. when the connection drops.
    pub fn drain_pending(&mut self) -> Vec<CellEdit> {
        self.flush.cancel();
        self.pending.drain(..).collect()
    }

    pub fn reset(&mut self) {
        self.flush.cancel();
        self.pending.clear();
        self.sent.clear();
    }
}

/// Events produced while disconnected, replayed after reconnect.
///
/// Per-cell events keep only their newest value; a newer timer toggle
/// replaces an older one.
pub struct OfflineQueue {
    queue: VecDeque<WireEvent>,
    max_size: usize,
}

impl OfflineQueue {
    /// Create a new offline queue with max capacity.
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Queue an event. Returns `false` when full.
    pub fn enqueue(&mut self, event: WireEvent) -> bool {
        let superseded = self.queue.iter().position(|queued| supersedes(&event, queued));
        if let Some(index) = superseded {
            self.queue.remove(index);
        } else if self.queue.len() >= self.max_size {
            log::warn!("offline queue full, dropping {}", event.kind());
            return false;
        }
        self.queue.push_back(event);
        true
    }

    pub fn drain(&mut self) -> Vec<WireEvent> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

fn supersedes(new: &WireEvent, old: &WireEvent) -> bool {
    match (new, old) {
        (WireEvent::CellEdit { .. }, WireEvent::CellEdit { .. })
        | (WireEvent::CheckCell { .. }, WireEvent::CheckCell { .. }) => new.cell() == old.cell(),
        (WireEvent::TimerToggle { .. }, WireEvent::TimerToggle { .. }) => true,
        _ => false,
    }
}
