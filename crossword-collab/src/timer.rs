//! Shared room clock.
//!
//! Rooms never broadcast ticks. They store one tuple and every client
//! derives the elapsed time from it:
//!
//! ```text
//! elapsed = accumulatedSeconds + (isPaused ? 0 : (now - startedAt) / 1000)
//! ```

use serde::{Deserialize, Serialize};

use crate::protocol::WireEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedTimer {
    pub accumulated_seconds: u64,
    /// Unix millis of the last resume; `None` while paused.
    pub started_at: Option<u64>,
    pub is_paused: bool,
}

impl Default for SharedTimer {
    /// A fresh room waits for its first keystroke.
    fn default() -> Self {
        Self::paused(0)
    }
}

impl SharedTimer {
    pub fn paused(accumulated_seconds: u64) -> Self {
        Self {
            accumulated_seconds,
            started_at: None,
            is_paused: true,
        }
    }

    pub fn running(accumulated_seconds: u64, now_ms: u64) -> Self {
        Self {
            accumulated_seconds,
            started_at: Some(now_ms),
            is_paused: false,
        }
    }

    pub fn elapsed(&self, now_ms: u64) -> u64 {
        match (self.is_paused, self.started_at) {
            (false, Some(started)) => self.accumulated_seconds + now_ms.saturating_sub(started) / 1000,
            _ => self.accumulated_seconds,
        }
    }

    /// Fold the running interval into the accumulated value.
    pub fn pause(&mut self, now_ms: u64) -> bool {
        if self.is_paused {
            return false;
        }
        self.accumulated_seconds = self.elapsed(now_ms);
        self.started_at = None;
        self.is_paused = true;
        true
    }

    pub fn resume(&mut self, now_ms: u64) -> bool {
        if !self.is_paused {
            return false;
        }
        self.started_at = Some(now_ms);
        self.is_paused = false;
        true
    }

    pub fn set_paused(&mut self, paused: bool, now_ms: u64) -> bool {
        if paused {
            self.pause(now_ms)
        } else {
            self.resume(now_ms)
        }
    }

    /// Take over a peer's elapsed value, keeping the pause state. A
    /// running timer restarts its interval at `now_ms`.
    pub fn adopt_elapsed(&mut self, seconds: u64, now_ms: u64) {
        self.accumulated_seconds = seconds;
        if !self.is_paused {
            self.started_at = Some(now_ms);
        }
    }

    /// Adopt a peer's toggle. Returns `false` for anything that is not a
    /// `timer_toggle`.
    pub fn apply(&mut self, event: &WireEvent) -> bool {
        let WireEvent::TimerToggle {
            is_paused,
            accumulated_seconds,
            started_at,
        } = event
        else {
            return false;
        };
        *self = Self {
            accumulated_seconds: *accumulated_seconds,
            started_at: if *is_paused { None } else { *started_at },
            is_paused: *is_paused,
        };
        true
    }

    pub fn to_event(&self) -> WireEvent {
        WireEvent::TimerToggle {
            is_paused: self.is_paused,
            accumulated_seconds: self.accumulated_seconds,
            started_at: self.started_at,
        }
    }

    /// Milliseconds until the displayed second changes, if running.
    pub fn next_tick(&self, now_ms: u64) -> Option<u64> {
        let started = self.started_at.filter(|_| !self.is_paused)?;
        let running = now_ms.saturating_sub(started);
        Some(now_ms + 1000 - running % 1000)
    }
}
