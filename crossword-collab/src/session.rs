//! Collaborative session: the sync state machine around one local store.
//!
//! ```text
//!            join / create_room
//! Disconnected ──────────────► Connecting ──► Connected ◄──┐
//!       ▲                                        │         │ reconnect
//!       │                          ConnectionLost│         │ (subscribe
//!       │ join                                   ▼         │  then fetch)
//!    Closed ◄──────── leave ─────────────── Reconnecting ──┘
//! ```
//!
//! Outbound: local store changes ──► wire events (rate-limited edits,
//! offline queue while not connected). Inbound: channel events ──► store
//! dispatch tagged `Origin::Remote`, so they are never re-published.
//!
//! Entering `Connected` always subscribes before fetching the room
//! state. Events that land between the two wait in the transport's
//! receive queue and are applied on top of the fetched snapshot; every
//! event kind is idempotent, so replaying them is harmless.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crossword_core::{Action, Board, Change, EntryMode, NavInput, Origin, Pos, Puzzle, PuzzleError, Snapshot, Store};

use crate::config::SyncConfig;
use crate::directory::{DirectoryError, Identity, Member, Membership, RoomDirectory, RoomInfo, RoomStateUpdate};
use crate::presence::{fallback_color, PresenceRoom, RemoteCursor};
use crate::protocol::{snapshot_from_pairs, Envelope, PresenceData, WireEvent};
use crate::scheduler::{earliest, Clock, Debouncer, SystemClock};
use crate::throttle::{EditThrottle, OfflineQueue};
use crate::timer::SharedTimer;
use crate::transport::{ChannelMessage, Transport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Puzzle(#[from] PuzzleError),
    #[error("not in a room")]
    NotInRoom,
}

/// Counters for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub events_published: u64,
    pub events_applied: u64,
    pub echoes_suppressed: u64,
    pub snapshots_sent: u64,
    pub state_pushes: u64,
}

struct ActiveRoom {
    info: RoomInfo,
    member: Member,
    channel: String,
}

pub struct CollabSession<T: Transport, D: RoomDirectory> {
    identity: Identity,
    tab_id: String,
    config: SyncConfig,
    transport: T,
    directory: Arc<D>,
    clock: Arc<dyn Clock>,
    store: Store,
    state: SessionState,
    room: Option<ActiveRoom>,
    presence: PresenceRoom,
    presence_seen: bool,
    throttle: EditThrottle,
    offline: OfflineQueue,
    timer: SharedTimer,
    persist: Debouncer,
    retry: Debouncer,
    last_timestamp: u64,
    stats: SessionStats,
}

impl<T: Transport, D: RoomDirectory> CollabSession<T, D> {
    pub fn new(identity: Identity, transport: T, directory: Arc<D>, config: SyncConfig) -> Self {
        Self::with_clock(identity, transport, directory, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        identity: Identity,
        transport: T,
        directory: Arc<D>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let presence = PresenceRoom::new(Self::idle_presence(&identity));
        Self {
            tab_id: Uuid::new_v4().to_string(),
            throttle: EditThrottle::new(config.edit_rate_limit, config.rate_window, config.flush_delay),
            offline: OfflineQueue::new(config.offline_capacity),
            persist: Debouncer::new(config.persist_debounce),
            retry: Debouncer::new(config.reconnect_delay),
            identity,
            config,
            transport,
            directory,
            clock,
            store: Store::ephemeral(),
            state: SessionState::Disconnected,
            room: None,
            presence,
            presence_seen: false,
            timer: SharedTimer::default(),
            last_timestamp: 0,
            stats: SessionStats::default(),
        }
    }

    fn idle_presence(identity: &Identity) -> PresenceData {
        let color = fallback_color(&identity.user_id);
        PresenceData {
            user_id: identity.user_id.clone(),
            display_name: identity.display_name.clone(),
            color,
            selection: None,
        }
    }

    // ── Accessors ───────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Direct store access for local input. Call [`Self::sync_outbound`]
    /// afterwards (or let [`Self::pump`] do it).
    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    pub fn room_code(&self) -> Option<&str> {
        self.room.as_ref().map(|r| r.info.code.as_str())
    }

    pub fn member(&self) -> Option<&Member> {
        self.room.as_ref().map(|r| &r.member)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn shared_timer(&self) -> SharedTimer {
        self.timer
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn offline_len(&self) -> usize {
        self.offline.len()
    }

    pub fn pending_edits(&self) -> usize {
        self.throttle.pending_len()
    }

    pub fn remote_cursors(&self) -> Vec<RemoteCursor> {
        self.presence.remote_cursors().cloned().collect()
    }

    // ── Room lifecycle ──────────────────────────────────────────

    /// Create a room for `puzzle` and join it as host.
    pub async fn create_room(&mut self, puzzle_id: &str, puzzle: Puzzle) -> Result<Membership, SessionError> {
        // Malformed payloads fail before the directory sees them.
        Board::new(puzzle_id, puzzle.clone())?;
        let info = self.directory.create(&self.identity, puzzle_id, &puzzle).await?;
        self.join(&info.code).await
    }

    /// Tear down any current room, then join `code` with
    /// subscribe-then-fetch.
    pub async fn join(&mut self, code: &str) -> Result<Membership, SessionError> {
        self.teardown().await;

        let membership = self.directory.join(code, &self.identity).await?;
        let board = Board::new(membership.room.puzzle_id.as_str(), membership.room.puzzle.clone())?;
        self.store.load_board(board);
        self.store.take_changes();

        self.presence = PresenceRoom::new(PresenceData {
            color: membership.member.color.clone(),
            selection: self.store.state().selection,
            ..Self::idle_presence(&self.identity)
        });
        self.room = Some(ActiveRoom {
            channel: self.config.channel_for(&membership.room.code),
            info: membership.room.clone(),
            member: membership.member.clone(),
        });
        log::info!(
            "joining room {} as {} ({})",
            membership.room.code,
            self.identity.user_id,
            if membership.already_joined { "rejoin" } else { "new member" }
        );

        self.state = SessionState::Connecting;
        if let Err(e) = self.connect_and_sync().await {
            log::warn!("initial connect to {} failed: {e}", membership.room.code);
            self.connection_lost();
            return Err(e);
        }
        Ok(membership)
    }

    /// Re-enter presence and re-run subscribe-then-fetch. Anything
    /// produced while offline is replayed on top of the fetched state.
    pub async fn reconnect(&mut self) -> Result<(), SessionError> {
        if self.room.is_none() {
            return Err(SessionError::NotInRoom);
        }
        self.transport.disconnect().await;
        self.connection_lost();
        self.retry.cancel();
        match self.connect_and_sync().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.retry.schedule(self.clock.now_ms());
                Err(e)
            }
        }
    }

    /// Flush the write-behind state, leave presence and the directory.
    pub async fn leave(&mut self) -> Result<(), SessionError> {
        let Some(room) = self.room.as_ref() else {
            return Err(SessionError::NotInRoom);
        };
        let code = room.info.code.clone();
        self.sync_outbound().await;
        if self.persist.is_pending() {
            self.push_state().await;
        }
        let result = self.directory.leave(&code, &self.identity.user_id).await;
        self.teardown().await;
        self.state = SessionState::Closed;
        log::info!("left room {code}");
        result.map_err(SessionError::from)
    }

    /// Drop the subscription, every timer and all room-scoped state.
    async fn teardown(&mut self) {
        self.transport.disconnect().await;
        self.throttle.reset();
        self.offline.clear();
        self.persist.cancel();
        self.retry.cancel();
        self.presence = PresenceRoom::new(Self::idle_presence(&self.identity));
        self.presence_seen = false;
        self.timer = SharedTimer::default();
        self.room = None;
        self.state = SessionState::Disconnected;
    }

    async fn connect_and_sync(&mut self) -> Result<(), SessionError> {
        let (code, channel) = match &self.room {
            Some(room) => (room.info.code.clone(), room.channel.clone()),
            None => return Err(SessionError::NotInRoom),
        };

        let credential = self.directory.credential(&code, &self.identity.user_id).await?;
        self.transport
            .connect(&channel, Some(credential.token.as_str()), self.presence.local().clone())
            .await?;
        log::info!("subscribed to {channel}, fetching room state");

        let room_state = match self.directory.fetch_state(&code).await {
            Ok(state) => state,
            Err(e) => {
                self.transport.disconnect().await;
                return Err(e.into());
            }
        };
        let now = self.clock.now_ms();
        self.timer = room_state.timer;
        self.store.dispatch_from(
            Action::ApplySnapshot {
                snapshot: room_state.to_snapshot(now),
                replace: true,
            },
            Origin::Remote,
        );
        self.sync_store_timer(now);
        self.presence_seen = false;
        self.state = SessionState::Connected;
        log::info!(
            "room {code} synced: {} cells, {}s elapsed",
            room_state.user_grid.len(),
            self.timer.elapsed(now)
        );

        let replay = self.offline.drain();
        if !replay.is_empty() {
            log::info!("replaying {} offline events", replay.len());
            for event in replay {
                self.replay(event, now).await;
            }
            self.persist.schedule(now);
        }
        Ok(())
    }

    async fn replay(&mut self, event: WireEvent, now: u64) {
        match event {
            WireEvent::TimerToggle { is_paused, .. } => {
                if self.timer.set_paused(is_paused, now) {
                    self.sync_store_timer(now);
                    self.emit(self.timer.to_event()).await;
                }
            }
            WireEvent::CellEdit { row, col, ref value } => {
                let value = value.chars().next();
                self.apply_event(&event, now);
                self.send_edit(Pos::new(row, col), value, now).await;
            }
            other => {
                self.apply_event(&other, now);
                self.emit(other).await;
            }
        }
    }

    fn connection_lost(&mut self) {
        if self.room.is_none() {
            return;
        }
        if self.state != SessionState::Reconnecting {
            log::warn!("connection lost, state {:?} -> Reconnecting", self.state);
        }
        self.state = SessionState::Reconnecting;
        for (pos, value) in self.throttle.drain_pending() {
            self.offline.enqueue(WireEvent::cell_edit(pos, value));
        }
        self.presence.clear();
        self.presence_seen = false;
        self.retry.schedule(self.clock.now_ms());
    }

    // ── Event loop ──────────────────────────────────────────────

    /// Wait for the next inbound message or timer deadline, handle it,
    /// and flush outbound changes. Returns `false` when there is nothing
    /// left to wait for.
    pub async fn pump(&mut self) -> bool {
        self.sync_outbound().await;
        let now = self.clock.now_ms();
        let deadline = self.next_deadline(now);
        let connected = self.state == SessionState::Connected;
        if !connected && deadline.is_none() {
            return false;
        }

        let wait = deadline.map_or(Duration::from_secs(3600), |d| Duration::from_millis(d.saturating_sub(now)));
        let inbound = tokio::select! {
            msg = self.transport.recv(), if connected => msg,
            _ = tokio::time::sleep(wait), if deadline.is_some() => None,
        };
        if let Some(message) = inbound {
            self.handle_message(message).await;
        }
        self.poll().await;
        self.sync_outbound().await;
        true
    }

    /// Handle everything already queued on the transport without
    /// waiting on timers.
    pub async fn drain_inbound(&mut self) -> usize {
        let mut handled = 0;
        while self.state == SessionState::Connected {
            let next = tokio::time::timeout(Duration::from_millis(20), self.transport.recv()).await;
            match next {
                Ok(Some(message)) => {
                    self.handle_message(message).await;
                    handled += 1;
                }
                Ok(None) | Err(_) => break,
            }
        }
        self.sync_outbound().await;
        handled
    }

    pub async fn handle_message(&mut self, message: ChannelMessage) {
        match message {
            ChannelMessage::Event(envelope) => {
                if envelope.tab_id == self.tab_id {
                    log::trace!("dropping echo of {}", envelope.event.kind());
                    self.stats.echoes_suppressed += 1;
                    return;
                }
                log::debug!("applying {} from {}", envelope.event.kind(), envelope.user_id);
                let now = self.clock.now_ms();
                self.apply_event(&envelope.event, now);
                self.stats.events_applied += 1;
            }
            ChannelMessage::Presence(members) => {
                let board = self.store.board().cloned();
                let joined = self.presence.replace_all(&members, board.as_deref());
                let responder = self.presence_seen && !joined.is_empty() && self.presence.is_lowest_member();
                self.presence_seen = true;
                if responder {
                    log::info!("sending state snapshot for new member(s) {joined:?}");
                    let snapshot = self.store.state().snapshot();
                    self.emit(WireEvent::state_sync(&snapshot)).await;
                    self.stats.snapshots_sent += 1;
                }
            }
            ChannelMessage::ConnectionLost => self.connection_lost(),
        }
    }

    /// Inbound event ──► remote-tagged store action.
    fn apply_event(&mut self, event: &WireEvent, now: u64) {
        let action = match event {
            WireEvent::CellEdit { row, col, value } => Action::SetCell {
                pos: Pos::new(*row, *col),
                value: value.chars().next(),
                mode: EntryMode::Force,
            },
            WireEvent::CheckCell { row, col, is_correct } => Action::CheckCell {
                pos: Pos::new(*row, *col),
                correct: *is_correct,
            },
            WireEvent::ClearChecks {} => Action::ClearChecks,
            WireEvent::PuzzleComplete {} => Action::SetComplete(true),
            WireEvent::TimerToggle { .. } => {
                self.timer.apply(event);
                self.sync_store_timer(now);
                return;
            }
            WireEvent::StateSync {
                user_grid,
                checked_cells,
                accumulated_seconds,
                is_complete,
            } => {
                let seconds = self.timer.elapsed(now).max(*accumulated_seconds);
                self.timer.adopt_elapsed(seconds, now);
                Action::ApplySnapshot {
                    snapshot: Snapshot {
                        elapsed_seconds: self.timer.elapsed(now),
                        paused: self.timer.is_paused,
                        complete: *is_complete,
                        ..snapshot_from_pairs(user_grid, checked_cells)
                    },
                    replace: false,
                }
            }
        };
        self.store.dispatch_from(action, Origin::Remote);
    }

    // ── Outbound ────────────────────────────────────────────────

    /// Local convenience: dispatch and publish.
    pub async fn dispatch(&mut self, action: Action) -> bool {
        let changed = self.store.dispatch(action);
        self.sync_outbound().await;
        changed
    }

    pub async fn navigate(&mut self, input: NavInput) -> bool {
        let changed = self.store.navigate(input);
        self.sync_outbound().await;
        changed
    }

    /// Pause or resume the shared clock.
    pub async fn toggle_timer(&mut self) -> bool {
        self.dispatch(Action::TogglePause).await
    }

    /// Translate pending store changes into wire traffic.
    pub async fn sync_outbound(&mut self) {
        let changes = self.store.take_changes();
        if changes.is_empty() {
            return;
        }
        let now = self.clock.now_ms();
        let mut persist = false;
        for change in changes {
            match change {
                Change::CellEdited { pos, value } => {
                    persist = true;
                    self.send_edit(pos, value, now).await;
                }
                Change::CellChecked { pos, correct } => {
                    persist = true;
                    self.emit(WireEvent::CheckCell {
                        row: pos.row,
                        col: pos.col,
                        is_correct: correct,
                    })
                    .await;
                }
                Change::ChecksCleared => {
                    persist = true;
                    self.emit(WireEvent::ClearChecks {}).await;
                }
                Change::Completed => {
                    persist = true;
                    self.emit(WireEvent::PuzzleComplete {}).await;
                    if self.timer.pause(now) {
                        self.sync_store_timer(now);
                        self.emit(self.timer.to_event()).await;
                    }
                }
                Change::PauseToggled { paused } => {
                    persist = true;
                    if self.timer.set_paused(paused, now) {
                        self.emit(self.timer.to_event()).await;
                    }
                    self.sync_store_timer(now);
                }
                Change::SelectionChanged(selection) => {
                    if let Some(presence) = self.presence.set_local_selection(selection) {
                        self.send_presence(presence).await;
                    }
                }
            }
        }
        if persist && self.room.is_some() {
            self.persist.schedule(now);
        }
    }

    async fn send_edit(&mut self, pos: Pos, value: Option<char>, now: u64) {
        if self.state != SessionState::Connected {
            self.emit(WireEvent::cell_edit(pos, value)).await;
            return;
        }
        if let Some((pos, value)) = self.throttle.offer(pos, value, now) {
            self.emit(WireEvent::cell_edit(pos, value)).await;
        }
    }

    async fn send_presence(&mut self, presence: PresenceData) {
        if self.state != SessionState::Connected {
            return;
        }
        if let Err(e) = self.transport.update_presence(presence).await {
            log::warn!("presence update failed: {e}");
            self.connection_lost();
        }
    }

    /// Publish now when connected, otherwise keep for replay.
    async fn emit(&mut self, event: WireEvent) {
        if self.room.is_none() {
            return;
        }
        if self.state != SessionState::Connected {
            self.offline.enqueue(event);
            return;
        }
        let envelope = self.envelope(event);
        match self.transport.publish(envelope.clone()).await {
            Ok(()) => self.stats.events_published += 1,
            Err(e) => {
                log::warn!("publish {} failed: {e}", envelope.event.kind());
                self.connection_lost();
                self.offline.enqueue(envelope.event);
            }
        }
    }

    fn envelope(&mut self, event: WireEvent) -> Envelope {
        let timestamp = self.clock.now_ms().max(self.last_timestamp + 1);
        self.last_timestamp = timestamp;
        Envelope {
            user_id: self.identity.user_id.clone(),
            timestamp,
            tab_id: self.tab_id.clone(),
            event,
        }
    }

    fn sync_store_timer(&mut self, now: u64) {
        self.store.dispatch_from(
            Action::SyncTimer {
                elapsed_seconds: self.timer.elapsed(now),
                paused: self.timer.is_paused,
            },
            Origin::Remote,
        );
    }

    // ── Timers ──────────────────────────────────────────────────

    fn next_deadline(&self, now: u64) -> Option<u64> {
        let tick = if self.store.state().complete || self.room.is_none() {
            None
        } else {
            self.timer.next_tick(now)
        };
        let retry = if self.state == SessionState::Reconnecting {
            self.retry.deadline()
        } else {
            None
        };
        earliest([self.throttle.next_deadline(), self.persist.deadline(), tick, retry])
    }

    /// Run every timer that is due.
    pub async fn poll(&mut self) {
        let now = self.clock.now_ms();

        if self.state == SessionState::Connected {
            for (pos, value) in self.throttle.poll(now) {
                self.emit(WireEvent::cell_edit(pos, value)).await;
            }
        }

        if self.persist.fire_if_due(now) {
            self.push_state().await;
        }

        if !self.timer.is_paused && !self.store.state().complete {
            let elapsed = self.timer.elapsed(now);
            if elapsed != self.store.state().timer.elapsed_seconds {
                self.sync_store_timer(now);
            }
        }

        if self.state == SessionState::Reconnecting && self.retry.fire_if_due(now) {
            if let Err(e) = self.reconnect().await {
                log::warn!("reconnect failed: {e}");
            }
        }
    }

    /// Write-behind: push the merged local state to the directory.
    async fn push_state(&mut self) {
        let Some(code) = self.room.as_ref().map(|r| r.info.code.clone()) else {
            return;
        };
        let update = RoomStateUpdate::from_snapshot(&self.store.state().snapshot(), self.timer);
        match self.directory.push_state(&code, update).await {
            Ok(()) => self.stats.state_pushes += 1,
            Err(e) => log::warn!("failed to push state for room {code}: {e}"),
        }
    }
}
