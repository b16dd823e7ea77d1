//! In-process channel hub: fan-out per channel with presence tracking.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers. Each
//! member gets an independent receiver buffering up to `capacity`
//! messages; a member that lags past that is disconnected and must
//! resubscribe (and refetch) rather than silently miss events.
//!
//! ```text
//!  LocalTransport A ──┐                         ┌──► A
//!                     ├── ChannelGroup("room:X") ┼──► B
//!  LocalTransport B ──┘   members + broadcast    └──► C (relay connection)
//! ```
//!
//! The WebSocket relay uses the same hub, so in-process and networked
//! clients can share a channel.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Notify, RwLock};

use crate::config::ServerConfig;
use crate::directory::CredentialVerifier;
use crate::protocol::{Envelope, PresenceData};
use crate::transport::{ChannelMessage, Transport, TransportError};

/// Statistics for monitoring channel health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub events_sent: u64,
    pub presence_updates: u64,
    pub active_members: usize,
}

/// Lock-free counters for the publish path.
#[derive(Default)]
struct AtomicChannelStats {
    events_sent: AtomicU64,
    presence_updates: AtomicU64,
}

/// One channel: a broadcast sender plus the presence of every member,
/// keyed by connection id (join order).
pub struct ChannelGroup {
    name: String,
    sender: broadcast::Sender<Arc<ChannelMessage>>,
    members: RwLock<BTreeMap<u64, PresenceData>>,
    capacity: usize,
    stats: AtomicChannelStats,
}

impl ChannelGroup {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            name: name.into(),
            sender,
            members: RwLock::new(BTreeMap::new()),
            capacity,
            stats: AtomicChannelStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add a member unless the channel already holds `max` connections.
    /// The receiver is created before the presence refresh goes out, so
    /// the new member sees a list containing itself.
    pub async fn try_add_member(
        &self,
        conn: u64,
        presence: PresenceData,
        max: usize,
    ) -> Option<broadcast::Receiver<Arc<ChannelMessage>>> {
        let rx = self.insert_member(conn, presence, max).await?;
        self.broadcast_presence().await;
        Some(rx)
    }

    async fn insert_member(
        &self,
        conn: u64,
        presence: PresenceData,
        max: usize,
    ) -> Option<broadcast::Receiver<Arc<ChannelMessage>>> {
        let mut members = self.members.write().await;
        if members.len() >= max {
            return None;
        }
        let rx = self.sender.subscribe();
        members.insert(conn, presence);
        Some(rx)
    }

    pub async fn update_member(&self, conn: u64, presence: PresenceData) -> bool {
        {
            let mut members = self.members.write().await;
            match members.get_mut(&conn) {
                Some(slot) if *slot == presence => return false,
                Some(slot) => *slot = presence,
                None => return false,
            }
        }
        self.broadcast_presence().await;
        true
    }

    pub async fn remove_member(&self, conn: u64) -> Option<PresenceData> {
        let removed = self.members.write().await.remove(&conn);
        if removed.is_some() {
            self.broadcast_presence().await;
        }
        removed
    }

    /// Fan an event out to every member, sender included. Returns the
    /// number of receivers.
    pub fn publish(&self, envelope: Envelope) -> usize {
        let count = self
            .sender
            .send(Arc::new(ChannelMessage::Event(envelope)))
            .unwrap_or(0);
        self.stats.events_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    async fn broadcast_presence(&self) {
        let list = self.members().await;
        let _ = self.sender.send(Arc::new(ChannelMessage::Presence(list)));
        self.stats.presence_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn members(&self) -> Vec<PresenceData> {
        self.members.read().await.values().cloned().collect()
    }

    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn stats(&self) -> ChannelStats {
        ChannelStats {
            events_sent: self.stats.events_sent.load(Ordering::Relaxed),
            presence_updates: self.stats.presence_updates.load(Ordering::Relaxed),
            active_members: self.member_count().await,
        }
    }
}

/// A live membership in one channel.
pub struct HubMembership {
    pub group: Arc<ChannelGroup>,
    pub conn: u64,
    pub rx: broadcast::Receiver<Arc<ChannelMessage>>,
}

impl HubMembership {
    /// Leave presence and drop the channel once nobody is left.
    pub async fn leave(self, hub: &LocalHub) {
        self.group.remove_member(self.conn).await;
        drop(self.rx);
        hub.remove_if_empty(self.group.name()).await;
    }
}

/// Maps channel names to groups. Cheap to clone; clones share channels.
#[derive(Clone)]
pub struct LocalHub {
    channels: Arc<RwLock<HashMap<String, Arc<ChannelGroup>>>>,
    capacity: usize,
    max_members: usize,
    verifier: Option<Arc<dyn CredentialVerifier>>,
    next_conn: Arc<AtomicU64>,
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

impl LocalHub {
    pub fn new(capacity: usize, max_members: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            max_members,
            verifier: None,
            next_conn: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.broadcast_capacity, config.max_peers_per_channel)
    }

    /// Require a valid credential on every join.
    pub fn with_verifier(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn requires_credentials(&self) -> bool {
        self.verifier.is_some()
    }

    /// A transport bound to this hub.
    pub fn transport(&self) -> LocalTransport {
        LocalTransport::new(self.clone())
    }

    pub async fn channel(&self, name: &str) -> Option<Arc<ChannelGroup>> {
        self.channels.read().await.get(name).cloned()
    }

    pub async fn remove_if_empty(&self, name: &str) -> bool {
        let mut channels = self.channels.write().await;
        if let Some(group) = channels.get(name) {
            if group.member_count().await == 0 {
                channels.remove(name);
                log::debug!("channel {name} closed (empty)");
                return true;
            }
        }
        false
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Verify the credential (when configured), then subscribe and enter
    /// presence.
    pub async fn join(
        &self,
        channel: &str,
        token: Option<&str>,
        presence: PresenceData,
    ) -> Result<HubMembership, TransportError> {
        if let Some(verifier) = &self.verifier {
            let token = token.ok_or_else(|| TransportError::Rejected {
                channel: channel.to_string(),
                reason: "credential required".into(),
            })?;
            let user_id = verifier.verify(channel, token)?;
            if user_id != presence.user_id {
                return Err(TransportError::Rejected {
                    channel: channel.to_string(),
                    reason: "credential issued to another user".into(),
                });
            }
        }
        let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let user_id = presence.user_id.clone();

        // Lookup and insert happen under the map's write lock so a
        // concurrent `remove_if_empty` cannot drop the group in between.
        let (group, rx) = {
            let mut channels = self.channels.write().await;
            let group = match channels.get(channel) {
                Some(group) => group.clone(),
                None => {
                    let group = Arc::new(ChannelGroup::new(channel, self.capacity));
                    channels.insert(channel.to_string(), group.clone());
                    log::debug!("channel {channel} opened");
                    group
                }
            };
            let Some(rx) = group.insert_member(conn, presence, self.max_members).await else {
                if group.member_count().await == 0 {
                    channels.remove(channel);
                }
                return Err(TransportError::ChannelFull {
                    channel: channel.to_string(),
                    max: self.max_members,
                });
            };
            (group, rx)
        };
        group.broadcast_presence().await;
        log::info!("{user_id} subscribed to {channel} (conn {conn})");
        Ok(HubMembership { group, conn, rx })
    }
}

// ───────────────────────────────────────────────────────────────────
// LocalTransport
// ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct LinkState {
    severed: AtomicBool,
    notify: Notify,
}

/// Cuts a transport's connection from outside, as a network drop would.
#[derive(Clone)]
pub struct LinkHandle {
    state: Arc<LinkState>,
}

impl LinkHandle {
    pub fn sever(&self) {
        self.state.severed.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }
}

/// [`Transport`] over a [`LocalHub`].
pub struct LocalTransport {
    hub: LocalHub,
    membership: Option<HubMembership>,
    link: Arc<LinkState>,
}

impl LocalTransport {
    pub fn new(hub: LocalHub) -> Self {
        Self {
            hub,
            membership: None,
            link: Arc::new(LinkState::default()),
        }
    }

    pub fn link_handle(&self) -> LinkHandle {
        LinkHandle {
            state: Arc::clone(&self.link),
        }
    }

    pub fn channel(&self) -> Option<&str> {
        self.membership.as_ref().map(|m| m.group.name())
    }

    async fn drop_link(&mut self) {
        if let Some(membership) = self.membership.take() {
            log::warn!("lost connection to {}", membership.group.name());
            membership.leave(&self.hub).await;
        }
        self.link.severed.store(false, Ordering::SeqCst);
    }
}

impl Transport for LocalTransport {
    async fn connect(&mut self, channel: &str, token: Option<&str>, presence: PresenceData) -> Result<(), TransportError> {
        self.disconnect().await;
        self.link.severed.store(false, Ordering::SeqCst);
        self.membership = Some(self.hub.join(channel, token, presence).await?);
        Ok(())
    }

    async fn publish(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        let membership = self.membership.as_ref().ok_or(TransportError::NotConnected)?;
        if self.link.severed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        membership.group.publish(envelope);
        Ok(())
    }

    async fn update_presence(&mut self, presence: PresenceData) -> Result<(), TransportError> {
        let membership = self.membership.as_ref().ok_or(TransportError::NotConnected)?;
        if self.link.severed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        membership.group.update_member(membership.conn, presence).await;
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(membership) = self.membership.take() {
            log::debug!("leaving {}", membership.group.name());
            membership.leave(&self.hub).await;
        }
    }

    async fn recv(&mut self) -> Option<ChannelMessage> {
        let link = Arc::clone(&self.link);
        let membership = self.membership.as_mut()?;

        let notified = link.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let received = if link.severed.load(Ordering::SeqCst) {
            None
        } else {
            tokio::select! {
                _ = &mut notified => None,
                msg = membership.rx.recv() => Some(msg),
            }
        };

        match received {
            Some(Ok(msg)) => Some(msg.as_ref().clone()),
            Some(Err(RecvError::Lagged(n))) => {
                log::warn!("receiver lagged by {n} messages, resubscribing");
                self.drop_link().await;
                Some(ChannelMessage::ConnectionLost)
            }
            Some(Err(RecvError::Closed)) | None => {
                self.drop_link().await;
                Some(ChannelMessage::ConnectionLost)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.membership.is_some() && !self.link.severed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WireEvent;
    use crossword_core::Pos;

    fn presence(user: &str) -> PresenceData {
        PresenceData {
            user_id: user.into(),
            display_name: user.into(),
            color: "#4A90D9".into(),
            selection: None,
        }
    }

    fn envelope(user: &str) -> Envelope {
        Envelope {
            user_id: user.into(),
            timestamp: 1,
            tab_id: format!("{user}-tab"),
            event: WireEvent::cell_edit(Pos::new(0, 0), Some('A')),
        }
    }

    async fn next_event(t: &mut LocalTransport) -> Envelope {
        loop {
            match t.recv().await {
                Some(ChannelMessage::Event(env)) => return env,
                Some(ChannelMessage::Presence(_)) => continue,
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_fan_out_includes_sender() {
        let hub = LocalHub::new(16, 8);
        let mut a = hub.transport();
        let mut b = hub.transport();
        a.connect("room:A", None, presence("a")).await.unwrap();
        b.connect("room:A", None, presence("b")).await.unwrap();
        a.publish(envelope("a")).await.unwrap();
        assert_eq!(next_event(&mut a).await.user_id, "a");
        assert_eq!(next_event(&mut b).await.user_id, "a");
    }

    #[tokio::test]
    async fn test_presence_refresh_on_join_and_leave() {
        let hub = LocalHub::new(16, 8);
        let mut a = hub.transport();
        let mut b = hub.transport();
        a.connect("room:A", None, presence("a")).await.unwrap();
        assert_eq!(a.recv().await, Some(ChannelMessage::Presence(vec![presence("a")])));
        b.connect("room:A", None, presence("b")).await.unwrap();
        assert_eq!(
            a.recv().await,
            Some(ChannelMessage::Presence(vec![presence("a"), presence("b")]))
        );
        b.disconnect().await;
        assert_eq!(a.recv().await, Some(ChannelMessage::Presence(vec![presence("a")])));
        assert!(b.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let hub = LocalHub::new(16, 8);
        let mut a = hub.transport();
        let mut b = hub.transport();
        a.connect("room:A", None, presence("a")).await.unwrap();
        b.connect("room:B", None, presence("b")).await.unwrap();
        a.publish(envelope("a")).await.unwrap();
        b.publish(envelope("b")).await.unwrap();
        assert_eq!(next_event(&mut a).await.user_id, "a");
        assert_eq!(next_event(&mut b).await.user_id, "b");
        assert_eq!(hub.channel_count().await, 2);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_subscription() {
        let hub = LocalHub::new(16, 8);
        let mut a = hub.transport();
        a.connect("room:A", None, presence("a")).await.unwrap();
        a.connect("room:B", None, presence("a")).await.unwrap();
        assert_eq!(a.channel(), Some("room:B"));
        assert!(hub.channel("room:A").await.is_none());
    }

    #[tokio::test]
    async fn test_channel_full() {
        let hub = LocalHub::new(16, 1);
        let mut a = hub.transport();
        let mut b = hub.transport();
        a.connect("room:A", None, presence("a")).await.unwrap();
        assert!(matches!(
            b.connect("room:A", None, presence("b")).await,
            Err(TransportError::ChannelFull { max: 1, .. })
        ));
        assert!(!b.is_connected());
    }

    #[tokio::test]
    async fn test_sever_reports_connection_lost() {
        let hub = LocalHub::new(16, 8);
        let mut a = hub.transport();
        let mut b = hub.transport();
        a.connect("room:A", None, presence("a")).await.unwrap();
        b.connect("room:A", None, presence("b")).await.unwrap();
        let link = b.link_handle();
        link.sever();
        assert!(!b.is_connected());
        assert!(matches!(b.publish(envelope("b")).await, Err(TransportError::Closed)));
        loop {
            if b.recv().await == Some(ChannelMessage::ConnectionLost) {
                break;
            }
        }
        assert_eq!(hub.channel("room:A").await.unwrap().member_count().await, 1);
        b.connect("room:A", None, presence("b")).await.unwrap();
        assert!(b.is_connected());
    }

    #[tokio::test]
    async fn test_lagged_receiver_is_dropped() {
        let hub = LocalHub::new(2, 8);
        let mut a = hub.transport();
        a.connect("room:A", None, presence("a")).await.unwrap();
        let group = hub.channel("room:A").await.unwrap();
        for _ in 0..5 {
            group.publish(envelope("x"));
        }
        assert_eq!(a.recv().await, Some(ChannelMessage::ConnectionLost));
        assert!(!a.is_connected());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_join_racing_last_leave_keeps_one_group() {
        let hub = LocalHub::new(16, 8);
        for round in 0..200 {
            let channel = format!("room:R{round}");
            let leaver = hub.join(&channel, None, presence("b")).await.unwrap();

            let leave_hub = hub.clone();
            let leave = tokio::spawn(async move { leaver.leave(&leave_hub).await });
            let join_hub = hub.clone();
            let join_channel = channel.clone();
            let join = tokio::spawn(async move { join_hub.join(&join_channel, None, presence("a")).await });

            leave.await.unwrap();
            let joined = join.await.unwrap().unwrap();
            let current = hub.channel(&channel).await.expect("joined channel must stay registered");
            assert!(Arc::ptr_eq(&current, &joined.group), "round {round} split the channel");
            assert_eq!(current.member_count().await, 1);
            joined.leave(&hub).await;
        }
        assert_eq!(hub.channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let hub = LocalHub::new(16, 8);
        let mut a = hub.transport();
        a.connect("room:A", None, presence("a")).await.unwrap();
        a.publish(envelope("a")).await.unwrap();
        a.publish(envelope("a")).await.unwrap();
        let stats = hub.channel("room:A").await.unwrap().stats().await;
        assert_eq!(stats.events_sent, 2);
        assert_eq!(stats.active_members, 1);
        assert_eq!(stats.presence_updates, 1);
    }
}
