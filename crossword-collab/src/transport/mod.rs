//! Channel transport contract.
//!
//! A transport holds at most one channel subscription. `connect` tears
//! down whatever was there first, so two rooms can never share a
//! receive stream.
//!
//! ```text
//! connect(channel, token, presence) ──► Connected
//!        │                                 │
//!        │   publish / update_presence ◄───┤
//!        │                                 ▼
//!        └──────────────── recv() ──► Event | Presence | ConnectionLost
//! ```
//!
//! Events published on a channel are delivered to every subscriber,
//! the sender included. Filtering our own echoes is the session's job.

pub mod client;
pub mod hub;

use std::future::Future;

use crate::directory::DirectoryError;
use crate::protocol::{Envelope, PresenceData, ProtocolError};

pub use client::WsTransport;
pub use hub::{ChannelGroup, ChannelStats, LinkHandle, LocalHub, LocalTransport};

/// Inbound traffic on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Event(Envelope),
    /// Full presence list after any enter/update/leave.
    Presence(Vec<PresenceData>),
    /// The subscription ended without a `disconnect` call.
    ConnectionLost,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("subscription to {channel} rejected: {reason}")]
    Rejected { channel: String, reason: String },
    #[error("channel {channel} is full ({max} connections)")]
    ChannelFull { channel: String, max: usize },
    #[error("connection closed")]
    Closed,
    #[error(transparent)]
    Credential(#[from] DirectoryError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub trait Transport: Send {
    /// Subscribe to `channel` and enter presence. Any previous
    /// subscription is dropped first.
    fn connect(
        &mut self,
        channel: &str,
        token: Option<&str>,
        presence: PresenceData,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn publish(&mut self, envelope: Envelope) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn update_presence(&mut self, presence: PresenceData) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Leave presence and drop the subscription. Idempotent.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;

    /// Next inbound message. `None` while not subscribed. Cancel safe.
    fn recv(&mut self) -> impl Future<Output = Option<ChannelMessage>> + Send;

    fn is_connected(&self) -> bool;
}
