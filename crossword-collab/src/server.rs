//! WebSocket relay with channel-based fan-out.
//!
//! Architecture:
//! ```text
//! Client A ──┐                          ┌──► Client A
//!            ├── "room:K7QX2M" ── ChannelGroup ──┤
//! Client B ──┘        │                 └──► Client B
//!                     └── presence list (re-sent on every change)
//! ```
//!
//! The relay holds no puzzle state. It verifies the subscribe
//! credential, forwards every published envelope to all subscribers of
//! the channel (the sender included) and keeps the presence list. Room
//! state lives in the directory; clients fetch it after subscribing.
//!
//! A subscriber that falls too far behind is disconnected instead of
//! silently skipping events, so it reconnects and refetches.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::config::ServerConfig;
use crate::directory::CredentialVerifier;
use crate::protocol::{ClientFrame, ServerFrame};
use crate::transport::hub::HubMembership;
use crate::transport::{ChannelMessage, LocalHub};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Relay statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub frames_received: u64,
    pub frames_sent: u64,
    pub rejected_subscriptions: u64,
}

#[derive(Default)]
struct Counters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    rejected_subscriptions: AtomicU64,
}

/// The relay server. Cheap to clone; clones share channels and stats.
#[derive(Clone)]
pub struct RelayServer {
    config: ServerConfig,
    hub: LocalHub,
    counters: Arc<Counters>,
}

impl RelayServer {
    /// Relay that accepts any subscriber.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            hub: LocalHub::from_config(&config),
            config,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Relay that checks subscribe tokens when `require_credentials` is set.
    pub fn with_verifier(config: ServerConfig, verifier: Arc<dyn CredentialVerifier>) -> Self {
        let mut server = Self::new(config);
        if server.config.require_credentials {
            server.hub = server.hub.with_verifier(verifier);
        } else {
            log::debug!("credential checks disabled");
        }
        server
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn hub(&self) -> &LocalHub {
        &self.hub
    }

    pub fn stats(&self) -> RelayStats {
        let c = &self.counters;
        RelayStats {
            total_connections: c.total_connections.load(Ordering::Relaxed),
            active_connections: c.active_connections.load(Ordering::Relaxed),
            frames_received: c.frames_received.load(Ordering::Relaxed),
            frames_sent: c.frames_sent.load(Ordering::Relaxed),
            rejected_subscriptions: c.rejected_subscriptions.load(Ordering::Relaxed),
        }
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("relay listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept loop over an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("new TCP connection from {addr}");

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, addr).await {
                    log::error!("connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        log::info!("websocket connection established from {addr}");

        self.counters.total_connections.fetch_add(1, Ordering::Relaxed);
        self.counters.active_connections.fetch_add(1, Ordering::Relaxed);

        let mut membership: Option<HubMembership> = None;
        let result = self.connection_loop(addr, &mut ws_sender, &mut ws_receiver, &mut membership).await;

        if let Some(m) = membership.take() {
            log::info!("{addr} left {}", m.group.name());
            m.leave(&self.hub).await;
        }
        self.counters.active_connections.fetch_sub(1, Ordering::Relaxed);
        result
    }

    async fn connection_loop<W, R>(
        &self,
        addr: SocketAddr,
        ws_sender: &mut W,
        ws_receiver: &mut R,
        membership: &mut Option<HubMembership>,
    ) -> Result<(), BoxError>
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
        R: futures_util::Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        loop {
            tokio::select! {
                msg = ws_receiver.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
                        match ClientFrame::decode(text.as_str()) {
                            Ok(frame) => {
                                if !self.handle_frame(addr, frame, ws_sender, membership).await? {
                                    return Ok(());
                                }
                            }
                            Err(e) => {
                                log::warn!("failed to decode frame from {addr}: {e}");
                                self.send(ws_sender, &ServerFrame::Error { message: e.to_string() }).await?;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => ws_sender.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("connection closed from {addr}");
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        log::error!("websocket error from {addr}: {e}");
                        return Ok(());
                    }
                    _ => {}
                },

                msg = async {
                    match membership.as_mut() {
                        Some(m) => m.rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => match msg {
                    Ok(message) => {
                        let frame = match message.as_ref() {
                            ChannelMessage::Event(envelope) => ServerFrame::Event { envelope: envelope.clone() },
                            ChannelMessage::Presence(members) => ServerFrame::Presence { members: members.clone() },
                            ChannelMessage::ConnectionLost => continue,
                        };
                        self.send(ws_sender, &frame).await?;
                    }
                    Err(RecvError::Lagged(n)) => {
                        log::warn!("{addr} lagged by {n} messages, disconnecting");
                        let _ = ws_sender.send(Message::Close(None)).await;
                        return Ok(());
                    }
                    Err(RecvError::Closed) => return Ok(()),
                },
            }
        }
    }

    /// Returns `false` when the connection should end.
    async fn handle_frame<W>(
        &self,
        addr: SocketAddr,
        frame: ClientFrame,
        ws_sender: &mut W,
        membership: &mut Option<HubMembership>,
    ) -> Result<bool, BoxError>
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        match frame {
            ClientFrame::Subscribe {
                channel,
                token,
                presence,
            } => {
                if let Some(previous) = membership.take() {
                    previous.leave(&self.hub).await;
                }
                match self.hub.join(&channel, token.as_deref(), presence).await {
                    Ok(joined) => {
                        // Ack before the first broadcast frame can reach this socket.
                        self.send(ws_sender, &ServerFrame::Subscribed { channel: channel.clone() })
                            .await?;
                        *membership = Some(joined);
                        log::info!("{addr} subscribed to {channel}");
                    }
                    Err(e) => {
                        self.counters.rejected_subscriptions.fetch_add(1, Ordering::Relaxed);
                        log::warn!("{addr} rejected from {channel}: {e}");
                        self.send(ws_sender, &ServerFrame::Error { message: e.to_string() }).await?;
                    }
                }
            }
            ClientFrame::Publish { envelope } => match membership.as_ref() {
                Some(m) => {
                    log::trace!("{} on {}", envelope.event.kind(), m.group.name());
                    m.group.publish(envelope);
                }
                None => {
                    self.send(ws_sender, &ServerFrame::Error { message: "not subscribed".into() }).await?;
                }
            },
            ClientFrame::PresenceUpdate { presence } => {
                if let Some(m) = membership.as_ref() {
                    m.group.update_member(m.conn, presence).await;
                }
            }
            ClientFrame::Leave => {
                if let Some(m) = membership.take() {
                    m.leave(&self.hub).await;
                }
                return Ok(false);
            }
            ClientFrame::Ping => self.send(ws_sender, &ServerFrame::Pong).await?,
        }
        Ok(true)
    }

    async fn send<W>(&self, ws_sender: &mut W, frame: &ServerFrame) -> Result<(), BoxError>
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        ws_sender.send(Message::Text(frame.encode()?.into())).await?;
        self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
