//! WebSocket client transport for the relay server.
//!
//! ```text
//! connect_async(url) ──► Subscribe frame ──► wait for Subscribed | Error
//!         │
//!         ├── writer task: mpsc<ClientFrame> ──► ws sink
//!         └── reader task: ws stream ──► mpsc<ChannelMessage>
//! ```
//!
//! A dropped socket surfaces as [`ChannelMessage::ConnectionLost`];
//! reconnecting is the session's call.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientFrame, Envelope, PresenceData, ServerFrame};
use crate::transport::{ChannelMessage, Transport, TransportError};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CHANNEL_CAPACITY: usize = 256;

struct WsLink {
    channel: String,
    outgoing: mpsc::Sender<ClientFrame>,
    incoming: mpsc::Receiver<ChannelMessage>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

/// [`Transport`] speaking the relay's JSON frames over WebSocket.
pub struct WsTransport {
    url: String,
    link: Option<WsLink>,
}

impl WsTransport {
    /// `url` like `ws://127.0.0.1:9090`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            link: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn channel(&self) -> Option<&str> {
        self.link.as_ref().map(|l| l.channel.as_str())
    }

    async fn send(&self, frame: ClientFrame) -> Result<(), TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        link.outgoing.send(frame).await.map_err(|_| TransportError::Closed)
    }
}

fn to_channel_message(frame: ServerFrame) -> Option<ChannelMessage> {
    match frame {
        ServerFrame::Event { envelope } => Some(ChannelMessage::Event(envelope)),
        ServerFrame::Presence { members } => Some(ChannelMessage::Presence(members)),
        ServerFrame::Error { message } => {
            log::warn!("relay error: {message}");
            None
        }
        ServerFrame::Subscribed { .. } | ServerFrame::Pong => None,
    }
}

impl Transport for WsTransport {
    async fn connect(&mut self, channel: &str, token: Option<&str>, presence: PresenceData) -> Result<(), TransportError> {
        self.disconnect().await;

        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let subscribe = ClientFrame::Subscribe {
            channel: channel.to_string(),
            token: token.map(String::from),
            presence,
        };
        ws_writer
            .send(Message::Text(subscribe.encode()?.into()))
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);

        // Frames racing ahead of the acknowledgement are kept.
        let handshake = async {
            while let Some(msg) = ws_reader.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => return Err(TransportError::Connect(e.to_string())),
                };
                match ServerFrame::decode(text.as_str())? {
                    ServerFrame::Subscribed { .. } => return Ok(()),
                    ServerFrame::Error { message } => {
                        return Err(TransportError::Rejected {
                            channel: channel.to_string(),
                            reason: message,
                        })
                    }
                    other => {
                        if let Some(early) = to_channel_message(other) {
                            let _ = in_tx.send(early).await;
                        }
                    }
                }
            }
            Err(TransportError::Closed)
        };
        tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake)
            .await
            .map_err(|_| TransportError::Connect("subscribe timed out".into()))??;

        let (out_tx, mut out_rx) = mpsc::channel::<ClientFrame>(CHANNEL_CAPACITY);
        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let text = match frame.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        log::error!("dropping unencodable frame: {e}");
                        continue;
                    }
                };
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerFrame::decode(text.as_str()) {
                        Ok(frame) => {
                            if let Some(message) = to_channel_message(frame) {
                                if in_tx.send(message).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => log::warn!("failed to decode relay frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            let _ = in_tx.send(ChannelMessage::ConnectionLost).await;
        });

        log::info!("subscribed to {channel} via {}", self.url);
        self.link = Some(WsLink {
            channel: channel.to_string(),
            outgoing: out_tx,
            incoming: in_rx,
            writer,
            reader,
        });
        Ok(())
    }

    async fn publish(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        self.send(ClientFrame::Publish { envelope }).await
    }

    async fn update_presence(&mut self, presence: PresenceData) -> Result<(), TransportError> {
        self.send(ClientFrame::PresenceUpdate { presence }).await
    }

    async fn disconnect(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        let _ = link.outgoing.send(ClientFrame::Leave).await;
        drop(link.outgoing);
        // The writer closes the socket once its queue drains.
        let _ = link.writer.await;
        link.reader.abort();
        log::debug!("left {}", link.channel);
    }

    async fn recv(&mut self) -> Option<ChannelMessage> {
        let link = self.link.as_mut()?;
        let message = link.incoming.recv().await.unwrap_or(ChannelMessage::ConnectionLost);
        if message == ChannelMessage::ConnectionLost {
            if let Some(link) = self.link.take() {
                link.writer.abort();
                log::warn!("connection to {} lost", link.channel);
            }
        }
        Some(message)
    }

    fn is_connected(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|l| !l.reader.is_finished() && !l.outgoing.is_closed())
    }
}
