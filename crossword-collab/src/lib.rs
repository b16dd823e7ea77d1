//! # crossword-collab: shared solving sessions for crossword-core
//!
//! Keeps several players' boards in step over a pub/sub channel, with a
//! room directory holding the authoritative write-behind state.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   publish / presence   ┌──────────────┐
//! │ CollabSession  │ ◄────────────────────► │ RelayServer  │
//! │ (per player)   │      JSON frames       │ (fan-out)    │
//! └───────┬────────┘                        └──────┬───────┘
//!         │ dispatch (Origin::Remote)              │
//!         ▼                                        ▼
//! ┌────────────────┐                        ┌──────────────┐
//! │ Store          │                        │ ChannelGroup │
//! │ (crossword-    │                        │ per room     │
//! │  core)         │                        └──────────────┘
//! └───────┬────────┘
//!         │ write-behind (debounced)
//!         ▼
//! ┌────────────────┐
//! │ RoomDirectory  │  codes, members, colors, credentials, room state
//! └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: wire events, envelopes and relay frames (JSON)
//! - [`session`]: the per-player sync state machine
//! - [`throttle`]: edit rate limiting and the offline queue
//! - [`timer`]: the shared pause/resume clock
//! - [`presence`]: remote cursors and member colors
//! - [`directory`]: room codes, membership and room state
//! - [`transport`]: channel transports (in-process hub, WebSocket)
//! - [`server`]: WebSocket relay
//! - [`storage`]: on-disk progress cache

pub mod config;
pub mod directory;
pub mod presence;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod storage;
pub mod throttle;
pub mod timer;
pub mod transport;

pub use config::{ServerConfig, SyncConfig};
pub use directory::{
    Credential, CredentialVerifier, DirectoryConfig, DirectoryError, Identity, Member, MemoryDirectory,
    Membership, RoomDirectory, RoomInfo, RoomState, RoomStateUpdate,
};
pub use presence::{fallback_color, PresenceRoom, RemoteCursor};
pub use protocol::{ClientFrame, Envelope, PresenceData, ProtocolError, ServerFrame, WireEvent, WireSelection};
pub use scheduler::{Clock, ManualClock, SystemClock};
pub use server::{RelayServer, RelayStats};
pub use session::{CollabSession, SessionError, SessionState, SessionStats};
pub use storage::FileCache;
pub use throttle::{EditThrottle, OfflineQueue};
pub use timer::SharedTimer;
pub use transport::{ChannelMessage, LocalHub, LocalTransport, Transport, TransportError, WsTransport};
