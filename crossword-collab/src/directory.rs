//! Room directory: codes, membership, durable room state and scoped
//! transport credentials.
//!
//! ```text
//! create(puzzle) ──► RoomInfo { code: "K7QX2M" }
//! join(code)     ──► Membership { color, already_joined }
//! credential()   ──► token scoped to "room:K7QX2M" (1h)
//! fetch_state / push_state  ── write-behind RoomState
//! ```
//!
//! The directory sits outside the consistency protocol: it hands late
//! joiners a starting snapshot and nothing more.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crossword_core::{Puzzle, Snapshot};

use crate::presence::fallback_color;
use crate::protocol::snapshot_from_pairs;
use crate::scheduler::{Clock, SystemClock};
use crate::timer::SharedTimer;

/// Room code alphabet; `I`, `L`, `O`, `0` and `1` are left out.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
pub const CODE_LEN: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("room {0} not found")]
    NotFound(String),
    #[error("room {0} has expired")]
    Expired(String),
    #[error("room {code} is full ({max} members)")]
    Full { code: String, max: usize },
    #[error("{user_id} is not a member of room {code}")]
    NotMember { code: String, user_id: String },
    #[error("color {0} is already taken")]
    ColorTaken(String),
    #[error("invalid credential")]
    InvalidCredential,
    #[error("credential expired")]
    CredentialExpired,
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Authenticated user, as yielded by the session/auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub code: String,
    pub puzzle_id: String,
    pub puzzle: Puzzle,
    pub created_by: String,
    pub created_at: u64,
    pub expires_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub user_id: String,
    pub display_name: String,
    pub color: String,
    pub joined_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub room: RoomInfo,
    pub member: Member,
    pub already_joined: bool,
}

/// Durable copy of a room's shared state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    pub user_grid: Vec<(String, String)>,
    pub checked_cells: Vec<(String, bool)>,
    pub timer: SharedTimer,
    pub is_complete: bool,
    pub updated_at: u64,
}

impl RoomState {
    /// Snapshot for the local store, with the timer evaluated at `now_ms`.
    pub fn to_snapshot(&self, now_ms: u64) -> Snapshot {
        Snapshot {
            elapsed_seconds: self.timer.elapsed(now_ms),
            paused: self.timer.is_paused,
            complete: self.is_complete,
            ..snapshot_from_pairs(&self.user_grid, &self.checked_cells)
        }
    }
}

/// What a client pushes on the write-behind cadence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStateUpdate {
    pub user_grid: Vec<(String, String)>,
    pub checked_cells: Vec<(String, bool)>,
    pub timer: SharedTimer,
    pub is_complete: bool,
}

impl RoomStateUpdate {
    pub fn from_snapshot(snapshot: &Snapshot, timer: SharedTimer) -> Self {
        Self {
            user_grid: snapshot
                .entries
                .iter()
                .map(|(pos, v)| (pos.key(), v.to_string()))
                .collect(),
            checked_cells: snapshot.checks.iter().map(|(pos, ok)| (pos.key(), *ok)).collect(),
            timer,
            is_complete: snapshot.complete,
        }
    }
}

/// Short-lived token allowing one user onto one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub token: String,
    pub channel: String,
    pub user_id: String,
    pub expires_at: u64,
}

/// Room directory contract. Every call may suspend on I/O.
pub trait RoomDirectory: Send + Sync {
    fn create(
        &self,
        host: &Identity,
        puzzle_id: &str,
        puzzle: &Puzzle,
    ) -> impl Future<Output = Result<RoomInfo, DirectoryError>> + Send;

    fn join(&self, code: &str, identity: &Identity) -> impl Future<Output = Result<Membership, DirectoryError>> + Send;

    fn leave(&self, code: &str, user_id: &str) -> impl Future<Output = Result<(), DirectoryError>> + Send;

    fn fetch_state(&self, code: &str) -> impl Future<Output = Result<RoomState, DirectoryError>> + Send;

    fn push_state(&self, code: &str, update: RoomStateUpdate) -> impl Future<Output = Result<(), DirectoryError>> + Send;

    fn credential(&self, code: &str, user_id: &str) -> impl Future<Output = Result<Credential, DirectoryError>> + Send;

    fn update_color(
        &self,
        code: &str,
        user_id: &str,
        color: &str,
    ) -> impl Future<Output = Result<(), DirectoryError>> + Send;
}

/// Checks transport credentials at subscribe time.
pub trait CredentialVerifier: Send + Sync {
    /// Ok with the credential's user id.
    fn verify(&self, channel: &str, token: &str) -> Result<String, DirectoryError>;
}

// ───────────────────────────────────────────────────────────────────
// In-memory directory
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryConfig {
    pub room_ttl: Duration,
    pub max_members: usize,
    pub credential_ttl: Duration,
    /// Member colors, handed out first-unused.
    pub palette: Vec<String>,
    pub channel_prefix: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            room_ttl: Duration::from_secs(24 * 60 * 60),
            max_members: 4,
            credential_ttl: Duration::from_secs(60 * 60),
            palette: ["#4A90D9", "#E74C3C", "#2ECC71", "#9B59B6"]
                .into_iter()
                .map(String::from)
                .collect(),
            channel_prefix: "room:".to_string(),
        }
    }
}

struct RoomRecord {
    info: RoomInfo,
    members: Vec<Member>,
    state: RoomState,
}

#[derive(Default)]
struct DirectoryInner {
    rooms: HashMap<String, RoomRecord>,
    credentials: HashMap<String, Credential>,
}

/// Process-local directory, shared by cloning.
#[derive(Clone)]
pub struct MemoryDirectory {
    inner: Arc<Mutex<DirectoryInner>>,
    config: DirectoryConfig,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new(DirectoryConfig::default())
    }
}

impl MemoryDirectory {
    pub fn new(config: DirectoryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: DirectoryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DirectoryInner::default())),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    pub fn room_count(&self) -> usize {
        self.lock().map(|inner| inner.rooms.len()).unwrap_or(0)
    }

    pub fn members(&self, code: &str) -> Result<Vec<Member>, DirectoryError> {
        let mut inner = self.lock()?;
        let now = self.clock.now_ms();
        Ok(live_room(&mut inner, code, now)?.members.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, DirectoryInner>, DirectoryError> {
        self.inner
            .lock()
            .map_err(|_| DirectoryError::Unavailable("directory lock poisoned".into()))
    }

    fn channel_for(&self, code: &str) -> String {
        format!("{}{}", self.config.channel_prefix, code)
    }

    fn fresh_code(rooms: &HashMap<String, RoomRecord>) -> String {
        loop {
            let bytes = Uuid::new_v4().into_bytes();
            let code: String = bytes[..CODE_LEN]
                .iter()
                .map(|b| CODE_ALPHABET[*b as usize % CODE_ALPHABET.len()] as char)
                .collect();
            if !rooms.contains_key(&code) {
                return code;
            }
        }
    }
}

/// Upper-cased lookup that treats expired rooms as gone.
fn live_room<'a>(inner: &'a mut DirectoryInner, code: &str, now: u64) -> Result<&'a mut RoomRecord, DirectoryError> {
    let code = normalize_code(code);
    let record = inner
        .rooms
        .get_mut(&code)
        .ok_or_else(|| DirectoryError::NotFound(code.clone()))?;
    if record.info.expires_at <= now {
        return Err(DirectoryError::Expired(code));
    }
    Ok(record)
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

impl RoomDirectory for MemoryDirectory {
    async fn create(&self, host: &Identity, puzzle_id: &str, puzzle: &Puzzle) -> Result<RoomInfo, DirectoryError> {
        let now = self.clock.now_ms();
        let mut inner = self.lock()?;
        let code = Self::fresh_code(&inner.rooms);
        let info = RoomInfo {
            code: code.clone(),
            puzzle_id: puzzle_id.to_string(),
            puzzle: puzzle.clone(),
            created_by: host.user_id.clone(),
            created_at: now,
            expires_at: now + self.config.room_ttl.as_millis() as u64,
        };
        inner.rooms.insert(
            code.clone(),
            RoomRecord {
                info: info.clone(),
                members: Vec::new(),
                state: RoomState {
                    updated_at: now,
                    ..RoomState::default()
                },
            },
        );
        log::info!("room {code} created for puzzle {puzzle_id} by {}", host.user_id);
        Ok(info)
    }

    async fn join(&self, code: &str, identity: &Identity) -> Result<Membership, DirectoryError> {
        let now = self.clock.now_ms();
        let mut inner = self.lock()?;
        let record = live_room(&mut inner, code, now)?;

        if let Some(member) = record.members.iter().find(|m| m.user_id == identity.user_id) {
            return Ok(Membership {
                room: record.info.clone(),
                member: member.clone(),
                already_joined: true,
            });
        }
        if record.members.len() >= self.config.max_members {
            return Err(DirectoryError::Full {
                code: record.info.code.clone(),
                max: self.config.max_members,
            });
        }
        let color = self
            .config
            .palette
            .iter()
            .find(|c| !record.members.iter().any(|m| &m.color == *c))
            .cloned()
            .unwrap_or_else(|| fallback_color(&identity.user_id));
        let member = Member {
            user_id: identity.user_id.clone(),
            display_name: identity.display_name.clone(),
            color,
            joined_at: now,
        };
        record.members.push(member.clone());
        log::info!(
            "{} joined room {} as {} ({}/{})",
            identity.user_id,
            record.info.code,
            member.color,
            record.members.len(),
            self.config.max_members
        );
        Ok(Membership {
            room: record.info.clone(),
            member,
            already_joined: false,
        })
    }

    async fn leave(&self, code: &str, user_id: &str) -> Result<(), DirectoryError> {
        let now = self.clock.now_ms();
        let mut inner = self.lock()?;
        let record = live_room(&mut inner, code, now)?;
        let before = record.members.len();
        record.members.retain(|m| m.user_id != user_id);
        if record.members.len() == before {
            return Err(DirectoryError::NotMember {
                code: record.info.code.clone(),
                user_id: user_id.to_string(),
            });
        }
        let channel = self.channel_for(&record.info.code);
        inner
            .credentials
            .retain(|_, c| !(c.user_id == user_id && c.channel == channel));
        Ok(())
    }

    async fn fetch_state(&self, code: &str) -> Result<RoomState, DirectoryError> {
        let now = self.clock.now_ms();
        let mut inner = self.lock()?;
        Ok(live_room(&mut inner, code, now)?.state.clone())
    }

    async fn push_state(&self, code: &str, update: RoomStateUpdate) -> Result<(), DirectoryError> {
        let now = self.clock.now_ms();
        let mut inner = self.lock()?;
        let record = live_room(&mut inner, code, now)?;
        record.state = RoomState {
            user_grid: update.user_grid,
            checked_cells: update.checked_cells,
            timer: update.timer,
            is_complete: update.is_complete,
            updated_at: now,
        };
        log::debug!("room {} state pushed ({} cells)", record.info.code, record.state.user_grid.len());
        Ok(())
    }

    async fn credential(&self, code: &str, user_id: &str) -> Result<Credential, DirectoryError> {
        let now = self.clock.now_ms();
        let mut inner = self.lock()?;
        let record = live_room(&mut inner, code, now)?;
        if !record.members.iter().any(|m| m.user_id == user_id) {
            return Err(DirectoryError::NotMember {
                code: record.info.code.clone(),
                user_id: user_id.to_string(),
            });
        }
        let credential = Credential {
            token: Uuid::new_v4().simple().to_string(),
            channel: self.channel_for(&record.info.code),
            user_id: user_id.to_string(),
            expires_at: now + self.config.credential_ttl.as_millis() as u64,
        };
        inner.credentials.retain(|_, c| c.expires_at > now);
        inner.credentials.insert(credential.token.clone(), credential.clone());
        Ok(credential)
    }

    async fn update_color(&self, code: &str, user_id: &str, color: &str) -> Result<(), DirectoryError> {
        let now = self.clock.now_ms();
        let mut inner = self.lock()?;
        let record = live_room(&mut inner, code, now)?;
        if record
            .members
            .iter()
            .any(|m| m.user_id != user_id && m.color.eq_ignore_ascii_case(color))
        {
            return Err(DirectoryError::ColorTaken(color.to_string()));
        }
        let code = record.info.code.clone();
        let member = record
            .members
            .iter_mut()
            .find(|m| m.user_id == user_id)
            .ok_or_else(|| DirectoryError::NotMember {
                code,
                user_id: user_id.to_string(),
            })?;
        member.color = color.to_string();
        Ok(())
    }
}

impl CredentialVerifier for MemoryDirectory {
    fn verify(&self, channel: &str, token: &str) -> Result<String, DirectoryError> {
        let inner = self.lock()?;
        let credential = inner.credentials.get(token).ok_or(DirectoryError::InvalidCredential)?;
        if credential.channel != channel {
            return Err(DirectoryError::InvalidCredential);
        }
        if credential.expires_at <= self.clock.now_ms() {
            return Err(DirectoryError::CredentialExpired);
        }
        Ok(credential.user_id.clone())
    }
}
