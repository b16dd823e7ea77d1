//! Runtime configuration for the sync layer and the relay.
//!
//! Every value has a `Default`; `from_env` overlays `CROSSWORD_*`
//! variables. Unparsable values are logged and ignored.

use std::str::FromStr;
use std::time::Duration;

/// Client-side sync tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Maximum cell-edit events sent per rate window.
    pub edit_rate_limit: usize,
    /// Sliding window for `edit_rate_limit`.
    pub rate_window: Duration,
    /// Delay before coalesced edits are flushed.
    pub flush_delay: Duration,
    /// Write-behind cadence for pushing room state.
    pub persist_debounce: Duration,
    /// Events kept while the transport is down.
    pub offline_capacity: usize,
    /// Wait before retrying a lost connection.
    pub reconnect_delay: Duration,
    pub channel_prefix: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            edit_rate_limit: 20,
            rate_window: Duration::from_millis(1000),
            flush_delay: Duration::from_millis(50),
            persist_debounce: Duration::from_millis(5000),
            offline_capacity: 10_000,
            reconnect_delay: Duration::from_millis(1000),
            channel_prefix: "room:".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        overlay(&mut config.edit_rate_limit, "CROSSWORD_EDIT_RATE_LIMIT");
        overlay_ms(&mut config.rate_window, "CROSSWORD_RATE_WINDOW_MS");
        overlay_ms(&mut config.flush_delay, "CROSSWORD_FLUSH_DELAY_MS");
        overlay_ms(&mut config.persist_debounce, "CROSSWORD_PERSIST_DEBOUNCE_MS");
        overlay(&mut config.offline_capacity, "CROSSWORD_OFFLINE_CAPACITY");
        overlay_ms(&mut config.reconnect_delay, "CROSSWORD_RECONNECT_DELAY_MS");
        overlay(&mut config.channel_prefix, "CROSSWORD_CHANNEL_PREFIX");
        config
    }

    /// Channel name for a room code.
    pub fn channel_for(&self, code: &str) -> String {
        format!("{}{}", self.channel_prefix, code)
    }
}

/// Relay server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum live connections per channel
    pub max_peers_per_channel: usize,
    /// Broadcast buffer per channel before slow peers lag
    pub broadcast_capacity: usize,
    /// Reject subscribe frames without a valid credential
    pub require_credentials: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_peers_per_channel: 16,
            broadcast_capacity: 256,
            require_credentials: false,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        overlay(&mut config.bind_addr, "CROSSWORD_BIND_ADDR");
        overlay(&mut config.max_peers_per_channel, "CROSSWORD_MAX_PEERS");
        overlay(&mut config.broadcast_capacity, "CROSSWORD_BROADCAST_CAPACITY");
        overlay(&mut config.require_credentials, "CROSSWORD_REQUIRE_CREDENTIALS");
        config
    }
}

fn overlay<T: FromStr>(field: &mut T, var: &str) {
    let Ok(raw) = std::env::var(var) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *field = value,
        Err(_) => log::warn!("ignoring unparsable {var}={raw:?}"),
    }
}

fn overlay_ms(field: &mut Duration, var: &str) {
    let mut ms = field.as_millis() as u64;
    overlay(&mut ms, var);
    *field = Duration::from_millis(ms);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.edit_rate_limit, 20);
        assert_eq!(config.flush_delay, Duration::from_millis(50));
        assert_eq!(config.persist_debounce, Duration::from_secs(5));
        assert_eq!(config.channel_for("ABC234"), "room:ABC234");
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.broadcast_capacity, 256);
        assert!(!config.require_credentials);
    }

    #[test]
    fn test_env_overlay_ignores_garbage() {
        std::env::set_var("CROSSWORD_TEST_OVERLAY_A", "42");
        std::env::set_var("CROSSWORD_TEST_OVERLAY_B", "forty");
        let mut a = 1usize;
        let mut b = 1usize;
        overlay(&mut a, "CROSSWORD_TEST_OVERLAY_A");
        overlay(&mut b, "CROSSWORD_TEST_OVERLAY_B");
        assert_eq!(a, 42);
        assert_eq!(b, 1);
    }
}
