//! Crossword relay: WebSocket fan-out for shared solving sessions.
//!
//! Configuration comes from `CROSSWORD_*` environment variables (see
//! `ServerConfig::from_env`), log level from `RUST_LOG`.
//!
//! This binary runs the relay on its own and hosts no room directory, so
//! it has nothing to check subscribe credentials against. Setting
//! `CROSSWORD_REQUIRE_CREDENTIALS=true` makes it refuse to start; embed
//! `RelayServer::with_verifier` next to the directory that issues
//! credentials instead.

use log::{error, info};

use crossword_collab::{RelayServer, ServerConfig};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("credentials are required but this relay has no credential issuer")]
    NoCredentialIssuer,
}

fn compose(config: ServerConfig) -> Result<RelayServer, StartupError> {
    if config.require_credentials {
        return Err(StartupError::NoCredentialIssuer);
    }
    Ok(RelayServer::new(config))
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = ServerConfig::from_env();
    info!(
        "starting relay on {} (max {} peers per channel)",
        config.bind_addr, config.max_peers_per_channel
    );

    let server = match compose(config) {
        Ok(server) => server,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("relay stopped: {e}");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats();
            info!(
                "shutting down: {} connections served, {} frames in, {} frames out",
                stats.total_connections, stats.frames_received, stats.frames_sent
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crossword_collab::protocol::PresenceData;
    use crossword_collab::transport::{Transport, WsTransport};
    use tokio::net::TcpListener;

    fn presence(user: &str) -> PresenceData {
        PresenceData {
            user_id: user.into(),
            display_name: user.into(),
            color: "#4A90D9".into(),
            selection: None,
        }
    }

    #[test]
    fn test_strict_mode_refuses_to_start() {
        let config = ServerConfig {
            require_credentials: true,
            ..ServerConfig::default()
        };
        assert!(matches!(compose(config), Err(StartupError::NoCredentialIssuer)));
    }

    #[tokio::test]
    async fn test_composed_relay_accepts_subscribers() {
        let server = compose(ServerConfig::default()).unwrap();
        assert!(!server.hub().requires_credentials());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let serving = server.clone();
        tokio::spawn(async move {
            let _ = serving.serve(listener).await;
        });

        let mut client = WsTransport::new(&url);
        client.connect("room:ABCDEF", None, presence("alice")).await.unwrap();
        assert!(client.is_connected());
        assert_eq!(server.hub().channel_count().await, 1);
    }
}
