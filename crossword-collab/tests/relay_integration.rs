//! Integration tests for the WebSocket relay.
//!
//! These tests start a real relay on a free port and connect real
//! sessions through `WsTransport`.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::time::{timeout, Duration};

use crossword_collab::directory::{Identity, MemoryDirectory};
use crossword_collab::protocol::PresenceData;
use crossword_collab::session::{CollabSession, SessionState};
use crossword_collab::transport::{Transport, TransportError, WsTransport};
use crossword_collab::{RelayServer, ServerConfig, SyncConfig};
use crossword_core::puzzle::puzzle_from_rows;
use crossword_core::{NavInput, Pos};

type WsSession = CollabSession<WsTransport, MemoryDirectory>;

/// Start a relay on a free port, return its websocket URL.
async fn start_relay(server: RelayServer) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    format!("ws://{addr}")
}

fn strict_config() -> ServerConfig {
    ServerConfig {
        require_credentials: true,
        ..ServerConfig::default()
    }
}

fn session(url: &str, dir: &Arc<MemoryDirectory>, user: &str) -> WsSession {
    CollabSession::new(
        Identity::new(user, user.to_uppercase()),
        WsTransport::new(url),
        Arc::clone(dir),
        SyncConfig::default(),
    )
}

/// Pump until `done` holds, failing after a few seconds.
async fn pump_until(s: &mut WsSession, done: impl Fn(&WsSession) -> bool) {
    timeout(Duration::from_secs(5), async {
        while !done(s) {
            s.pump().await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_edit_travels_through_relay() {
    let dir = Arc::new(MemoryDirectory::default());
    let server = RelayServer::with_verifier(strict_config(), dir.clone());
    let url = start_relay(server.clone()).await;

    let mut a = session(&url, &dir, "alice");
    let mut b = session(&url, &dir, "bob");
    let code = a
        .create_room("mini", puzzle_from_rows(&["CAT", "O#O", "WET"]))
        .await
        .unwrap()
        .room
        .code;
    b.join(&code).await.unwrap();
    assert_eq!(a.state(), SessionState::Connected);
    assert_eq!(b.state(), SessionState::Connected);

    a.navigate(NavInput::Letter('c')).await;
    pump_until(&mut b, |b| b.store().state().entry(Pos::new(0, 0)) == Some('C')).await;
    pump_until(&mut b, |b| b.remote_cursors().len() == 1).await;
    assert_eq!(b.remote_cursors()[0].user_id, "alice");

    b.navigate(NavInput::Click(Pos::new(2, 0))).await;
    b.navigate(NavInput::Letter('w')).await;
    pump_until(&mut a, |a| a.store().state().entry(Pos::new(2, 0)) == Some('W')).await;

    assert!(server.stats().frames_received > 0);
    assert_eq!(server.stats().rejected_subscriptions, 0);
}

#[tokio::test]
async fn test_bad_credential_rejected() {
    let dir = Arc::new(MemoryDirectory::default());
    let url = start_relay(RelayServer::with_verifier(strict_config(), dir)).await;

    let mut transport = WsTransport::new(&url);
    let presence = PresenceData {
        user_id: "mallory".into(),
        display_name: "Mallory".into(),
        color: "#000000".into(),
        selection: None,
    };
    let result = transport.connect("room:ABCDEF", Some("forged"), presence).await;
    assert!(matches!(result, Err(TransportError::Rejected { .. })));
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_leave_empties_relay_channel() {
    let dir = Arc::new(MemoryDirectory::default());
    let server = RelayServer::new(ServerConfig::default());
    let url = start_relay(server.clone()).await;

    let mut a = session(&url, &dir, "alice");
    a.create_room("mini", puzzle_from_rows(&["AB", "CD"])).await.unwrap();
    assert_eq!(server.hub().channel_count().await, 1);

    a.leave().await.unwrap();
    timeout(Duration::from_secs(5), async {
        while server.hub().channel_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("channel not released");
    assert_eq!(a.state(), SessionState::Closed);
}
