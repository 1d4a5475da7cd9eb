//! Integration tests for the sync server and client
//!
//! Every test boots a real server on an ephemeral port and talks to it over
//! WebSockets, exactly as a game client would.

use assert_approx_eq::assert_approx_eq;
use client::{Client, ClientError};
use server::config::{RegistryConfig, ServerConfig};
use server::error::ServerError;
use server::network::Server;
use shared::{PlayerState, SessionSnapshot};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_test::assert_ok;

const VERSION: &str = "it-1.0";
const TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    async fn start(registry: RegistryConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ServerConfig {
            bind_addr: addr,
            tick_rate: 50,
            registry: RegistryConfig {
                version: VERSION.to_string(),
                ..registry
            },
            ..ServerConfig::default()
        };

        let (stop, stopped) = oneshot::channel::<()>();
        let server = Server::new(config).unwrap();
        let task = tokio::spawn(server.serve(listener, async {
            let _ = stopped.await;
        }));

        Self { addr, stop, task }
    }

    async fn with_defaults() -> Self {
        Self::start(RegistryConfig::default()).await
    }

    fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    async fn join(&self, session_key: &str, display_name: &str) -> Client {
        Client::connect(&self.url(), session_key, display_name, VERSION)
            .await
            .unwrap()
    }

    async fn shutdown(self) -> Result<(), ServerError> {
        let _ = self.stop.send(());
        timeout(TIMEOUT, self.task).await.unwrap().unwrap()
    }
}

/// Reads snapshots until one satisfies `accept`
async fn wait_for<F>(client: &mut Client, accept: F) -> SessionSnapshot
where
    F: Fn(&SessionSnapshot) -> bool,
{
    timeout(TIMEOUT, async {
        loop {
            let snapshots = client.next_snapshots().await.unwrap();
            if let Some(snapshot) = snapshots.into_iter().rev().find(|s| accept(s)) {
                return snapshot;
            }
        }
    })
    .await
    .expect("timed out waiting for snapshot")
}

fn rejection_status(result: Result<Client, ClientError>) -> u16 {
    match result {
        Err(ClientError::Rejected { status, .. }) => status,
        Err(e) => panic!("expected an HTTP rejection, got {}", e),
        Ok(_) => panic!("expected an HTTP rejection, got a connection"),
    }
}

/// Plain HTTP GET returning the response body
async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    timeout(TIMEOUT, stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);

    match response.split_once("\r\n\r\n") {
        Some((_, body)) => body.to_string(),
        None => panic!("malformed HTTP response: {}", response),
    }
}

/// SESSION BROADCAST TESTS
mod broadcast_tests {
    use super::*;

    /// Members only ever see players from their own session
    #[tokio::test]
    async fn sessions_are_isolated() {
        let server = TestServer::with_defaults().await;
        let mut alice = server.join("abc", "Alice").await;
        let mut bob = server.join("abc", "Bob").await;
        let mut carol = server.join("xyz", "Carol").await;

        alice.send_state(&PlayerState::at(1.0, 0.0, 0.0)).await.unwrap();
        bob.send_state(&PlayerState::at(2.0, 0.0, 0.0)).await.unwrap();
        carol.send_state(&PlayerState::at(3.0, 0.0, 0.0)).await.unwrap();

        let snapshot = wait_for(&mut alice, |s| {
            s.find("Alice").is_some() && s.find("Bob").is_some()
        })
        .await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.server_version, VERSION);
        assert!(snapshot.find("Carol").is_none());

        // Entries follow connection order
        assert_eq!(snapshot.player_states[0].display_name, "Alice");
        assert_eq!(snapshot.player_states[1].display_name, "Bob");
        assert_approx_eq!(snapshot.player_states[1].x, 2.0);

        let snapshot = wait_for(&mut carol, |s| s.find("Carol").is_some()).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.player_states[0].session_key, "xyz");

        let snapshot = wait_for(&mut bob, |s| s.find("Alice").is_some()).await;
        assert!(snapshot.find("Carol").is_none());
    }

    /// Later updates replace earlier ones
    #[tokio::test]
    async fn latest_state_wins() {
        let server = TestServer::with_defaults().await;
        let mut alice = server.join("abc", "Alice").await;

        let mut state = PlayerState::at(1.0, 2.0, 3.0);
        state.swimming = true;
        state.animation_hash = -42;
        alice.send_state(&state).await.unwrap();

        state.x = 10.0;
        alice.send_state(&state).await.unwrap();

        let snapshot = wait_for(&mut alice, |s| {
            s.find("Alice").is_some_and(|p| p.x == 10.0)
        })
        .await;
        let me = snapshot.find("Alice").unwrap();
        assert!(me.swimming);
        assert_eq!(me.animation_hash, -42);
        assert_approx_eq!(me.z, 3.0);
    }

    /// A malformed payload is dropped but the connection stays usable
    #[tokio::test]
    async fn malformed_payload_keeps_connection() {
        let server = TestServer::with_defaults().await;
        let mut alice = server.join("abc", "Alice").await;

        alice.send_text("{not json").await.unwrap();
        alice.send_text("").await.unwrap();
        alice.send_state(&PlayerState::at(5.0, 0.0, 0.0)).await.unwrap();

        let snapshot = wait_for(&mut alice, |s| s.find("Alice").is_some()).await;
        assert_approx_eq!(snapshot.find("Alice").unwrap().x, 5.0);
    }

    /// Departed clients disappear from the remaining members' snapshots
    #[tokio::test]
    async fn departed_client_leaves_snapshot() {
        let server = TestServer::with_defaults().await;
        let mut alice = server.join("abc", "Alice").await;
        let mut bob = server.join("abc", "Bob").await;

        alice.send_state(&PlayerState::default()).await.unwrap();
        bob.send_state(&PlayerState::default()).await.unwrap();
        wait_for(&mut alice, |s| s.find("Bob").is_some()).await;

        bob.close().await.unwrap();

        let snapshot = wait_for(&mut alice, |s| s.len() == 1).await;
        assert!(snapshot.find("Alice").is_some());
    }
}

/// ADMISSION TESTS
mod admission_tests {
    use super::*;

    #[tokio::test]
    async fn rejects_version_mismatch() {
        let server = TestServer::with_defaults().await;
        let result = Client::connect(&server.url(), "abc", "Alice", "0.0.1").await;
        assert_eq!(rejection_status(result), 400);
    }

    #[tokio::test]
    async fn rejects_missing_parameters() {
        let server = TestServer::with_defaults().await;
        let url = format!("{}?sessionKey=abc&clientVersion={}", server.url(), VERSION);

        match tokio_tungstenite::connect_async(url).await {
            Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
                assert_eq!(response.status().as_u16(), 400);
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("handshake without a display name was accepted"),
        }
    }

    #[tokio::test]
    async fn rejects_empty_session_key() {
        let server = TestServer::with_defaults().await;
        let result = Client::connect(&server.url(), "", "Alice", VERSION).await;
        assert_eq!(rejection_status(result), 400);
    }

    /// Display names are unique across every session
    #[tokio::test]
    async fn rejects_duplicate_display_name() {
        let server = TestServer::with_defaults().await;
        let _alice = server.join("abc", "Alice").await;

        let result = Client::connect(&server.url(), "xyz", "Alice", VERSION).await;
        assert_eq!(rejection_status(result), 409);
    }

    #[tokio::test]
    async fn rejects_beyond_capacity() {
        let server = TestServer::start(RegistryConfig {
            max_clients: 2,
            ..RegistryConfig::default()
        })
        .await;
        let _a = server.join("abc", "A").await;
        let _b = server.join("abc", "B").await;

        let result = Client::connect(&server.url(), "abc", "C", VERSION).await;
        assert_eq!(rejection_status(result), 503);
    }

    /// Leaving frees both the display name and the capacity slot
    #[tokio::test]
    async fn display_name_is_released_after_disconnect() {
        let server = TestServer::start(RegistryConfig {
            max_clients: 1,
            ..RegistryConfig::default()
        })
        .await;
        let dana = server.join("abc", "Dana").await;
        dana.close().await.unwrap();

        // Unregistration is asynchronous, so retry until the hub catches up
        let mut rejoined = None;
        for _ in 0..50 {
            match Client::connect(&server.url(), "abc", "Dana", VERSION).await {
                Ok(client) => {
                    rejoined = Some(client);
                    break;
                }
                Err(ClientError::Rejected { .. }) => sleep(Duration::from_millis(20)).await,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert!(rejoined.is_some(), "display name was never released");
    }
}

/// LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// Clients that never send a valid update are dropped
    #[tokio::test]
    async fn silent_client_is_evicted() {
        let server = TestServer::start(RegistryConfig {
            inactivity_timeout: Duration::from_millis(300),
            ..RegistryConfig::default()
        })
        .await;
        let mut idle = server.join("abc", "Idle").await;

        let closed = timeout(TIMEOUT, async {
            loop {
                if idle.next_snapshots().await.is_err() {
                    return;
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "idle client was never evicted");
    }

    /// Frames above the configured message size end the connection
    #[tokio::test]
    async fn oversized_frame_closes_connection() {
        let server = TestServer::with_defaults().await;
        let mut alice = server.join("abc", "Alice").await;
        alice.send_state(&PlayerState::default()).await.unwrap();
        wait_for(&mut alice, |s| s.find("Alice").is_some()).await;

        let oversized = format!("{{\"displayName\":\"{}\"}}", "a".repeat(9000));
        alice.send_text(oversized).await.unwrap();

        let closed = timeout(TIMEOUT, async {
            loop {
                if alice.next_snapshots().await.is_err() {
                    return;
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "oversized frame did not close the connection");

        // Unregistration is asynchronous, so poll until the hub catches up
        let mut clients = None;
        for _ in 0..50 {
            let body = http_get(server.addr, "/health").await;
            let report: serde_json::Value = serde_json::from_str(&body).unwrap();
            clients = report["clients"].as_u64();
            if clients == Some(0) {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(clients, Some(0));
    }

    #[tokio::test]
    async fn health_reports_connected_clients() {
        let server = TestServer::with_defaults().await;
        let mut alice = server.join("abc", "Alice").await;
        let _bob = server.join("xyz", "Bob").await;

        // Any snapshot proves both admissions went through the hub
        alice.send_state(&PlayerState::default()).await.unwrap();
        wait_for(&mut alice, |_| true).await;

        let body = http_get(server.addr, "/health").await;
        let report: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(report["status"], "ok");
        assert_eq!(report["serverVersion"], VERSION);
        assert_eq!(report["clients"], 2);
        assert_eq!(report["sessions"], 2);
    }

    /// Shutdown closes every open connection and the server task completes
    #[tokio::test]
    async fn shutdown_closes_clients() {
        let server = TestServer::with_defaults().await;
        let mut alice = server.join("abc", "Alice").await;
        alice.send_state(&PlayerState::default()).await.unwrap();
        wait_for(&mut alice, |s| s.find("Alice").is_some()).await;

        assert_ok!(server.shutdown().await);

        let closed = timeout(TIMEOUT, async {
            loop {
                if alice.next_snapshots().await.is_err() {
                    return;
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "client was not closed on shutdown");
    }
}
