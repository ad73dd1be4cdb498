//! Integration tests for onion service bring-up.
//!
//! Covers the strict step ordering and the fail-fast policy using
//! MockControl, plus the real Tor control client against a scripted fake
//! daemon on a Unix socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

use onionserve::control::mock::{MockConfig, MockControl, MockFailure};
use onionserve::control::TorConnector;
use onionserve::onion::{bootstrap, BootstrapConfig, BootstrapError, COOKIE_LENGTH};
use onionserve::server::{DiskFiles, OnionServer};

fn write_cookie(dir: &Path, cookie: &[u8]) -> BootstrapConfig {
    let path = dir.join("control.authcookie");
    std::fs::write(&path, cookie).unwrap();
    BootstrapConfig {
        auth_cookie: path,
        virtual_port: 80,
    }
}

// ============================================================================
// MockControl sequencing
// ============================================================================

#[tokio::test]
async fn test_steps_run_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_cookie(temp_dir.path(), &[1u8; COOKIE_LENGTH]);
    let control = MockControl::with_config(MockConfig::with_cookie(vec![1u8; COOKIE_LENGTH]));

    let service = bootstrap(&control, &config).await.expect("bootstrap");

    assert_eq!(
        control.record().calls,
        vec!["connect", "authenticate", "request_listener"]
    );
    assert_eq!(service.listener.virtual_port(), 80);
}

#[tokio::test]
async fn test_each_failure_is_fatal_and_stops_the_sequence() {
    let cases = [
        (MockFailure::Connect, vec!["connect"]),
        (MockFailure::Authenticate, vec!["connect", "authenticate"]),
        (
            MockFailure::Listener,
            vec!["connect", "authenticate", "request_listener"],
        ),
    ];

    for (failure, expected_calls) in cases {
        let temp_dir = TempDir::new().unwrap();
        let config = write_cookie(temp_dir.path(), &[1u8; COOKIE_LENGTH]);
        let control = MockControl::with_config(MockConfig::failing_at(failure));

        let result = bootstrap(&control, &config).await;
        assert!(result.is_err(), "{:?} should fail", failure);
        assert_eq!(control.record().calls, expected_calls);
        assert!(control.record().published.is_empty());
    }
}

#[tokio::test]
async fn test_failed_bootstrap_never_serves() {
    let temp_dir = TempDir::new().unwrap();
    let config = BootstrapConfig {
        auth_cookie: temp_dir.path().join("no-cookie-here"),
        virtual_port: 80,
    };
    let control = MockControl::new();

    let result = OnionServer::start(
        &control,
        &config,
        &[PathBuf::from("a.jpg")],
        Arc::new(DiskFiles),
    )
    .await;

    let err = result.err().expect("start should fail");
    assert!(format!("{:#}", err).contains("auth cookie"));
    assert!(control.record().listener_addr.is_none());
}

#[tokio::test]
async fn test_each_run_gets_a_new_address() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_cookie(temp_dir.path(), &[1u8; COOKIE_LENGTH]);

    let first = bootstrap(&MockControl::new(), &config).await.unwrap();
    let second = bootstrap(&MockControl::new(), &config).await.unwrap();

    assert_ne!(first.identity.address(), second.identity.address());
}

// ============================================================================
// Tor control client against a fake daemon
// ============================================================================

/// Accept one control connection and answer like Tor would, except that
/// ADD_ONION always reports a service id unrelated to the submitted key.
async fn spawn_fake_tor(socket_path: &Path, expected_cookie: [u8; COOKIE_LENGTH]) {
    let listener = UnixListener::bind(socket_path).unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let answer = if let Some(cookie) = line.strip_prefix("AUTHENTICATE ") {
                if cookie == hex::encode(expected_cookie) {
                    "250 OK\r\n".to_string()
                } else {
                    "515 Authentication failed: Authentication cookie did not match.\r\n"
                        .to_string()
                }
            } else if line.starts_with("ADD_ONION ") {
                "250-ServiceID=PLACEHOLDER\r\n250 OK\r\n".to_string()
            } else {
                "510 Unrecognized command\r\n".to_string()
            };
            if write_half.write_all(answer.as_bytes()).await.is_err() {
                return;
            }
        }
    });
}

#[tokio::test]
async fn test_tor_bootstrap_rejects_wrong_cookie() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("control");
    spawn_fake_tor(&socket_path, [9u8; COOKIE_LENGTH]).await;
    let config = write_cookie(temp_dir.path(), &[1u8; COOKIE_LENGTH]);

    let result = bootstrap(&TorConnector::new(&socket_path), &config).await;
    assert!(matches!(result, Err(BootstrapError::Authenticate(_))));
}

#[tokio::test]
async fn test_tor_bootstrap_detects_foreign_service_id() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("control");
    spawn_fake_tor(&socket_path, [1u8; COOKIE_LENGTH]).await;
    let config = write_cookie(temp_dir.path(), &[1u8; COOKIE_LENGTH]);

    let result = bootstrap(&TorConnector::new(&socket_path), &config).await;
    assert!(matches!(result, Err(BootstrapError::Listener(_))));
}

#[tokio::test]
async fn test_tor_bootstrap_without_daemon() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_cookie(temp_dir.path(), &[1u8; COOKIE_LENGTH]);

    let result = bootstrap(&TorConnector::new(temp_dir.path().join("control")), &config).await;
    assert!(matches!(result, Err(BootstrapError::Connect(_))));
}
