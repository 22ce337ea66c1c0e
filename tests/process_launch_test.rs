//! Launching a real child process speaking the line protocol.
//!
//! The automation binary is stood in for by small shell scripts.
#![cfg(unix)]

mod common;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;

use bidi_client::{Connection, ConnectionState, Error, Event, LaunchOptions, SyncConnection};

use common::{eventually, init_tracing};

/// Checks its arguments, emits one event and a junk line before the ready
/// signal, then answers every request with `{"ok": true}`.
const ECHO_BINARY: &str = r#"#!/bin/sh
[ "$1" = "pipe" ] || { echo "expected pipe subcommand, got: $*" >&2; exit 2; }
echo '{"method":"browsingContext.contextCreated","params":{"context":"ctx-1","url":"about:blank"}}'
echo 'starting up'
echo '{"method":"vibium:ready","params":{}}'
while IFS= read -r line; do
    id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
    [ -n "$id" ] && printf '{"id":%s,"result":{"ok":true,"args":"%s"}}\n' "$id" "$*"
done
"#;

const CRASHING_BINARY: &str = r#"#!/bin/sh
echo 'chrome not found in PATH' >&2
exit 1
"#;

const SILENT_BINARY: &str = "#!/bin/sh\nexec sleep 30\n";

fn install(dir: &TempDir, name: &str, script: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, script).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

fn options(binary: &Path) -> LaunchOptions {
    LaunchOptions::builder()
        .binary(binary)
        .headless()
        .ready_timeout(Duration::from_secs(10))
        .stop_timeout(Duration::from_secs(2))
        .build()
        .expect("valid options")
}

#[tokio::test]
async fn launch_send_and_stop() {
    init_tracing();
    let dir = TempDir::new().expect("tempdir");
    let binary = install(&dir, "vibium", ECHO_BINARY);

    let connection = Connection::launch(options(&binary)).await.expect("launch");
    assert_eq!(connection.state(), ConnectionState::Open);

    let result = connection
        .send("browsingContext.getTree", None, Some(Duration::from_secs(5)))
        .await
        .expect("send");
    assert_eq!(result["ok"], true);
    assert_eq!(result["args"], "pipe --headless");

    let started = Instant::now();
    connection.close().await.expect("close");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(connection.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn events_before_ready_are_replayed() {
    init_tracing();
    let dir = TempDir::new().expect("tempdir");
    let binary = install(&dir, "vibium", ECHO_BINARY);

    let connection = Connection::launch(options(&binary)).await.expect("launch");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    connection.on_event(move |event: &Event| {
        sink.lock().push((event.method.clone(), event.context().map(str::to_string)));
    });

    eventually(|| !seen.lock().is_empty()).await;
    assert_eq!(
        *seen.lock(),
        vec![(
            "browsingContext.contextCreated".to_string(),
            Some("ctx-1".to_string())
        )]
    );

    connection.close().await.expect("close");
}

#[tokio::test]
async fn early_exit_reports_stderr() {
    init_tracing();
    let dir = TempDir::new().expect("tempdir");
    let binary = install(&dir, "vibium", CRASHING_BINARY);

    let err = Connection::launch(options(&binary)).await.expect_err("launch fails");
    match err {
        Error::ProcessLaunchFailed { message } => {
            assert!(message.contains("chrome not found in PATH"), "{message}");
        }
        other => panic!("expected launch failure, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_ready_signal_times_out() {
    init_tracing();
    let dir = TempDir::new().expect("tempdir");
    let binary = install(&dir, "vibium", SILENT_BINARY);

    let options = LaunchOptions::builder()
        .binary(&binary)
        .ready_timeout(Duration::from_millis(200))
        .build()
        .expect("valid options");

    let started = Instant::now();
    let err = Connection::launch(options).await.expect_err("timeout");
    assert!(matches!(err, Error::ConnectionTimeout { timeout_ms: 200 }));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn sync_launch_round_trip() {
    init_tracing();
    let dir = TempDir::new().expect("tempdir");
    let binary = install(&dir, "vibium", ECHO_BINARY);

    let connection = SyncConnection::launch(options(&binary)).expect("launch");

    let result = connection
        .send("session.status", Some(json!({})), Some(Duration::from_secs(5)))
        .expect("send");
    assert_eq!(result["ok"], true);

    connection.close().expect("close");
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert!(matches!(
        connection.send("session.status", None, None),
        Err(Error::ConnectionClosed)
    ));
}
