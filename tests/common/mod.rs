//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};
use tokio::time::timeout;

use bidi_client::{Connection, ConnectionOptions, ReplayQueue, Transport};

/// How long a helper waits for the client before failing the test.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Installs a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Client halves of an in-memory link plus the scripted remote end.
pub fn link() -> (Transport, FakeRemote) {
    let (client_out, remote_in) = duplex(256 * 1024);
    let (remote_out, client_in) = duplex(256 * 1024);

    (
        Transport::pipe(client_in, client_out),
        FakeRemote {
            requests: BufReader::new(remote_in),
            out: Some(remote_out),
        },
    )
}

/// Connection over an in-memory link with default options.
pub fn connected() -> (Connection, FakeRemote) {
    connected_with(ConnectionOptions::default(), None)
}

/// Connection over an in-memory link, optionally with pre-ready events.
pub fn connected_with(
    options: ConnectionOptions,
    pre_ready: Option<ReplayQueue>,
) -> (Connection, FakeRemote) {
    init_tracing();

    let (mut transport, remote) = link();
    if let Some(queue) = pre_ready {
        transport = transport.with_pre_ready_events(queue);
    }

    let connection = Connection::connect_with(transport, options).expect("connect");
    (connection, remote)
}

/// Plays the automation binary: reads requests, writes scripted frames.
pub struct FakeRemote {
    requests: BufReader<DuplexStream>,
    out: Option<DuplexStream>,
}

impl FakeRemote {
    /// Reads the next request line as JSON.
    pub async fn next_request(&mut self) -> Value {
        let mut line = String::new();
        let n = timeout(STEP_TIMEOUT, self.requests.read_line(&mut line))
            .await
            .expect("request within step timeout")
            .expect("read request");
        assert!(n > 0, "client closed its side");
        serde_json::from_str(&line).expect("request is JSON")
    }

    /// Reads the next request, or `None` once the client has closed its side.
    ///
    /// Waits without a step timeout; used by long-running scripted remotes.
    pub async fn try_next_request(&mut self) -> Option<Value> {
        let mut line = String::new();
        match self.requests.read_line(&mut line).await {
            Ok(0) | Err(_) => None,
            Ok(_) => serde_json::from_str(&line).ok(),
        }
    }

    /// Returns `true` once the client has closed its write side.
    pub async fn client_closed(&mut self) -> bool {
        let mut line = String::new();
        matches!(
            timeout(STEP_TIMEOUT, self.requests.read_line(&mut line)).await,
            Ok(Ok(0))
        )
    }

    /// Writes one raw line.
    pub async fn send_raw(&mut self, line: &str) {
        let out = self.out.as_mut().expect("remote not hung up");
        out.write_all(line.as_bytes()).await.expect("write");
        out.write_all(b"\n").await.expect("write");
        out.flush().await.expect("flush");
    }

    /// Answers request `id` with `result`.
    pub async fn respond(&mut self, id: &Value, result: Value) {
        self.send_raw(&json!({ "id": id, "result": result }).to_string())
            .await;
    }

    /// Answers request `id` with an error.
    pub async fn respond_error(&mut self, id: &Value, error: &str, message: &str) {
        let frame = json!({ "id": id, "type": "error", "error": error, "message": message });
        self.send_raw(&frame.to_string()).await;
    }

    /// Emits an event.
    pub async fn emit(&mut self, method: &str, params: Value) {
        self.send_raw(&json!({ "method": method, "params": params }).to_string())
            .await;
    }

    /// Closes the remote's output: the client sees end of stream.
    pub fn hang_up(&mut self) {
        self.out = None;
    }
}

/// Polls `condition` until it holds or the step timeout passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(STEP_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition within step timeout");
}
