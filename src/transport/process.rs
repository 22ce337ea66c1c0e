//! Automation binary process management.
//!
//! The binary is started as `<binary> pipe [--headless] [args…]` and speaks
//! newline-delimited JSON over its stdin/stdout. It announces readiness with
//! a `vibium:ready` event; anything it emits before that is kept for replay.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::client::ReplayQueue;
use crate::error::{Error, Result};
use crate::launch::LaunchOptions;
use crate::protocol::{InboundMessage, decode};

use super::pipe::{PipeReader, PipeWriter};
use super::{Transport, TransportReader};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on collecting stderr after an early exit.
const STDERR_COLLECT_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// BinaryProcess
// ============================================================================

/// A running automation binary.
///
/// Killed on drop if still running. Prefer [`stop`](Self::stop), which
/// gives it a chance to exit after its stdin closes.
pub struct BinaryProcess {
    child: Child,
    pid: Option<u32>,
    stop_timeout: Duration,
    stderr_task: Option<JoinHandle<()>>,
}

impl fmt::Debug for BinaryProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryProcess")
            .field("pid", &self.pid)
            .field("stop_timeout", &self.stop_timeout)
            .finish_non_exhaustive()
    }
}

impl BinaryProcess {
    /// Spawns the binary and waits for its ready signal.
    ///
    /// Returns a pipe transport over the process's stdio that owns the
    /// process and carries the pre-ready events.
    ///
    /// # Errors
    ///
    /// - [`Error::ProcessLaunchFailed`] if spawning fails or the process
    ///   exits before it is ready (the message includes its stderr)
    /// - [`Error::ConnectionTimeout`] if the ready signal does not arrive in
    ///   time; the process is killed
    pub async fn launch(options: &LaunchOptions) -> Result<Transport> {
        let mut child = Self::spawn_child(options)?;
        let pid = child.id();
        info!(pid, binary = %options.binary.display(), "Binary process spawned");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::process_launch_failed("stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::process_launch_failed("stdout was not captured"))?;
        let mut stderr = child.stderr.take();

        let mut reader = PipeReader::new(stdout);
        let mut pre_ready = ReplayQueue::new(options.connection.replay_capacity);

        match timeout(
            options.ready_timeout,
            wait_for_ready(&mut reader, &mut pre_ready),
        )
        .await
        {
            Ok(Ok(())) => {}

            Ok(Err(e)) => {
                let diagnostics = match stderr.take() {
                    Some(stderr) => collect_stderr(stderr).await,
                    None => String::new(),
                };
                let _ = child.kill().await;

                warn!(pid, error = %e, "Binary exited before ready signal");
                return Err(Error::process_launch_failed(format!(
                    "process ended before ready signal ({e}): {}",
                    diagnostics.trim()
                )));
            }

            Err(_) => {
                let timeout_ms = u64::try_from(options.ready_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(pid, timeout_ms, "Timed out waiting for ready signal, killing process");
                let _ = child.kill().await;
                return Err(Error::connection_timeout(timeout_ms));
            }
        }

        debug!(pid, buffered = pre_ready.len(), "Binary signalled ready");

        let stderr_task = stderr.map(|stderr| tokio::spawn(forward_stderr(pid, stderr)));
        let process = Self {
            child,
            pid,
            stop_timeout: options.stop_timeout,
            stderr_task,
        };

        Ok(Transport::new(reader, PipeWriter::new(stdin))
            .with_pre_ready_events(pre_ready)
            .with_process(process))
    }

    /// OS process id, if the process was still running when spawned.
    #[inline]
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Waits for the process to exit, killing it after the grace period.
    ///
    /// The process exits on its own once its stdin closes, which happens
    /// when the connection's dispatch loop stops.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting on or killing the process fails.
    pub async fn stop(&mut self) -> Result<()> {
        match timeout(self.stop_timeout, self.child.wait()).await {
            Ok(Ok(status)) => info!(pid = self.pid, %status, "Binary process exited"),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                warn!(pid = self.pid, "Binary did not exit in time, killing");
                self.child.kill().await?;
            }
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        Ok(())
    }

    fn spawn_child(options: &LaunchOptions) -> Result<Child> {
        let mut cmd = Command::new(&options.binary);
        cmd.args(options.to_args());

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Terminal signals must not reach the binary directly.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn().map_err(|e| {
            Error::process_launch_failed(format!("{}: {e}", options.binary.display()))
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Reads frames until the ready event, buffering other events.
///
/// Lines that are not JSON messages are skipped.
pub(crate) async fn wait_for_ready<R>(reader: &mut R, pre_ready: &mut ReplayQueue) -> Result<()>
where
    R: TransportReader + ?Sized,
{
    loop {
        let Some(line) = reader.read_frame().await? else {
            return Err(Error::ConnectionClosed);
        };

        match decode(&line) {
            Some(InboundMessage::Event(event)) if event.is_ready() => return Ok(()),
            Some(InboundMessage::Event(event)) => {
                trace!(method = %event.method, "Buffering pre-ready event");
                pre_ready.push(event);
            }
            Some(InboundMessage::Response(response)) => {
                debug!(id = %response.id, "Ignoring response received before ready");
            }
            None => {}
        }
    }
}

async fn collect_stderr(stderr: ChildStderr) -> String {
    let mut buf = Vec::new();
    let mut stderr = stderr;
    let _ = timeout(STDERR_COLLECT_TIMEOUT, stderr.read_to_end(&mut buf)).await;
    String::from_utf8_lossy(&buf).into_owned()
}

async fn forward_stderr(pid: Option<u32>, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(pid, line = %line, "Binary stderr");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncWriteExt, duplex};

    #[tokio::test]
    async fn test_wait_for_ready_buffers_events_in_order() {
        let (mut remote, local) = duplex(4096);
        let mut reader = PipeReader::new(local);
        let mut queue = ReplayQueue::new(16);

        remote
            .write_all(
                b"not json\n\
                  {\"method\":\"browsingContext.contextCreated\",\"params\":{\"context\":\"a\"}}\n\
                  {\"id\":9,\"result\":{}}\n\
                  {\"method\":\"log.entryAdded\",\"params\":{}}\n\
                  {\"method\":\"vibium:ready\",\"params\":{}}\n\
                  {\"method\":\"after.ready\",\"params\":{}}\n",
            )
            .await
            .expect("write");

        wait_for_ready(&mut reader, &mut queue).await.expect("ready");

        let methods: Vec<String> = queue.into_events().into_iter().map(|e| e.method).collect();
        assert_eq!(methods, vec!["browsingContext.contextCreated", "log.entryAdded"]);

        let next = reader.read_frame().await.expect("read").expect("frame");
        assert!(next.contains("after.ready"));
    }

    #[tokio::test]
    async fn test_wait_for_ready_eof() {
        let (mut remote, local) = duplex(4096);
        let mut reader = PipeReader::new(local);
        let mut queue = ReplayQueue::new(16);

        remote.write_all(b"{\"method\":\"x.y\",\"params\":{}}\n").await.expect("write");
        drop(remote);

        let err = wait_for_ready(&mut reader, &mut queue).await.expect_err("eof");
        assert!(matches!(err, Error::ConnectionClosed));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_launch_nonexistent_binary_fails() {
        let options = LaunchOptions::new("/nonexistent/vibium-binary");
        let err = BinaryProcess::launch(&options).await.expect_err("spawn fails");
        assert!(matches!(err, Error::ProcessLaunchFailed { .. }));
    }
}
