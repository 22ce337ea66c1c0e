//! Connection and dispatch loop.
//!
//! A [`Connection`] owns one transport. On connect it spawns a single
//! dispatch task that:
//!
//! - Reads frames, decodes them, and routes responses to the correlation
//!   table and events to the registry
//! - Writes encoded requests handed over by `send`
//! - Fails every outstanding request once the transport ends
//!
//! # Lifecycle
//!
//! ```text
//! ConnectionState:  Connecting ──► Open ──► Closing ──► Closed
//!                                   │                      ▲
//!                                   └──── EOF / error ─────┘
//!
//! LoopState:        NotStarted ──► Running ──► Draining ──► Stopped
//! ```
//!
//! The dispatch task runs on the runtime whose [`Handle`] the connection was
//! given (or found) at connect time. That handle is the connection's
//! scheduler: [`Connection::spawn`] and [`Connection::send_detached`] put
//! follow-up work on it, which is how event handlers issue commands without
//! blocking the loop that runs them.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ContextId, HandlerId, RequestId};
use crate::launch::LaunchOptions;
use crate::protocol::{Event, InboundMessage, Request, decode, encode};
use crate::transport::{BinaryProcess, Transport, TransportReader, TransportWriter};

use super::correlation::{CorrelationTable, ResultSlot};
use super::events::{EventHandler, EventRegistry};
use super::options::ConnectionOptions;
use super::replay::ReplayQueue;

// ============================================================================
// States
// ============================================================================

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport handed over, loop not yet running.
    Connecting,
    /// Accepting requests.
    Open,
    /// `close()` requested; new requests are refused.
    Closing,
    /// Transport gone; every request fails with connection-closed.
    Closed,
}

/// Dispatch loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Not spawned yet.
    NotStarted,
    /// Reading and writing frames.
    Running,
    /// Failing outstanding requests.
    Draining,
    /// Finished.
    Stopped,
}

// ============================================================================
// Internals
// ============================================================================

/// Commands for the dispatch loop.
enum LoopCommand {
    /// Write an encoded request. Its slot is already registered.
    Send { id: RequestId, frame: String },
    /// Hand buffered events to the handlers that take them.
    Replay,
    /// Stop reading and drain.
    Shutdown,
}

/// State shared between connection handles and the dispatch loop.
struct Shared {
    correlation: CorrelationTable,
    events: EventRegistry,
    state: Mutex<ConnectionState>,
    loop_state: Mutex<LoopState>,
}

impl Shared {
    fn set_loop_state(&self, state: LoopState) {
        *self.loop_state.lock() = state;
    }

    /// Fails everything outstanding and marks the connection closed.
    /// Idempotent.
    fn drain(&self) {
        {
            let mut loop_state = self.loop_state.lock();
            if *loop_state != LoopState::Stopped {
                *loop_state = LoopState::Draining;
            }
        }

        let failed = self.correlation.close_all();
        *self.state.lock() = ConnectionState::Closed;

        if failed > 0 {
            debug!(failed, "Drained outstanding requests");
        }
    }
}

struct Inner {
    shared: Arc<Shared>,
    command_tx: mpsc::UnboundedSender<LoopCommand>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    process: Mutex<Option<BinaryProcess>>,
    scheduler: Handle,
    options: ConnectionOptions,
}

// ============================================================================
// Connection
// ============================================================================

/// Client end of one BiDi session.
///
/// Cheap to clone; clones share the transport, the correlation table and
/// the handler registry. When the last clone is dropped the dispatch loop
/// sees its command channel close and drains; call [`close`](Self::close)
/// to also wait for that and stop a launched process.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync`. Any number of tasks may `send`
/// concurrently; responses are matched by id regardless of arrival order.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("loop_state", &self.loop_state())
            .field("pending", &self.pending_count())
            .field("handlers", &self.handler_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Connection - Construction
// ============================================================================

impl Connection {
    /// Connects over `transport` with default options, spawning the dispatch
    /// loop on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if called outside a tokio runtime.
    pub fn connect(transport: Transport) -> Result<Self> {
        Self::connect_with(transport, ConnectionOptions::default())
    }

    /// Connects with custom options on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if called outside a tokio runtime.
    pub fn connect_with(transport: Transport, options: ConnectionOptions) -> Result<Self> {
        let scheduler = Handle::try_current().map_err(|_| {
            Error::config(
                "Connection::connect must run inside a tokio runtime. \
                 Use Connection::connect_on to pass a runtime handle explicitly.",
            )
        })?;
        Ok(Self::connect_on(transport, options, scheduler))
    }

    /// Connects and spawns the dispatch loop on `scheduler`.
    ///
    /// Every task this connection spawns, now or later, runs there.
    #[must_use]
    pub fn connect_on(transport: Transport, options: ConnectionOptions, scheduler: Handle) -> Self {
        let Transport {
            reader,
            writer,
            pre_ready,
            process,
        } = transport;

        let backlog = pre_ready.unwrap_or_else(|| ReplayQueue::new(options.replay_capacity));
        let buffered = backlog.len();

        let shared = Arc::new(Shared {
            correlation: CorrelationTable::new(options.max_pending),
            events: EventRegistry::new(backlog),
            state: Mutex::new(ConnectionState::Connecting),
            loop_state: Mutex::new(LoopState::NotStarted),
        });

        let (command_tx, command_rx) = mpsc::unbounded_channel();

        *shared.state.lock() = ConnectionState::Open;
        let loop_task = scheduler.spawn(Self::run_dispatch_loop(
            Arc::clone(&shared),
            reader,
            writer,
            command_rx,
        ));

        info!(buffered, has_process = process.is_some(), "Connection opened");

        Self {
            inner: Arc::new(Inner {
                shared,
                command_tx,
                loop_task: Mutex::new(Some(loop_task)),
                process: Mutex::new(process),
                scheduler,
                options,
            }),
        }
    }

    /// Launches the automation binary and connects to it over its stdio.
    ///
    /// Returns once the binary has signalled readiness. Events it emitted
    /// before that are replayed, on the dispatch loop, to the first
    /// registered handler.
    ///
    /// # Errors
    ///
    /// - [`Error::ProcessLaunchFailed`] if the binary exits before ready
    /// - [`Error::ConnectionTimeout`] if it does not become ready in time
    /// - [`Error::Config`] if called outside a tokio runtime
    pub async fn launch(options: LaunchOptions) -> Result<Self> {
        let transport = BinaryProcess::launch(&options).await?;
        Self::connect_with(transport, options.connection)
    }
}

// ============================================================================
// Connection - Requests
// ============================================================================

impl Connection {
    /// Sends a command and waits for its response.
    ///
    /// `params` of `None` is sent as `{}`. `request_timeout` of `None` uses
    /// the connection's default command timeout.
    ///
    /// # Errors
    ///
    /// Exactly one of:
    ///
    /// - [`Error::Protocol`] if the remote end answered with an error (or
    ///   [`Error::TooManyPending`] if the local limit is reached)
    /// - [`Error::RequestTimeout`] if no response arrived in time
    /// - [`Error::ConnectionClosed`] if the connection is or becomes closed
    pub async fn send(
        &self,
        method: &str,
        params: Option<Value>,
        request_timeout: Option<Duration>,
    ) -> Result<Value> {
        let request_timeout = request_timeout.unwrap_or(self.inner.options.command_timeout);

        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }

        let shared = &self.inner.shared;
        let (id, mut slot) = shared.correlation.register(method)?;

        let frame = match encode(&Request::new(id, method, params)) {
            Ok(frame) => frame,
            Err(e) => {
                shared.correlation.remove(id);
                return Err(e);
            }
        };

        if self
            .inner
            .command_tx
            .send(LoopCommand::Send { id, frame })
            .is_err()
        {
            shared.correlation.remove(id);
            return Err(Error::ConnectionClosed);
        }

        trace!(%id, method, "Request queued");

        match timeout(request_timeout, &mut slot).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => self.settle_timeout(id, method, request_timeout, slot),
        }
    }

    /// Resolves the deadline/response race for one request.
    ///
    /// Removing the entry wins the race for the timeout. If the entry is
    /// already gone, the response was stored in the slot first and is
    /// returned instead.
    fn settle_timeout(
        &self,
        id: RequestId,
        method: &str,
        request_timeout: Duration,
        mut slot: ResultSlot,
    ) -> Result<Value> {
        if self.inner.shared.correlation.remove(id) {
            let timeout_ms = u64::try_from(request_timeout.as_millis()).unwrap_or(u64::MAX);
            debug!(%id, method, timeout_ms, "Request timed out");
            return Err(Error::request_timeout(id, method, timeout_ms));
        }

        match slot.try_recv() {
            Ok(outcome) => {
                trace!(%id, method, "Response arrived at the deadline");
                outcome
            }
            Err(_) => Err(Error::ConnectionClosed),
        }
    }

    /// Sends a command from a spawned task on the connection's scheduler.
    ///
    /// For use from event handlers, which must not wait on the loop that is
    /// running them. Failures are logged; the handle also yields the outcome.
    pub fn send_detached(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> JoinHandle<Result<Value>> {
        let connection = self.clone();
        let method = method.into();

        self.inner.scheduler.spawn(async move {
            let outcome = connection.send(&method, params, None).await;
            if let Err(e) = &outcome {
                debug!(method = %method, error = %e, "Detached command failed");
            }
            outcome
        })
    }
}

// ============================================================================
// Connection - Events
// ============================================================================

impl Connection {
    /// Registers an event handler and returns its removal key.
    ///
    /// Handlers run on the dispatch loop, in registration order. Events that
    /// arrived before any handler existed, including those sent before the
    /// ready signal, are replayed once on the dispatch loop to the handlers
    /// registered by then, ahead of any later live event.
    pub fn on_event<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.on_event_handler(Arc::new(handler))
    }

    /// Registers a pre-built handler. See [`on_event`](Self::on_event).
    pub fn on_event_handler(&self, handler: EventHandler) -> HandlerId {
        let registration = self.inner.shared.events.on_event(handler);
        if registration.replay_due && self.inner.command_tx.send(LoopCommand::Replay).is_err() {
            debug!(handler = %registration.id, "Dispatch loop gone, buffered events not replayed");
        }
        registration.id
    }

    /// Registers a handler that only sees events arriving from now on.
    ///
    /// It neither receives nor consumes buffered events; a handler
    /// registered later with [`on_event`](Self::on_event) still gets them.
    pub fn on_live_event<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.shared.events.on_live_event(Arc::new(handler))
    }

    /// Registers a handler that only sees events for `context`.
    ///
    /// Events that carry no context at all are delivered too.
    pub fn on_context_event<F>(&self, context: impl Into<ContextId>, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let context = context.into();
        self.on_event(move |event: &Event| {
            if event.belongs_to(&context) {
                handler(event);
            }
        })
    }

    /// Removes a handler. Returns `false` if it was not registered.
    pub fn remove_event_handler(&self, id: HandlerId) -> bool {
        self.inner.shared.events.remove(id)
    }
}

// ============================================================================
// Connection - Scheduler
// ============================================================================

impl Connection {
    /// Runtime handle the dispatch loop runs on.
    #[inline]
    #[must_use]
    pub fn scheduler(&self) -> &Handle {
        &self.inner.scheduler
    }

    /// Spawns a task on the connection's scheduler.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.scheduler.spawn(future)
    }
}

// ============================================================================
// Connection - Lifecycle
// ============================================================================

impl Connection {
    /// Closes the connection.
    ///
    /// Stops the dispatch loop (aborting it after the close grace period),
    /// fails every outstanding request with [`Error::ConnectionClosed`] and
    /// stops the launched process, if any. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if stopping the process fails.
    pub async fn close(&self) -> Result<()> {
        let task = self.inner.loop_task.lock().take();
        let Some(mut task) = task else {
            trace!("Connection already closed");
            return Ok(());
        };

        {
            let mut state = self.inner.shared.state.lock();
            if *state != ConnectionState::Closed {
                *state = ConnectionState::Closing;
            }
        }

        debug!(pending = self.pending_count(), "Closing connection");
        let _ = self.inner.command_tx.send(LoopCommand::Shutdown);

        let grace = self.inner.options.close_timeout;
        match timeout(grace, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Dispatch loop ended abnormally"),
            Err(_) => {
                warn!(
                    timeout_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                    "Dispatch loop did not stop in time, aborting"
                );
                task.abort();
            }
        }

        self.inner.shared.drain();
        self.inner.shared.set_loop_state(LoopState::Stopped);

        let process = self.inner.process.lock().take();
        if let Some(mut process) = process {
            process.stop().await?;
        }

        info!("Connection closed");
        Ok(())
    }

    /// Current connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.shared.state.lock()
    }

    /// Current dispatch loop state.
    #[inline]
    #[must_use]
    pub fn loop_state(&self) -> LoopState {
        *self.inner.shared.loop_state.lock()
    }

    /// Returns `true` while new requests are accepted.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Number of requests awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.shared.correlation.len()
    }

    /// Number of registered event handlers.
    #[inline]
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.inner.shared.events.len()
    }

    /// Options this connection was created with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }
}

// ============================================================================
// Dispatch Loop
// ============================================================================

impl Connection {
    async fn run_dispatch_loop(
        shared: Arc<Shared>,
        mut reader: Box<dyn TransportReader>,
        mut writer: Box<dyn TransportWriter>,
        mut command_rx: mpsc::UnboundedReceiver<LoopCommand>,
    ) {
        shared.set_loop_state(LoopState::Running);
        debug!("Dispatch loop started");

        loop {
            tokio::select! {
                frame = reader.read_frame() => {
                    match frame {
                        Ok(Some(text)) => Self::handle_incoming(&shared, &text),

                        Ok(None) => {
                            debug!("Transport reached end of stream");
                            break;
                        }

                        Err(e) => {
                            warn!(error = %e, "Transport read failed");
                            break;
                        }
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(LoopCommand::Send { id, frame }) => {
                            Self::handle_send(&shared, writer.as_mut(), id, &frame).await;
                        }

                        Some(LoopCommand::Replay) => {
                            let replayed = shared.events.replay();
                            trace!(replayed, "Buffered events replayed");
                        }

                        Some(LoopCommand::Shutdown) => {
                            debug!("Shutdown requested");
                            break;
                        }

                        None => {
                            debug!("All connection handles dropped");
                            break;
                        }
                    }
                }
            }
        }

        shared.drain();

        if let Err(e) = writer.close().await {
            debug!(error = %e, "Error closing transport writer");
        }

        shared.set_loop_state(LoopState::Stopped);
        debug!("Dispatch loop stopped");
    }

    /// Routes one inbound frame.
    fn handle_incoming(shared: &Shared, text: &str) {
        match decode(text) {
            Some(InboundMessage::Response(response)) => {
                let id = response.id;
                trace!(%id, error = response.is_error(), "Response received");
                shared.correlation.resolve(id, response.into_result());
            }

            Some(InboundMessage::Event(event)) => {
                trace!(method = %event.method, "Event received");
                shared.events.dispatch(&event);
            }

            None => {}
        }
    }

    /// Writes one request; a failed write fails that request.
    async fn handle_send(shared: &Shared, writer: &mut dyn TransportWriter, id: RequestId, frame: &str) {
        match writer.write_frame(frame).await {
            Ok(()) => trace!(%id, "Request sent"),
            Err(e) => {
                warn!(%id, error = %e, "Failed to write request");
                shared.correlation.resolve(id, Err(Error::ConnectionClosed));
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};

    /// Connection wired to an in-memory remote end.
    fn connected() -> (Connection, BufReader<DuplexStream>, DuplexStream) {
        let (client_out, remote_in) = duplex(64 * 1024);
        let (remote_out, client_in) = duplex(64 * 1024);

        let transport = Transport::pipe(client_in, client_out);
        let connection = Connection::connect(transport).expect("connect");
        (connection, BufReader::new(remote_in), remote_out)
    }

    async fn next_request(lines: &mut BufReader<DuplexStream>) -> Value {
        let mut line = String::new();
        lines.read_line(&mut line).await.expect("read request");
        serde_json::from_str(&line).expect("request json")
    }

    #[tokio::test]
    async fn test_send_resolves_with_result() {
        let (connection, mut requests, mut responses) = connected();

        let remote = tokio::spawn(async move {
            let request = next_request(&mut requests).await;
            assert_eq!(request["method"], "session.status");
            assert_eq!(request["params"], json!({}));

            let reply = json!({ "id": request["id"], "result": { "ready": true } });
            responses
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .expect("write");
            (requests, responses)
        });

        let result = connection
            .send("session.status", None, Some(Duration::from_secs(5)))
            .await
            .expect("send");
        assert_eq!(result, json!({ "ready": true }));
        assert_eq!(connection.pending_count(), 0);

        let _keep = remote.await.expect("remote");
    }

    #[tokio::test]
    async fn test_error_response_maps_to_protocol_error() {
        let (connection, mut requests, mut responses) = connected();

        tokio::spawn(async move {
            let request = next_request(&mut requests).await;
            let reply = json!({
                "id": request["id"],
                "type": "error",
                "error": "no such frame",
                "message": "gone"
            });
            responses
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .expect("write");
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let err = connection
            .send("browsingContext.navigate", Some(json!({"url": "about:blank"})), None)
            .await
            .expect_err("protocol error");
        assert_eq!(err.protocol_kind(), Some("no such frame"));
    }

    #[tokio::test]
    async fn test_timeout_leaves_no_entry() {
        let (connection, _requests, _responses) = connected();

        let err = connection
            .send("never.answered", None, Some(Duration::from_millis(20)))
            .await
            .expect_err("timeout");

        assert!(matches!(err, Error::RequestTimeout { .. }));
        assert_eq!(connection.pending_count(), 0);
        assert!(connection.is_open());
    }

    #[tokio::test]
    async fn test_eof_fails_pending_and_closes() {
        let (connection, requests, responses) = connected();

        let pending = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.send("x.y", None, None).await })
        };

        tokio::task::yield_now().await;
        while connection.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        drop(responses);
        drop(requests);

        let outcome = pending.await.expect("join");
        assert!(matches!(outcome, Err(Error::ConnectionClosed)));

        while connection.loop_state() != LoopState::Stopped {
            tokio::task::yield_now().await;
        }
        assert_eq!(connection.state(), ConnectionState::Closed);

        let err = connection.send("x.y", None, None).await.expect_err("closed");
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (connection, _requests, _responses) = connected();

        connection.close().await.expect("close");
        connection.close().await.expect("close again");

        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(connection.loop_state(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn test_context_filtered_handler() {
        let (connection, _requests, mut responses) = connected();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        connection.on_context_event("ctx-1", move |event: &Event| {
            sink.lock().push(event.params["n"].as_u64().unwrap_or(0));
        });

        for (n, context) in [(1, "ctx-1"), (2, "ctx-2"), (3, "ctx-1")] {
            let event = json!({
                "method": "browsingContext.load",
                "params": { "context": context, "n": n }
            });
            responses
                .write_all(format!("{event}\n").as_bytes())
                .await
                .expect("write");
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.lock().len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("events delivered");

        assert_eq!(*seen.lock(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_buffered_events_replay_on_the_dispatch_task() {
        let (client_out, _remote_in) = duplex(64 * 1024);
        let (_remote_out, client_in) = duplex(64 * 1024);

        let mut queue = ReplayQueue::new(8);
        queue.push(Event::new("browsingContext.contextCreated", json!({ "n": 1 })));
        queue.push(Event::new("browsingContext.contextCreated", json!({ "n": 2 })));
        let transport = Transport::pipe(client_in, client_out).with_pre_ready_events(queue);
        let connection = Connection::connect(transport).expect("connect");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        connection.on_event(move |event: &Event| {
            sink.lock().push(event.params["n"].as_u64().unwrap_or(0));
        });

        // Single-threaded runtime: nothing ran on this task during on_event.
        assert!(seen.lock().is_empty());

        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.lock().len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("replayed");

        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_connect_outside_runtime_fails() {
        let (a, _b) = duplex(64);
        let (reader, writer) = tokio::io::split(a);
        let err = Connection::connect(Transport::pipe(reader, writer)).expect_err("no runtime");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_connection_is_send_sync_clone() {
        fn assert_traits<T: Send + Sync + Clone + fmt::Debug>() {}
        assert_traits::<Connection>();
    }
}
