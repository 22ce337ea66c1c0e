//! Blocking client.
//!
//! [`SyncConnection`] pairs a [`Connection`] with a private [`Bridge`] so
//! the async client can be driven from ordinary threads. The dispatch loop
//! and every task it spawns run on the bridge's worker thread.
//!
//! Event handlers also run on that thread. A handler that calls back into
//! [`SyncConnection::send`] gets [`Error::BridgeReentrant`]; use
//! [`Connection::send_detached`] via [`SyncConnection::connection`] instead.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::bridge::{Bridge, BridgeOptions};
use crate::client::{Connection, ConnectionOptions, ConnectionState};
use crate::error::{Error, Result};
use crate::identifiers::{ContextId, HandlerId};
use crate::launch::LaunchOptions;
use crate::protocol::Event;
use crate::transport::Transport;

// ============================================================================
// Constants
// ============================================================================

/// Slack added to a request or close deadline when deriving the bridge
/// deadline.
const BRIDGE_MARGIN: Duration = Duration::from_secs(1);

// ============================================================================
// SyncConnection
// ============================================================================

/// Blocking wrapper around [`Connection`].
///
/// # Example
///
/// ```no_run
/// use bidi_client::{LaunchOptions, SyncConnection};
///
/// # fn example() -> bidi_client::Result<()> {
/// let options = LaunchOptions::builder().headless().build()?;
/// let connection = SyncConnection::launch(options)?;
///
/// let tree = connection.send("browsingContext.getTree", None, None)?;
/// println!("{tree}");
///
/// connection.close()?;
/// # Ok(())
/// # }
/// ```
pub struct SyncConnection {
    bridge: Bridge,
    connection: Connection,
}

impl fmt::Debug for SyncConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConnection")
            .field("bridge", &self.bridge)
            .field("connection", &self.connection)
            .finish()
    }
}

// ============================================================================
// SyncConnection - Construction
// ============================================================================

impl SyncConnection {
    /// Launches the automation binary and connects to it.
    ///
    /// # Errors
    ///
    /// See [`Connection::launch`].
    pub fn launch(options: LaunchOptions) -> Result<Self> {
        Self::launch_with(options, BridgeOptions::default())
    }

    /// Launches the binary using a bridge with custom options.
    ///
    /// # Errors
    ///
    /// See [`Connection::launch`]; also [`Error::BridgeTimeout`] if launching
    /// outlasts the bridge's run timeout.
    pub fn launch_with(options: LaunchOptions, bridge_options: BridgeOptions) -> Result<Self> {
        let bridge = Bridge::with_options(bridge_options);
        bridge.start()?;

        let connection = bridge.run(Connection::launch(options), None)?;
        Ok(Self { bridge, connection })
    }

    /// Connects over a transport produced on the background runtime.
    ///
    /// Transports own I/O resources that must be created inside the runtime
    /// that drives them, so this takes the future that creates one.
    ///
    /// # Errors
    ///
    /// Returns the transport future's error, or a bridge error.
    pub fn connect<Fut>(transport: Fut) -> Result<Self>
    where
        Fut: Future<Output = Result<Transport>> + Send + 'static,
    {
        Self::connect_with(transport, ConnectionOptions::default(), BridgeOptions::default())
    }

    /// Connects with custom connection and bridge options.
    ///
    /// # Errors
    ///
    /// Returns the transport future's error, or a bridge error.
    pub fn connect_with<Fut>(
        transport: Fut,
        options: ConnectionOptions,
        bridge_options: BridgeOptions,
    ) -> Result<Self>
    where
        Fut: Future<Output = Result<Transport>> + Send + 'static,
    {
        let bridge = Bridge::with_options(bridge_options);
        let scheduler = bridge.start()?;

        let transport = bridge.run(transport, None)?;
        let connection = Connection::connect_on(transport, options, scheduler);
        Ok(Self { bridge, connection })
    }

    /// Connects to a WebSocket endpoint.
    ///
    /// # Errors
    ///
    /// See [`Transport::websocket`].
    pub fn connect_websocket(url: &str) -> Result<Self> {
        let url = url.to_string();
        Self::connect(async move { Transport::websocket(&url).await })
    }
}

// ============================================================================
// SyncConnection - Operations
// ============================================================================

impl SyncConnection {
    /// Sends a command and blocks until its response arrives.
    ///
    /// # Errors
    ///
    /// The same outcomes as [`Connection::send`], plus
    /// [`Error::BridgeReentrant`] when called from an event handler.
    pub fn send(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        if !self.connection.is_open() {
            return Err(Error::ConnectionClosed);
        }

        let request_timeout = timeout.unwrap_or(self.connection.options().command_timeout);
        let bridge_timeout = self
            .bridge
            .options()
            .run_timeout
            .max(request_timeout + BRIDGE_MARGIN);

        let connection = self.connection.clone();
        let method = method.to_string();
        self.bridge.run(
            async move { connection.send(&method, params, Some(request_timeout)).await },
            Some(bridge_timeout),
        )
    }

    /// Registers an event handler. See [`Connection::on_event`].
    pub fn on_event<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.connection.on_event(handler)
    }

    /// Registers a handler for live events only. See
    /// [`Connection::on_live_event`].
    pub fn on_live_event<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.connection.on_live_event(handler)
    }

    /// Registers a context-filtered handler. See
    /// [`Connection::on_context_event`].
    pub fn on_context_event<F>(&self, context: impl Into<ContextId>, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.connection.on_context_event(context, handler)
    }

    /// Removes a handler. Returns `false` if it was not registered.
    pub fn remove_event_handler(&self, id: HandlerId) -> bool {
        self.connection.remove_event_handler(id)
    }

    /// Closes the connection, then stops the bridge. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if stopping the launched process fails.
    pub fn close(&self) -> Result<()> {
        let outcome = if self.bridge.is_running() {
            let bridge_timeout = self
                .bridge
                .options()
                .run_timeout
                .max(self.connection.options().close_timeout + BRIDGE_MARGIN);

            let connection = self.connection.clone();
            match self
                .bridge
                .run(async move { connection.close().await }, Some(bridge_timeout))
            {
                Err(Error::BridgeNotStarted) => Ok(()),
                other => other,
            }
        } else {
            Ok(())
        };

        self.bridge.stop();
        debug!("Synchronous connection closed");
        outcome
    }

    /// The underlying async connection.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// The bridge driving the connection.
    #[inline]
    #[must_use]
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Current connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Number of requests awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.connection.pending_count()
    }
}

// ============================================================================
// Tests
// ============================================================================
