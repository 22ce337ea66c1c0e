//! Synchronous bridge over a background runtime.
//!
//! A [`Bridge`] owns one worker thread running a current-thread tokio
//! runtime. Blocking callers submit futures to it with [`Bridge::run`] and
//! wait for the outcome with a deadline.
//!
//! # Outcomes
//!
//! `run` returns exactly one of:
//!
//! - the future's own output, value or error, unchanged
//! - [`Error::BridgeTimeout`] if the deadline passed first
//!
//! If the future completes at the same instant the deadline passes, the
//! completed output wins.
//!
//! # Re-entrancy
//!
//! Event handlers run on the worker thread. Calling `run` from there would
//! block the only thread able to make progress, so it fails with
//! [`Error::BridgeReentrant`] instead.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle as ThreadHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default deadline for [`Bridge::run`].
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(120);

/// Default grace period for [`Bridge::stop`].
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Default worker thread name.
pub const DEFAULT_THREAD_NAME: &str = "bidi-bridge";

/// Extra time `stop` allows for the thread to exit after the runtime's own
/// shutdown grace period.
const JOIN_MARGIN: Duration = Duration::from_millis(250);

/// Poll interval while waiting for the worker thread to exit.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

// ============================================================================
// BridgeOptions
// ============================================================================

/// Bridge settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Name of the worker thread.
    pub thread_name: String,

    /// Deadline applied by `run` when the caller passes `None`.
    pub run_timeout: Duration,

    /// Grace period for outstanding tasks when stopping.
    pub stop_timeout: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            run_timeout: DEFAULT_RUN_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl BridgeOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker thread name.
    #[inline]
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Sets the default `run` deadline.
    #[inline]
    #[must_use]
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Sets the stop grace period.
    #[inline]
    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }
}

// ============================================================================
// Outcome
// ============================================================================

enum Slot<T> {
    Pending,
    Done(Result<T>),
    /// The waiting side has given up or taken the result.
    Settled,
}

/// Single-assignment cell shared by a blocked caller and its task.
struct Outcome<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Outcome<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
        }
    }

    /// Stores the result unless one is stored already or the caller left.
    fn complete(&self, result: Result<T>) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Done(result);
            self.ready.notify_one();
        }
    }

    /// Waits for the result until `deadline`.
    ///
    /// Returns `None` on timeout; the cell is then settled and a late
    /// result is discarded.
    fn wait_until(&self, deadline: Instant) -> Option<Result<T>> {
        let mut slot = self.slot.lock();
        loop {
            if matches!(*slot, Slot::Done(_)) {
                return match std::mem::replace(&mut *slot, Slot::Settled) {
                    Slot::Done(result) => Some(result),
                    _ => None,
                };
            }

            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                return match std::mem::replace(&mut *slot, Slot::Settled) {
                    Slot::Done(result) => Some(result),
                    _ => None,
                };
            }
        }
    }
}

/// Completes its outcome with [`Error::BridgeNotStarted`] if dropped unused,
/// which covers a panicking future and a runtime shutting down under it.
struct Completion<T> {
    outcome: Arc<Outcome<T>>,
}

impl<T> Completion<T> {
    fn finish(self, result: Result<T>) {
        self.outcome.complete(result);
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        self.outcome.complete(Err(Error::BridgeNotStarted));
    }
}

// ============================================================================
// Bridge
// ============================================================================

struct Worker {
    handle: Handle,
    thread_id: ThreadId,
    shutdown_tx: oneshot::Sender<()>,
    thread: ThreadHandle<()>,
}

/// Blocking front end to a private tokio runtime.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use bidi_client::Bridge;
///
/// # fn example() -> bidi_client::Result<()> {
/// let bridge = Bridge::new();
/// bridge.start()?;
///
/// let answer = bridge.run(async { Ok(21 * 2) }, Some(Duration::from_secs(1)))?;
/// assert_eq!(answer, 42);
///
/// bridge.stop();
/// # Ok(())
/// # }
/// ```
pub struct Bridge {
    options: BridgeOptions,
    worker: Mutex<Option<Worker>>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("options", &self.options)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge {
    /// Creates a stopped bridge with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(BridgeOptions::default())
    }

    /// Creates a stopped bridge.
    #[must_use]
    pub fn with_options(options: BridgeOptions) -> Self {
        Self {
            options,
            worker: Mutex::new(None),
        }
    }

    /// Starts the worker thread, or returns the running runtime's handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread or runtime cannot be created.
    pub fn start(&self) -> Result<Handle> {
        let mut worker = self.worker.lock();
        if let Some(worker) = worker.as_ref() {
            return Ok(worker.handle.clone());
        }

        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let grace = self.options.stop_timeout;
        let name = self.options.thread_name.clone();

        let thread = thread::Builder::new().name(name.clone()).spawn(move || {
            let rt = match Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    error!(error = %e, "Failed to create bridge runtime");
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            let _ = ready_tx.send(Ok(rt.handle().clone()));
            rt.block_on(async move {
                let _ = shutdown_rx.await;
            });

            rt.shutdown_timeout(grace);
            debug!("Bridge runtime shut down");
        })?;

        let handle = ready_rx.recv().map_err(|_| Error::BridgeNotStarted)??;

        *worker = Some(Worker {
            handle: handle.clone(),
            thread_id: thread.thread().id(),
            shutdown_tx,
            thread,
        });

        info!(thread = %name, "Bridge started");
        Ok(handle)
    }

    /// Runs `future` on the background runtime and blocks until it
    /// completes or `timeout` (default: the bridge's run timeout) passes.
    ///
    /// # Errors
    ///
    /// - The future's own error, unchanged
    /// - [`Error::BridgeTimeout`] if the deadline passed first; the task is
    ///   cancelled
    /// - [`Error::BridgeNotStarted`] if the bridge is not running or stops
    ///   before the future completes
    /// - [`Error::BridgeReentrant`] if called from the worker thread
    pub fn run<F, T>(&self, future: F, timeout: Option<Duration>) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (handle, worker_thread) = {
            let worker = self.worker.lock();
            let worker = worker.as_ref().ok_or(Error::BridgeNotStarted)?;
            (worker.handle.clone(), worker.thread_id)
        };

        if thread::current().id() == worker_thread {
            return Err(Error::BridgeReentrant);
        }

        let timeout = timeout.unwrap_or(self.options.run_timeout);
        let outcome = Arc::new(Outcome::new());
        let completion = Completion {
            outcome: Arc::clone(&outcome),
        };

        let task = handle.spawn(async move {
            let result = future.await;
            completion.finish(result);
        });

        match outcome.wait_until(Instant::now() + timeout) {
            Some(result) => result,
            None => {
                task.abort();
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(timeout_ms, "Synchronous call timed out");
                Err(Error::bridge_timeout(timeout_ms))
            }
        }
    }

    /// Stops the runtime and joins the worker thread.
    ///
    /// Outstanding tasks get the stop grace period to finish. If the thread
    /// still has not exited shortly after, it is detached. Idempotent.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        let _ = worker.shutdown_tx.send(());

        if thread::current().id() == worker.thread_id {
            warn!("Bridge stopped from its own worker thread, detaching");
            return;
        }

        let deadline = Instant::now() + self.options.stop_timeout + JOIN_MARGIN;
        while !worker.thread.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    thread = %self.options.thread_name,
                    "Bridge worker did not exit in time, detaching"
                );
                return;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        if worker.thread.join().is_err() {
            warn!("Bridge worker panicked");
        }
        info!(thread = %self.options.thread_name, "Bridge stopped");
    }

    /// Returns `true` while the worker is running.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Handle of the running runtime.
    #[must_use]
    pub fn handle(&self) -> Option<Handle> {
        self.worker.lock().as_ref().map(|worker| worker.handle.clone())
    }

    /// Bridge options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Tests
// ============================================================================
