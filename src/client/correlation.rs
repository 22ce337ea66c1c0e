//! Correlation table.
//!
//! Maps each outstanding request id to a single-assignment result slot.
//!
//! # Invariants
//!
//! - An id is reserved (and its slot stored) before the request is written,
//!   so a fast response can never arrive ahead of its registration.
//! - Each id is resolved at most once. Resolving an absent id (already
//!   resolved, timed out, unknown) is a silent no-op.
//! - Slots are filled while the table lock is held. A caller that fails to
//!   remove its own id therefore knows the outcome is already in its
//!   receiver ("done wins over timeout").
//! - Once closed, every pending slot has received
//!   [`Error::ConnectionClosed`] and no new id can be registered.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::{IdAllocator, RequestId};

// ============================================================================
// Types
// ============================================================================

/// Receiving end of a result slot.
pub type ResultSlot = oneshot::Receiver<Result<Value>>;

struct PendingRequest {
    method: String,
    slot: oneshot::Sender<Result<Value>>,
}

#[derive(Default)]
struct TableState {
    pending: FxHashMap<RequestId, PendingRequest>,
    closed: bool,
}

// ============================================================================
// CorrelationTable
// ============================================================================

/// Outstanding requests keyed by [`RequestId`].
pub struct CorrelationTable {
    ids: IdAllocator,
    state: Mutex<TableState>,
    max_pending: usize,
}

impl CorrelationTable {
    /// Creates an empty table accepting at most `max_pending` outstanding
    /// requests.
    #[must_use]
    pub fn new(max_pending: usize) -> Self {
        Self {
            ids: IdAllocator::new(),
            state: Mutex::new(TableState::default()),
            max_pending: max_pending.max(1),
        }
    }

    /// Reserves the next id and stores its result slot.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the table was closed
    /// - [`Error::TooManyPending`] if the pending limit is reached
    pub fn register(&self, method: &str) -> Result<(RequestId, ResultSlot)> {
        let mut state = self.state.lock();

        if state.closed {
            return Err(Error::ConnectionClosed);
        }

        if state.pending.len() >= self.max_pending {
            warn!(
                pending = state.pending.len(),
                max = self.max_pending,
                "Too many pending requests"
            );
            return Err(Error::TooManyPending {
                pending: state.pending.len(),
                max: self.max_pending,
            });
        }

        let id = self.ids.next_request_id();
        let (tx, rx) = oneshot::channel();
        state.pending.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                slot: tx,
            },
        );

        Ok((id, rx))
    }

    /// Resolves a pending request.
    ///
    /// Returns `false` (and does nothing else) if `id` is not pending.
    pub fn resolve(&self, id: RequestId, outcome: Result<Value>) -> bool {
        let mut state = self.state.lock();

        match state.pending.remove(&id) {
            Some(request) => {
                if request.slot.send(outcome).is_err() {
                    debug!(%id, method = %request.method, "Caller dropped before response arrived");
                }
                true
            }
            None => {
                debug!(%id, "Response for unknown or already settled request");
                false
            }
        }
    }

    /// Removes a pending request without resolving it.
    ///
    /// Returns `false` if it was no longer pending, in which case its outcome
    /// has already been delivered to the slot.
    pub fn remove(&self, id: RequestId) -> bool {
        self.state.lock().pending.remove(&id).is_some()
    }

    /// Fails every pending request with [`Error::ConnectionClosed`] and
    /// refuses further registrations.
    ///
    /// Returns how many requests were failed. Idempotent.
    pub fn close_all(&self) -> usize {
        let mut state = self.state.lock();
        state.closed = true;

        let count = state.pending.len();
        for (_, request) in state.pending.drain() {
            let _ = request.slot.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on connection close");
        }
        count
    }

    /// Number of outstanding requests.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns `true` if nothing is outstanding.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once [`close_all`](Self::close_all) has run.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_ids_increase_from_one() {
        let table = CorrelationTable::new(16);
        let (a, _ra) = table.register("a").expect("register");
        let (b, _rb) = table.register("b").expect("register");
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_resolve_delivers_once() {
        let table = CorrelationTable::new(16);
        let (id, mut rx) = table.register("ping").expect("register");

        assert!(table.resolve(id, Ok(json!({"pong": true}))));
        assert!(!table.resolve(id, Ok(json!("second"))));
        assert!(table.is_empty());

        let value = rx.try_recv().expect("delivered").expect("ok");
        assert_eq!(value, json!({"pong": true}));
    }

    #[test]
    fn test_slot_stays_pending_until_resolved() {
        let table = CorrelationTable::new(16);
        let (id, rx) = table.register("x").expect("register");
        let mut slot = tokio_test::task::spawn(rx);

        tokio_test::assert_pending!(slot.poll());

        table.resolve(id, Ok(json!("late")));
        assert!(slot.is_woken());

        let outcome = tokio_test::assert_ready!(slot.poll());
        assert_eq!(outcome.expect("sent").expect("ok"), json!("late"));
    }

    #[test]
    fn test_unknown_id_is_noop() {
        let table = CorrelationTable::new(16);
        let (id, mut rx) = table.register("x").expect("register");

        assert!(!table.resolve(RequestId::new(999), Ok(Value::Null)));
        assert_eq!(table.len(), 1);
        assert!(rx.try_recv().is_err());

        assert!(table.resolve(id, Ok(Value::Null)));
    }

    #[test]
    fn test_remove_then_resolve_is_noop() {
        let table = CorrelationTable::new(16);
        let (id, _rx) = table.register("x").expect("register");

        assert!(table.remove(id));
        assert!(!table.remove(id));
        assert!(!table.resolve(id, Ok(Value::Null)));
    }

    #[test]
    fn test_failed_remove_means_outcome_stored() {
        let table = CorrelationTable::new(16);
        let (id, mut rx) = table.register("x").expect("register");

        table.resolve(id, Ok(json!(1)));
        assert!(!table.remove(id));
        assert_eq!(rx.try_recv().expect("stored").expect("ok"), json!(1));
    }

    #[test]
    fn test_close_all_fails_everything_once() {
        let table = CorrelationTable::new(16);
        let mut slots: Vec<_> = (0..5)
            .map(|_| table.register("x").expect("register").1)
            .collect();

        assert_eq!(table.close_all(), 5);
        assert_eq!(table.close_all(), 0);
        assert!(table.is_empty());
        assert!(table.is_closed());

        for rx in &mut slots {
            let outcome = rx.try_recv().expect("resolved");
            assert!(matches!(outcome, Err(Error::ConnectionClosed)));
        }
    }

    #[test]
    fn test_register_after_close_fails() {
        let table = CorrelationTable::new(16);
        table.close_all();
        assert!(matches!(table.register("x"), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_pending_limit() {
        let table = CorrelationTable::new(2);
        let _a = table.register("a").expect("register");
        let _b = table.register("b").expect("register");

        match table.register("c") {
            Err(Error::TooManyPending { pending, max }) => {
                assert_eq!(pending, 2);
                assert_eq!(max, 2);
            }
            other => panic!("expected TooManyPending, got {other:?}"),
        }
    }
}
