//! Event fan-out registry.
//!
//! Every decoded event is handed to every registered handler, once, in
//! registration order, on the dispatch loop's own task.
//!
//! # Handler contract
//!
//! Handlers run inline on the dispatch loop. They must not wait on anything
//! that needs the dispatch loop to make progress: awaiting (or blocking on)
//! a response from inside a handler deadlocks the connection, because the
//! loop that would deliver that response is the one running the handler.
//! Follow-up protocol work belongs on the connection's scheduler, see
//! [`Connection::spawn`](crate::Connection::spawn) and
//! [`Connection::send_detached`](crate::Connection::send_detached).
//!
//! A handler that panics is caught and logged; the remaining handlers still
//! run and the loop keeps going.
//!
//! # Buffered events
//!
//! Events that arrive before any handler exists are held in a backlog.
//! Registering a handler never runs it on the registering thread: it only
//! reports that a replay is due, and the owner of the dispatch task calls
//! [`EventRegistry::replay`] there. Until that happens new events keep
//! joining the backlog, so replayed events always precede live ones.
//!
//! Handlers registered with [`EventRegistry::on_live_event`] take no part in
//! this: they see live events as they arrive, even while a backlog is held,
//! and never receive buffered ones.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::identifiers::HandlerId;
use crate::protocol::Event;

use super::replay::ReplayQueue;

// ============================================================================
// Types
// ============================================================================

/// Event handler callback type.
///
/// Called for each event received from the remote end.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Outcome of [`EventRegistry::on_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// Removal key of the new handler.
    pub id: HandlerId,
    /// `true` if this registration made a replay due. The caller must get
    /// [`EventRegistry::replay`] run on the dispatch task.
    pub replay_due: bool,
}

/// Whether a handler receives buffered events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Replayed,
    LiveOnly,
}

#[derive(Clone)]
struct Entry {
    id: HandlerId,
    handler: EventHandler,
    delivery: Delivery,
}

struct RegistryState {
    handlers: Vec<Entry>,
    /// Present until replayed on the dispatch task.
    backlog: Option<ReplayQueue>,
    /// A replay has been requested and not yet run.
    replay_due: bool,
}

// ============================================================================
// EventRegistry
// ============================================================================

/// Ordered list of event handlers.
///
/// Applies no filtering; owners filter by context themselves.
/// [`dispatch`](Self::dispatch) and [`replay`](Self::replay) are meant to be
/// called from a single task, the dispatch loop.
pub struct EventRegistry {
    next_id: AtomicU64,
    state: Mutex<RegistryState>,
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EventRegistry")
            .field("handlers", &state.handlers.len())
            .field("backlog", &state.backlog.as_ref().map(ReplayQueue::len))
            .field("replay_due", &state.replay_due)
            .finish()
    }
}

impl EventRegistry {
    /// Creates a registry that holds `backlog` (plus any event dispatched
    /// before a handler exists) until it is replayed.
    #[must_use]
    pub fn new(backlog: ReplayQueue) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(RegistryState {
                handlers: Vec::new(),
                backlog: Some(backlog),
                replay_due: false,
            }),
        }
    }

    /// Registers a handler that also receives buffered events.
    ///
    /// Never invokes the handler. If a backlog is held and no replay is
    /// pending yet, the returned [`Registration`] says a replay is due.
    pub fn on_event(&self, handler: EventHandler) -> Registration {
        let id = self.next_id();
        let mut state = self.state.lock();
        state.handlers.push(Entry {
            id,
            handler,
            delivery: Delivery::Replayed,
        });

        let replay_due = state.backlog.is_some() && !state.replay_due;
        if replay_due {
            state.replay_due = true;
        }

        trace!(handler = %id, replay_due, "Event handler registered");
        Registration { id, replay_due }
    }

    /// Registers a handler that only sees events dispatched from now on.
    ///
    /// It never consumes or receives buffered events, so handlers
    /// registered later with [`on_event`](Self::on_event) still get them.
    pub fn on_live_event(&self, handler: EventHandler) -> HandlerId {
        let id = self.next_id();
        self.state.lock().handlers.push(Entry {
            id,
            handler,
            delivery: Delivery::LiveOnly,
        });

        trace!(handler = %id, "Live event handler registered");
        id
    }

    /// Removes a handler.
    ///
    /// Returns `false` if it was not registered. Safe to call from inside a
    /// handler, including the handler being removed.
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut state = self.state.lock();
        let before = state.handlers.len();
        state.handlers.retain(|entry| entry.id != id);
        let removed = state.handlers.len() != before;

        if removed {
            trace!(handler = %id, "Event handler removed");
        }
        removed
    }

    /// Delivers an event to every handler registered at the time of the call.
    ///
    /// While a backlog is held the event joins it instead, and only
    /// live-only handlers see it now.
    pub fn dispatch(&self, event: &Event) {
        let snapshot: Vec<Entry> = {
            let mut state = self.state.lock();
            let RegistryState {
                handlers, backlog, ..
            } = &mut *state;

            match backlog.as_mut() {
                Some(backlog) => {
                    trace!(method = %event.method, "Replay pending, buffering event");
                    backlog.push(event.clone());
                    handlers
                        .iter()
                        .filter(|entry| entry.delivery == Delivery::LiveOnly)
                        .cloned()
                        .collect()
                }
                None => handlers.clone(),
            }
        };

        for entry in &snapshot {
            invoke(entry.id, &entry.handler, event);
        }
    }

    /// Hands the backlog, in arrival order, to every handler that takes
    /// buffered events, then drops it.
    ///
    /// Keeps the backlog when no such handler is registered. Returns the
    /// number of events replayed.
    pub fn replay(&self) -> usize {
        let (backlog, snapshot) = {
            let mut state = self.state.lock();
            state.replay_due = false;

            let snapshot: Vec<Entry> = state
                .handlers
                .iter()
                .filter(|entry| entry.delivery == Delivery::Replayed)
                .cloned()
                .collect();
            if snapshot.is_empty() {
                return 0;
            }

            match state.backlog.take() {
                Some(backlog) => (backlog, snapshot),
                None => return 0,
            }
        };

        let count = backlog.len();
        if count > 0 {
            debug!(count, handlers = snapshot.len(), "Replaying buffered events");
        }
        for event in backlog.into_events() {
            for entry in &snapshot {
                invoke(entry.id, &entry.handler, &event);
            }
        }
        count
    }

    /// Number of registered handlers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().handlers.len()
    }

    /// Returns `true` if no handler is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of events waiting to be replayed.
    #[inline]
    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.state
            .lock()
            .backlog
            .as_ref()
            .map_or(0, ReplayQueue::len)
    }

    fn next_id(&self) -> HandlerId {
        HandlerId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn invoke(id: HandlerId, handler: &EventHandler, event: &Event) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
        warn!(
            handler = %id,
            method = %event.method,
            panic = panic_message(payload.as_ref()),
            "Event handler panicked"
        );
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn event(n: u64) -> Event {
        Event::new("x.y", json!({ "v": n }))
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> EventHandler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_for = Arc::clone(&log);
        let make = move |name: &'static str| -> EventHandler {
            let log = Arc::clone(&log_for);
            Arc::new(move |e: &Event| {
                log.lock().push(format!("{name}:{}", e.params["v"]));
            })
        };
        (log, make)
    }

    fn live_registry() -> EventRegistry {
        let registry = EventRegistry::new(ReplayQueue::default());
        let registration = registry.on_event(Arc::new(|_: &Event| {}));
        registry.replay();
        registry.remove(registration.id);
        registry
    }

    #[test]
    fn test_handlers_fire_in_registration_order() {
        let registry = live_registry();
        let (log, make) = recorder();

        registry.on_event(make("a"));
        registry.on_event(make("b"));
        registry.dispatch(&event(1));

        assert_eq!(*log.lock(), vec!["a:1", "b:1"]);
    }

    #[test]
    fn test_remove_stops_only_that_handler() {
        let registry = live_registry();
        let (log, make) = recorder();

        let a = registry.on_event(make("a")).id;
        registry.on_event(make("b"));
        registry.dispatch(&event(1));

        assert!(registry.remove(a));
        assert!(!registry.remove(a));
        registry.dispatch(&event(2));

        assert_eq!(*log.lock(), vec!["a:1", "b:1", "b:2"]);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let registry = live_registry();
        let (log, make) = recorder();

        registry.on_event(Arc::new(|_: &Event| panic!("boom")));
        registry.on_event(make("after"));
        registry.dispatch(&event(1));
        registry.dispatch(&event(2));

        assert_eq!(*log.lock(), vec!["after:1", "after:2"]);
    }

    #[test]
    fn test_handler_can_remove_itself() {
        let registry = Arc::new(live_registry());
        let (log, make) = recorder();
        let slot: Arc<Mutex<Option<HandlerId>>> = Arc::new(Mutex::new(None));

        let registry_in = Arc::clone(&registry);
        let slot_in = Arc::clone(&slot);
        let log_in = Arc::clone(&log);
        let id = registry
            .on_event(Arc::new(move |e: &Event| {
                log_in.lock().push(format!("once:{}", e.params["v"]));
                if let Some(id) = *slot_in.lock() {
                    registry_in.remove(id);
                }
            }))
            .id;
        *slot.lock() = Some(id);
        registry.on_event(make("always"));

        registry.dispatch(&event(1));
        registry.dispatch(&event(2));

        assert_eq!(*log.lock(), vec!["once:1", "always:1", "always:2"]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_handler_can_register_from_inside_dispatch() {
        let registry = Arc::new(live_registry());
        let (log, make) = recorder();

        let registry_in = Arc::clone(&registry);
        let late = make("late");
        let added = Arc::new(Mutex::new(false));
        registry.on_event(Arc::new(move |_: &Event| {
            let mut added = added.lock();
            if !*added {
                *added = true;
                registry_in.on_event(Arc::clone(&late));
            }
        }));

        registry.dispatch(&event(1));
        registry.dispatch(&event(2));

        assert_eq!(*log.lock(), vec!["late:2"]);
    }

    #[test]
    fn test_backlog_replayed_only_when_asked() {
        let mut queue = ReplayQueue::new(8);
        queue.push(event(1));
        let registry = EventRegistry::new(queue);

        registry.dispatch(&event(2));
        assert_eq!(registry.backlog_len(), 2);

        let (log, make) = recorder();
        let first = registry.on_event(make("first"));
        assert!(first.replay_due);
        assert!(log.lock().is_empty());

        // Still buffered: the replay has not run yet.
        registry.dispatch(&event(3));
        assert_eq!(registry.backlog_len(), 3);
        assert!(log.lock().is_empty());

        assert_eq!(registry.replay(), 3);
        assert_eq!(registry.backlog_len(), 0);

        let second = registry.on_event(make("second"));
        assert!(!second.replay_due);
        registry.dispatch(&event(4));

        assert_eq!(
            *log.lock(),
            vec!["first:1", "first:2", "first:3", "first:4", "second:4"]
        );
    }

    #[test]
    fn test_only_first_registration_requests_replay() {
        let mut queue = ReplayQueue::new(8);
        queue.push(event(1));
        let registry = EventRegistry::new(queue);
        let (log, make) = recorder();

        assert!(registry.on_event(make("a")).replay_due);
        assert!(!registry.on_event(make("b")).replay_due);

        assert_eq!(registry.replay(), 1);
        assert_eq!(registry.replay(), 0);
        assert_eq!(*log.lock(), vec!["a:1", "b:1"]);
    }

    #[test]
    fn test_live_handler_leaves_backlog_alone() {
        let mut queue = ReplayQueue::new(8);
        queue.push(event(1));
        let registry = EventRegistry::new(queue);
        let (log, make) = recorder();

        registry.on_live_event(make("live"));
        registry.dispatch(&event(2));
        assert_eq!(registry.backlog_len(), 2);

        // Nobody to replay to yet.
        assert_eq!(registry.replay(), 0);
        assert_eq!(registry.backlog_len(), 2);

        assert!(registry.on_event(make("user")).replay_due);
        assert_eq!(registry.replay(), 2);
        registry.dispatch(&event(3));

        assert_eq!(
            *log.lock(),
            vec!["live:2", "user:1", "user:2", "live:3", "user:3"]
        );
    }

    #[test]
    fn test_no_handlers_after_removal_drops_events() {
        let registry = live_registry();
        registry.dispatch(&event(1));
        assert_eq!(registry.backlog_len(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
