//! Bounded queue of events awaiting their first handler.
//!
//! Events read before the ready signal (and any that arrive before a handler
//! attaches) are held here. The queue is handed to the event registry once
//! and drained into the first handler that registers, after which it is
//! dropped.

use std::collections::VecDeque;

use tracing::warn;

use crate::protocol::Event;

/// Default number of events held before the oldest is dropped.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1024;

/// Owned, bounded, FIFO event buffer.
#[derive(Debug, Clone)]
pub struct ReplayQueue {
    events: VecDeque<Event>,
    capacity: usize,
    dropped: usize,
}

impl Default for ReplayQueue {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_CAPACITY)
    }
}

impl ReplayQueue {
    /// Creates an empty queue holding at most `capacity` events (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            dropped: 0,
        }
    }

    /// Appends an event, dropping the oldest one when full.
    pub fn push(&mut self, event: Event) {
        if self.events.len() == self.capacity
            && let Some(oldest) = self.events.pop_front()
        {
            self.dropped += 1;
            warn!(
                method = %oldest.method,
                capacity = self.capacity,
                dropped = self.dropped,
                "Replay queue full, dropping oldest event"
            );
        }
        self.events.push_back(event);
    }

    /// Number of buffered events.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` when nothing is buffered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Maximum number of buffered events.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of events discarded because the queue was full.
    #[inline]
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Consumes the queue, yielding events in arrival order.
    #[must_use]
    pub fn into_events(self) -> VecDeque<Event> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn event(n: u64) -> Event {
        Event::new("x.y", json!({ "n": n }))
    }

    #[test]
    fn test_preserves_order() {
        let mut queue = ReplayQueue::new(4);
        for n in 0..3 {
            queue.push(event(n));
        }

        let ns: Vec<_> = queue
            .into_events()
            .into_iter()
            .map(|e| e.params["n"].as_u64().unwrap_or_default())
            .collect();
        assert_eq!(ns, vec![0, 1, 2]);
    }

    #[test]
    fn test_drops_oldest_when_full() {
        let mut queue = ReplayQueue::new(2);
        for n in 0..5 {
            queue.push(event(n));
        }

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 3);
        let ns: Vec<_> = queue
            .into_events()
            .into_iter()
            .map(|e| e.params["n"].as_u64().unwrap_or_default())
            .collect();
        assert_eq!(ns, vec![3, 4]);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let queue = ReplayQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.is_empty());
    }
}
