//! Type-safe identifiers.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//!
//! | Type | Wraps | Allocated by |
//! |------|-------|--------------|
//! | [`RequestId`] | `u64` | Correlation table, per connection, starting at 1 |
//! | [`HandlerId`] | `u64` | Event registry, per connection |
//! | [`ContextId`] | `String` | Remote end (browsing context) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ============================================================================
// RequestId
// ============================================================================

/// Correlation ID tying a request to its response.
///
/// Always positive. Serialized as a JSON number; deserialized from either a
/// number or a numeric string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(NonZeroU64);

impl RequestId {
    /// Creates a request ID.
    ///
    /// Zero is not a valid correlation ID and is clamped to 1.
    #[inline]
    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(NonZeroU64::new(value).unwrap_or(NonZeroU64::MIN))
    }

    /// Returns the raw integer value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.get())
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RequestIdVisitor;

        impl Visitor<'_> for RequestIdVisitor {
            type Value = RequestId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a positive integer or numeric string")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<RequestId, E> {
                NonZeroU64::new(value)
                    .map(RequestId)
                    .ok_or_else(|| E::custom("request id must be positive"))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<RequestId, E> {
                u64::try_from(value)
                    .map_err(|_| E::custom("request id must be positive"))
                    .and_then(|v| self.visit_u64(v))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<RequestId, E> {
                value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| E::custom("request id string is not numeric"))
                    .and_then(|v| self.visit_u64(v))
            }
        }

        deserializer.deserialize_any(RequestIdVisitor)
    }
}

// ============================================================================
// IdAllocator
// ============================================================================

/// Monotonic allocator for [`RequestId`]s, starting at 1.
#[derive(Debug)]
pub(crate) struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    #[inline]
    pub(crate) const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    #[inline]
    pub(crate) fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn next_request_id(&self) -> RequestId {
        RequestId::new(self.next())
    }
}

// ============================================================================
// HandlerId
// ============================================================================

/// Registration key for an event handler.
///
/// Returned by `on_event`; pass it back to remove the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    #[inline]
    pub(crate) const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

// ============================================================================
// ContextId
// ============================================================================

/// Browsing context identifier assigned by the remote end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    /// Creates a context ID.
    #[inline]
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the ID as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ContextId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Tests
// ============================================================================
