//! Type-safe identifiers for peers and consumers.
//!
//! | Type | Wraps | Used for |
//! |------|-------|----------|
//! | [`ConnectionId`] | `u64` | One accepted or established TCP peer |
//! | [`SubscriberId`] | `Uuid` | One consumer of a [`Link`](crate::Link) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// ConnectionId
// ============================================================================

/// Next connection ID to hand out. Starts at 1 so IDs are never zero.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one TCP peer.
///
/// Allocated when the peer is accepted (or the outbound connection is made)
/// and never reused within the process. Payloads received from the peer carry
/// it, and addressed sends use it to pick the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(NonZeroU64);

impl ConnectionId {
    /// Allocates a fresh, process-unique connection ID.
    #[must_use]
    pub fn next() -> Self {
        let raw = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        // Counter starts at 1 and would need 2^64 connections to wrap.
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    /// Wraps a raw value. Returns `None` for zero.
    #[inline]
    #[must_use]
    pub const fn from_u64(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ============================================================================
// SubscriberId
// ============================================================================

/// Token identifying one consumer of a link's messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Generates a random subscriber ID.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[inline]
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// ============================================================================
// Tests
// ============================================================================
