//! Notifications raised by ports and links.
//!
//! Ports publish [`PortEvent`]s on a broadcast channel. A
//! [`Link`](crate::Link) listens to them, debounces the raw data
//! notifications and republishes [`LinkEvent`]s to its subscribers.

// ============================================================================
// Imports
// ============================================================================

use crate::identifiers::ConnectionId;

// ============================================================================
// PortEvent
// ============================================================================

/// Raw notification from a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortEvent {
    /// New bytes are ready for [`Port::receive`](crate::transport::Port::receive).
    ///
    /// Pooled servers raise one per maintenance tick, not one per payload.
    DataReceived,
    /// A peer connected.
    Connected(ConnectionId),
    /// A peer went away or was evicted.
    Disconnected(ConnectionId),
}

// ============================================================================
// LinkEvent
// ============================================================================

/// Notification delivered to every subscriber of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// A burst of data went quiet for the debounce window and can be read.
    MessageReady,
    /// A peer connected to the underlying port.
    Connected(ConnectionId),
    /// A peer disconnected from the underlying port.
    Disconnected(ConnectionId),
}
