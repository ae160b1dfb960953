//! The uniform port contract.
//!
//! Every transport (serial line, single TCP client, single TCP server,
//! pooled TCP server) implements [`Port`]. Ports never block the caller:
//! [`Port::send`] enqueues, [`Port::receive`] returns whatever is pending.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::protocol::{LinkData, PortEvent, PortSignals};

// ============================================================================
// Constants
// ============================================================================

/// Buffered notifications per port before slow listeners start lagging.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Port
// ============================================================================

/// One transport endpoint.
///
/// I/O faults inside a port are never returned from these methods. They are
/// logged, and the port reports them through [`is_open`](Self::is_open) and
/// [`PortEvent::Disconnected`].
#[async_trait]
pub trait Port: Send + Sync {
    /// Queues `data` for transmission.
    ///
    /// Multi-peer ports route by `data.identifier` and silently drop sends
    /// whose identifier matches no live peer.
    fn send(&self, data: LinkData);

    /// Takes the oldest pending payload, if any.
    fn receive(&self) -> Option<LinkData>;

    /// Returns `true` while the port can carry data.
    fn is_open(&self) -> bool;

    /// Opens or closes the port. Ports without an open/close notion ignore it.
    async fn set_open(&self, open: bool) -> Result<()>;

    /// Current line-control signals.
    fn signals(&self) -> PortSignals {
        PortSignals::ALWAYS_READY
    }

    /// Applies line-control signals. Ignored by TCP ports.
    fn set_signals(&self, _signals: PortSignals) {}

    /// Subscribes to this port's notifications.
    fn events(&self) -> broadcast::Receiver<PortEvent>;

    /// Human-readable descriptor, e.g. `TcpServer (5555)`.
    fn name(&self) -> String;

    /// Tells every worker owned by the port to stop, without waiting.
    ///
    /// Usable from `Drop`. The workers exit within one poll tick and release
    /// the port. [`shutdown`](Self::shutdown) also waits for them.
    fn request_shutdown(&self);

    /// Stops every worker owned by the port and waits for them to exit.
    async fn shutdown(&self);
}

// ============================================================================
// Helpers
// ============================================================================

/// Binds a TCP listener, mapping failure to [`Error::Bind`].
pub(crate) async fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| Error::bind(addr, source))
}
