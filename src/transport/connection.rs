//! One TCP peer and its I/O loop.
//!
//! A [`Connection`] owns an inbound and an outbound [`ByteBuffer`] and a
//! tokio task that moves bytes between them and the socket.
//!
//! # I/O Loop
//!
//! Each tick (at most [`POLL_INTERVAL`]) the task:
//!
//! 1. Waits for the socket to become readable, the tick to elapse, or a
//!    terminate request
//! 2. On readable: a zero-length read means the peer closed; otherwise the
//!    bytes go to the inbound buffer and the data flag is raised
//! 3. Writes and flushes the whole outbound buffer, if non-empty
//!
//! Any read or write error ends the loop. The terminate flag is checked
//! every tick, so shutdown never waits on a blocked read.
//!
//! # States
//!
//! ```text
//! Connecting → Open → Closing → Closed
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace, warn};

use crate::buffer::{ByteBuffer, DEFAULT_CAPACITY, OverflowPolicy};
use crate::identifiers::ConnectionId;
use crate::protocol::{LinkData, PortEvent};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on one I/O loop tick.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, I/O loop not yet running.
    Connecting,
    /// I/O loop running.
    Open,
    /// I/O loop exiting, socket being shut down.
    Closing,
    /// I/O loop finished.
    Closed,
}

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Buffer sizing and notification settings for a [`Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Capacity of both buffers and of a single socket read.
    pub capacity: usize,
    /// Overflow policy of the inbound buffer.
    pub inbound_policy: OverflowPolicy,
    /// Overflow policy of the outbound buffer.
    pub outbound_policy: OverflowPolicy,
    /// When set, every read raises [`PortEvent::DataReceived`] here.
    ///
    /// Single-peer ports use this. Pooled connections leave it unset and are
    /// harvested by the pool instead.
    pub notify: Option<broadcast::Sender<PortEvent>>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            inbound_policy: OverflowPolicy::Drop,
            outbound_policy: OverflowPolicy::Drop,
            notify: None,
        }
    }
}

impl ConnectionOptions {
    /// Options for the only peer of a single-connection port.
    ///
    /// The outbound buffer evicts old bytes instead of dropping new ones.
    #[must_use]
    pub fn single_peer(notify: broadcast::Sender<PortEvent>) -> Self {
        Self {
            outbound_policy: OverflowPolicy::EvictOldest,
            notify: Some(notify),
            ..Self::default()
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

/// State shared between the handle and the I/O task.
struct Shared {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    connected_at: Instant,
    state: Mutex<ConnectionState>,
    inbound: Mutex<ByteBuffer>,
    outbound: Mutex<ByteBuffer>,
    has_data: AtomicBool,
    terminated: AtomicBool,
    stop: Notify,
    notify: Option<broadcast::Sender<PortEvent>>,
}

/// Handle to one TCP peer.
///
/// Cheap to clone; clones share the same socket task and buffers.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("peer_addr", &self.shared.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// Connection - Constructor
// ============================================================================

impl Connection {
    /// Takes ownership of `stream` and starts its I/O loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(stream: TcpStream, options: ConnectionOptions) -> Self {
        let peer_addr = stream.peer_addr().ok();
        let shared = Arc::new(Shared {
            id: ConnectionId::next(),
            peer_addr,
            connected_at: Instant::now(),
            state: Mutex::new(ConnectionState::Connecting),
            inbound: Mutex::new(ByteBuffer::with_policy(
                options.capacity,
                options.inbound_policy,
            )),
            outbound: Mutex::new(ByteBuffer::with_policy(
                options.capacity,
                options.outbound_policy,
            )),
            has_data: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            stop: Notify::new(),
            notify: options.notify,
        });

        let handle = tokio::spawn(Self::run_io_loop(
            Arc::clone(&shared),
            stream,
            options.capacity,
        ));

        Self {
            shared,
            worker: Arc::new(Mutex::new(Some(handle))),
        }
    }
}

// ============================================================================
// Connection - Public API
// ============================================================================

impl Connection {
    /// Identity of this peer.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Remote address, if the OS reported one.
    #[inline]
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.peer_addr
    }

    /// When the connection was accepted.
    #[inline]
    #[must_use]
    pub fn connected_at(&self) -> Instant {
        self.shared.connected_at
    }

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Returns `false` once the loop has failed, the peer closed, or
    /// [`terminate`](Self::terminate) was called.
    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.shared.terminated.load(Ordering::SeqCst)
    }

    /// Returns `true` if bytes arrived since the last [`receive`](Self::receive).
    #[inline]
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.shared.has_data.load(Ordering::SeqCst)
    }

    /// Drains the inbound buffer, tagging the bytes with this peer's identity.
    pub fn receive(&self) -> LinkData {
        self.shared.has_data.store(false, Ordering::SeqCst);
        let bytes = self.shared.inbound.lock().take_all();
        LinkData::addressed(bytes, self.shared.id)
    }

    /// Queues `bytes` for the next write.
    pub fn send(&self, bytes: &[u8]) {
        if !self.shared.outbound.lock().add(bytes) {
            trace!(connection_id = %self.shared.id, len = bytes.len(), "Outbound buffer full, chunk dropped");
        }
    }

    /// Clears anything still waiting to be written.
    pub fn clear_outbound(&self) {
        self.shared.outbound.lock().clear();
    }

    /// Requests the loop to stop. Takes effect within one tick.
    pub fn terminate(&self) {
        self.shared.terminated.store(true, Ordering::SeqCst);
        self.shared.stop.notify_one();
    }

    /// Waits for the I/O loop to exit.
    ///
    /// Only the first caller actually waits; later callers return at once.
    pub async fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(connection_id = %self.shared.id, error = %e, "Connection task failed");
        }
    }
}

// ============================================================================
// Connection - I/O Loop
// ============================================================================

impl Connection {
    async fn run_io_loop(shared: Arc<Shared>, mut stream: TcpStream, chunk_size: usize) {
        let mut chunk = vec![0u8; chunk_size.max(1)];
        Self::set_state(&shared, ConnectionState::Open);
        debug!(connection_id = %shared.id, peer = ?shared.peer_addr, "Connection loop started");

        while !shared.terminated.load(Ordering::SeqCst) {
            tokio::select! {
                ready = stream.readable() => {
                    if let Err(e) = ready {
                        warn!(connection_id = %shared.id, error = %e, "Readiness check failed");
                        break;
                    }
                    match stream.try_read(&mut chunk) {
                        Ok(0) => {
                            debug!(connection_id = %shared.id, "Peer closed connection");
                            break;
                        }
                        Ok(n) => Self::push_inbound(&shared, &chunk[..n]),
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                        Err(e) => {
                            warn!(connection_id = %shared.id, error = %e, "Read failed");
                            break;
                        }
                    }
                }

                _ = shared.stop.notified() => {}

                _ = sleep(POLL_INTERVAL) => {}
            }

            let pending = shared.outbound.lock().take_all();
            if !pending.is_empty() {
                let written = async {
                    stream.write_all(&pending).await?;
                    stream.flush().await
                }
                .await;

                if let Err(e) = written {
                    warn!(connection_id = %shared.id, error = %e, "Write failed");
                    break;
                }
                trace!(connection_id = %shared.id, len = pending.len(), "Outbound flushed");
            }
        }

        shared.terminated.store(true, Ordering::SeqCst);
        Self::set_state(&shared, ConnectionState::Closing);
        let _ = stream.shutdown().await;
        Self::set_state(&shared, ConnectionState::Closed);

        debug!(connection_id = %shared.id, "Connection loop terminated");
    }

    fn push_inbound(shared: &Shared, bytes: &[u8]) {
        if !shared.inbound.lock().add(bytes) {
            trace!(connection_id = %shared.id, len = bytes.len(), "Inbound buffer full, chunk dropped");
            return;
        }
        shared.has_data.store(true, Ordering::SeqCst);
        trace!(connection_id = %shared.id, len = bytes.len(), "Inbound data");

        if let Some(notify) = &shared.notify {
            let _ = notify.send(PortEvent::DataReceived);
        }
    }

    fn set_state(shared: &Shared, state: ConnectionState) {
        *shared.state.lock() = state;
    }
}

// ============================================================================
// Tests
// ============================================================================
