//! Single-peer TCP server.
//!
//! Listens on one port and serves one peer at a time. When the peer goes
//! away the server goes back to accepting.
//!
//! # Connection Flow
//!
//! 1. Bind to `0.0.0.0:{port}` (a failure is logged and the server stays closed)
//! 2. Accept a peer, clear stale outbound bytes, emit `Connected`
//! 3. Run the peer's I/O loop, emitting `DataReceived` per read
//! 4. Peer disconnects, emit `Disconnected`, back to 2

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::error::Result;
use crate::protocol::{LinkData, PortEvent};

use super::connection::{Connection, ConnectionOptions};
use super::port::{EVENT_CHANNEL_CAPACITY, Port, bind_listener};

// ============================================================================
// Constants
// ============================================================================

/// Default listen port for single-peer servers and clients.
pub const DEFAULT_TCP_PORT: u16 = 5555;

/// How long one accept waits before re-checking the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// TcpServer
// ============================================================================

/// TCP server port with exactly one peer at a time.
pub struct TcpServer {
    /// Address the listener binds.
    addr: SocketAddr,
    /// Address actually bound, once listening.
    local_addr: Mutex<Option<SocketAddr>>,
    /// Current (or most recent) peer.
    current: Mutex<Option<Connection>>,
    /// Set while a peer is connected.
    connected: AtomicBool,
    /// Shutdown flag.
    shutdown: AtomicBool,
    /// Notification channel.
    events: broadcast::Sender<PortEvent>,
    /// Serve task.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TcpServer {
    /// Binds all interfaces on `port` and starts serving.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`](crate::Error::Bind) if the port cannot be bound.
    pub async fn bind(port: u16) -> Result<Arc<Self>> {
        Self::with_addr(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)).await
    }

    /// Binds `addr` and starts serving.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`](crate::Error::Bind) if the address cannot be bound.
    pub async fn with_addr(addr: SocketAddr) -> Result<Arc<Self>> {
        let listener = bind_listener(addr).await?;
        let server = Arc::new(Self::unstarted(addr));
        *server.local_addr.lock() = listener.local_addr().ok();

        let worker = tokio::spawn(Arc::clone(&server).serve(listener));
        *server.worker.lock() = Some(worker);
        Ok(server)
    }

    /// Starts serving without waiting for the bind.
    ///
    /// If the port is taken the failure is logged and the server stays
    /// closed for good. Must be called from within a Tokio runtime.
    pub fn start(port: u16) -> Arc<Self> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let server = Arc::new(Self::unstarted(addr));

        let worker = tokio::spawn({
            let server = Arc::clone(&server);
            async move {
                match bind_listener(server.addr).await {
                    Ok(listener) => {
                        *server.local_addr.lock() = listener.local_addr().ok();
                        server.serve(listener).await;
                    }
                    Err(e) => error!(error = %e, "Port {} is busy, server stays closed", addr.port()),
                }
            }
        });
        *server.worker.lock() = Some(worker);
        server
    }

    fn unstarted(addr: SocketAddr) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            addr,
            local_addr: Mutex::new(None),
            current: Mutex::new(None),
            connected: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            events,
            worker: Mutex::new(None),
        }
    }

    /// Bound address, once the listener is open.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Background task: accept one peer, serve it until it leaves, repeat.
    async fn serve(self: Arc<Self>, listener: TcpListener) {
        info!(addr = ?self.local_addr(), "TcpServer listening");

        while !self.shutdown.load(Ordering::SeqCst) {
            let (stream, addr) = match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok(accepted)) => accepted,
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                    break;
                }
                Err(_) => continue,
            };

            let connection =
                Connection::spawn(stream, ConnectionOptions::single_peer(self.events.clone()));
            let id = connection.id();
            {
                let mut current = self.current.lock();
                *current = Some(connection.clone());
                // Accepted while shutting down
                if self.shutdown.load(Ordering::SeqCst) {
                    connection.terminate();
                }
            }
            self.connected.store(true, Ordering::SeqCst);

            info!(connection_id = %id, ?addr, "Peer connected");
            let _ = self.events.send(PortEvent::Connected(id));

            connection.join().await;

            self.connected.store(false, Ordering::SeqCst);
            info!(connection_id = %id, "Peer disconnected");
            let _ = self.events.send(PortEvent::Disconnected(id));
        }

        debug!("TcpServer loop terminated");
    }
}

// ============================================================================
// TcpServer - Port
// ============================================================================

#[async_trait]
impl Port for TcpServer {
    fn send(&self, data: LinkData) {
        match self.current.lock().as_ref().filter(|c| c.is_alive()) {
            Some(connection) => connection.send(&data.data),
            None => trace!(len = data.len(), "No peer connected, send dropped"),
        }
    }

    fn receive(&self) -> Option<LinkData> {
        let current = self.current.lock();
        let connection = current.as_ref()?;
        if !connection.has_data() {
            return None;
        }
        Some(connection.receive()).filter(|data| !data.is_empty())
    }

    fn is_open(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn set_open(&self, _open: bool) -> Result<()> {
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<PortEvent> {
        self.events.subscribe()
    }

    fn name(&self) -> String {
        let port = self.local_addr().map_or(self.addr.port(), |addr| addr.port());
        format!("TcpServer ({port})")
    }

    fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(connection) = self.current.lock().as_ref() {
            connection.terminate();
        }
    }

    async fn shutdown(&self) {
        self.request_shutdown();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            warn!(error = %e, "TcpServer task failed");
        }

        debug!("TcpServer shut down");
    }
}

// ============================================================================
// Tests
// ============================================================================
