//! Single outbound TCP connection.
//!
//! Bytes sent while disconnected are kept (oldest evicted first) and
//! written as soon as the next connection opens.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::buffer::{ByteBuffer, DEFAULT_CAPACITY, OverflowPolicy};
use crate::error::{Error, Result};
use crate::protocol::{LinkData, PortEvent};

use super::connection::{Connection, ConnectionOptions};
use super::port::{EVENT_CHANNEL_CAPACITY, Port};

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for the remote end to accept.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// TcpClient
// ============================================================================

/// TCP client port.
pub struct TcpClient {
    host: String,
    port: u16,
    /// Current (or most recent) connection.
    current: Mutex<Option<Connection>>,
    /// Bytes queued while disconnected.
    backlog: Mutex<ByteBuffer>,
    /// Set while connected. Shared with the watcher task.
    connected: Arc<AtomicBool>,
    /// Notification channel.
    events: broadcast::Sender<PortEvent>,
    /// Task waiting for the current connection to end.
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl TcpClient {
    /// Creates a client without connecting.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            host: host.into(),
            port,
            current: Mutex::new(None),
            backlog: Mutex::new(ByteBuffer::with_policy(
                DEFAULT_CAPACITY,
                OverflowPolicy::EvictOldest,
            )),
            connected: Arc::new(AtomicBool::new(false)),
            events,
            watcher: Mutex::new(None),
        })
    }

    /// Creates a client and tries to connect once.
    ///
    /// A failed attempt is logged and leaves the client closed; call
    /// [`open`](Self::open) to retry.
    pub async fn connect(host: impl Into<String>, port: u16) -> Arc<Self> {
        let client = Self::new(host, port);
        if let Err(e) = client.open().await {
            warn!(error = %e, target_addr = %client.target(), "Connection fault");
        }
        client
    }

    /// `host:port` this client connects to.
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connects if not already connected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the remote end refuses or does not
    /// answer within 5s.
    pub async fn open(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        // Reap the previous watcher, if any
        let previous = self.watcher.lock().take();
        if let Some(previous) = previous {
            let _ = previous.await;
        }

        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((self.host.as_str(), self.port)))
            .await
            .map_err(|_| Error::connection(format!("{} did not answer", self.target())))?
            .map_err(|e| Error::connection(format!("{}: {e}", self.target())))?;

        let connection =
            Connection::spawn(stream, ConnectionOptions::single_peer(self.events.clone()));
        let id = connection.id();

        let backlog = self.backlog.lock().take_all();
        if !backlog.is_empty() {
            connection.send(&backlog);
        }

        *self.current.lock() = Some(connection.clone());
        self.connected.store(true, Ordering::SeqCst);
        info!(connection_id = %id, target_addr = %self.target(), "Connect success");
        let _ = self.events.send(PortEvent::Connected(id));

        let connected = Arc::clone(&self.connected);
        let events = self.events.clone();
        let watcher = tokio::spawn(async move {
            connection.join().await;
            connected.store(false, Ordering::SeqCst);
            info!(connection_id = %id, "Disconnect");
            let _ = events.send(PortEvent::Disconnected(id));
        });
        *self.watcher.lock() = Some(watcher);

        Ok(())
    }

    /// Closes the connection and waits for it to wind down.
    pub async fn close(&self) {
        let current = self.current.lock().clone();
        if let Some(connection) = current {
            connection.terminate();
        }

        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher
            && let Err(e) = watcher.await
        {
            warn!(error = %e, "TcpClient watcher failed");
        }
    }
}

// ============================================================================
// TcpClient - Port
// ============================================================================

#[async_trait]
impl Port for TcpClient {
    fn send(&self, data: LinkData) {
        if let Some(connection) = self.current.lock().as_ref().filter(|c| c.is_alive()) {
            connection.send(&data.data);
            return;
        }
        self.backlog.lock().add(&data.data);
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

    async fn set_open(&self, open: bool) -> Result<()> {
        if open {
            self.open().await
        } else {
            self.close().await;
            Ok(())
        }
    }

    fn events(&self) -> broadcast::Receiver<PortEvent> {
        self.events.subscribe()
    }

    fn name(&self) -> String {
        format!("TcpClient ({})", self.target())
    }

    fn request_shutdown(&self) {
        if let Some(connection) = self.current.lock().as_ref() {
            connection.terminate();
        }
    }

    async fn shutdown(&self) {
        self.close().await;
        debug!(target_addr = %self.target(), "TcpClient shut down");
    }
}

// ============================================================================
// Tests
// ============================================================================
