//! Multi-client TCP server with a bounded connection pool.
//!
//! Many peers connect to one listening port. Their inbound streams are
//! harvested into a single receive queue, tagged with each peer's
//! [`ConnectionId`], and outbound payloads are routed by that ID.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                ConnectionPool                 │
//! │                                               │
//! │  accept loop ──► admit (evict oldest if full) │
//! │                                               │
//! │  ┌─────────────────────────────────────────┐  │
//! │  │ conn-1 → Connection (own I/O task)      │  │
//! │  │ conn-2 → Connection (own I/O task)      │  │
//! │  └─────────────────────────────────────────┘  │
//! │                                               │
//! │  maintenance loop (every 10ms):               │
//! │    reap dead → harvest inbound → notify once  │
//! │                                               │
//! │  pending: [(bytes, conn-2), (bytes, conn-1)]  │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! # Eviction
//!
//! The pool never holds more than `capacity` live connections. Admitting a
//! peer into a full pool first terminates the connection with the earliest
//! connect time, whether or not it is active.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::{LinkData, PortEvent};

use super::connection::{Connection, ConnectionOptions};
use super::port::{EVENT_CHANNEL_CAPACITY, Port, bind_listener};

// ============================================================================
// Constants
// ============================================================================

/// Default maximum number of simultaneous peers.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// Interval of the reap/harvest pass.
const MAINTENANCE_INTERVAL: Duration = Duration::from_millis(10);

/// How long one accept waits before re-checking the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pause after a failed accept.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

// ============================================================================
// PoolState
// ============================================================================

/// Connection set and receive queue, guarded by one lock.
#[derive(Default)]
struct PoolState {
    /// Live connections in admission order.
    connections: Vec<Connection>,
    /// Harvested payloads, oldest first.
    pending: VecDeque<LinkData>,
}

impl PoolState {
    /// Removes connections with the earliest connect time until at most
    /// `limit` remain. Returns the removed connections.
    fn evict_down_to(&mut self, limit: usize) -> Vec<Connection> {
        let mut evicted = Vec::new();
        while self.connections.len() > limit {
            let oldest = self
                .connections
                .iter()
                .enumerate()
                .min_by_key(|(_, c)| (c.connected_at(), c.id()))
                .map(|(index, _)| index);

            match oldest {
                Some(index) => evicted.push(self.connections.remove(index)),
                None => break,
            }
        }
        evicted
    }
}

// ============================================================================
// ConnectionPool
// ============================================================================

/// Pooled TCP server port.
///
/// # Example
///
/// ```no_run
/// use linkport::{ConnectionPool, LinkData, Port};
///
/// # async fn example() -> linkport::Result<()> {
/// let pool = ConnectionPool::bind(1234, 10).await?;
///
/// while let Some(payload) = pool.receive() {
///     if let Some(id) = payload.identifier {
///         pool.send(LinkData::addressed(b"ok".to_vec(), id));
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool {
    /// Address the listener binds.
    addr: SocketAddr,

    /// Address actually bound, once listening.
    local_addr: Mutex<Option<SocketAddr>>,

    /// Maximum simultaneous connections.
    capacity: usize,

    /// Connection set and receive queue.
    state: Mutex<PoolState>,

    /// Notification channel.
    events: broadcast::Sender<PortEvent>,

    /// Set while the listener is bound and accepting.
    listening: AtomicBool,

    /// Shutdown flag.
    shutdown: AtomicBool,

    /// Accept and maintenance tasks.
    workers: Mutex<Vec<JoinHandle<()>>>,
}

// ============================================================================
// ConnectionPool - Constructors
// ============================================================================

impl ConnectionPool {
    /// Binds all interfaces on `port` and starts accepting.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `capacity` is zero
    /// - [`Error::Bind`] if the port cannot be bound
    pub async fn bind(port: u16, capacity: usize) -> Result<Arc<Self>> {
        Self::with_addr(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port), capacity).await
    }

    /// Binds `addr` and starts accepting.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `capacity` is zero
    /// - [`Error::Bind`] if the address cannot be bound
    pub async fn with_addr(addr: SocketAddr, capacity: usize) -> Result<Arc<Self>> {
        if capacity == 0 {
            return Err(Error::invalid_argument("pool capacity must be at least 1"));
        }

        let listener = bind_listener(addr).await?;
        let pool = Arc::new(Self::unstarted(addr, capacity));
        pool.mark_listening(&listener);

        let acceptor = tokio::spawn(Arc::clone(&pool).accept_loop(listener));
        let maintenance = tokio::spawn(Arc::clone(&pool).maintenance_loop());
        pool.workers.lock().extend([acceptor, maintenance]);

        Ok(pool)
    }

    /// Starts the pool without waiting for the bind.
    ///
    /// A bind failure is logged and leaves the pool permanently closed:
    /// [`is_open`](Port::is_open) stays `false` and no peer is ever accepted.
    /// A zero `capacity` is raised to 1.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(addr: SocketAddr, capacity: usize) -> Arc<Self> {
        let pool = Arc::new(Self::unstarted(addr, capacity.max(1)));

        let acceptor = tokio::spawn(Arc::clone(&pool).bind_and_accept());
        let maintenance = tokio::spawn(Arc::clone(&pool).maintenance_loop());
        pool.workers.lock().extend([acceptor, maintenance]);

        pool
    }

    fn unstarted(addr: SocketAddr, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            addr,
            local_addr: Mutex::new(None),
            capacity,
            state: Mutex::new(PoolState::default()),
            events,
            listening: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        }
    }

    fn mark_listening(&self, listener: &TcpListener) {
        let local = listener.local_addr().ok();
        *self.local_addr.lock() = local;
        self.listening.store(true, Ordering::SeqCst);
        info!(addr = ?local, capacity = self.capacity, "ConnectionPool listening");
    }
}

// ============================================================================
// ConnectionPool - Public API
// ============================================================================

impl ConnectionPool {
    /// Maximum number of simultaneous peers.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bound address, once the listener is open.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Number of live connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// IDs of live connections, oldest first.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let state = self.state.lock();
        let mut connections: Vec<_> = state
            .connections
            .iter()
            .map(|c| (c.connected_at(), c.id()))
            .collect();
        connections.sort();
        connections.into_iter().map(|(_, id)| id).collect()
    }

    /// Number of harvested payloads not yet received.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn drain_connections(&self) -> Vec<Connection> {
        let mut state = self.state.lock();
        state.pending.clear();
        state.connections.drain(..).collect()
    }

    /// Disconnects one peer. Returns `false` if no live peer has that ID.
    ///
    /// The maintenance pass reports the disconnect.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let state = self.state.lock();
        match state.connections.iter().find(|c| c.id() == id) {
            Some(connection) => {
                connection.terminate();
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// ConnectionPool - Accept Loop
// ============================================================================

impl ConnectionPool {
    async fn bind_and_accept(self: Arc<Self>) {
        match bind_listener(self.addr).await {
            Ok(listener) => {
                self.mark_listening(&listener);
                self.accept_loop(listener).await;
            }
            Err(e) => {
                error!(error = %e, "Pool listener could not be opened, pool stays closed");
            }
        }
    }

    /// Background task that accepts new peers.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!("Accept loop shutting down");
                break;
            }

            // Accept with timeout to allow checking shutdown flag
            match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, addr))) => self.admit(stream, addr),
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                    sleep(ACCEPT_RETRY_DELAY).await;
                }
                Err(_) => continue,
            }
        }

        self.listening.store(false, Ordering::SeqCst);
        debug!("Accept loop terminated");
    }

    /// Adds a freshly accepted peer, evicting the oldest one if full.
    ///
    /// The shutdown flag is checked under the state lock, so a peer accepted
    /// while the pool closes is either drained by the close or refused here.
    fn admit(&self, stream: TcpStream, addr: SocketAddr) {
        let connection = Connection::spawn(stream, ConnectionOptions::default());
        let id = connection.id();

        let mut state = self.state.lock();
        if self.shutdown.load(Ordering::SeqCst) {
            debug!(connection_id = %id, ?addr, "Pool closing, peer refused");
            connection.terminate();
            return;
        }
        for evicted in state.evict_down_to(self.capacity - 1) {
            evicted.terminate();
            info!(connection_id = %evicted.id(), "Pool full, oldest connection evicted");
            let _ = self.events.send(PortEvent::Disconnected(evicted.id()));
        }
        state.connections.push(connection);

        info!(connection_id = %id, ?addr, "Peer connected");
        let _ = self.events.send(PortEvent::Connected(id));
    }
}

// ============================================================================
// ConnectionPool - Maintenance Loop
// ============================================================================

impl ConnectionPool {
    /// Background task that reaps dead peers and harvests inbound data.
    async fn maintenance_loop(self: Arc<Self>) {
        let mut ticker = interval(MAINTENANCE_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;
            self.maintain();
        }

        debug!("Maintenance loop terminated");
    }

    /// One reap/harvest pass. Returns the number of payloads harvested.
    fn maintain(&self) -> usize {
        let mut state = self.state.lock();

        for evicted in state.evict_down_to(self.capacity) {
            evicted.terminate();
            let _ = self.events.send(PortEvent::Disconnected(evicted.id()));
        }

        state.connections.retain(|connection| {
            if connection.is_alive() {
                return true;
            }
            info!(connection_id = %connection.id(), "Peer disconnected");
            let _ = self.events.send(PortEvent::Disconnected(connection.id()));
            false
        });

        let PoolState {
            connections,
            pending,
        } = &mut *state;

        let mut harvested = 0;
        for connection in connections.iter().filter(|c| c.has_data()) {
            let payload = connection.receive();
            if payload.is_empty() {
                continue;
            }
            trace!(connection_id = %connection.id(), data = %payload.hex(), "Harvested");
            pending.push_back(payload);
            harvested += 1;
        }

        if harvested > 0 {
            let _ = self.events.send(PortEvent::DataReceived);
        }

        harvested
    }
}

// ============================================================================
// ConnectionPool - Port
// ============================================================================

#[async_trait]
impl Port for ConnectionPool {
    fn send(&self, data: LinkData) {
        let Some(id) = data.identifier else {
            trace!(len = data.len(), "Unaddressed send to pool dropped");
            return;
        };

        let state = self.state.lock();
        match state
            .connections
            .iter()
            .find(|c| c.id() == id && c.is_alive())
        {
            Some(connection) => connection.send(&data.data),
            None => trace!(connection_id = %id, "Send to unknown connection dropped"),
        }
    }

    fn receive(&self) -> Option<LinkData> {
        self.state.lock().pending.pop_front()
    }

    fn is_open(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    async fn set_open(&self, _open: bool) -> Result<()> {
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<PortEvent> {
        self.events.subscribe()
    }

    fn name(&self) -> String {
        let port = self.local_addr().map_or(self.addr.port(), |addr| addr.port());
        format!("TcpServerPool ({port})")
    }

    fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for connection in self.drain_connections() {
            connection.terminate();
        }
    }

    async fn shutdown(&self) {
        info!("ConnectionPool shutting down");

        self.shutdown.store(true, Ordering::SeqCst);

        // Acceptor first, so no peer is admitted behind the drain
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for result in join_all(workers).await {
            if let Err(e) = result {
                warn!(error = %e, "Pool worker failed");
            }
        }

        let connections = self.drain_connections();
        for connection in &connections {
            connection.terminate();
        }
        join_all(connections.iter().map(|c| c.join())).await;

        info!("ConnectionPool shutdown complete");
    }
}

// ============================================================================
// Tests
// ============================================================================
