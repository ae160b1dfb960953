//! Link façade over one [`Port`].
//!
//! A link coalesces bursts of raw reads into logical messages and fans
//! them out to every registered subscriber.
//!
//! # Debounce
//!
//! Each raw "data received" notification from the port restarts a single
//! timer of the link's timeout. When the port stays quiet for the whole
//! window, every subscriber gets exactly one [`LinkEvent::MessageReady`].
//!
//! Without subscribers nothing is raised; readers poll instead, and
//! [`Link::receive_bytes`] returns data only once the line has been quiet
//! for the timeout.
//!
//! # Delivery Barrier
//!
//! [`Link::receive_bytes_for`] parks one payload until every subscriber
//! registered at capture time has claimed it. All subscribers therefore see
//! the same payloads in the same order.
//!
//! # Example
//!
//! ```no_run
//! use linkport::{Link, LinkEvent, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let link = Link::from_args(["type=pool", "port=1234"]).await?;
//!     let mut subscription = link.subscribe();
//!
//!     while let Some(event) = subscription.recv().await {
//!         if event == LinkEvent::MessageReady
//!             && let Some(data) = link.receive_bytes_for(subscription.id())
//!         {
//!             println!("{}", data.hex());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

// ============================================================================
// Submodules
// ============================================================================

mod barrier;
mod subscription;

// ============================================================================
// Re-exports
// ============================================================================

pub use subscription::Subscription;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace, warn};

use crate::buffer::MultiplexedByteBuffer;
use crate::config::{LinkConfig, LinkOptions};
use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, SubscriberId};
use crate::protocol::{LinkData, LinkEvent, PortEvent};
use crate::transport::{Port, open_port};

use barrier::DeliveryBarrier;

// ============================================================================
// Constants
// ============================================================================

/// Buffered link notifications per subscriber.
const LINK_EVENT_CAPACITY: usize = 64;

// ============================================================================
// Shared State
// ============================================================================

/// Mutable link state, guarded by one lock.
struct LinkState {
    /// Coalesced payloads, one entry per source.
    rx_data: MultiplexedByteBuffer<Option<ConnectionId>>,
    /// When the port last yielded bytes.
    last_receipt: Option<Instant>,
    /// Registered subscribers, in registration order.
    registry: Vec<SubscriberId>,
    barrier: DeliveryBarrier,
}

/// State shared between the link, its debounce task and its subscriptions.
pub(crate) struct LinkShared {
    timeout: Duration,
    state: Mutex<LinkState>,
    events: broadcast::Sender<LinkEvent>,
}

impl LinkShared {
    fn has_subscribers(&self) -> bool {
        !self.state.lock().registry.is_empty()
    }

    fn unregister(&self, subscriber: SubscriberId) {
        let mut state = self.state.lock();
        state.registry.retain(|id| *id != subscriber);
        state.barrier.forget(subscriber);
    }
}

// ============================================================================
// Link
// ============================================================================

/// Debouncing, multi-subscriber façade over a [`Port`].
///
/// Dropping a link stops its debounce task and tells the port to stop.
/// [`shutdown`](Self::shutdown) does the same and waits for both.
pub struct Link {
    port: Arc<dyn Port>,
    shared: Arc<LinkShared>,
    /// Set once [`shutdown`](Self::shutdown) has run.
    closed: AtomicBool,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

// ============================================================================
// Link - Constructors
// ============================================================================

impl Link {
    /// Wraps `port` and starts the debounce task.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(port: Arc<dyn Port>, options: LinkOptions) -> Self {
        let (events, _) = broadcast::channel(LINK_EVENT_CAPACITY);
        let shared = Arc::new(LinkShared {
            timeout: options.timeout,
            state: Mutex::new(LinkState {
                rx_data: MultiplexedByteBuffer::new(options.buffer_capacity),
                last_receipt: None,
                registry: Vec::new(),
                barrier: DeliveryBarrier::default(),
            }),
            events,
        });

        let (stop_tx, stop_rx) = oneshot::channel();
        let worker = tokio::spawn(run_debounce(Arc::clone(&shared), port.events(), stop_rx));
        debug!(port = %port.name(), timeout_ms = options.timeout.as_millis(), "Link created");

        Self {
            port,
            shared,
            closed: AtomicBool::new(false),
            stop: Mutex::new(Some(stop_tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Opens the configured port and wraps it.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be opened (see
    /// [`open_port`](crate::transport::open_port)).
    pub async fn from_config(config: &LinkConfig) -> Result<Self> {
        let port = open_port(&config.port).await?;
        Ok(Self::new(port, config.options()))
    }

    /// Parses `key=value` arguments, opens the port and wraps it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) for an unusable
    /// argument set, or an error from opening the port.
    pub async fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::from_config(&LinkConfig::from_args(args)?).await
    }
}

// ============================================================================
// Link - Sending
// ============================================================================

impl Link {
    /// Sends raw bytes, unaddressed.
    pub fn send(&self, bytes: &[u8]) {
        self.port.send(LinkData::new(bytes.to_vec()));
    }

    /// Sends a string's bytes, unaddressed.
    pub fn send_str(&self, text: &str) {
        self.send(text.as_bytes());
    }

    /// Sends a payload, routed by its identifier on multi-peer ports.
    pub fn send_data(&self, data: LinkData) {
        trace!(identifier = ?data.identifier, bytes = %data.hex(), "Link send");
        self.port.send(data);
    }
}

// ============================================================================
// Link - Receiving
// ============================================================================

impl Link {
    /// Next ready payload as text, or an empty string.
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    #[must_use]
    pub fn receive(&self) -> String {
        self.receive_bytes()
            .map(|data| String::from_utf8_lossy(&data.data).into_owned())
            .unwrap_or_default()
    }

    /// Next ready payload, bypassing the delivery barrier.
    ///
    /// With no subscribers registered, returns `None` until the port has
    /// been quiet for the link's timeout.
    #[must_use]
    pub fn receive_bytes(&self) -> Option<LinkData> {
        let mut state = self.shared.state.lock();
        self.take_ready(&mut state)
    }

    /// Payload for `subscriber` through the delivery barrier.
    ///
    /// Every subscriber registered when the payload was captured receives
    /// the same payload until all of them have claimed it. Only then is the
    /// next payload captured.
    #[must_use]
    pub fn receive_bytes_for(&self, subscriber: SubscriberId) -> Option<LinkData> {
        let mut guard = self.shared.state.lock();

        if !guard.barrier.is_pending() {
            let payload = self.take_ready(&mut guard)?;
            let state = &mut *guard;
            state.barrier.capture(payload, &state.registry);
        }

        let generation = guard.barrier.generation();
        let payload = guard.barrier.claim(subscriber);
        if guard.barrier.generation() != generation {
            trace!(generation, "Payload delivered to all subscribers");
        }
        payload
    }

    /// Moves everything the port has into the coalescing buffer and takes
    /// the oldest source's bytes if the timing allows.
    fn take_ready(&self, state: &mut LinkState) -> Option<LinkData> {
        let mut received = false;
        while let Some(data) = self.port.receive() {
            state.rx_data.add(data.identifier, &data.data);
            received = true;
        }
        if received {
            state.last_receipt = Some(Instant::now());
        }

        if state.registry.is_empty()
            && state
                .last_receipt
                .is_some_and(|at| at.elapsed() < self.shared.timeout)
        {
            return None;
        }

        let (data, identifier) = state.rx_data.get()?;
        Some(LinkData { data, identifier })
    }
}

// ============================================================================
// Link - Subscriptions
// ============================================================================

impl Link {
    /// Registers a new message-ready consumer.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId::new();
        let events = self.shared.events.subscribe();
        self.shared.state.lock().registry.push(id);
        debug!(subscriber = %id, "Subscriber registered");
        Subscription::new(id, events, Arc::downgrade(&self.shared))
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().registry.len()
    }
}

// ============================================================================
// Link - Port Control
// ============================================================================

impl Link {
    /// Sets the DTR line.
    pub fn set_dtr(&self, state: bool) {
        let mut signals = self.port.signals();
        signals.dtr = state;
        self.port.set_signals(signals);
    }

    /// Sets the DSR line.
    pub fn set_dsr(&self, state: bool) {
        let mut signals = self.port.signals();
        signals.dsr = state;
        self.port.set_signals(signals);
    }

    /// Sets the RTS line.
    pub fn set_rts(&self, state: bool) {
        let mut signals = self.port.signals();
        signals.rts = state;
        self.port.set_signals(signals);
    }

    /// Returns `true` while the port can carry data.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.port.is_open()
    }

    /// Opens or closes the port.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] when reopening after
    ///   [`shutdown`](Self::shutdown)
    /// - the port's error if it cannot be opened
    pub async fn set_open(&self, open: bool) -> Result<()> {
        if open && self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        self.port.set_open(open).await
    }

    /// Port descriptor.
    #[must_use]
    pub fn port_name(&self) -> String {
        self.port.name()
    }

    /// The wrapped port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> &Arc<dyn Port> {
        &self.port
    }

    /// Stops the debounce task and shuts the port down.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.stop_worker();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            warn!(error = %e, "Link debounce task failed");
        }

        self.port.shutdown().await;
        debug!(port = %self.port.name(), "Link shut down");
    }

    fn stop_worker(&self) {
        if let Some(stop) = self.stop.lock().take() {
            let _ = stop.send(());
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Link: Port={}]", self.port.name())
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("port", &self.port.name())
            .field("timeout", &self.shared.timeout)
            .finish_non_exhaustive()
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.stop_worker();
        self.port.request_shutdown();
    }
}

// ============================================================================
// Debounce Task
// ============================================================================

/// Restarts the quiet-period timer on every raw data notification and
/// raises one `MessageReady` when it runs out.
async fn run_debounce(
    shared: Arc<LinkShared>,
    mut port_events: broadcast::Receiver<PortEvent>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        let wake_at = deadline.unwrap_or_else(Instant::now);

        tokio::select! {
            _ = &mut stop => break,

            event = port_events.recv() => match event {
                Ok(PortEvent::DataReceived) => {
                    deadline = Some(Instant::now() + shared.timeout);
                }
                Ok(PortEvent::Connected(id)) => {
                    let _ = shared.events.send(LinkEvent::Connected(id));
                }
                Ok(PortEvent::Disconnected(id)) => {
                    let _ = shared.events.send(LinkEvent::Disconnected(id));
                }
                Err(RecvError::Lagged(skipped)) => {
                    trace!(skipped, "Port notifications lagged");
                    deadline = Some(Instant::now() + shared.timeout);
                }
                Err(RecvError::Closed) => break,
            },

            () = sleep_until(wake_at), if deadline.is_some() => {
                deadline = None;
                if shared.has_subscribers() {
                    trace!("Message ready");
                    let _ = shared.events.send(LinkEvent::MessageReady);
                }
            }
        }
    }

    debug!("Link debounce task terminated");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;

    use async_trait::async_trait;
    use tokio::time::sleep;

    use crate::protocol::PortSignals;

    // ------------------------------------------------------------------------
    // In-memory port
    // ------------------------------------------------------------------------

    struct FakePort {
        inbox: Mutex<VecDeque<LinkData>>,
        sent: Mutex<Vec<LinkData>>,
        signals: Mutex<PortSignals>,
        open: AtomicBool,
        shut_down: AtomicBool,
        stop_requested: AtomicBool,
        events: broadcast::Sender<PortEvent>,
    }

    impl FakePort {
        fn new() -> Arc<Self> {
            let (events, _) = broadcast::channel(16);
            Arc::new(Self {
                inbox: Mutex::new(VecDeque::new()),
                sent: Mutex::new(Vec::new()),
                signals: Mutex::new(PortSignals::default()),
                open: AtomicBool::new(true),
                shut_down: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                events,
            })
        }

        fn push(&self, data: LinkData) {
            self.inbox.lock().push_back(data);
            let _ = self.events.send(PortEvent::DataReceived);
        }

        fn emit(&self, event: PortEvent) {
            let _ = self.events.send(event);
        }
    }

    #[async_trait]
    impl Port for FakePort {
        fn send(&self, data: LinkData) {
            self.sent.lock().push(data);
        }

        fn receive(&self) -> Option<LinkData> {
            self.inbox.lock().pop_front()
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn set_open(&self, open: bool) -> Result<()> {
            self.open.store(open, Ordering::SeqCst);
            Ok(())
        }

        fn signals(&self) -> PortSignals {
            *self.signals.lock()
        }

        fn set_signals(&self, signals: PortSignals) {
            *self.signals.lock() = signals;
        }

        fn events(&self) -> broadcast::Receiver<PortEvent> {
            self.events.subscribe()
        }

        fn name(&self) -> String {
            "Fake".to_string()
        }

        fn request_shutdown(&self) {
            self.stop_requested.store(true, Ordering::SeqCst);
        }

        async fn shutdown(&self) {
            self.shut_down.store(true, Ordering::SeqCst);
        }
    }

    fn link_over(port: &Arc<FakePort>) -> Link {
        Link::new(Arc::clone(port) as Arc<dyn Port>, LinkOptions::new())
    }

    fn text(bytes: &[u8]) -> LinkData {
        LinkData::new(bytes.to_vec())
    }

    // ------------------------------------------------------------------------
    // Debounce
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_message_ready_fires_after_quiet_period() {
        let port = FakePort::new();
        let link = link_over(&port);
        let mut subscription = link.subscribe();

        port.push(text(b"AT"));
        sleep(Duration::from_millis(50)).await;
        port.push(text(b"A\r\n"));

        sleep(Duration::from_millis(60)).await;
        assert_eq!(subscription.try_recv(), None, "timer must restart on each read");

        sleep(Duration::from_millis(50)).await;
        assert_eq!(subscription.try_recv(), Some(LinkEvent::MessageReady));
        assert_eq!(subscription.try_recv(), None, "exactly one event per burst");

        let data = link.receive_bytes_for(subscription.id()).expect("payload");
        assert_eq!(data.data, b"ATA\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_subscriber_gets_message_ready() {
        let port = FakePort::new();
        let link = link_over(&port);
        let mut first = link.subscribe();
        let mut second = link.subscribe();

        port.push(text(b"x"));
        sleep(Duration::from_millis(150)).await;

        assert_eq!(first.try_recv(), Some(LinkEvent::MessageReady));
        assert_eq!(second.try_recv(), Some(LinkEvent::MessageReady));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_event_without_subscribers() {
        let port = FakePort::new();
        let link = link_over(&port);
        let mut events = link.shared.events.subscribe();

        port.push(text(b"x"));
        sleep(Duration::from_millis(150)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_waits_for_quiet_line() {
        let port = FakePort::new();
        let link = link_over(&port);

        port.push(text(b"he"));
        assert_eq!(link.receive_bytes(), None);

        sleep(Duration::from_millis(50)).await;
        port.push(text(b"llo"));
        assert_eq!(link.receive(), "");

        sleep(Duration::from_millis(100)).await;
        assert_eq!(link.receive(), "hello");
        assert_eq!(link.receive(), "");
    }

    // ------------------------------------------------------------------------
    // Delivery barrier
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_barrier_delivers_each_payload_to_every_subscriber() {
        let port = FakePort::new();
        let link = link_over(&port);
        let subs = [link.subscribe(), link.subscribe(), link.subscribe()];

        port.push(text(b"first"));
        assert_eq!(link.receive_bytes_for(subs[2].id()), Some(text(b"first")));

        port.push(text(b"second"));
        assert_eq!(link.receive_bytes_for(subs[0].id()), Some(text(b"first")));
        assert_eq!(link.receive_bytes_for(subs[0].id()), Some(text(b"first")));
        assert_eq!(link.receive_bytes_for(subs[1].id()), Some(text(b"first")));

        assert_eq!(link.receive_bytes_for(subs[1].id()), Some(text(b"second")));
        assert_eq!(link.receive_bytes_for(subs[0].id()), Some(text(b"second")));
        assert_eq!(link.receive_bytes_for(subs[2].id()), Some(text(b"second")));

        assert_eq!(link.receive_bytes_for(subs[0].id()), None);
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_pending_payload() {
        let port = FakePort::new();
        let link = link_over(&port);
        let stays = link.subscribe();
        let leaves = link.subscribe();

        port.push(text(b"one"));
        port.push(LinkData::addressed(b"two".to_vec(), ConnectionId::next()));
        assert_eq!(link.receive_bytes_for(stays.id()), Some(text(b"one")));

        drop(leaves);
        assert_eq!(link.subscriber_count(), 1);
        assert_eq!(
            link.receive_bytes_for(stays.id()).map(|d| d.data),
            Some(b"two".to_vec())
        );
    }

    #[tokio::test]
    async fn test_late_subscriber_does_not_block_pending_payload() {
        let port = FakePort::new();
        let link = link_over(&port);
        let first = link.subscribe();
        let second = link.subscribe();

        port.push(text(b"one"));
        port.push(LinkData::addressed(b"two".to_vec(), ConnectionId::next()));
        assert_eq!(link.receive_bytes_for(first.id()), Some(text(b"one")));

        let late = link.subscribe();
        assert_eq!(link.receive_bytes_for(late.id()), Some(text(b"one")));
        assert_eq!(link.receive_bytes_for(second.id()), Some(text(b"one")));

        assert_eq!(
            link.receive_bytes_for(first.id()).map(|d| d.data),
            Some(b"two".to_vec())
        );
    }

    #[tokio::test]
    async fn test_sources_are_kept_apart() {
        let port = FakePort::new();
        let link = link_over(&port);
        let subscription = link.subscribe();
        let a = ConnectionId::next();
        let b = ConnectionId::next();

        port.push(LinkData::addressed(b"a1".to_vec(), a));
        port.push(LinkData::addressed(b"b1".to_vec(), b));
        port.push(LinkData::addressed(b"a2".to_vec(), a));

        assert_eq!(
            link.receive_bytes_for(subscription.id()),
            Some(LinkData::addressed(b"a1a2".to_vec(), a))
        );
        assert_eq!(
            link.receive_bytes_for(subscription.id()),
            Some(LinkData::addressed(b"b1".to_vec(), b))
        );
    }

    // ------------------------------------------------------------------------
    // Port passthrough
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_connection_events_are_forwarded() {
        let port = FakePort::new();
        let link = link_over(&port);
        let mut subscription = link.subscribe();
        let id = ConnectionId::next();

        port.emit(PortEvent::Connected(id));
        port.emit(PortEvent::Disconnected(id));

        assert_eq!(subscription.recv().await, Some(LinkEvent::Connected(id)));
        assert_eq!(subscription.recv().await, Some(LinkEvent::Disconnected(id)));
    }

    #[tokio::test]
    async fn test_send_and_signals() {
        let port = FakePort::new();
        let link = link_over(&port);
        let peer = ConnectionId::next();

        link.send(b"raw");
        link.send_str("text");
        link.send_data(LinkData::addressed(b"to-peer".to_vec(), peer));
        {
            let sent = port.sent.lock();
            assert_eq!(sent[0], text(b"raw"));
            assert_eq!(sent[1], text(b"text"));
            assert_eq!(sent[2].identifier, Some(peer));
        }

        link.set_dtr(true);
        link.set_rts(true);
        link.set_dsr(true);
        let signals = port.signals();
        assert!(signals.dtr && signals.rts && signals.dsr);
        link.set_rts(false);
        assert!(!port.signals().rts);
        assert!(port.signals().dtr);
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let port = FakePort::new();
        let link = link_over(&port);
        assert_eq!(link.to_string(), "[Link: Port=Fake]");
        assert_eq!(link.port_name(), "Fake");

        assert!(link.is_open());
        link.set_open(false).await.expect("close");
        assert!(!link.is_open());

        let mut subscription = link.subscribe();
        link.shutdown().await;
        assert!(port.shut_down.load(Ordering::SeqCst));

        let reopen = link.set_open(true).await;
        assert!(matches!(reopen, Err(Error::ConnectionClosed)));
        assert!(!port.is_open(), "port untouched after shutdown");
        link.set_open(false).await.expect("closing stays allowed");

        drop(link);
        assert_eq!(subscription.recv().await, None);
    }

    // ------------------------------------------------------------------------
    // End to end
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_link_over_pool_answers_sender() {
        use std::net::{IpAddr, Ipv4Addr, SocketAddr};

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpStream;
        use tokio::time::timeout;

        use crate::transport::ConnectionPool;

        let pool = ConnectionPool::with_addr(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0), 4)
            .await
            .expect("pool");
        let addr = pool.local_addr().expect("bound");
        let link = Link::new(pool, LinkOptions::new().with_timeout(Duration::from_millis(30)));
        let mut subscription = link.subscribe();

        let mut peer = TcpStream::connect(addr).await.expect("connect");
        let id = match timeout(Duration::from_secs(2), subscription.recv()).await {
            Ok(Some(LinkEvent::Connected(id))) => id,
            other => panic!("unexpected {other:?}"),
        };

        peer.write_all(b"hello").await.expect("write");
        let event = timeout(Duration::from_secs(2), subscription.recv())
            .await
            .expect("event in time");
        assert_eq!(event, Some(LinkEvent::MessageReady));

        let data = link
            .receive_bytes_for(subscription.id())
            .expect("payload");
        assert_eq!(data, LinkData::addressed(b"hello".to_vec(), id));

        link.send_data(LinkData::addressed(vec![0x41, 0x54, 0x41, 0x0A, 0x0D], id));
        let mut reply = [0u8; 5];
        timeout(Duration::from_secs(2), peer.read_exact(&mut reply))
            .await
            .expect("reply in time")
            .expect("read");
        assert_eq!(reply, [0x41, 0x54, 0x41, 0x0A, 0x0D]);

        link.shutdown().await;
    }

    #[tokio::test]
    async fn test_drop_stops_port() {
        let port = FakePort::new();
        let link = link_over(&port);

        drop(link);
        assert!(port.stop_requested.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dropped_link_releases_pool() {
        use std::net::{IpAddr, Ipv4Addr, SocketAddr};

        use tokio::io::AsyncReadExt;
        use tokio::net::TcpStream;
        use tokio::time::timeout;

        use crate::transport::ConnectionPool;

        let pool = ConnectionPool::with_addr(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0), 2)
            .await
            .expect("pool");
        let addr = pool.local_addr().expect("bound");
        let weak = Arc::downgrade(&pool);
        let link = Link::new(pool, LinkOptions::new());
        let mut subscription = link.subscribe();

        let mut peer = TcpStream::connect(addr).await.expect("connect");
        let connected = timeout(Duration::from_secs(2), subscription.recv()).await;
        assert!(matches!(connected, Ok(Some(LinkEvent::Connected(_)))));

        drop(subscription);
        drop(link);

        let mut buf = [0u8; 8];
        let read = timeout(Duration::from_secs(2), peer.read(&mut buf))
            .await
            .expect("peer closed in time");
        assert!(matches!(read, Ok(0) | Err(_)));

        timeout(Duration::from_secs(2), async {
            while weak.upgrade().is_some() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("pool workers exited");
    }
}
