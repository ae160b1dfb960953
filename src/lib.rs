//! linkport - Transport-agnostic byte link with debounced, multi-subscriber delivery.
//!
//! This library moves raw byte streams over serial lines and TCP, and turns
//! bursts of small reads into logical messages.
//!
//! # Architecture
//!
//! The crate is layered bottom-up:
//!
//! - **Buffers**: bounded [`ByteBuffer`] with a [`OverflowPolicy`], and the
//!   per-source [`MultiplexedByteBuffer`]
//! - **Ports**: every transport implements [`Port`]; the pooled TCP server
//!   ([`ConnectionPool`]) tags each payload with the peer's [`ConnectionId`]
//!   and evicts the oldest peer when full
//! - **Link**: [`Link`] wraps one port, debounces its raw notifications and
//!   fans messages out to every [`Subscription`]
//!
//! Key design principles:
//!
//! - Sends never block: bytes are queued and written by a background task
//! - I/O faults never surface as errors; ports log them and report state
//! - Every background task polls on a short tick and is awaited on shutdown
//!
//! # Quick Start
//!
//! ```no_run
//! use linkport::{Link, LinkData, LinkEvent, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Pooled TCP server on port 1234, at most 10 peers
//!     let link = Link::from_args(["type=pool", "port=1234"]).await?;
//!     let mut subscription = link.subscribe();
//!
//!     while let Some(event) = subscription.recv().await {
//!         if event != LinkEvent::MessageReady {
//!             continue;
//!         }
//!         if let Some(message) = link.receive_bytes_for(subscription.id())
//!             && let Some(peer) = message.identifier
//!         {
//!             // Answer only the peer that spoke
//!             link.send_data(LinkData::addressed(b"OK\r\n".to_vec(), peer));
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`buffer`] | Bounded byte buffers |
//! | [`config`] | Argument and JSON configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`link`] | Debouncing, multi-subscriber façade |
//! | [`protocol`] | Payload, event and signal types |
//! | [`transport`] | Serial and TCP ports |
//!
//! # Features
//!
//! - **`serial`**: serial line support through `tokio-serial`

// ============================================================================
// Modules
// ============================================================================

/// Bounded byte buffers.
///
/// - [`ByteBuffer`] - Fixed-capacity FIFO of bytes
/// - [`MultiplexedByteBuffer`] - One buffer per source, drained in arrival order
pub mod buffer;

/// Link configuration.
///
/// Parses `key=value` arguments or JSON into a [`LinkConfig`].
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for peers and subscribers.
pub mod identifiers;

/// Debouncing, multi-subscriber façade over one port.
pub mod link;

/// Payload, notification and line-signal types.
pub mod protocol;

/// Serial and TCP transports.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Buffer types
pub use buffer::{ByteBuffer, DEFAULT_CAPACITY, MultiplexedByteBuffer, OverflowPolicy};

// Configuration types
pub use config::{LinkConfig, LinkOptions, PortConfig, SerialConfig, SerialFormat};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, SubscriberId};

// Link types
pub use link::{Link, Subscription};

// Protocol types
pub use protocol::{HexDump, LinkData, LinkEvent, PortEvent, PortSignals};

// Transport types
#[cfg(feature = "serial")]
pub use transport::SerialPort;
pub use transport::{Connection, ConnectionPool, Port, TcpClient, TcpServer, open_port};
