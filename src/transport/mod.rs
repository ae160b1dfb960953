//! Byte-stream transports.
//!
//! Every transport implements [`Port`]. The pooled TCP server is the
//! centerpiece: many peers at once, each tagged with a [`ConnectionId`],
//! with bounded capacity enforced by evicting the oldest peer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   accept    ┌──────────────┐
//! │  ConnectionPool  │────────────►│  Connection  │── I/O task (10ms tick)
//! │                  │             └──────────────┘
//! │  acceptor task   │   harvest   ┌──────────────┐
//! │  maintenance task│◄────────────│  Connection  │── I/O task
//! │                  │             └──────────────┘
//! │  pending queue   │──► Port::receive()
//! └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `port` | The [`Port`] trait |
//! | `connection` | One TCP peer and its I/O loop |
//! | `pool` | Multi-peer server with oldest-first eviction |
//! | `server` | Single-peer TCP server |
//! | `client` | Single TCP client |
//! | `serial` | Serial line (feature `serial`) |
//!
//! [`ConnectionId`]: crate::identifiers::ConnectionId

// ============================================================================
// Submodules
// ============================================================================

/// Uniform port contract.
pub mod port;

/// One TCP peer and its I/O loop.
pub mod connection;

/// Pooled multi-peer TCP server.
pub mod pool;

/// Single-peer TCP server.
pub mod server;

/// Single TCP client.
pub mod client;

/// Serial line port.
#[cfg(feature = "serial")]
pub mod serial;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::TcpClient;
pub use connection::{Connection, ConnectionOptions, ConnectionState, POLL_INTERVAL};
pub use pool::{ConnectionPool, DEFAULT_MAX_CONNECTIONS};
pub use port::Port;
#[cfg(feature = "serial")]
pub use serial::SerialPort;
pub use server::{DEFAULT_TCP_PORT, TcpServer};

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use crate::config::PortConfig;
use crate::error::Result;

// ============================================================================
// Factory
// ============================================================================

/// Opens the port selected by `config`.
///
/// TCP listeners bind in the background: a busy port is logged and the
/// returned port simply never opens. A client that cannot connect is
/// returned closed.
///
/// # Errors
///
/// Returns [`Error::Serial`](crate::Error::Serial) if a serial device cannot
/// be opened, or [`Error::Config`](crate::Error::Config) if serial support is
/// not compiled in.
pub async fn open_port(config: &PortConfig) -> Result<Arc<dyn Port>> {
    let port: Arc<dyn Port> = match config {
        PortConfig::Server { port } => TcpServer::start(*port),
        PortConfig::Client { ip, port } => TcpClient::connect(ip.as_str(), *port).await,
        PortConfig::Pool {
            port,
            max_connections,
        } => ConnectionPool::start(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), *port),
            *max_connections,
        ),
        PortConfig::Serial(serial) => open_serial(serial)?,
    };
    Ok(port)
}

#[cfg(feature = "serial")]
fn open_serial(config: &crate::config::SerialConfig) -> Result<Arc<dyn Port>> {
    let port: Arc<dyn Port> = SerialPort::open(config.clone())?;
    Ok(port)
}

#[cfg(not(feature = "serial"))]
fn open_serial(config: &crate::config::SerialConfig) -> Result<Arc<dyn Port>> {
    Err(crate::error::Error::config(format!(
        "serial support not enabled, cannot open {}",
        config.device
    )))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::SerialConfig;

    #[tokio::test]
    async fn test_open_pool_from_config() {
        let port = open_port(&PortConfig::Pool {
            port: 0,
            max_connections: 2,
        })
        .await
        .expect("pool");
        assert!(port.name().starts_with("TcpServerPool ("));
        port.shutdown().await;
    }

    #[tokio::test]
    async fn test_open_unreachable_client_is_closed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let port = open_port(&PortConfig::Client {
            ip: "127.0.0.1".to_string(),
            port: addr.port(),
        })
        .await
        .expect("client");
        assert!(!port.is_open());
    }

    #[cfg(not(feature = "serial"))]
    #[tokio::test]
    async fn test_serial_without_feature_is_config_error() {
        let result = open_port(&PortConfig::Serial(SerialConfig::new("COM1"))).await;
        assert!(matches!(result, Err(crate::Error::Config { .. })));
    }

    #[cfg(feature = "serial")]
    #[tokio::test]
    async fn test_missing_serial_device_is_serial_error() {
        let result = open_port(&PortConfig::Serial(SerialConfig::new(
            "/dev/linkport-does-not-exist",
        )))
        .await;
        assert!(matches!(result, Err(crate::Error::Serial { .. })));
    }
}
