//! Payload and notification types shared by every port.
//!
//! # Overview
//!
//! | Type | Direction | Purpose |
//! |------|-----------|---------|
//! | [`LinkData`] | Both | Opaque bytes plus the peer they belong to |
//! | [`PortEvent`] | Port → Link | Raw data / connect / disconnect notifications |
//! | [`LinkEvent`] | Link → consumers | Coalesced message-ready notifications |
//! | [`PortSignals`] | Both | Serial line-control state |
//!
//! No framing is defined above raw bytes. Delimiting messages is left to the
//! caller.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `data` | [`LinkData`] and the hex log adapter |
//! | `event` | Port and link notifications |
//! | `signals` | Line-control signal set |

// ============================================================================
// Submodules
// ============================================================================

/// Payload type.
pub mod data;

/// Notification types.
pub mod event;

/// Line-control signals.
pub mod signals;

// ============================================================================
// Re-exports
// ============================================================================

pub use data::{HexDump, LinkData};
pub use event::{LinkEvent, PortEvent};
pub use signals::PortSignals;
