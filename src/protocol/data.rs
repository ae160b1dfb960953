//! Payload carried across a port.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identifiers::ConnectionId;

// ============================================================================
// LinkData
// ============================================================================

/// Opaque bytes, optionally tagged with the peer they came from or go to.
///
/// Received payloads from multi-peer ports carry the sender's
/// [`ConnectionId`]. Sends to a pooled server must carry one, otherwise they
/// are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkData {
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Peer the payload belongs to, if any.
    pub identifier: Option<ConnectionId>,
}

impl LinkData {
    /// Creates an unaddressed payload.
    #[inline]
    #[must_use]
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            identifier: None,
        }
    }

    /// Creates a payload addressed to (or received from) `identifier`.
    #[inline]
    #[must_use]
    pub fn addressed(data: impl Into<Vec<u8>>, identifier: ConnectionId) -> Self {
        Self {
            data: data.into(),
            identifier: Some(identifier),
        }
    }

    /// Returns `true` if the payload has no bytes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of payload bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Hex rendering for logs, e.g. `41_54_41_`.
    #[inline]
    #[must_use]
    pub fn hex(&self) -> HexDump<'_> {
        HexDump(&self.data)
    }
}

impl From<LinkData> for Vec<u8> {
    fn from(value: LinkData) -> Self {
        value.data
    }
}

impl From<Vec<u8>> for LinkData {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// HexDump
// ============================================================================

/// Formats bytes as upper-case hex pairs, each followed by `_`.
#[derive(Debug, Clone, Copy)]
pub struct HexDump<'a>(pub &'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02X}_")?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
