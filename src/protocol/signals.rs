//! Line-control signal set.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

// ============================================================================
// PortSignals
// ============================================================================

/// Modem line states of a serial port.
///
/// TCP ports report [`PortSignals::ALWAYS_READY`] and ignore writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSignals {
    /// Data Set Ready.
    pub dsr: bool,
    /// Data Terminal Ready.
    pub dtr: bool,
    /// Clear To Send.
    pub cts: bool,
    /// Request To Send.
    pub rts: bool,
    /// Carrier Detect.
    pub cd: bool,
    /// Ring Indicator.
    pub ri: bool,
}

impl PortSignals {
    /// Fixed signal set reported by ports without real line control.
    pub const ALWAYS_READY: Self = Self {
        dsr: true,
        dtr: true,
        cts: true,
        rts: true,
        cd: false,
        ri: false,
    };
}
