//! Byte buffering layer.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `byte_buffer` | Bounded FIFO with overflow policy |
//! | `multiplexed` | Per-identifier buffers served in first-seen order |

// ============================================================================
// Submodules
// ============================================================================

/// Bounded FIFO byte buffer.
pub mod byte_buffer;

/// Identifier-keyed byte buffers.
pub mod multiplexed;

// ============================================================================
// Re-exports
// ============================================================================

pub use byte_buffer::{ByteBuffer, DEFAULT_CAPACITY, OverflowPolicy};
pub use multiplexed::MultiplexedByteBuffer;
