//! Bounded FIFO byte buffer.
//!
//! [`ByteBuffer`] holds at most `capacity` bytes. What happens when an append
//! does not fit is decided by its [`OverflowPolicy`]:
//!
//! | Policy | Append that does not fit |
//! |--------|--------------------------|
//! | [`OverflowPolicy::Drop`] | Whole chunk discarded, contents unchanged |
//! | [`OverflowPolicy::EvictOldest`] | Oldest bytes discarded to make room |
//!
//! Nothing here blocks or performs I/O. Callers that share a buffer between
//! tasks wrap it in a lock.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Capacity used when none is given.
pub const DEFAULT_CAPACITY: usize = 1024;

// ============================================================================
// OverflowPolicy
// ============================================================================

/// Behaviour of [`ByteBuffer::add`] when the chunk does not fit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the incoming chunk entirely. No partial write.
    #[default]
    Drop,
    /// Discard bytes from the front until the chunk fits.
    ///
    /// A chunk longer than the whole capacity replaces the contents with
    /// its last `capacity` bytes.
    EvictOldest,
}

// ============================================================================
// ByteBuffer
// ============================================================================

/// Bounded FIFO byte store.
#[derive(Debug, Clone)]
pub struct ByteBuffer {
    /// Buffered bytes, oldest first.
    data: VecDeque<u8>,
    /// Maximum number of bytes held.
    capacity: usize,
    /// Overflow behaviour.
    policy: OverflowPolicy,
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ============================================================================
// ByteBuffer - Constructors
// ============================================================================

impl ByteBuffer {
    /// Creates an empty buffer that drops chunks on overflow.
    #[inline]
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, OverflowPolicy::Drop)
    }

    /// Creates an empty buffer with the given overflow policy.
    #[must_use]
    pub fn with_policy(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
            policy,
        }
    }
}

// ============================================================================
// ByteBuffer - Accessors
// ============================================================================

impl ByteBuffer {
    /// Maximum number of bytes the buffer holds.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes currently buffered.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if no bytes are buffered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes that can still be appended without overflow.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Current overflow policy.
    #[inline]
    #[must_use]
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Changes the overflow policy for later appends.
    #[inline]
    pub fn set_policy(&mut self, policy: OverflowPolicy) {
        self.policy = policy;
    }

    /// Copies the buffered bytes without consuming them.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.iter().copied().collect()
    }
}

// ============================================================================
// ByteBuffer - Operations
// ============================================================================

impl ByteBuffer {
    /// Appends `bytes` to the back of the buffer.
    ///
    /// Returns `false` when the chunk was discarded under
    /// [`OverflowPolicy::Drop`]. The caller is not required to act on it.
    pub fn add(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() <= self.remaining() {
            self.data.extend(bytes);
            return true;
        }

        match self.policy {
            OverflowPolicy::Drop => false,
            OverflowPolicy::EvictOldest => {
                if bytes.len() >= self.capacity {
                    self.data.clear();
                    self.data.extend(&bytes[bytes.len() - self.capacity..]);
                } else {
                    let evict = self.data.len() + bytes.len() - self.capacity;
                    self.data.drain(..evict);
                    self.data.extend(bytes);
                }
                true
            }
        }
    }

    /// Appends at most the first `len` bytes of `bytes`.
    ///
    /// A `len` past the end of `bytes` is clamped, so nothing outside the
    /// slice is read. Overflow follows [`add`](Self::add).
    pub fn add_prefix(&mut self, bytes: &[u8], len: usize) -> bool {
        self.add(&bytes[..len.min(bytes.len())])
    }

    /// Removes and returns up to `size` bytes from the front.
    pub fn get(&mut self, size: usize) -> Vec<u8> {
        let size = size.min(self.data.len());
        self.data.drain(..size).collect()
    }

    /// Removes and returns everything buffered.
    #[inline]
    pub fn take_all(&mut self) -> Vec<u8> {
        self.get(self.data.len())
    }

    /// Empties the buffer, keeping its allocation.
    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_add_and_get_fifo() {
        let mut buffer = ByteBuffer::new(8);
        assert!(buffer.add(b"abc"));
        assert!(buffer.add(b"de"));
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.get(2), b"ab");
        assert_eq!(buffer.take_all(), b"cde");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_add_prefix_respects_len() {
        let mut buffer = ByteBuffer::new(4);
        assert!(buffer.add_prefix(b"abcdef", 2));
        assert_eq!(buffer.len(), 2);

        // Length counts toward the free space, not the whole slice
        assert!(buffer.add_prefix(b"cdefgh", 2));
        assert!(!buffer.add_prefix(b"x", 1));
        assert_eq!(buffer.get(8), b"abcd");

        // Past the end of the slice
        assert!(buffer.add_prefix(b"yz", 100));
        assert!(buffer.add_prefix(b"ignored", 0));
        assert_eq!(buffer.take_all(), b"yz");
    }

    #[test]
    fn test_get_more_than_available() {
        let mut buffer = ByteBuffer::new(8);
        buffer.add(b"xy");
        assert_eq!(buffer.get(100), b"xy");
        assert!(buffer.get(1).is_empty());
    }

    #[test]
    fn test_drop_policy_discards_whole_chunk() {
        let mut buffer = ByteBuffer::new(4);
        buffer.add(b"abc");
        assert!(!buffer.add(b"de"));
        assert_eq!(buffer.to_vec(), b"abc");

        // Exactly filling is fine
        assert!(buffer.add(b"d"));
        assert_eq!(buffer.to_vec(), b"abcd");
        assert_eq!(buffer.remaining(), 0);
    }

    #[test]
    fn test_evict_oldest_shifts_front() {
        let mut buffer = ByteBuffer::with_policy(4, OverflowPolicy::EvictOldest);
        buffer.add(b"abc");
        assert!(buffer.add(b"de"));
        assert_eq!(buffer.to_vec(), b"bcde");
    }

    #[test]
    fn test_evict_oldest_chunk_larger_than_capacity() {
        let mut buffer = ByteBuffer::with_policy(4, OverflowPolicy::EvictOldest);
        buffer.add(b"zz");
        assert!(buffer.add(b"0123456789"));
        assert_eq!(buffer.to_vec(), b"6789");
        assert_eq!(buffer.len(), buffer.capacity());
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut buffer = ByteBuffer::new(16);
        buffer.add(b"hello");
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 16);
        assert!(buffer.add(&[0u8; 16]));
    }

    #[test]
    fn test_zero_capacity() {
        let mut dropping = ByteBuffer::new(0);
        assert!(!dropping.add(b"a"));
        assert!(dropping.add(b""));

        let mut evicting = ByteBuffer::with_policy(0, OverflowPolicy::EvictOldest);
        evicting.add(b"abc");
        assert!(evicting.is_empty());
    }

    #[test]
    fn test_default_capacity() {
        let buffer = ByteBuffer::default();
        assert_eq!(buffer.capacity(), DEFAULT_CAPACITY);
        assert_eq!(buffer.policy(), OverflowPolicy::Drop);
    }

    proptest! {
        #[test]
        fn prop_length_never_exceeds_capacity(
            capacity in 0usize..64,
            evict in any::<bool>(),
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..80), 0..20),
        ) {
            let policy = if evict { OverflowPolicy::EvictOldest } else { OverflowPolicy::Drop };
            let mut buffer = ByteBuffer::with_policy(capacity, policy);
            for chunk in &chunks {
                buffer.add(chunk);
                prop_assert!(buffer.len() <= capacity);
            }
        }

        #[test]
        fn prop_drop_overflow_leaves_contents_unchanged(
            capacity in 1usize..64,
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..40), 1..20),
        ) {
            let mut buffer = ByteBuffer::new(capacity);
            for chunk in &chunks {
                let before = buffer.to_vec();
                let fits = before.len() + chunk.len() <= capacity;
                let accepted = buffer.add(chunk);
                prop_assert_eq!(accepted, fits);
                if fits {
                    let mut expected = before.clone();
                    expected.extend_from_slice(chunk);
                    prop_assert_eq!(buffer.to_vec(), expected);
                } else {
                    prop_assert_eq!(buffer.to_vec(), before);
                }
            }
        }

        #[test]
        fn prop_drain_then_readd_matches_fresh(
            bytes in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let mut drained = ByteBuffer::new(64);
            drained.add(&bytes);
            let taken = drained.take_all();
            drained.add(&taken);

            let mut fresh = ByteBuffer::new(64);
            fresh.add(&bytes);

            prop_assert_eq!(drained.to_vec(), fresh.to_vec());
            prop_assert_eq!(drained.len(), fresh.len());
        }

        #[test]
        fn prop_evict_keeps_newest_suffix(
            capacity in 1usize..32,
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..48), 0..12),
        ) {
            let mut buffer = ByteBuffer::with_policy(capacity, OverflowPolicy::EvictOldest);
            let mut all = Vec::new();
            for chunk in &chunks {
                buffer.add(chunk);
                all.extend_from_slice(chunk);
            }
            let keep = all.len().min(capacity);
            let tail = all[all.len() - keep..].to_vec();
            prop_assert_eq!(buffer.to_vec(), tail);
        }
    }
}
