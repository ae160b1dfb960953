//! Byte buffers keyed by peer identity.
//!
//! Keeps the inbound streams of several peers apart so bytes from two
//! connections that arrive in the same burst never interleave. Entries are
//! served in the order their identifier was first seen.

// ============================================================================
// Imports
// ============================================================================

use super::byte_buffer::{ByteBuffer, DEFAULT_CAPACITY, OverflowPolicy};

// ============================================================================
// MultiplexedByteBuffer
// ============================================================================

/// Ordered map from identifier to [`ByteBuffer`].
///
/// An entry is created by the first [`add`](Self::add) for its identifier and
/// removed by the [`get`](Self::get) that drains it. No identifier is present
/// twice.
#[derive(Debug, Clone)]
pub struct MultiplexedByteBuffer<K> {
    /// Entries in first-insertion order.
    entries: Vec<(K, ByteBuffer)>,
    /// Capacity given to each new entry.
    entry_capacity: usize,
    /// Overflow policy given to each new entry.
    policy: OverflowPolicy,
}

impl<K: PartialEq> Default for MultiplexedByteBuffer<K> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<K: PartialEq> MultiplexedByteBuffer<K> {
    /// Creates an empty buffer whose entries hold `entry_capacity` bytes each
    /// and drop chunks on overflow.
    #[inline]
    #[must_use]
    pub fn new(entry_capacity: usize) -> Self {
        Self::with_policy(entry_capacity, OverflowPolicy::Drop)
    }

    /// Creates an empty buffer with a per-entry overflow policy.
    #[inline]
    #[must_use]
    pub fn with_policy(entry_capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            entries: Vec::new(),
            entry_capacity,
            policy,
        }
    }

    /// Number of identifiers with buffered data.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no identifier has an entry.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if `identifier` has an entry.
    #[must_use]
    pub fn contains(&self, identifier: &K) -> bool {
        self.entries.iter().any(|(id, _)| id == identifier)
    }

    /// Appends `bytes` to the entry for `identifier`, creating it if needed.
    ///
    /// Empty input is ignored and does not create an entry.
    pub fn add(&mut self, identifier: K, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        match self.entries.iter_mut().find(|(id, _)| *id == identifier) {
            Some((_, buffer)) => {
                buffer.add(bytes);
            }
            None => {
                let mut buffer = ByteBuffer::with_policy(self.entry_capacity, self.policy);
                buffer.add(bytes);
                self.entries.push((identifier, buffer));
            }
        }
    }

    /// Drains the oldest entry and returns its bytes with its identifier.
    ///
    /// Returns `None` when nothing is buffered.
    pub fn get(&mut self) -> Option<(Vec<u8>, K)> {
        if self.entries.is_empty() {
            return None;
        }

        let (identifier, mut buffer) = self.entries.remove(0);
        Some((buffer.take_all(), identifier))
    }

    /// Empties the entry for `identifier` without removing it.
    pub fn clear_entry(&mut self, identifier: &K) {
        if let Some((_, buffer)) = self.entries.iter_mut().find(|(id, _)| id == identifier) {
            buffer.clear();
        }
    }

    /// Removes every entry.
    #[inline]
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_follows_first_insertion_order() {
        let mut buffer = MultiplexedByteBuffer::default();
        buffer.add(1u32, b"ab");
        buffer.add(2u32, b"cd");

        assert_eq!(buffer.get(), Some((b"ab".to_vec(), 1)));
        assert_eq!(buffer.get(), Some((b"cd".to_vec(), 2)));
        assert_eq!(buffer.get(), None);
    }

    #[test]
    fn test_streams_do_not_interleave() {
        let mut buffer = MultiplexedByteBuffer::default();
        buffer.add("a", b"1");
        buffer.add("b", b"x");
        buffer.add("a", b"2");
        buffer.add("b", b"y");

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.get(), Some((b"12".to_vec(), "a")));
        assert_eq!(buffer.get(), Some((b"xy".to_vec(), "b")));
    }

    #[test]
    fn test_insertion_order_not_recency() {
        let mut buffer = MultiplexedByteBuffer::default();
        buffer.add(1u8, b"old");
        buffer.add(2u8, b"new");
        buffer.add(1u8, b"er");

        assert_eq!(buffer.get(), Some((b"older".to_vec(), 1)));
    }

    #[test]
    fn test_drained_entry_is_recreated_at_back() {
        let mut buffer = MultiplexedByteBuffer::default();
        buffer.add(1u8, b"a");
        buffer.add(2u8, b"b");
        assert_eq!(buffer.get(), Some((b"a".to_vec(), 1)));

        buffer.add(1u8, b"c");
        assert_eq!(buffer.get(), Some((b"b".to_vec(), 2)));
        assert_eq!(buffer.get(), Some((b"c".to_vec(), 1)));
    }

    #[test]
    fn test_clear_entry_keeps_mapping() {
        let mut buffer = MultiplexedByteBuffer::default();
        buffer.add(1u8, b"abc");
        buffer.add(2u8, b"def");
        buffer.clear_entry(&1);

        assert!(buffer.contains(&1));
        assert_eq!(buffer.get(), Some((Vec::new(), 1)));
        assert_eq!(buffer.get(), Some((b"def".to_vec(), 2)));
    }

    #[test]
    fn test_clear_removes_everything() {
        let mut buffer = MultiplexedByteBuffer::default();
        buffer.add(1u8, b"abc");
        buffer.add(2u8, b"def");
        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.get(), None);
    }

    #[test]
    fn test_empty_add_creates_nothing() {
        let mut buffer = MultiplexedByteBuffer::<u8>::default();
        buffer.add(1, b"");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_entry_capacity_applies() {
        let mut buffer = MultiplexedByteBuffer::new(2);
        buffer.add(1u8, b"ab");
        buffer.add(1u8, b"c");
        assert_eq!(buffer.get(), Some((b"ab".to_vec(), 1)));

        let mut evicting = MultiplexedByteBuffer::with_policy(2, OverflowPolicy::EvictOldest);
        evicting.add(1u8, b"ab");
        evicting.add(1u8, b"c");
        assert_eq!(evicting.get(), Some((b"bc".to_vec(), 1)));
    }
}
