//! Delivery barrier shared by a link's subscribers.
//!
//! One payload at a time is parked in the barrier. Every subscriber that
//! was registered when the payload was captured gets the same payload, and
//! the barrier releases it once all of them have acknowledged (or
//! unregistered). Each release bumps the generation.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashSet;

use crate::identifiers::SubscriberId;
use crate::protocol::LinkData;

// ============================================================================
// DeliveryBarrier
// ============================================================================

/// Payload currently held for delivery.
#[derive(Debug)]
struct Slot {
    payload: LinkData,
    /// Subscribers registered at capture time.
    expected: FxHashSet<SubscriberId>,
    acknowledged: FxHashSet<SubscriberId>,
}

impl Slot {
    fn is_complete(&self) -> bool {
        self.expected.is_subset(&self.acknowledged)
    }
}

/// Generation-counted delivery barrier.
#[derive(Debug, Default)]
pub(crate) struct DeliveryBarrier {
    generation: u64,
    slot: Option<Slot>,
}

impl DeliveryBarrier {
    /// Number of payloads released so far.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `true` while a payload is held.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.slot.is_some()
    }

    /// Parks `payload` for every subscriber in `registry`.
    ///
    /// Replaces nothing: callers capture only when no payload is pending.
    pub fn capture(&mut self, payload: LinkData, registry: &[SubscriberId]) {
        debug_assert!(self.slot.is_none(), "capture while a payload is pending");
        self.slot = Some(Slot {
            payload,
            expected: registry.iter().copied().collect(),
            acknowledged: FxHashSet::default(),
        });
    }

    /// Hands the held payload to `subscriber`.
    ///
    /// Repeated claims by the same subscriber return the same payload and
    /// count once. Claims by subscribers that were not expected return the
    /// payload without counting.
    pub fn claim(&mut self, subscriber: SubscriberId) -> Option<LinkData> {
        let slot = self.slot.as_mut()?;
        if slot.expected.contains(&subscriber) {
            slot.acknowledged.insert(subscriber);
        }
        let payload = slot.payload.clone();
        self.release_if_complete();
        Some(payload)
    }

    /// Stops waiting for `subscriber`.
    pub fn forget(&mut self, subscriber: SubscriberId) {
        if let Some(slot) = self.slot.as_mut() {
            slot.expected.remove(&subscriber);
            slot.acknowledged.remove(&subscriber);
        }
        self.release_if_complete();
    }

    fn release_if_complete(&mut self) {
        if self.slot.as_ref().is_some_and(Slot::is_complete) {
            self.slot = None;
            self.generation += 1;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
