//! Registered consumer of a link's notifications.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Weak;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

use crate::identifiers::SubscriberId;
use crate::protocol::LinkEvent;

use super::LinkShared;

// ============================================================================
// Subscription
// ============================================================================

/// A registered message-ready consumer.
///
/// While it lives, the link raises [`LinkEvent::MessageReady`] instead of
/// making readers wait out the debounce window, and the delivery barrier
/// waits for this subscriber before releasing a payload. Dropping the
/// subscription unregisters it.
pub struct Subscription {
    id: SubscriberId,
    events: broadcast::Receiver<LinkEvent>,
    link: Weak<LinkShared>,
}

impl Subscription {
    pub(super) fn new(
        id: SubscriberId,
        events: broadcast::Receiver<LinkEvent>,
        link: Weak<LinkShared>,
    ) -> Self {
        Self { id, events, link }
    }

    /// Token to pass to [`Link::receive_bytes_for`](super::Link::receive_bytes_for).
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next notification.
    ///
    /// Returns `None` once the link is gone.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(subscriber = %self.id, skipped, "Subscriber lagged, events skipped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next notification if one is already queued.
    pub fn try_recv(&mut self) -> Option<LinkEvent> {
        loop {
            match self.events.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(subscriber = %self.id, skipped, "Subscriber lagged, events skipped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(link) = self.link.upgrade() {
            link.unregister(self.id);
            debug!(subscriber = %self.id, "Subscriber unregistered");
        }
    }
}
