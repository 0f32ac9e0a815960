//! Tracking records: which subscribers hold a message for an entity

use quake_model::{MessageHandle, Notifiable, SubscriberId};
use std::collections::HashMap;

/// Delivery ledger for one live entity
///
/// Holds the last snapshot that was evaluated and the handle of every
/// message sent for the entity. A record only exists once at least one
/// delivery succeeded, so [`TrackingRecord::from_deliveries`] refuses an
/// empty ledger.
#[derive(Debug, Clone)]
pub struct TrackingRecord<N: Notifiable> {
    last_snapshot: N,
    deliveries: HashMap<SubscriberId, MessageHandle>,
}

impl<N: Notifiable> TrackingRecord<N> {
    /// Create record from the first successful deliveries
    ///
    /// Returns `None` when `deliveries` is empty: nobody was notified, so
    /// there is nothing to track.
    #[must_use]
    pub fn from_deliveries(
        snapshot: N,
        deliveries: impl IntoIterator<Item = (SubscriberId, MessageHandle)>,
    ) -> Option<Self> {
        let deliveries: HashMap<_, _> = deliveries.into_iter().collect();
        if deliveries.is_empty() {
            return None;
        }
        Some(Self {
            last_snapshot: snapshot,
            deliveries,
        })
    }

    /// Entity identifier
    #[inline]
    #[must_use]
    pub fn id(&self) -> N::Id {
        self.last_snapshot.id()
    }

    /// Snapshot from the most recent evaluation
    #[inline]
    #[must_use]
    pub fn last_snapshot(&self) -> &N {
        &self.last_snapshot
    }

    /// Whether `next` differs from the last snapshot in rendered content
    #[inline]
    #[must_use]
    pub fn is_changed(&self, next: &N) -> bool {
        !self.last_snapshot.same_content(next)
    }

    /// Replace the last snapshot, returning the previous one
    pub fn replace_snapshot(&mut self, snapshot: N) -> N {
        debug_assert_eq!(snapshot.id(), self.last_snapshot.id());
        std::mem::replace(&mut self.last_snapshot, snapshot)
    }

    /// Handle of the message sent to `subscriber`, if any
    #[inline]
    #[must_use]
    pub fn handle(&self, subscriber: SubscriberId) -> Option<MessageHandle> {
        self.deliveries.get(&subscriber).copied()
    }

    /// Register a new delivery
    ///
    /// The first handle for a subscriber wins; returns `false` and keeps the
    /// existing handle if one is already registered.
    pub fn record_delivery(&mut self, subscriber: SubscriberId, handle: MessageHandle) -> bool {
        match self.deliveries.entry(subscriber) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    /// All deliveries
    pub fn deliveries(&self) -> impl Iterator<Item = (SubscriberId, MessageHandle)> + '_ {
        self.deliveries.iter().map(|(s, h)| (*s, *h))
    }

    /// Number of subscribers holding a message
    #[inline]
    #[must_use]
    pub fn delivery_count(&self) -> usize {
        self.deliveries.len()
    }
}
