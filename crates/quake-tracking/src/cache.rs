//! Bounded cache of tracking records
//!
//! Keyed by entity id, bounded by either a creation-ordered capacity or a
//! sliding time-to-live. Every removal reports its cause to an optional
//! eviction listener, called after the internal lock is released.

use crate::record::TrackingRecord;
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use quake_model::Notifiable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// How a cache bounds its contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Keep at most this many records; the oldest-created goes first
    Capacity(usize),
    /// Drop records not written for this long
    SlidingTtl(Duration),
}

/// Why a record left the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionCause {
    /// The entity was archived
    Archived,
    /// The cache exceeded its capacity
    Capacity,
    /// The record was not written within the time-to-live
    Expired,
}

/// Callback invoked for every record leaving the cache
pub type EvictionListener<N> = Arc<dyn Fn(&TrackingRecord<N>, EvictionCause) + Send + Sync>;

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackingStats {
    /// Records currently held
    pub live: usize,
    /// Records ever inserted (replacements excluded)
    pub inserted: u64,
    /// Records removed by archive
    pub archived: u64,
    /// Records evicted for capacity
    pub evicted_capacity: u64,
    /// Records expired by time-to-live
    pub evicted_expired: u64,
}

struct Entry<N: Notifiable> {
    record: TrackingRecord<N>,
    written_at: Instant,
}

struct Inner<N: Notifiable> {
    records: IndexMap<N::Id, Entry<N>>,
    tombstones: IndexSet<N::Id>,
    stats: TrackingStats,
}

/// Tracking cache for one entity kind
pub struct TrackingCache<N: Notifiable> {
    policy: EvictionPolicy,
    tombstone_capacity: usize,
    inner: Mutex<Inner<N>>,
    listener: Option<EvictionListener<N>>,
}

/// Default number of archived ids remembered
pub const DEFAULT_TOMBSTONES: usize = 200;

impl<N: Notifiable> TrackingCache<N> {
    /// Create cache with the given policy
    #[must_use]
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            policy,
            tombstone_capacity: DEFAULT_TOMBSTONES,
            inner: Mutex::new(Inner {
                records: IndexMap::new(),
                tombstones: IndexSet::new(),
                stats: TrackingStats::default(),
            }),
            listener: None,
        }
    }

    /// Set how many archived ids are remembered
    #[must_use]
    pub fn with_tombstone_capacity(mut self, capacity: usize) -> Self {
        self.tombstone_capacity = capacity;
        self
    }

    /// Register eviction listener
    #[must_use]
    pub fn with_eviction_listener(
        mut self,
        listener: impl Fn(&TrackingRecord<N>, EvictionCause) + Send + Sync + 'static,
    ) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Policy this cache was built with
    #[inline]
    #[must_use]
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Clone of the record for `id`
    #[must_use]
    pub fn get(&self, id: &N::Id) -> Option<TrackingRecord<N>> {
        let (found, expired) = {
            let mut inner = self.inner.lock();
            let expired = self.take_expired(&mut inner, Instant::now());
            let found = inner.records.get(id).map(|entry| entry.record.clone());
            (found, expired)
        };
        self.notify(&expired, EvictionCause::Expired);
        found
    }

    /// Whether a record for `id` is held
    #[must_use]
    pub fn contains(&self, id: &N::Id) -> bool {
        self.get(id).is_some()
    }

    /// Insert or replace the record for its entity
    ///
    /// Under a capacity policy a replacement keeps the entry's creation
    /// position; under a sliding TTL every write refreshes the entry.
    pub fn put(&self, record: TrackingRecord<N>) {
        let now = Instant::now();
        let id = record.id();
        let mut evicted = Vec::new();
        let expired = {
            let mut inner = self.inner.lock();
            let expired = self.take_expired(&mut inner, now);

            match self.policy {
                EvictionPolicy::Capacity(capacity) => {
                    if let Some(entry) = inner.records.get_mut(&id) {
                        entry.record = record;
                        entry.written_at = now;
                    } else {
                        inner.records.insert(id, Entry { record, written_at: now });
                        inner.stats.inserted += 1;
                        while inner.records.len() > capacity {
                            let Some((_, entry)) = inner.records.shift_remove_index(0) else {
                                break;
                            };
                            inner.stats.evicted_capacity += 1;
                            evicted.push(entry.record);
                        }
                    }
                }
                EvictionPolicy::SlidingTtl(_) => {
                    let existed = inner.records.shift_remove(&id).is_some();
                    inner.records.insert(id, Entry { record, written_at: now });
                    if !existed {
                        inner.stats.inserted += 1;
                    }
                }
            }
            inner.stats.live = inner.records.len();
            expired
        };

        self.notify(&expired, EvictionCause::Expired);
        self.notify(&evicted, EvictionCause::Capacity);
    }

    /// Remove the record for `id` and remember the id as archived
    ///
    /// The id is tombstoned even when no record was held, so late updates
    /// for an entity nobody was notified about are still dropped.
    pub fn archive(&self, id: &N::Id) -> Option<TrackingRecord<N>> {
        let removed = {
            let mut inner = self.inner.lock();
            let removed = inner.records.shift_remove(id).map(|entry| entry.record);
            if removed.is_some() {
                inner.stats.archived += 1;
                inner.stats.live = inner.records.len();
            }
            if self.tombstone_capacity > 0 {
                inner.tombstones.shift_remove(id);
                inner.tombstones.insert(id.clone());
                while inner.tombstones.len() > self.tombstone_capacity {
                    inner.tombstones.shift_remove_index(0);
                }
            }
            removed
        };

        if let Some(record) = &removed {
            self.notify(std::slice::from_ref(record), EvictionCause::Archived);
        }
        removed
    }

    /// Whether `id` was archived recently enough to be remembered
    #[must_use]
    pub fn is_archived(&self, id: &N::Id) -> bool {
        self.inner.lock().tombstones.contains(id)
    }

    /// Drop expired records now, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let expired = {
            let mut inner = self.inner.lock();
            self.take_expired(&mut inner, Instant::now())
        };
        self.notify(&expired, EvictionCause::Expired);
        expired.len()
    }

    /// Number of records held
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Whether no records are held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> TrackingStats {
        self.inner.lock().stats
    }

    fn take_expired(&self, inner: &mut Inner<N>, now: Instant) -> Vec<TrackingRecord<N>> {
        let EvictionPolicy::SlidingTtl(ttl) = self.policy else {
            return Vec::new();
        };

        // Entries are kept in write order, so expired ones form a prefix
        let mut expired = Vec::new();
        while let Some((_, entry)) = inner.records.first() {
            if now.saturating_duration_since(entry.written_at) < ttl {
                break;
            }
            if let Some((_, entry)) = inner.records.shift_remove_index(0) {
                expired.push(entry.record);
            }
        }
        if !expired.is_empty() {
            inner.stats.evicted_expired += expired.len() as u64;
            inner.stats.live = inner.records.len();
        }
        expired
    }

    fn notify(&self, records: &[TrackingRecord<N>], cause: EvictionCause) {
        for record in records {
            tracing::debug!(
                kind = %N::KIND,
                id = %record.id(),
                deliveries = record.delivery_count(),
                ?cause,
                "Tracking record evicted"
            );
            if let Some(listener) = &self.listener {
                listener(record, cause);
            }
        }
    }
}

impl<N: Notifiable> fmt::Debug for TrackingCache<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingCache")
            .field("kind", &N::KIND)
            .field("policy", &self.policy)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex as SyncMutex;
    use proptest::prelude::*;
    use quake_model::{
        ChatId, ClusterId, ClusterSnapshot, GeoPoint, MessageHandle, StationId, StationSnapshot,
        SubscriberId,
    };

    fn cluster_record(id: ClusterId) -> TrackingRecord<ClusterSnapshot> {
        let snapshot = ClusterSnapshot {
            id,
            root: GeoPoint::new(0.0, 0.0),
            level: 1,
        };
        TrackingRecord::from_deliveries(
            snapshot,
            [(SubscriberId(1), MessageHandle::new(ChatId(1), 1))],
        )
        .unwrap()
    }

    fn station_record(code: &str) -> TrackingRecord<StationSnapshot> {
        let snapshot = StationSnapshot {
            id: StationId::new("KZ", code),
            location: GeoPoint::new(0.0, 0.0),
            intensity: 2_000.0,
            observed_at: Utc::now(),
        };
        TrackingRecord::from_deliveries(
            snapshot,
            [(SubscriberId(1), MessageHandle::new(ChatId(1), 1))],
        )
        .unwrap()
    }

    fn recording_listener<N: Notifiable>(
        cache: TrackingCache<N>,
    ) -> (TrackingCache<N>, Arc<SyncMutex<Vec<(N::Id, EvictionCause)>>>) {
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cache = cache.with_eviction_listener(move |record, cause| {
            sink.lock().push((record.id(), cause));
        });
        (cache, seen)
    }

    #[test]
    fn capacity_evicts_oldest_created() {
        let (cache, seen) = recording_listener(TrackingCache::new(EvictionPolicy::Capacity(2)));
        let ids: Vec<_> = (0..3).map(|_| ClusterId::new()).collect();

        cache.put(cluster_record(ids[0]));
        cache.put(cluster_record(ids[1]));
        // Rewriting the oldest does not make it younger
        cache.put(cluster_record(ids[0]));
        cache.put(cluster_record(ids[2]));

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&ids[0]));
        assert!(cache.contains(&ids[1]));
        assert!(cache.contains(&ids[2]));
        assert_eq!(*seen.lock(), vec![(ids[0], EvictionCause::Capacity)]);

        let stats = cache.stats();
        assert_eq!(stats.inserted, 3);
        assert_eq!(stats.evicted_capacity, 1);
        assert_eq!(stats.live, 2);
    }

    #[test]
    fn archive_notifies_and_tombstones() {
        let (cache, seen) = recording_listener(TrackingCache::new(EvictionPolicy::Capacity(10)));
        let id = ClusterId::new();
        cache.put(cluster_record(id));

        assert!(cache.archive(&id).is_some());
        assert!(cache.is_empty());
        assert!(cache.is_archived(&id));
        assert_eq!(*seen.lock(), vec![(id, EvictionCause::Archived)]);

        // Archiving an untracked id still tombstones it
        let other = ClusterId::new();
        assert!(cache.archive(&other).is_none());
        assert!(cache.is_archived(&other));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn tombstones_are_bounded() {
        let cache: TrackingCache<ClusterSnapshot> =
            TrackingCache::new(EvictionPolicy::Capacity(10)).with_tombstone_capacity(2);
        let ids: Vec<_> = (0..3).map(|_| ClusterId::new()).collect();
        for id in &ids {
            cache.archive(id);
        }

        assert!(!cache.is_archived(&ids[0]));
        assert!(cache.is_archived(&ids[1]));
        assert!(cache.is_archived(&ids[2]));
    }

    #[tokio::test(start_paused = true)]
    async fn sliding_ttl_expires_unwritten_records() {
        let ttl = Duration::from_secs(300);
        let (cache, seen) = recording_listener(TrackingCache::new(EvictionPolicy::SlidingTtl(ttl)));

        cache.put(station_record("AAA"));
        cache.put(station_record("BBB"));

        tokio::time::advance(Duration::from_secs(200)).await;
        // Refresh one of them
        cache.put(station_record("BBB"));

        tokio::time::advance(Duration::from_secs(150)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert!(!cache.contains(&StationId::new("KZ", "AAA")));
        assert!(cache.contains(&StationId::new("KZ", "BBB")));
        assert_eq!(
            *seen.lock(),
            vec![(StationId::new("KZ", "AAA"), EvictionCause::Expired)]
        );

        tokio::time::advance(ttl).await;
        // Reads purge too
        assert!(cache.get(&StationId::new("KZ", "BBB")).is_none());
        assert_eq!(cache.stats().evicted_expired, 2);
        assert_eq!(cache.stats().inserted, 2);
    }

    proptest! {
        #[test]
        fn capacity_keeps_most_recent_ids(capacity in 1usize..40, count in 0usize..120) {
            let cache = TrackingCache::new(EvictionPolicy::Capacity(capacity));
            let ids: Vec<_> = (0..count).map(|_| ClusterId::new()).collect();
            for id in &ids {
                cache.put(cluster_record(*id));
                prop_assert!(cache.len() <= capacity);
            }

            let kept = count.min(capacity);
            prop_assert_eq!(cache.len(), kept);
            for id in &ids[count - kept..] {
                prop_assert!(cache.contains(id));
            }
        }
    }
}
