//! Read-through subscriber cache using moka
//!
//! Serves by-id lookups, the four list shapes of [`SubscriberFilter`] and
//! aggregate counts. Population goes through `try_get_with`, so concurrent
//! misses on one key share a single store query.
//!
//! Lists hold ids only and resolve them through the by-id cache, re-checking
//! the filter on the way out. A write therefore only has to drop the by-id
//! entry, the lists whose membership actually flipped, and the counts it
//! moved.
//!
//! Every write bumps a generation counter before it invalidates. A load that
//! sees the generation move while it was reading the store may have cached a
//! row older than the write, so it drops what it cached and reloads.

use crate::error::{CacheError, CacheResult};
use crate::store::{CountKind, SubscriberFilter, SubscriberStore};
use chrono::{DateTime, Utc};
use moka::future::Cache;
use quake_model::{ArchivedQuake, GeoPoint, Subscriber, SubscriberId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Reloads attempted when writes keep landing during a load
const MAX_RELOADS: usize = 3;

/// Cache sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum by-id entries
    pub max_subscribers: u64,
    /// Safety-net expiry for every entry, in seconds
    pub time_to_live_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_subscribers: 100_000,
            time_to_live_secs: 600,
        }
    }
}

impl CacheConfig {
    /// Set by-id capacity
    #[must_use]
    pub fn with_max_subscribers(mut self, max: u64) -> Self {
        self.max_subscribers = max;
        self
    }

    /// Set entry expiry
    #[must_use]
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live_secs = ttl.as_secs();
        self
    }
}

/// Subscriber counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriberCounts {
    /// Every stored subscriber
    pub total: u64,
    /// Enabled subscribers
    pub active: u64,
}

/// Read-through cache in front of a [`SubscriberStore`]
#[derive(Clone)]
pub struct SubscriberCache {
    store: Arc<dyn SubscriberStore>,
    by_id: Cache<SubscriberId, Option<Subscriber>>,
    lists: Cache<SubscriberFilter, Arc<[SubscriberId]>>,
    counts: Cache<CountKind, u64>,
    generation: Arc<AtomicU64>,
}

impl SubscriberCache {
    /// Create cache over `store`
    #[must_use]
    pub fn new(store: Arc<dyn SubscriberStore>, config: &CacheConfig) -> Self {
        let ttl = Duration::from_secs(config.time_to_live_secs.max(1));
        Self {
            store,
            by_id: Cache::builder()
                .max_capacity(config.max_subscribers)
                .time_to_live(ttl)
                .build(),
            lists: Cache::builder()
                .max_capacity(SubscriberFilter::ALL.len() as u64)
                .time_to_live(ttl)
                .build(),
            counts: Cache::builder().max_capacity(2).time_to_live(ttl).build(),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscriber by id; `None` if it does not exist
    pub async fn get(&self, id: SubscriberId) -> CacheResult<Option<Subscriber>> {
        let mut reloads = 0;
        loop {
            let generation = self.generation();
            let store = Arc::clone(&self.store);
            let subscriber = self
                .by_id
                .try_get_with(id, async move { store.get(id).await })
                .await
                .map_err(CacheError::from)?;
            if self.generation() == generation {
                return Ok(subscriber);
            }

            self.by_id.invalidate(&id).await;
            reloads += 1;
            if reloads == MAX_RELOADS {
                return Ok(subscriber);
            }
        }
    }

    /// Current members of `filter`
    ///
    /// A member whose row cannot be re-read is logged and left out; the rest
    /// of the list is still returned.
    pub async fn list(&self, filter: SubscriberFilter) -> CacheResult<Vec<Subscriber>> {
        let ids = self.list_ids(filter).await?;

        let mut members = Vec::with_capacity(ids.len());
        for id in ids.iter() {
            match self.get(*id).await {
                Ok(Some(subscriber)) if filter.matches(&subscriber) => members.push(subscriber),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        subscriber = %id,
                        ?filter,
                        error = %e,
                        "Subscriber lookup failed, skipped"
                    );
                }
            }
        }
        Ok(members)
    }

    /// Enabled subscribers
    pub async fn active(&self) -> CacheResult<Vec<Subscriber>> {
        self.list(SubscriberFilter::AllActive).await
    }

    /// Aggregate counts
    pub async fn counts(&self) -> CacheResult<SubscriberCounts> {
        Ok(SubscriberCounts {
            total: self.count(CountKind::Total).await?,
            active: self.count(CountKind::Active).await?,
        })
    }

    /// Insert a new subscriber
    pub async fn create(&self, subscriber: Subscriber) -> CacheResult<()> {
        self.store.insert(subscriber.clone()).await?;
        self.invalidate_for(None, &subscriber).await;
        tracing::info!(subscriber = %subscriber.id, "Subscriber created");
        Ok(())
    }

    /// Replace an existing subscriber
    pub async fn update(&self, subscriber: Subscriber) -> CacheResult<()> {
        let previous = self
            .get(subscriber.id)
            .await?
            .ok_or(CacheError::NotFound(subscriber.id))?;
        self.store.update(subscriber.clone()).await?;
        self.invalidate_for(Some(&previous), &subscriber).await;
        tracing::debug!(subscriber = %subscriber.id, "Subscriber updated");
        Ok(())
    }

    /// Subscribe or unsubscribe
    ///
    /// Returns `false` without touching the store when the subscriber is
    /// already in the requested state.
    pub async fn set_enabled(&self, id: SubscriberId, enabled: bool) -> CacheResult<bool> {
        let previous = self.get(id).await?.ok_or(CacheError::NotFound(id))?;
        if previous.enabled == enabled {
            return Ok(false);
        }
        let next = Subscriber {
            enabled,
            ..previous.clone()
        };
        self.store.update(next.clone()).await?;
        self.invalidate_for(Some(&previous), &next).await;
        tracing::info!(subscriber = %id, enabled, "Subscriber status changed");
        Ok(true)
    }

    /// Persist an archived earthquake summary
    pub async fn record_archived(&self, quake: ArchivedQuake) -> CacheResult<()> {
        self.store.record_archived(quake).await.map_err(CacheError::from)
    }

    /// Archived earthquakes near `point` since `since`, newest first
    pub async fn recent_archived_near(
        &self,
        point: GeoPoint,
        radius_km: f64,
        since: DateTime<Utc>,
    ) -> CacheResult<Vec<ArchivedQuake>> {
        self.store
            .recent_archived_near(point, radius_km, since)
            .await
            .map_err(CacheError::from)
    }

    /// Drop every cached entry
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.by_id.invalidate_all();
        self.lists.invalidate_all();
        self.counts.invalidate_all();
    }

    #[inline]
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    async fn list_ids(&self, filter: SubscriberFilter) -> CacheResult<Arc<[SubscriberId]>> {
        let mut reloads = 0;
        loop {
            let generation = self.generation();
            let ids = self
                .lists
                .try_get_with(filter, self.populate_list(filter))
                .await
                .map_err(|e| {
                    tracing::error!(?filter, error = %e, "Subscriber list population failed");
                    CacheError::from(e)
                })?;
            if self.generation() == generation {
                return Ok(ids);
            }

            // Membership may predate a write; serve these ids once, uncached
            self.lists.invalidate(&filter).await;
            reloads += 1;
            if reloads == MAX_RELOADS {
                tracing::debug!(?filter, "Subscriber list kept changing during reload");
                return Ok(ids);
            }
        }
    }

    async fn count(&self, kind: CountKind) -> CacheResult<u64> {
        let store = Arc::clone(&self.store);
        self.counts
            .try_get_with(kind, async move { store.count(kind).await })
            .await
            .map_err(CacheError::from)
    }

    async fn populate_list(
        &self,
        filter: SubscriberFilter,
    ) -> Result<Arc<[SubscriberId]>, crate::StoreError> {
        let generation = self.generation();
        let members = self.store.query(filter).await?;
        let ids: Arc<[SubscriberId]> = members.iter().map(|s| s.id).collect();
        for subscriber in members {
            self.by_id.insert(subscriber.id, Some(subscriber)).await;
        }
        if self.generation() != generation {
            for id in ids.iter() {
                self.by_id.invalidate(id).await;
            }
        }
        tracing::debug!(?filter, members = ids.len(), "Subscriber list populated");
        Ok(ids)
    }

    async fn invalidate_for(&self, previous: Option<&Subscriber>, next: &Subscriber) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.by_id.invalidate(&next.id).await;

        for filter in SubscriberFilter::ALL {
            let was = previous.is_some_and(|p| filter.matches(p));
            if was != filter.matches(next) {
                self.lists.invalidate(&filter).await;
            }
        }

        if previous.map(|p| p.enabled) != Some(next.enabled) {
            self.counts.invalidate(&CountKind::Active).await;
        }
        if previous.is_none() {
            self.counts.invalidate(&CountKind::Total).await;
        }
    }
}

impl fmt::Debug for SubscriberCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberCache")
            .field("by_id", &self.by_id.entry_count())
            .field("lists", &self.lists.entry_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, MockSubscriberStore};
    use crate::StoreError;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use quake_model::{ChatId, EntityKind};

    fn subscriber(id: i64) -> Subscriber {
        Subscriber::new(SubscriberId(id), ChatId(id), GeoPoint::new(43.24, 76.89))
    }

    fn cache_over(store: &Arc<InMemoryStore>) -> SubscriberCache {
        let dyn_store: Arc<dyn SubscriberStore> = store.clone();
        SubscriberCache::new(dyn_store, &CacheConfig::default())
    }

    /// Reads its rows, then stalls before answering a query
    struct StalledQueries {
        inner: Arc<InMemoryStore>,
        stall: Duration,
    }

    #[async_trait]
    impl SubscriberStore for StalledQueries {
        async fn get(&self, id: SubscriberId) -> Result<Option<Subscriber>, StoreError> {
            self.inner.get(id).await
        }

        async fn insert(&self, subscriber: Subscriber) -> Result<(), StoreError> {
            self.inner.insert(subscriber).await
        }

        async fn update(&self, subscriber: Subscriber) -> Result<(), StoreError> {
            self.inner.update(subscriber).await
        }

        async fn query(&self, filter: SubscriberFilter) -> Result<Vec<Subscriber>, StoreError> {
            let rows = self.inner.query(filter).await?;
            tokio::time::sleep(self.stall).await;
            Ok(rows)
        }

        async fn count(&self, kind: CountKind) -> Result<u64, StoreError> {
            self.inner.count(kind).await
        }

        async fn record_archived(&self, quake: ArchivedQuake) -> Result<(), StoreError> {
            self.inner.record_archived(quake).await
        }

        async fn recent_archived_near(
            &self,
            point: GeoPoint,
            radius_km: f64,
            since: DateTime<Utc>,
        ) -> Result<Vec<ArchivedQuake>, StoreError> {
            self.inner.recent_archived_near(point, radius_km, since).await
        }
    }

    #[tokio::test]
    async fn list_is_served_from_cache() {
        let store = Arc::new(InMemoryStore::with_subscribers((1..=3).map(subscriber)));
        let cache = cache_over(&store);

        assert_eq!(cache.active().await.unwrap().len(), 3);
        let reads = store.reads();
        assert_eq!(cache.active().await.unwrap().len(), 3);
        // Population warmed the by-id entries too
        assert_eq!(store.reads(), reads);
        assert!(cache.get(SubscriberId(2)).await.unwrap().is_some());
        assert_eq!(store.reads(), reads);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_query() {
        let store = Arc::new(InMemoryStore::with_subscribers((1..=5).map(subscriber)));
        store.set_latency(Some(Duration::from_millis(50)));
        let cache = cache_over(&store);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.active().await.map(|l| l.len()) })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 5);
        }
        assert_eq!(store.reads(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_leaves_every_list() {
        let store = Arc::new(InMemoryStore::with_subscribers((1..=2).map(subscriber)));
        let cache = cache_over(&store);
        let quakes = SubscriberFilter::Wants(EntityKind::Earthquake);

        assert_eq!(cache.list(quakes).await.unwrap().len(), 2);
        assert_eq!(cache.counts().await.unwrap().active, 2);

        assert!(cache.set_enabled(SubscriberId(1), false).await.unwrap());
        assert!(!cache.set_enabled(SubscriberId(1), false).await.unwrap());

        assert_eq!(cache.list(quakes).await.unwrap().len(), 1);
        assert_eq!(cache.active().await.unwrap().len(), 1);
        let counts = cache.counts().await.unwrap();
        assert_eq!(counts, SubscriberCounts { total: 2, active: 1 });
        assert!(!store.peek(SubscriberId(1)).unwrap().enabled);
    }

    #[tokio::test]
    async fn threshold_edit_keeps_lists_warm() {
        let store = Arc::new(InMemoryStore::with_subscribers((1..=2).map(subscriber)));
        let cache = cache_over(&store);
        let quakes = SubscriberFilter::Wants(EntityKind::Earthquake);
        cache.list(quakes).await.unwrap();
        let reads = store.reads();

        let mut edited = subscriber(1);
        edited.quakes.max_distance_tier1_km = 20.0;
        cache.update(edited).await.unwrap();

        let members = cache.list(quakes).await.unwrap();
        // Only the edited subscriber was re-read
        assert_eq!(store.reads(), reads + 1);
        let first = members.iter().find(|s| s.id == SubscriberId(1)).unwrap();
        assert!((first.quakes.max_distance_tier1_km - 20.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn category_toggle_moves_between_lists() {
        let store = Arc::new(InMemoryStore::with_subscribers([subscriber(1)]));
        let cache = cache_over(&store);
        let clusters = SubscriberFilter::Wants(EntityKind::Cluster);
        assert!(cache.list(clusters).await.unwrap().is_empty());

        let mut edited = subscriber(1);
        edited.clusters.enabled = true;
        cache.update(edited).await.unwrap();

        assert_eq!(cache.list(clusters).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_is_visible_to_lists_and_counts() {
        let store = Arc::new(InMemoryStore::new());
        let cache = cache_over(&store);
        assert!(cache.get(SubscriberId(9)).await.unwrap().is_none());
        assert_eq!(cache.counts().await.unwrap().total, 0);
        assert!(cache.active().await.unwrap().is_empty());

        cache.create(subscriber(9)).await.unwrap();

        assert!(cache.get(SubscriberId(9)).await.unwrap().is_some());
        assert_eq!(cache.counts().await.unwrap(), SubscriberCounts { total: 1, active: 1 });
        assert_eq!(cache.active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_of_unknown_subscriber_fails() {
        let store = Arc::new(InMemoryStore::new());
        let cache = cache_over(&store);
        assert!(matches!(
            cache.update(subscriber(4)).await,
            Err(CacheError::NotFound(SubscriberId(4)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn write_during_population_is_not_overwritten() {
        let store = Arc::new(InMemoryStore::with_subscribers([subscriber(1)]));
        let cache = SubscriberCache::new(
            Arc::new(StalledQueries {
                inner: Arc::clone(&store),
                stall: Duration::from_millis(100),
            }),
            &CacheConfig::default(),
        );
        let quakes = SubscriberFilter::Wants(EntityKind::Earthquake);
        assert!(cache.get(SubscriberId(1)).await.unwrap().is_some());

        let loading = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.list(quakes).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.set_enabled(SubscriberId(1), false).await.unwrap());

        assert!(loading.await.unwrap().unwrap().is_empty());
        assert!(cache.list(quakes).await.unwrap().is_empty());
        assert!(!cache.get(SubscriberId(1)).await.unwrap().unwrap().enabled);
        // Still disabled, so nothing is written again
        assert!(!cache.set_enabled(SubscriberId(1), false).await.unwrap());
        assert!(!store.peek(SubscriberId(1)).unwrap().enabled);
    }

    #[tokio::test]
    async fn failed_member_lookup_skips_only_that_member() {
        let store = Arc::new(InMemoryStore::with_subscribers((1..=3).map(subscriber)));
        let cache = cache_over(&store);
        let quakes = SubscriberFilter::Wants(EntityKind::Earthquake);
        assert_eq!(cache.list(quakes).await.unwrap().len(), 3);

        // Keeps the list, drops the by-id entry for 1
        let mut edited = subscriber(1);
        edited.quakes.max_distance_tier1_km = 20.0;
        cache.update(edited).await.unwrap();
        store.set_unavailable(true);

        let members = cache.list(quakes).await.unwrap();
        let ids: Vec<_> = members.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![SubscriberId(2), SubscriberId(3)]);
    }

    #[tokio::test]
    async fn population_failure_is_propagated_and_not_cached() {
        let mut mock = MockSubscriberStore::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_query()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(StoreError::Unavailable("down".into())));
        mock.expect_query()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![subscriber(1)]));

        let cache = SubscriberCache::new(Arc::new(mock), &CacheConfig::default());

        let err = cache.active().await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(cache.active().await.unwrap().len(), 1);
    }

    #[derive(Debug, Clone)]
    enum Write {
        Create(i64),
        SetEnabled(i64, bool),
        Toggle(i64, EntityKind, bool),
    }

    fn write() -> impl Strategy<Value = Write> {
        prop_oneof![
            (1i64..=6).prop_map(Write::Create),
            (1i64..=6, any::<bool>()).prop_map(|(id, on)| Write::SetEnabled(id, on)),
            (1i64..=6, prop::sample::select(EntityKind::ALL.to_vec()), any::<bool>())
                .prop_map(|(id, kind, on)| Write::Toggle(id, kind, on)),
        ]
    }

    async fn apply(cache: &SubscriberCache, write: Write) {
        // Duplicate creates and writes to unknown ids are expected to fail
        let _ = match write {
            Write::Create(id) => cache.create(subscriber(id)).await,
            Write::SetEnabled(id, on) => cache.set_enabled(SubscriberId(id), on).await.map(drop),
            Write::Toggle(id, kind, on) => match cache.get(SubscriberId(id)).await {
                Ok(Some(mut s)) => {
                    match kind {
                        EntityKind::Cluster => s.clusters.enabled = on,
                        EntityKind::Earthquake => s.quakes.enabled = on,
                        EntityKind::Station => s.stations.enabled = on,
                    }
                    cache.update(s).await
                }
                _ => Ok(()),
            },
        };
    }

    fn ids_of(members: Vec<Subscriber>) -> Vec<SubscriberId> {
        let mut ids: Vec<_> = members.into_iter().map(|s| s.id).collect();
        ids.sort();
        ids
    }

    proptest! {
        #[test]
        fn lists_track_the_store_across_writes(writes in prop::collection::vec(write(), 1..24)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let result: Result<(), TestCaseError> = rt.block_on(async move {
                let store = Arc::new(InMemoryStore::with_subscribers((1..=3).map(subscriber)));
                let cache = cache_over(&store);

                for write in writes {
                    for filter in SubscriberFilter::ALL {
                        cache.list(filter).await.unwrap();
                    }
                    apply(&cache, write).await;

                    for filter in SubscriberFilter::ALL {
                        let cached = ids_of(cache.list(filter).await.unwrap());
                        let stored = ids_of(store.query(filter).await.unwrap());
                        prop_assert_eq!(cached, stored);
                    }
                    let counts = cache.counts().await.unwrap();
                    prop_assert_eq!(counts.total, store.count(CountKind::Total).await.unwrap());
                    prop_assert_eq!(counts.active, store.count(CountKind::Active).await.unwrap());
                }
                Ok(())
            });
            result?;
        }
    }
}
