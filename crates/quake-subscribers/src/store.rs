//! Subscriber persistence contract and an in-memory implementation

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use quake_model::{ArchivedQuake, EntityKind, GeoPoint, Subscriber, SubscriberId};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Membership predicate of a cached subscriber list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriberFilter {
    /// Every enabled subscriber
    AllActive,
    /// Enabled subscribers with the category toggle for the kind on
    Wants(EntityKind),
}

impl SubscriberFilter {
    /// Every list shape the cache serves
    pub const ALL: [Self; 4] = [
        Self::AllActive,
        Self::Wants(EntityKind::Cluster),
        Self::Wants(EntityKind::Earthquake),
        Self::Wants(EntityKind::Station),
    ];

    /// Whether `subscriber` belongs to this list
    #[inline]
    #[must_use]
    pub fn matches(self, subscriber: &Subscriber) -> bool {
        match self {
            Self::AllActive => subscriber.enabled,
            Self::Wants(kind) => subscriber.wants(kind),
        }
    }
}

/// Aggregate count shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CountKind {
    /// Every stored subscriber
    Total,
    /// Enabled subscribers
    Active,
}

/// Persistent subscriber table
///
/// Only the cache layer calls this; the rest of the engine goes through
/// [`SubscriberCache`](crate::SubscriberCache).
///
/// # Testing
///
/// Enable the `testing` feature to get `MockSubscriberStore` via mockall.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    /// Fetch one subscriber
    async fn get(&self, id: SubscriberId) -> Result<Option<Subscriber>, StoreError>;

    /// Insert a new subscriber
    async fn insert(&self, subscriber: Subscriber) -> Result<(), StoreError>;

    /// Replace an existing subscriber
    async fn update(&self, subscriber: Subscriber) -> Result<(), StoreError>;

    /// All subscribers matching `filter`
    async fn query(&self, filter: SubscriberFilter) -> Result<Vec<Subscriber>, StoreError>;

    /// Aggregate count
    async fn count(&self, kind: CountKind) -> Result<u64, StoreError>;

    /// Persist the summary of an archived earthquake
    async fn record_archived(&self, quake: ArchivedQuake) -> Result<(), StoreError>;

    /// Archived earthquakes within `radius_km` of `point` since `since`,
    /// newest first
    async fn recent_archived_near(
        &self,
        point: GeoPoint,
        radius_km: f64,
        since: DateTime<Utc>,
    ) -> Result<Vec<ArchivedQuake>, StoreError>;
}

/// Process-local subscriber table
///
/// Backs the simulator and tests. Counts every read so callers can observe
/// cache effectiveness, and can be switched unavailable or slowed down to
/// exercise failure paths.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    subscribers: RwLock<BTreeMap<SubscriberId, Subscriber>>,
    archived: RwLock<Vec<ArchivedQuake>>,
    reads: AtomicU64,
    unavailable: AtomicBool,
    latency: RwLock<Option<Duration>>,
}

impl InMemoryStore {
    /// Create empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create store seeded with `subscribers`
    #[must_use]
    pub fn with_subscribers(subscribers: impl IntoIterator<Item = Subscriber>) -> Self {
        let store = Self::new();
        {
            let mut table = store.subscribers.write();
            for subscriber in subscribers {
                table.insert(subscriber.id, subscriber);
            }
        }
        store
    }

    /// Number of read calls served (get, query, count)
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Make every call fail with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    /// Current row for `id`, bypassing counters and failure switches
    #[must_use]
    pub fn peek(&self, id: SubscriberId) -> Option<Subscriber> {
        self.subscribers.read().get(&id).cloned()
    }

    /// Archived summaries recorded so far
    #[must_use]
    pub fn archived(&self) -> Vec<ArchivedQuake> {
        self.archived.read().clone()
    }

    async fn enter(&self, read: bool) -> Result<(), StoreError> {
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("in-memory store switched off".into()));
        }
        if read {
            self.reads.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriberStore for InMemoryStore {
    async fn get(&self, id: SubscriberId) -> Result<Option<Subscriber>, StoreError> {
        self.enter(true).await?;
        Ok(self.subscribers.read().get(&id).cloned())
    }

    async fn insert(&self, subscriber: Subscriber) -> Result<(), StoreError> {
        self.enter(false).await?;
        let mut table = self.subscribers.write();
        if table.contains_key(&subscriber.id) {
            return Err(StoreError::AlreadyExists(subscriber.id));
        }
        table.insert(subscriber.id, subscriber);
        Ok(())
    }

    async fn update(&self, subscriber: Subscriber) -> Result<(), StoreError> {
        self.enter(false).await?;
        let mut table = self.subscribers.write();
        match table.get_mut(&subscriber.id) {
            Some(row) => {
                *row = subscriber;
                Ok(())
            }
            None => Err(StoreError::NotFound(subscriber.id)),
        }
    }

    async fn query(&self, filter: SubscriberFilter) -> Result<Vec<Subscriber>, StoreError> {
        self.enter(true).await?;
        Ok(self
            .subscribers
            .read()
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect())
    }

    async fn count(&self, kind: CountKind) -> Result<u64, StoreError> {
        self.enter(true).await?;
        let table = self.subscribers.read();
        let count = match kind {
            CountKind::Total => table.len(),
            CountKind::Active => table.values().filter(|s| s.enabled).count(),
        };
        Ok(count as u64)
    }

    async fn record_archived(&self, quake: ArchivedQuake) -> Result<(), StoreError> {
        self.enter(false).await?;
        self.archived.write().push(quake);
        Ok(())
    }

    async fn recent_archived_near(
        &self,
        point: GeoPoint,
        radius_km: f64,
        since: DateTime<Utc>,
    ) -> Result<Vec<ArchivedQuake>, StoreError> {
        self.enter(true).await?;
        let mut found: Vec<_> = self
            .archived
            .read()
            .iter()
            .filter(|q| q.origin >= since && q.epicentre.distance_km(&point) <= radius_km)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.origin.cmp(&a.origin));
        Ok(found)
    }
}
