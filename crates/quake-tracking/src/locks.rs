//! Per-entity mutual exclusion
//!
//! Evaluations and archives of the same entity must not interleave, while
//! different entities proceed in parallel. Lock slots are created on demand
//! and dropped again once nobody holds or waits for them.

use dashmap::DashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of async locks keyed by entity id
pub struct EntityLocks<K: Eq + Hash + Clone> {
    slots: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> EntityLocks<K> {
    /// Create empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &K) -> EntityGuard<K> {
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = slot.lock_owned().await;
        EntityGuard {
            key: key.clone(),
            slots: Arc::clone(&self.slots),
            guard: Some(guard),
        }
    }

    /// Number of slots currently allocated
    #[must_use]
    pub fn active(&self) -> usize {
        self.slots.len()
    }
}

impl<K: Eq + Hash + Clone> Default for EntityLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> fmt::Debug for EntityLocks<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityLocks")
            .field("active", &self.slots.len())
            .finish()
    }
}

/// Exclusive access to one entity, released on drop
pub struct EntityGuard<K: Eq + Hash + Clone> {
    key: K,
    slots: Arc<DashMap<K, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> Drop for EntityGuard<K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map still references the slot: nobody holds or waits
        self.slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

impl<K: Eq + Hash + Clone> fmt::Debug for EntityGuard<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = Arc::new(EntityLocks::<u32>::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                tokio::spawn(async move {
                    let _guard = locks.lock(&7).await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = EntityLocks::<u32>::new();
        let _a = locks.lock(&1).await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock(&2)).await;
        assert!(b.is_ok());
        assert_eq!(locks.active(), 2);
    }
}
