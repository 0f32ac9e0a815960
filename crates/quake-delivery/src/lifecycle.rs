//! Subscriber deactivation on permanent delivery failure

use crate::error::DeliveryError;
use quake_model::SubscriberId;
use quake_subscribers::{CacheError, SubscriberCache};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Disables subscribers the platform reports as unreachable
///
/// Deactivations are serialized so concurrent failures for one subscriber
/// (say, from the quake and cluster workers) write the store once.
#[derive(Debug)]
pub struct SubscriberLifecycle {
    subscribers: SubscriberCache,
    serial: Mutex<()>,
    deactivated: AtomicU64,
}

impl SubscriberLifecycle {
    /// Create handler writing through `subscribers`
    #[must_use]
    pub fn new(subscribers: SubscriberCache) -> Self {
        Self {
            subscribers,
            serial: Mutex::new(()),
            deactivated: AtomicU64::new(0),
        }
    }

    /// Disable and persist `subscriber` immediately
    ///
    /// Returns `true` if this call changed the subscriber; an already
    /// disabled or unknown subscriber is a no-op.
    pub async fn deactivate(
        &self,
        subscriber: SubscriberId,
        reason: &DeliveryError,
    ) -> Result<bool, CacheError> {
        let _serial = self.serial.lock().await;
        match self.subscribers.set_enabled(subscriber, false).await {
            Ok(true) => {
                self.deactivated.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    subscriber = %subscriber,
                    %reason,
                    "Subscriber deactivated after permanent delivery failure"
                );
                Ok(true)
            }
            Ok(false) | Err(CacheError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Subscribers deactivated by this handler
    #[must_use]
    pub fn deactivated(&self) -> u64 {
        self.deactivated.load(Ordering::Relaxed)
    }

    /// Cache the handler writes through
    #[inline]
    #[must_use]
    pub fn subscribers(&self) -> &SubscriberCache {
        &self.subscribers
    }
}
