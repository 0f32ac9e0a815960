//! Quake Subscribers
//!
//! Subscriber persistence contract and the read-through cache every other
//! part of the engine goes through.
//!
//! # Overview
//!
//! - [`SubscriberStore`]: async contract of the persistent table
//! - [`InMemoryStore`]: process-local implementation
//! - [`SubscriberCache`]: moka-backed cache with targeted invalidation
//!
//! # Example
//!
//! ```rust
//! use quake_model::{ChatId, EntityKind, GeoPoint, Subscriber, SubscriberId};
//! use quake_subscribers::{CacheConfig, InMemoryStore, SubscriberCache, SubscriberFilter};
//! use std::sync::Arc;
//!
//! let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! rt.block_on(async {
//!     let store = Arc::new(InMemoryStore::new());
//!     let cache = SubscriberCache::new(store, &CacheConfig::default());
//!
//!     let home = GeoPoint::new(43.24, 76.89);
//!     cache.create(Subscriber::new(SubscriberId(1), ChatId(10), home)).await.unwrap();
//!
//!     let quakes = cache.list(SubscriberFilter::Wants(EntityKind::Earthquake)).await.unwrap();
//!     assert_eq!(quakes.len(), 1);
//! });
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod cache;
pub mod error;
pub mod store;

pub use cache::{CacheConfig, SubscriberCache, SubscriberCounts};
pub use error::{CacheError, CacheResult, StoreError};
#[cfg(any(test, feature = "testing"))]
pub use store::MockSubscriberStore;
pub use store::{CountKind, InMemoryStore, SubscriberFilter, SubscriberStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
