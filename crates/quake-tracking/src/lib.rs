//! Quake Tracking
//!
//! Remembers, per live entity, which subscribers were notified and with
//! which message, so later revisions can edit in place.
//!
//! # Overview
//!
//! - [`TrackingRecord`]: last evaluated snapshot plus subscriber to handle map
//! - [`TrackingCache`]: bounded store of records with explicit eviction
//!   causes and archive tombstones
//! - [`EntityLocks`]: per-entity async mutual exclusion
//!
//! # Example
//!
//! ```rust
//! use quake_model::{ChatId, ClusterId, ClusterSnapshot, GeoPoint, MessageHandle, SubscriberId};
//! use quake_tracking::{EvictionPolicy, TrackingCache, TrackingRecord};
//!
//! let cache = TrackingCache::new(EvictionPolicy::Capacity(50));
//! let snapshot = ClusterSnapshot { id: ClusterId::new(), root: GeoPoint::new(0.0, 0.0), level: 1 };
//! let id = snapshot.id;
//!
//! let record = TrackingRecord::from_deliveries(
//!     snapshot,
//!     [(SubscriberId(1), MessageHandle::new(ChatId(10), 555))],
//! );
//! cache.put(record.expect("one delivery"));
//!
//! assert!(cache.get(&id).is_some());
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod cache;
pub mod locks;
pub mod record;

pub use cache::{
    EvictionCause, EvictionListener, EvictionPolicy, TrackingCache, TrackingStats,
    DEFAULT_TOMBSTONES,
};
pub use locks::{EntityGuard, EntityLocks};
pub use record::TrackingRecord;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
