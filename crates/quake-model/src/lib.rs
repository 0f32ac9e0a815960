//! Quake Model
//!
//! Value types shared by every part of the alert engine.
//!
//! # Overview
//!
//! - **Live objects and snapshots**: [`Earthquake`], [`Cluster`] and
//!   [`Station`] are mutated by the detection pipeline; the engine only ever
//!   sees the immutable snapshots they produce.
//! - **Subscribers**: [`Subscriber`] with per-category thresholds and
//!   attachment toggles.
//! - **Eligibility**: pure per-(snapshot, subscriber) decisions.
//! - **[`Notifiable`]**: the capability the lifecycle manager is generic over.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use quake_model::prelude::*;
//!
//! let home = GeoPoint::new(43.24, 76.89);
//! let subscriber = Subscriber::new(SubscriberId(1), ChatId(42), home);
//!
//! let quake = Earthquake::new(GeoPoint::new(43.5, 77.0), 10.0, 4.2, Utc::now());
//! let snapshot = quake.snapshot();
//!
//! // Within the default first tier (any magnitude within 100 km)
//! assert!(snapshot.eligible(&subscriber));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod eligibility;
pub mod entity;
pub mod geo;
pub mod handle;
pub mod notifiable;
pub mod subscriber;

// Re-exports
pub use eligibility::{cluster_eligible, quake_eligible, quake_trigger, station_eligible, QuakeTrigger};
pub use entity::{
    shared, ArchivedQuake, Cluster, ClusterId, ClusterSnapshot, Earthquake, EntityKind,
    QualityClass, QuakeId, QuakeSnapshot, Shared, Station, StationId, StationSnapshot,
};
pub use geo::{GeoPoint, Mmi};
pub use handle::MessageHandle;
pub use notifiable::{Notifiable, SnapshotRef};
pub use subscriber::{
    AttachmentToggles, ChatId, ClusterPreferences, ImageMode, QuakePreferences,
    StationPreferences, Subscriber, SubscriberId,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with seismic entities and subscribers
    pub use crate::{
        ClusterSnapshot, Earthquake, EntityKind, GeoPoint, MessageHandle, Notifiable,
        QuakeSnapshot, StationSnapshot, Subscriber, SubscriberId, ChatId,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
