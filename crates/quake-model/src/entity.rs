//! Live seismic domain objects and their immutable snapshots
//!
//! The detection pipeline owns the live objects and mutates them in place as
//! estimates improve. Everything downstream works on snapshots copied out
//! under a read lock, so a later comparison never observes a half-written
//! update.

use crate::geo::GeoPoint;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Live object shared between the detection pipeline and event consumers
pub type Shared<T> = Arc<RwLock<T>>;

/// Wrap a live object for sharing
#[inline]
#[must_use]
pub fn shared<T>(value: T) -> Shared<T> {
    Arc::new(RwLock::new(value))
}

/// Kind of entity that can trigger a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Detection cluster (early, unlocated)
    Cluster,
    /// Located earthquake estimate
    Earthquake,
    /// High intensity at a single station
    Station,
}

impl EntityKind {
    /// All kinds, in processing order
    pub const ALL: [EntityKind; 3] = [EntityKind::Cluster, EntityKind::Earthquake, EntityKind::Station];

    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Cluster => "cluster",
            EntityKind::Earthquake => "earthquake",
            EntityKind::Station => "station",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Earthquake identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QuakeId(pub Uuid);

impl QuakeId {
    /// Generate new identifier
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QuakeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QuakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cluster identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterId(pub Uuid);

impl ClusterId {
    /// Generate new identifier
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClusterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Station identifier (`NETWORK.STATION`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StationId(pub String);

impl StationId {
    /// Create identifier from network and station codes
    #[must_use]
    pub fn new(network: &str, station: &str) -> Self {
        Self(format!("{network}.{station}"))
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location quality class, best (S) to worst (D)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum QualityClass {
    /// Superb
    S,
    /// Good
    A,
    /// Fair
    B,
    /// Poor
    C,
    /// Unreliable
    #[default]
    D,
}

impl fmt::Display for QualityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityClass::S => "S",
            QualityClass::A => "A",
            QualityClass::B => "B",
            QualityClass::C => "C",
            QualityClass::D => "D",
        };
        f.write_str(s)
    }
}

/// Live earthquake estimate, revised in place by the locator
#[derive(Debug, Clone)]
pub struct Earthquake {
    pub id: QuakeId,
    pub epicentre: GeoPoint,
    pub depth_km: f64,
    pub magnitude: f64,
    pub region: String,
    pub quality: QualityClass,
    pub origin: DateTime<Utc>,
    /// Incremented on every relocation
    pub revision: u32,
    /// Stations contributing to the current solution
    pub station_count: usize,
    pub cluster: Option<ClusterId>,
}

impl Earthquake {
    /// Create first revision of an estimate
    #[must_use]
    pub fn new(epicentre: GeoPoint, depth_km: f64, magnitude: f64, origin: DateTime<Utc>) -> Self {
        Self {
            id: QuakeId::new(),
            epicentre,
            depth_km,
            magnitude,
            region: String::from("Unknown region"),
            quality: QualityClass::default(),
            origin,
            revision: 1,
            station_count: 0,
            cluster: None,
        }
    }

    /// With region label
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// With quality class
    #[must_use]
    pub fn with_quality(mut self, quality: QualityClass) -> Self {
        self.quality = quality;
        self
    }

    /// Apply a relocation and bump the revision
    pub fn revise(&mut self, update: impl FnOnce(&mut Self)) {
        update(self);
        self.revision += 1;
    }

    /// Copy out the fields that drive eligibility and rendering
    #[must_use]
    pub fn snapshot(&self) -> QuakeSnapshot {
        QuakeSnapshot {
            id: self.id,
            epicentre: self.epicentre,
            depth_km: self.depth_km,
            magnitude: self.magnitude,
            region: self.region.clone(),
            quality: self.quality,
            origin: self.origin,
            revision: self.revision,
        }
    }
}

/// Immutable view of an earthquake at one revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuakeSnapshot {
    pub id: QuakeId,
    pub epicentre: GeoPoint,
    pub depth_km: f64,
    pub magnitude: f64,
    pub region: String,
    pub quality: QualityClass,
    pub origin: DateTime<Utc>,
    pub revision: u32,
}

impl QuakeSnapshot {
    /// Equality over rendered fields; the revision counter is ignored
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id
            && self.epicentre == other.epicentre
            && self.depth_km == other.depth_km
            && self.magnitude == other.magnitude
            && self.region == other.region
            && self.quality == other.quality
            && self.origin == other.origin
    }
}

/// Live detection cluster, promoted through levels as more stations trigger
#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: ClusterId,
    pub root: GeoPoint,
    /// Severity level, 0 (weak) to 4 (very strong)
    pub level: u8,
    pub station_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl Cluster {
    /// Create new cluster at level 0
    #[must_use]
    pub fn new(root: GeoPoint, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: ClusterId::new(),
            root,
            level: 0,
            station_count: 0,
            updated_at,
        }
    }

    /// Copy out the fields that drive eligibility and rendering
    #[must_use]
    pub fn snapshot(&self) -> ClusterSnapshot {
        ClusterSnapshot {
            id: self.id,
            root: self.root,
            level: self.level,
        }
    }
}

/// Immutable view of a cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub id: ClusterId,
    pub root: GeoPoint,
    pub level: u8,
}

/// Live station state, updated on every processed data packet
#[derive(Debug, Clone)]
pub struct Station {
    pub id: StationId,
    pub location: GeoPoint,
    /// Current shaking intensity (counts)
    pub intensity: f64,
    pub observed_at: DateTime<Utc>,
}

impl Station {
    /// Create station with zero intensity
    #[must_use]
    pub fn new(id: StationId, location: GeoPoint, observed_at: DateTime<Utc>) -> Self {
        Self {
            id,
            location,
            intensity: 0.0,
            observed_at,
        }
    }

    /// Copy out the fields that drive eligibility and rendering
    #[must_use]
    pub fn snapshot(&self) -> StationSnapshot {
        StationSnapshot {
            id: self.id.clone(),
            location: self.location,
            intensity: self.intensity,
            observed_at: self.observed_at,
        }
    }
}

/// Immutable view of a station reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSnapshot {
    pub id: StationId,
    pub location: GeoPoint,
    pub intensity: f64,
    pub observed_at: DateTime<Utc>,
}

impl StationSnapshot {
    /// Intensity as rendered (whole counts)
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn display_intensity(&self) -> i64 {
        self.intensity.round() as i64
    }

    /// Equality over rendered fields; sub-count jitter and the observation
    /// time are ignored
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id
            && self.location == other.location
            && self.display_intensity() == other.display_intensity()
    }
}

/// Summary of an archived earthquake kept for history queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedQuake {
    pub id: QuakeId,
    pub epicentre: GeoPoint,
    pub depth_km: f64,
    pub magnitude: f64,
    pub region: String,
    pub origin: DateTime<Utc>,
}

impl From<&QuakeSnapshot> for ArchivedQuake {
    fn from(snapshot: &QuakeSnapshot) -> Self {
        Self {
            id: snapshot.id,
            epicentre: snapshot.epicentre,
            depth_km: snapshot.depth_km,
            magnitude: snapshot.magnitude,
            region: snapshot.region.clone(),
            origin: snapshot.origin,
        }
    }
}
