//! Common capability of entities that drive notifications

use crate::eligibility;
use crate::entity::{
    ArchivedQuake, ClusterId, ClusterSnapshot, EntityKind, QuakeId, QuakeSnapshot, StationId,
    StationSnapshot,
};
use crate::geo::GeoPoint;
use crate::subscriber::Subscriber;
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Borrowed view of any snapshot kind, for renderers
#[derive(Debug, Clone, Copy)]
pub enum SnapshotRef<'a> {
    /// Detection cluster
    Cluster(&'a ClusterSnapshot),
    /// Earthquake estimate
    Earthquake(&'a QuakeSnapshot),
    /// Station reading
    Station(&'a StationSnapshot),
}

impl SnapshotRef<'_> {
    /// Entity kind of the referenced snapshot
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            SnapshotRef::Cluster(_) => EntityKind::Cluster,
            SnapshotRef::Earthquake(_) => EntityKind::Earthquake,
            SnapshotRef::Station(_) => EntityKind::Station,
        }
    }
}

/// Snapshot that can be tracked and fanned out to subscribers
///
/// The lifecycle manager is generic over this trait; each entity kind
/// supplies identity, content equality and eligibility.
pub trait Notifiable: Clone + Debug + Send + Sync + 'static {
    /// Stable identifier across revisions
    type Id: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static;

    /// Entity kind, selects the subscriber list and tracking policy
    const KIND: EntityKind;

    /// Identifier of the entity this snapshot was taken from
    fn id(&self) -> Self::Id;

    /// Location used for distance calculations
    fn position(&self) -> GeoPoint;

    /// Equality over rendering-relevant fields only
    fn same_content(&self, other: &Self) -> bool;

    /// Whether `subscriber` should be notified about this snapshot
    fn eligible(&self, subscriber: &Subscriber) -> bool;

    /// Borrowed view for rendering
    fn view(&self) -> SnapshotRef<'_>;

    /// History record written when the entity is archived
    fn archive_summary(&self) -> Option<ArchivedQuake> {
        None
    }
}

impl Notifiable for QuakeSnapshot {
    type Id = QuakeId;
    const KIND: EntityKind = EntityKind::Earthquake;

    fn id(&self) -> QuakeId {
        self.id
    }

    fn position(&self) -> GeoPoint {
        self.epicentre
    }

    fn same_content(&self, other: &Self) -> bool {
        QuakeSnapshot::same_content(self, other)
    }

    fn eligible(&self, subscriber: &Subscriber) -> bool {
        eligibility::quake_eligible(self, subscriber)
    }

    fn view(&self) -> SnapshotRef<'_> {
        SnapshotRef::Earthquake(self)
    }

    fn archive_summary(&self) -> Option<ArchivedQuake> {
        Some(ArchivedQuake::from(self))
    }
}

impl Notifiable for ClusterSnapshot {
    type Id = ClusterId;
    const KIND: EntityKind = EntityKind::Cluster;

    fn id(&self) -> ClusterId {
        self.id
    }

    fn position(&self) -> GeoPoint {
        self.root
    }

    fn same_content(&self, other: &Self) -> bool {
        self == other
    }

    fn eligible(&self, subscriber: &Subscriber) -> bool {
        eligibility::cluster_eligible(self, subscriber)
    }

    fn view(&self) -> SnapshotRef<'_> {
        SnapshotRef::Cluster(self)
    }
}

impl Notifiable for StationSnapshot {
    type Id = StationId;
    const KIND: EntityKind = EntityKind::Station;

    fn id(&self) -> StationId {
        self.id.clone()
    }

    fn position(&self) -> GeoPoint {
        self.location
    }

    fn same_content(&self, other: &Self) -> bool {
        StationSnapshot::same_content(self, other)
    }

    fn eligible(&self, subscriber: &Subscriber) -> bool {
        eligibility::station_eligible(self, subscriber)
    }

    fn view(&self) -> SnapshotRef<'_> {
        SnapshotRef::Station(self)
    }
}
