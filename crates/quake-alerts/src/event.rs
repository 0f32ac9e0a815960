//! Inbound domain events and per-category work items

use quake_model::{Cluster, EntityKind, Earthquake, Shared, Station};

/// Event raised by the detection pipeline
///
/// Carries the live object; the engine snapshots it on receipt, so later
/// mutations by the pipeline never leak into queued work.
#[derive(Debug, Clone)]
pub enum SeismicEvent {
    /// New detection cluster
    ClusterCreate(Shared<Cluster>),
    /// Cluster promoted to a higher severity level
    ClusterLevelUp(Shared<Cluster>),
    /// First earthquake estimate
    QuakeCreate(Shared<Earthquake>),
    /// Revised earthquake estimate
    QuakeUpdate(Shared<Earthquake>),
    /// Earthquake finalized; no further alerts
    QuakeArchive(Shared<Earthquake>),
    /// Raw station intensity reading
    StationReading(Shared<Station>),
}

impl SeismicEvent {
    /// Category this event is processed in
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::ClusterCreate(_) | Self::ClusterLevelUp(_) => EntityKind::Cluster,
            Self::QuakeCreate(_) | Self::QuakeUpdate(_) | Self::QuakeArchive(_) => {
                EntityKind::Earthquake
            }
            Self::StationReading(_) => EntityKind::Station,
        }
    }
}

/// Work item on a category channel
#[derive(Debug, Clone)]
pub enum Command<N> {
    /// Create or update alerts for the snapshot
    Evaluate(N),
    /// Archive the entity
    Archive(N),
}
