//! Subscriber records and per-category alert preferences

use crate::entity::EntityKind;
use crate::geo::{GeoPoint, Mmi};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Subscriber identifier (primary key in the subscriber table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriberId(pub i64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messaging-platform chat identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How image attachments are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageMode {
    /// Compressed inline photo
    #[default]
    Photo,
    /// Uncompressed file
    Document,
}

/// Optional extras sent after the alert text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttachmentToggles {
    /// Location pin at the entity
    pub location: bool,
    /// Rendered image (intensity graph)
    pub image: bool,
    /// Rendered map
    pub map: bool,
}

/// Earthquake alert thresholds
///
/// Two magnitude/distance tiers plus a felt-intensity trigger; any one
/// qualifies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuakePreferences {
    pub enabled: bool,
    pub min_magnitude_tier1: f64,
    pub max_distance_tier1_km: f64,
    pub min_magnitude_tier2: f64,
    pub max_distance_tier2_km: f64,
    /// Alert whenever the expected shaking at home reaches this level
    pub min_intensity: Mmi,
    pub attachments: AttachmentToggles,
}

impl Default for QuakePreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            min_magnitude_tier1: 0.0,
            max_distance_tier1_km: 100.0,
            min_magnitude_tier2: 5.0,
            max_distance_tier2_km: 1000.0,
            min_intensity: Mmi::new(5),
            attachments: AttachmentToggles {
                location: true,
                image: false,
                map: true,
            },
        }
    }
}

/// Cluster alert thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterPreferences {
    pub enabled: bool,
    pub min_level: u8,
    pub max_distance_km: f64,
    pub attachments: AttachmentToggles,
}

impl Default for ClusterPreferences {
    fn default() -> Self {
        Self {
            enabled: false,
            min_level: 1,
            max_distance_km: 300.0,
            attachments: AttachmentToggles::default(),
        }
    }
}

/// Station intensity alert thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationPreferences {
    pub enabled: bool,
    pub min_intensity_tier1: f64,
    pub max_distance_tier1_km: f64,
    pub min_intensity_tier2: f64,
    pub max_distance_tier2_km: f64,
    pub attachments: AttachmentToggles,
}

impl Default for StationPreferences {
    fn default() -> Self {
        Self {
            enabled: false,
            min_intensity_tier1: 1_000.0,
            max_distance_tier1_km: 50.0,
            min_intensity_tier2: 10_000.0,
            max_distance_tier2_km: 300.0,
            attachments: AttachmentToggles::default(),
        }
    }
}

/// Persistent subscriber record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub chat_id: ChatId,
    /// Master switch; cleared by unsubscribe or on permanent delivery failure
    pub enabled: bool,
    pub home: GeoPoint,
    pub quakes: QuakePreferences,
    pub clusters: ClusterPreferences,
    pub stations: StationPreferences,
    pub image_mode: ImageMode,
}

impl Subscriber {
    /// Create subscriber with default preferences
    #[must_use]
    pub fn new(id: SubscriberId, chat_id: ChatId, home: GeoPoint) -> Self {
        Self {
            id,
            chat_id,
            enabled: true,
            home,
            quakes: QuakePreferences::default(),
            clusters: ClusterPreferences::default(),
            stations: StationPreferences::default(),
            image_mode: ImageMode::default(),
        }
    }

    /// Whether the category toggle for `kind` is on
    #[inline]
    #[must_use]
    pub fn category_enabled(&self, kind: EntityKind) -> bool {
        match kind {
            EntityKind::Cluster => self.clusters.enabled,
            EntityKind::Earthquake => self.quakes.enabled,
            EntityKind::Station => self.stations.enabled,
        }
    }

    /// Active and subscribed to `kind`
    #[inline]
    #[must_use]
    pub fn wants(&self, kind: EntityKind) -> bool {
        self.enabled && self.category_enabled(kind)
    }

    /// Attachment toggles for `kind`
    #[inline]
    #[must_use]
    pub fn attachments(&self, kind: EntityKind) -> AttachmentToggles {
        match kind {
            EntityKind::Cluster => self.clusters.attachments,
            EntityKind::Earthquake => self.quakes.attachments,
            EntityKind::Station => self.stations.attachments,
        }
    }

    /// Surface distance from home, in kilometres
    #[inline]
    #[must_use]
    pub fn distance_km(&self, point: &GeoPoint) -> f64 {
        self.home.distance_km(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscriber() -> Subscriber {
        Subscriber::new(SubscriberId(1), ChatId(100), GeoPoint::new(43.24, 76.89))
    }

    #[test]
    fn defaults_subscribe_to_earthquakes_only() {
        let s = subscriber();
        assert!(s.wants(EntityKind::Earthquake));
        assert!(!s.wants(EntityKind::Cluster));
        assert!(!s.wants(EntityKind::Station));
    }

    #[test]
    fn disabled_subscriber_wants_nothing() {
        let mut s = subscriber();
        s.clusters.enabled = true;
        s.enabled = false;
        for kind in EntityKind::ALL {
            assert!(!s.wants(kind));
            assert_eq!(s.category_enabled(kind), kind != EntityKind::Station);
        }
    }

    #[test]
    fn attachments_per_category() {
        let s = subscriber();
        assert!(s.attachments(EntityKind::Earthquake).location);
        assert!(!s.attachments(EntityKind::Cluster).location);
    }

    #[test]
    fn serde_round_trip_keeps_preferences() {
        let mut s = subscriber();
        s.image_mode = ImageMode::Document;
        s.quakes.min_intensity = Mmi::new(7);
        let json = serde_json::to_string(&s).unwrap();
        let back: Subscriber = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
