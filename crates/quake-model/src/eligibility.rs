//! Alert eligibility
//!
//! Pure decisions over (snapshot, subscriber). A subscriber who is disabled,
//! or who switched the entity's category off, is never eligible regardless
//! of thresholds.

use crate::entity::{ClusterSnapshot, EntityKind, QuakeSnapshot, StationSnapshot};
use crate::geo;
use crate::subscriber::Subscriber;

/// Which earthquake clause qualified a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuakeTrigger {
    /// First magnitude/distance tier
    Tier1,
    /// Second magnitude/distance tier
    Tier2,
    /// Expected shaking at home reached the subscriber's intensity level
    Intensity,
}

/// First earthquake clause that qualifies `subscriber`, if any
///
/// The clauses are independent; the order here only decides which one is
/// reported when several hold.
#[must_use]
pub fn quake_trigger(quake: &QuakeSnapshot, subscriber: &Subscriber) -> Option<QuakeTrigger> {
    if !subscriber.wants(EntityKind::Earthquake) {
        return None;
    }
    let prefs = &subscriber.quakes;
    let distance = subscriber.distance_km(&quake.epicentre);

    if quake.magnitude >= prefs.min_magnitude_tier1 && distance <= prefs.max_distance_tier1_km {
        return Some(QuakeTrigger::Tier1);
    }
    if quake.magnitude >= prefs.min_magnitude_tier2 && distance <= prefs.max_distance_tier2_km {
        return Some(QuakeTrigger::Tier2);
    }
    if geo::intensity(quake.magnitude, distance, quake.depth_km) >= prefs.min_intensity {
        return Some(QuakeTrigger::Intensity);
    }
    None
}

/// Earthquake eligibility
#[inline]
#[must_use]
pub fn quake_eligible(quake: &QuakeSnapshot, subscriber: &Subscriber) -> bool {
    quake_trigger(quake, subscriber).is_some()
}

/// Cluster eligibility: level and distance must both hold
#[must_use]
pub fn cluster_eligible(cluster: &ClusterSnapshot, subscriber: &Subscriber) -> bool {
    if !subscriber.wants(EntityKind::Cluster) {
        return false;
    }
    let prefs = &subscriber.clusters;
    cluster.level >= prefs.min_level
        && subscriber.distance_km(&cluster.root) <= prefs.max_distance_km
}

/// Station eligibility: either intensity/distance tier
#[must_use]
pub fn station_eligible(station: &StationSnapshot, subscriber: &Subscriber) -> bool {
    if !subscriber.wants(EntityKind::Station) {
        return false;
    }
    let prefs = &subscriber.stations;
    let distance = subscriber.distance_km(&station.location);

    (station.intensity >= prefs.min_intensity_tier1 && distance <= prefs.max_distance_tier1_km)
        || (station.intensity >= prefs.min_intensity_tier2
            && distance <= prefs.max_distance_tier2_km)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ClusterId, QualityClass, QuakeId, StationId};
    use crate::geo::{GeoPoint, Mmi, EARTH_RADIUS_KM};
    use crate::subscriber::{ChatId, SubscriberId};
    use chrono::Utc;
    use proptest::prelude::*;

    const HOME: GeoPoint = GeoPoint::new(43.24, 76.89);

    fn subscriber() -> Subscriber {
        let mut s = Subscriber::new(SubscriberId(1), ChatId(1), HOME);
        s.quakes.min_magnitude_tier1 = 0.0;
        s.quakes.max_distance_tier1_km = 100.0;
        s.quakes.min_magnitude_tier2 = 5.0;
        s.quakes.max_distance_tier2_km = 300.0;
        s.quakes.min_intensity = Mmi::new(5);
        s
    }

    /// Point `km` due north of home
    fn north_of_home(km: f64) -> GeoPoint {
        GeoPoint::new(HOME.lat + (km / EARTH_RADIUS_KM).to_degrees(), HOME.lon)
    }

    fn quake_at(km: f64, magnitude: f64) -> QuakeSnapshot {
        QuakeSnapshot {
            id: QuakeId::new(),
            epicentre: north_of_home(km),
            depth_km: 10.0,
            magnitude,
            region: "Test".into(),
            quality: QualityClass::C,
            origin: Utc::now(),
            revision: 1,
        }
    }

    #[test]
    fn worked_example_tiers() {
        let s = subscriber();

        let weak = quake_at(250.0, 4.0);
        assert!((s.distance_km(&weak.epicentre) - 250.0).abs() < 0.01);
        assert_eq!(quake_trigger(&weak, &s), None);

        let stronger = QuakeSnapshot { magnitude: 5.2, ..weak };
        assert_eq!(quake_trigger(&stronger, &s), Some(QuakeTrigger::Tier2));
    }

    #[test]
    fn tier1_catches_small_nearby_quakes() {
        let s = subscriber();
        assert_eq!(quake_trigger(&quake_at(40.0, 1.5), &s), Some(QuakeTrigger::Tier1));
    }

    #[test]
    fn intensity_clause_is_independent_of_tiers() {
        let mut s = subscriber();
        s.quakes.max_distance_tier1_km = 0.0;
        s.quakes.max_distance_tier2_km = 0.0;
        // Great quake far outside both tiers still shakes home hard
        let q = quake_at(100.0, 8.5);
        assert_eq!(quake_trigger(&q, &s), Some(QuakeTrigger::Intensity));
    }

    #[test]
    fn disabled_or_opted_out_is_never_eligible() {
        let q = quake_at(10.0, 7.0);

        let mut disabled = subscriber();
        disabled.enabled = false;
        assert!(!quake_eligible(&q, &disabled));

        let mut opted_out = subscriber();
        opted_out.quakes.enabled = false;
        assert!(!quake_eligible(&q, &opted_out));
    }

    #[test]
    fn cluster_requires_level_and_distance() {
        let mut s = subscriber();
        s.clusters.enabled = true;
        s.clusters.min_level = 2;
        s.clusters.max_distance_km = 200.0;

        let mut cluster = ClusterSnapshot {
            id: ClusterId::new(),
            root: north_of_home(150.0),
            level: 1,
        };
        assert!(!cluster_eligible(&cluster, &s));

        cluster.level = 2;
        assert!(cluster_eligible(&cluster, &s));

        cluster.root = north_of_home(250.0);
        assert!(!cluster_eligible(&cluster, &s));
    }

    #[test]
    fn station_tiers() {
        let mut s = subscriber();
        s.stations.enabled = true;

        let mut reading = StationSnapshot {
            id: StationId::new("KZ", "AAK"),
            location: north_of_home(30.0),
            intensity: 1_500.0,
            observed_at: Utc::now(),
        };
        assert!(station_eligible(&reading, &s));

        reading.location = north_of_home(200.0);
        assert!(!station_eligible(&reading, &s));

        reading.intensity = 12_000.0;
        assert!(station_eligible(&reading, &s));

        s.stations.enabled = false;
        assert!(!station_eligible(&reading, &s));
    }

    proptest! {
        #[test]
        fn looser_thresholds_never_lose_eligibility(
            km in 0.0f64..1500.0,
            magnitude in 0.0f64..9.0,
            slack in 0.0f64..500.0,
        ) {
            let tight = subscriber();
            let mut loose = subscriber();
            loose.quakes.max_distance_tier1_km += slack;
            loose.quakes.max_distance_tier2_km += slack;
            loose.quakes.min_intensity = Mmi::new(3);

            let q = quake_at(km, magnitude);
            if quake_eligible(&q, &tight) {
                prop_assert!(quake_eligible(&q, &loose));
            }
        }
    }
}
