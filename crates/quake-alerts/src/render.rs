//! Alert rendering
//!
//! Turns a snapshot into per-subscriber text plus optional attachments.
//! Only rendered fields may influence the text: two snapshots that are
//! `same_content` must render identically, or edits would churn.

use crate::error::RenderError;
use quake_delivery::{Attachment, OutboundMessage};
use quake_model::geo;
use quake_model::{
    ClusterSnapshot, GeoPoint, QuakeSnapshot, SnapshotRef, StationSnapshot, Subscriber,
};
use std::fmt::Write as _;

/// Produces the message a subscriber receives for a snapshot
pub trait Renderer: Send + Sync {
    /// Render `snapshot` for `subscriber`
    fn render(
        &self,
        snapshot: SnapshotRef<'_>,
        subscriber: &Subscriber,
    ) -> Result<OutboundMessage, RenderError>;
}

/// Human-readable text with an optional location pin
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextRenderer;

impl PlainTextRenderer {
    fn quake(quake: &QuakeSnapshot, subscriber: &Subscriber) -> Result<String, RenderError> {
        if !quake.magnitude.is_finite() || !quake.depth_km.is_finite() {
            return Err(RenderError::Malformed(format!(
                "earthquake {} has no finite magnitude or depth",
                quake.id
            )));
        }
        let distance = finite_distance(subscriber, quake.epicentre)?;
        let shaking = geo::intensity(quake.magnitude, distance, quake.depth_km);

        let mut text = format!("M{:.1} earthquake, {}\n", quake.magnitude, quake.region);
        let _ = writeln!(text, "{distance:.0} km from you, depth {:.0} km", quake.depth_km);
        let _ = writeln!(text, "Expected shaking at home: {shaking}");
        let _ = writeln!(text, "Quality: {}", quake.quality);
        let _ = write!(text, "Origin: {}", quake.origin.format("%Y-%m-%d %H:%M:%S UTC"));
        Ok(text)
    }

    fn cluster(cluster: &ClusterSnapshot, subscriber: &Subscriber) -> Result<String, RenderError> {
        let distance = finite_distance(subscriber, cluster.root)?;
        Ok(format!(
            "Shaking detected, level {}\n{distance:.0} km from you",
            cluster.level
        ))
    }

    fn station(station: &StationSnapshot, subscriber: &Subscriber) -> Result<String, RenderError> {
        if !station.intensity.is_finite() {
            return Err(RenderError::Malformed(format!(
                "station {} has no finite intensity",
                station.id
            )));
        }
        let distance = finite_distance(subscriber, station.location)?;
        Ok(format!(
            "Station {} intensity {}\n{distance:.0} km from you",
            station.id,
            station.display_intensity()
        ))
    }
}

fn finite_distance(subscriber: &Subscriber, point: GeoPoint) -> Result<f64, RenderError> {
    let distance = subscriber.distance_km(&point);
    if distance.is_finite() {
        Ok(distance)
    } else {
        Err(RenderError::Malformed(format!("no finite distance to {point}")))
    }
}

impl Renderer for PlainTextRenderer {
    fn render(
        &self,
        snapshot: SnapshotRef<'_>,
        subscriber: &Subscriber,
    ) -> Result<OutboundMessage, RenderError> {
        let (text, position) = match snapshot {
            SnapshotRef::Earthquake(q) => (Self::quake(q, subscriber)?, q.epicentre),
            SnapshotRef::Cluster(c) => (Self::cluster(c, subscriber)?, c.root),
            SnapshotRef::Station(s) => (Self::station(s, subscriber)?, s.location),
        };

        let mut message = OutboundMessage::text(text);
        if subscriber.attachments(snapshot.kind()).location {
            message = message.with_attachment(Attachment::Location(position));
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use quake_model::{ChatId, Earthquake, Notifiable, QualityClass, SubscriberId};

    fn subscriber() -> Subscriber {
        Subscriber::new(SubscriberId(1), ChatId(1), GeoPoint::new(43.24, 76.89))
    }

    #[test]
    fn revision_does_not_change_text() {
        let mut live = Earthquake::new(GeoPoint::new(43.5, 77.0), 12.0, 5.1, Utc::now())
            .with_region("Almaty");
        let first = live.snapshot();
        live.revise(|_| {});
        let second = live.snapshot();

        let s = subscriber();
        let a = PlainTextRenderer.render(first.view(), &s).unwrap();
        let b = PlainTextRenderer.render(second.view(), &s).unwrap();
        assert_eq!(a.text, b.text);

        live.revise(|q| q.quality = QualityClass::A);
        let third = live.snapshot();
        let c = PlainTextRenderer.render(third.view(), &s).unwrap();
        assert_ne!(a.text, c.text);
    }

    #[test]
    fn location_pin_follows_toggle() {
        let quake = Earthquake::new(GeoPoint::new(43.5, 77.0), 12.0, 5.1, Utc::now()).snapshot();
        let mut s = subscriber();

        s.quakes.attachments.location = true;
        let with_pin = PlainTextRenderer.render(quake.view(), &s).unwrap();
        assert_eq!(
            with_pin.attachments,
            vec![Attachment::Location(quake.epicentre)]
        );

        s.quakes.attachments.location = false;
        let without = PlainTextRenderer.render(quake.view(), &s).unwrap();
        assert!(without.attachments.is_empty());
    }

    #[test]
    fn non_finite_magnitude_is_malformed() {
        let mut quake =
            Earthquake::new(GeoPoint::new(43.5, 77.0), 12.0, 5.1, Utc::now()).snapshot();
        quake.magnitude = f64::NAN;
        let err = PlainTextRenderer
            .render(quake.view(), &subscriber())
            .unwrap_err();
        assert!(matches!(err, RenderError::Malformed(_)));
    }

    proptest! {
        #[test]
        fn revision_never_reaches_the_text(
            magnitude in 0.0f64..9.5,
            depth in 0.0f64..700.0,
            revision in 2u32..500,
        ) {
            let mut quake =
                Earthquake::new(GeoPoint::new(43.5, 77.0), depth, magnitude, Utc::now()).snapshot();
            let s = subscriber();
            let before = PlainTextRenderer.render(quake.view(), &s).unwrap();
            quake.revision = revision;
            let after = PlainTextRenderer.render(quake.view(), &s).unwrap();
            prop_assert_eq!(before.text, after.text);
        }
    }
}
