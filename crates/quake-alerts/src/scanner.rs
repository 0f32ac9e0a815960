//! Periodic station intensity scan
//!
//! Station readings change continuously, so instead of one event per
//! packet the scanner samples every station on a fixed interval and feeds
//! readings above the floor to the station worker. Each tick also purges
//! expired station records so the time bound holds without traffic.

use crate::config::ScannerConfig;
use crate::event::Command;
use async_trait::async_trait;
use quake_model::{Shared, Station, StationSnapshot};
use quake_tracking::TrackingCache;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

/// Source of live station state
#[async_trait]
pub trait StationFeed: Send + Sync {
    /// Stations currently reporting
    async fn stations(&self) -> Vec<Shared<Station>>;
}

/// Fixed set of stations
#[derive(Debug, Default, Clone)]
pub struct StaticStationFeed {
    stations: Vec<Shared<Station>>,
}

impl StaticStationFeed {
    /// Create feed over `stations`
    #[must_use]
    pub fn new(stations: Vec<Shared<Station>>) -> Self {
        Self { stations }
    }
}

#[async_trait]
impl StationFeed for StaticStationFeed {
    async fn stations(&self) -> Vec<Shared<Station>> {
        self.stations.clone()
    }
}

pub(crate) async fn run_scanner(
    feed: Arc<dyn StationFeed>,
    tracking: Arc<TrackingCache<StationSnapshot>>,
    commands: mpsc::Sender<Command<StationSnapshot>>,
    config: ScannerConfig,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(interval_ms = config.interval_ms, "Station scanner started");

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                let purged = tracking.purge_expired();
                let mut queued = 0usize;
                for station in feed.stations().await {
                    let snapshot = station.read().snapshot();
                    if snapshot.intensity < config.min_intensity {
                        continue;
                    }
                    if commands.send(Command::Evaluate(snapshot)).await.is_err() {
                        tracing::debug!("Station channel closed, scanner stopping");
                        return;
                    }
                    queued += 1;
                }
                tracing::trace!(queued, purged, "Station scan finished");
            }
        }
    }
    tracing::info!("Station scanner stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use quake_model::{shared, GeoPoint, StationId};
    use quake_tracking::EvictionPolicy;
    use std::time::Duration;

    fn station(code: &str, intensity: f64) -> Shared<Station> {
        let mut s = Station::new(StationId::new("KZ", code), GeoPoint::new(43.0, 77.0), Utc::now());
        s.intensity = intensity;
        shared(s)
    }

    #[tokio::test(start_paused = true)]
    async fn scans_readings_above_floor_until_stopped() {
        let feed = Arc::new(StaticStationFeed::new(vec![
            station("LOW", 10.0),
            station("HIGH", 5_000.0),
        ]));
        let tracking = Arc::new(TrackingCache::new(EvictionPolicy::SlidingTtl(
            Duration::from_secs(300),
        )));
        let (tx, mut rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        let config = ScannerConfig {
            interval_ms: 1_000,
            ..ScannerConfig::default()
        };

        let task = tokio::spawn(run_scanner(feed, tracking, tx, config, stop_rx));

        // First tick fires immediately, the next one a second later
        for _ in 0..2 {
            match rx.recv().await {
                Some(Command::Evaluate(s)) => assert_eq!(s.id, StationId::new("KZ", "HIGH")),
                other => panic!("unexpected command: {other:?}"),
            }
        }

        stop_tx.send(true).unwrap();
        task.await.unwrap();
        // Scanner dropped its sender
        assert!(rx.recv().await.is_none());
    }
}
