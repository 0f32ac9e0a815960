//! Alert engine: per-category workers over explicit dependencies
//!
//! Each category (cluster, earthquake, station) has one bounded channel and
//! one worker, so events within a category are handled in order while the
//! categories run concurrently. Publishing snapshots the live object before
//! it is queued.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::event::{Command, SeismicEvent};
use crate::manager::MessageLifecycleManager;
use crate::render::Renderer;
use crate::scanner::{run_scanner, StationFeed};
use quake_delivery::{
    BroadcastReport, DeliveryChannel, DeliveryGateway, DeliveryStats, SubscriberLifecycle,
};
use quake_model::{ClusterSnapshot, EntityKind, Notifiable, QuakeSnapshot, StationSnapshot};
use quake_subscribers::{SubscriberCache, SubscriberStore};
use quake_tracking::{EvictionPolicy, TrackingCache, TrackingRecord, TrackingStats};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Collaborators the engine is built from
pub struct EngineDeps {
    /// Persistent subscriber table
    pub store: Arc<dyn SubscriberStore>,
    /// Messaging platform
    pub channel: Arc<dyn DeliveryChannel>,
    /// Alert renderer
    pub renderer: Arc<dyn Renderer>,
    /// Live station source for the scanner; `None` disables scanning
    pub station_feed: Option<Arc<dyn StationFeed>>,
}

/// Engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Cluster tracking
    pub clusters: TrackingStats,
    /// Earthquake tracking
    pub quakes: TrackingStats,
    /// Station tracking
    pub stations: TrackingStats,
    /// Gateway counters
    pub delivery: DeliveryStats,
    /// Subscribers deactivated after permanent failures
    pub deactivated: u64,
}

struct Scanner {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Running alert engine
pub struct AlertEngine {
    clusters: mpsc::Sender<Command<ClusterSnapshot>>,
    quakes: mpsc::Sender<Command<QuakeSnapshot>>,
    stations: mpsc::Sender<Command<StationSnapshot>>,
    cluster_manager: Arc<MessageLifecycleManager<ClusterSnapshot>>,
    quake_manager: Arc<MessageLifecycleManager<QuakeSnapshot>>,
    station_manager: Arc<MessageLifecycleManager<StationSnapshot>>,
    subscribers: SubscriberCache,
    gateway: Arc<DeliveryGateway>,
    workers: [JoinHandle<()>; 2],
    station_worker: JoinHandle<()>,
    scanner: Option<Scanner>,
}

impl AlertEngine {
    /// Validate `config`, build every component and spawn the workers
    ///
    /// Must be called within a tokio runtime.
    pub fn start(config: EngineConfig, deps: EngineDeps) -> EngineResult<Self> {
        config.validate()?;

        let subscribers = SubscriberCache::new(deps.store, &config.subscribers);
        let lifecycle = Arc::new(SubscriberLifecycle::new(subscribers.clone()));
        let gateway = Arc::new(DeliveryGateway::new(
            deps.channel,
            lifecycle,
            config.delivery.clone(),
        ));

        let tracking = &config.tracking;
        let cluster_manager = Arc::new(MessageLifecycleManager::new(
            tracking_cache(tracking.cluster_policy(), tracking.tombstones),
            subscribers.clone(),
            Arc::clone(&gateway),
            Arc::clone(&deps.renderer),
        ));
        let quake_manager = Arc::new(MessageLifecycleManager::new(
            tracking_cache(tracking.quake_policy(), tracking.tombstones),
            subscribers.clone(),
            Arc::clone(&gateway),
            Arc::clone(&deps.renderer),
        ));
        let station_manager = Arc::new(MessageLifecycleManager::new(
            tracking_cache(tracking.station_policy(), tracking.tombstones),
            subscribers.clone(),
            Arc::clone(&gateway),
            deps.renderer,
        ));

        let depth = config.channels.queue_depth;
        let (clusters, cluster_rx) = mpsc::channel(depth);
        let (quakes, quake_rx) = mpsc::channel(depth);
        let (stations, station_rx) = mpsc::channel(depth);

        let workers = [
            tokio::spawn(run_worker(Arc::clone(&cluster_manager), cluster_rx)),
            tokio::spawn(run_worker(Arc::clone(&quake_manager), quake_rx)),
        ];
        let station_worker = tokio::spawn(run_worker(Arc::clone(&station_manager), station_rx));

        let scanner = match deps.station_feed {
            Some(feed) if config.scanner.enabled => {
                let (stop, stop_rx) = watch::channel(false);
                let task = tokio::spawn(run_scanner(
                    feed,
                    Arc::clone(station_manager.tracking()),
                    stations.clone(),
                    config.scanner.clone(),
                    stop_rx,
                ));
                Some(Scanner { stop, task })
            }
            _ => None,
        };

        tracing::info!(
            quake_capacity = tracking.quake_capacity,
            cluster_capacity = tracking.cluster_capacity,
            station_ttl_secs = tracking.station_ttl_secs,
            rate_per_second = config.delivery.rate_per_second,
            scanner = scanner.is_some(),
            "Alert engine started"
        );

        Ok(Self {
            clusters,
            quakes,
            stations,
            cluster_manager,
            quake_manager,
            station_manager,
            subscribers,
            gateway,
            workers,
            station_worker,
            scanner,
        })
    }

    /// Snapshot the event's entity and queue it on its category channel
    ///
    /// Waits when the category queue is full.
    pub async fn publish(&self, event: SeismicEvent) -> EngineResult<()> {
        let kind = event.kind();
        let sent = match event {
            SeismicEvent::ClusterCreate(cluster) | SeismicEvent::ClusterLevelUp(cluster) => {
                let snapshot = cluster.read().snapshot();
                self.clusters.send(Command::Evaluate(snapshot)).await.is_ok()
            }
            SeismicEvent::QuakeCreate(quake) | SeismicEvent::QuakeUpdate(quake) => {
                let snapshot = quake.read().snapshot();
                self.quakes.send(Command::Evaluate(snapshot)).await.is_ok()
            }
            SeismicEvent::QuakeArchive(quake) => {
                let snapshot = quake.read().snapshot();
                self.quakes.send(Command::Archive(snapshot)).await.is_ok()
            }
            SeismicEvent::StationReading(station) => {
                let snapshot = station.read().snapshot();
                self.stations.send(Command::Evaluate(snapshot)).await.is_ok()
            }
        };
        if sent {
            Ok(())
        } else {
            Err(EngineError::ChannelClosed(kind))
        }
    }

    /// Send `text` to every active subscriber
    pub async fn broadcast(&self, text: &str) -> EngineResult<BroadcastReport> {
        let recipients = self.subscribers.active().await?;
        Ok(self.gateway.broadcast(recipients, text).await)
    }

    /// Subscriber cache, for management operations
    #[inline]
    #[must_use]
    pub fn subscribers(&self) -> &SubscriberCache {
        &self.subscribers
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            clusters: self.cluster_manager.stats(),
            quakes: self.quake_manager.stats(),
            stations: self.station_manager.stats(),
            delivery: self.gateway.stats(),
            deactivated: self.gateway.lifecycle().deactivated(),
        }
    }

    /// Drain queued work and stop
    ///
    /// Cluster and earthquake queues are drained first, then the scanner is
    /// stopped after its current tick, then the station queue is drained.
    pub async fn shutdown(self) -> EngineStats {
        let Self {
            clusters,
            quakes,
            stations,
            cluster_manager,
            quake_manager,
            station_manager,
            gateway,
            workers,
            station_worker,
            scanner,
            ..
        } = self;

        drop(clusters);
        drop(quakes);
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker panicked");
            }
        }

        if let Some(scanner) = scanner {
            if scanner.stop.send(true).is_err() {
                tracing::debug!("Station scanner already stopped");
            }
            if let Err(e) = scanner.task.await {
                tracing::error!(error = %e, "Station scanner panicked");
            }
        }

        drop(stations);
        if let Err(e) = station_worker.await {
            tracing::error!(error = %e, "Station worker panicked");
        }

        let stats = EngineStats {
            clusters: cluster_manager.stats(),
            quakes: quake_manager.stats(),
            stations: station_manager.stats(),
            delivery: gateway.stats(),
            deactivated: gateway.lifecycle().deactivated(),
        };
        tracing::info!(
            created = stats.delivery.created,
            edited = stats.delivery.edited,
            deactivated = stats.deactivated,
            "Alert engine stopped"
        );
        stats
    }
}

impl std::fmt::Debug for AlertEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertEngine")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn tracking_cache<N: Notifiable>(policy: EvictionPolicy, tombstones: usize) -> Arc<TrackingCache<N>> {
    let cache = TrackingCache::new(policy)
        .with_tombstone_capacity(tombstones)
        .with_eviction_listener(|record: &TrackingRecord<N>, cause| {
            tracing::debug!(
                kind = %N::KIND,
                entity = %record.id(),
                ?cause,
                deliveries = record.delivery_count(),
                "Tracking record evicted"
            );
        });
    Arc::new(cache)
}

/// Consume one category channel until every sender is gone
async fn run_worker<N: Notifiable>(
    manager: Arc<MessageLifecycleManager<N>>,
    mut commands: mpsc::Receiver<Command<N>>,
) {
    let kind: EntityKind = N::KIND;
    tracing::debug!(%kind, "Worker started");

    while let Some(command) = commands.recv().await {
        match command {
            Command::Evaluate(snapshot) => {
                if let Err(e) = manager.evaluate(snapshot).await {
                    tracing::warn!(%kind, error = %e, "Evaluation skipped");
                }
            }
            Command::Archive(snapshot) => {
                manager.archive(snapshot).await;
            }
        }
    }

    tracing::debug!(%kind, "Worker stopped");
}
