//! Scripted end-to-end scenario
//!
//! Drives a full engine through one seismic sequence against an in-memory
//! subscriber table and a logging delivery channel:
//!
//! 1. Cluster detected at level 0, then promoted to level 1
//! 2. Earthquake M4.0, revised to M5.2, then its quality class improves
//! 3. A revision with identical content
//! 4. Archive, followed by a late M6.6 revision that must be dropped
//! 5. Station readings picked up by the scanner
//! 6. Broadcast to every active subscriber
//!
//! The report lists any violated delivery invariant.

use crate::config::EngineConfig;
use crate::engine::{AlertEngine, EngineDeps, EngineStats};
use crate::error::EngineResult;
use crate::event::SeismicEvent;
use crate::render::PlainTextRenderer;
use crate::scanner::StaticStationFeed;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use quake_delivery::{BroadcastReport, DeliveryChannel, DeliveryError, Image};
use quake_model::geo::EARTH_RADIUS_KM;
use quake_model::{
    shared, ChatId, Cluster, Earthquake, GeoPoint, MessageHandle, QualityClass, Station,
    StationId, Subscriber, SubscriberId,
};
use quake_subscribers::InMemoryStore;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Epicentre of the scripted sequence
pub const EPICENTRE: GeoPoint = GeoPoint::new(43.24, 76.89);

/// Scenario parameters
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorConfig {
    /// Subscribers, spread due north of the epicentre
    pub subscribers: usize,
    /// Distance of the farthest subscriber, in kilometres
    pub spread_km: f64,
    /// Every n-th subscriber has blocked the bot; 0 disables
    pub blocked_every: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            subscribers: 25,
            spread_km: 1_200.0,
            blocked_every: 10,
        }
    }
}

/// Scenario outcome
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Parameters the scenario ran with
    pub config: SimulatorConfig,
    /// Events published to the engine
    pub events: usize,
    /// Final engine counters
    pub stats: EngineStats,
    /// Result of the closing broadcast
    pub broadcast: BroadcastReport,
    /// Text messages the channel accepted
    pub messages_sent: usize,
    /// Edits the channel applied
    pub messages_edited: usize,
    /// Delivery invariants that did not hold
    pub violations: Vec<String>,
}

impl SimulationReport {
    /// No invariant was violated
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Delivery channel that logs instead of calling a platform
///
/// Hands out increasing message ids and answers edits that carry the
/// current text with `NotModified`.
#[derive(Debug, Default)]
pub struct LoggingChannel {
    blocked: HashSet<ChatId>,
    sent: Mutex<Vec<(ChatId, String)>>,
    texts: Mutex<HashMap<MessageHandle, String>>,
    edited: Mutex<Vec<(MessageHandle, String)>>,
    next_id: AtomicI64,
}

impl LoggingChannel {
    /// Create channel; calls to `blocked` chats fail permanently
    #[must_use]
    pub fn new(blocked: impl IntoIterator<Item = ChatId>) -> Self {
        Self {
            blocked: blocked.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Accepted text messages, in order
    #[must_use]
    pub fn sent(&self) -> Vec<(ChatId, String)> {
        self.sent.lock().clone()
    }

    /// Applied edits, in order
    #[must_use]
    pub fn edited(&self) -> Vec<(MessageHandle, String)> {
        self.edited.lock().clone()
    }

    fn admit(&self, chat: ChatId) -> Result<(), DeliveryError> {
        if self.blocked.contains(&chat) {
            tracing::debug!(%chat, "Chat has blocked the bot");
            Err(DeliveryError::Blocked)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DeliveryChannel for LoggingChannel {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageHandle, DeliveryError> {
        self.admit(chat)?;
        let handle = MessageHandle::new(chat, self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        tracing::info!(%chat, message_id = handle.message_id(), text, "send_text");
        self.texts.lock().insert(handle, text.to_owned());
        self.sent.lock().push((chat, text.to_owned()));
        Ok(handle)
    }

    async fn edit_text(&self, handle: MessageHandle, text: &str) -> Result<(), DeliveryError> {
        self.admit(handle.chat())?;
        {
            let mut texts = self.texts.lock();
            match texts.get_mut(&handle) {
                Some(current) if current == text => return Err(DeliveryError::NotModified),
                Some(current) => text.clone_into(current),
                None => {
                    return Err(DeliveryError::from_platform(
                        400,
                        "Bad Request: message to edit not found",
                    ))
                }
            }
        }
        tracing::info!(chat = %handle.chat(), message_id = handle.message_id(), text, "edit_text");
        self.edited.lock().push((handle, text.to_owned()));
        Ok(())
    }

    async fn send_location(&self, chat: ChatId, point: GeoPoint) -> Result<(), DeliveryError> {
        self.admit(chat)?;
        tracing::info!(%chat, %point, "send_location");
        Ok(())
    }

    async fn send_photo(&self, chat: ChatId, image: &Image) -> Result<(), DeliveryError> {
        self.admit(chat)?;
        tracing::info!(%chat, file = %image.file_name, "send_photo");
        Ok(())
    }

    async fn send_document(&self, chat: ChatId, image: &Image) -> Result<(), DeliveryError> {
        self.admit(chat)?;
        tracing::info!(%chat, file = %image.file_name, "send_document");
        Ok(())
    }
}

fn north_of(origin: GeoPoint, km: f64) -> GeoPoint {
    GeoPoint::new(origin.lat + (km / EARTH_RADIUS_KM).to_degrees(), origin.lon)
}

#[allow(clippy::cast_precision_loss)]
fn subscribers(config: &SimulatorConfig) -> Vec<Subscriber> {
    let n = config.subscribers.max(1) as f64;
    (0..config.subscribers)
        .map(|i| {
            let id = i64::try_from(i + 1).unwrap_or(i64::MAX);
            let distance = (i as f64 + 1.0) * config.spread_km / n;
            let mut s = Subscriber::new(SubscriberId(id), ChatId(id), north_of(EPICENTRE, distance));
            s.quakes.min_magnitude_tier1 = 0.0;
            s.quakes.max_distance_tier1_km = 100.0;
            s.quakes.min_magnitude_tier2 = 5.0;
            s.quakes.max_distance_tier2_km = 1_000.0;
            s.quakes.attachments.location = i % 2 == 0;
            s.clusters.enabled = true;
            s.clusters.min_level = 1;
            s.clusters.max_distance_km = 300.0;
            s.stations.enabled = true;
            s.stations.min_intensity_tier1 = 1_000.0;
            s.stations.max_distance_tier1_km = 150.0;
            s
        })
        .collect()
}

fn blocked_chats(config: &SimulatorConfig) -> Vec<ChatId> {
    if config.blocked_every == 0 {
        return Vec::new();
    }
    (1..=config.subscribers)
        .filter(|i| i % config.blocked_every == 0)
        .filter_map(|i| i64::try_from(i).ok().map(ChatId))
        .collect()
}

/// Run the scripted scenario
///
/// # Errors
///
/// Fails when `engine_config` is invalid or an event cannot be queued.
pub async fn run_simulator(
    engine_config: EngineConfig,
    config: SimulatorConfig,
) -> EngineResult<SimulationReport> {
    let store = Arc::new(InMemoryStore::with_subscribers(subscribers(&config)));
    let channel = Arc::new(LoggingChannel::new(blocked_chats(&config)));

    let stations = vec![
        shared(Station::new(
            StationId::new("KZ", "NEAR"),
            north_of(EPICENTRE, 20.0),
            Utc::now(),
        )),
        shared(Station::new(
            StationId::new("KZ", "QUIET"),
            north_of(EPICENTRE, 400.0),
            Utc::now(),
        )),
    ];
    stations[0].write().intensity = 2_500.0;
    stations[1].write().intensity = 40.0;

    let scan_interval = engine_config.scanner.interval();
    let engine = AlertEngine::start(
        engine_config,
        EngineDeps {
            store,
            channel: Arc::clone(&channel) as Arc<dyn DeliveryChannel>,
            renderer: Arc::new(PlainTextRenderer),
            station_feed: Some(Arc::new(StaticStationFeed::new(stations))),
        },
    )?;

    let mut events = 0usize;

    let cluster = shared(Cluster::new(EPICENTRE, Utc::now()));
    engine
        .publish(SeismicEvent::ClusterCreate(Arc::clone(&cluster)))
        .await?;
    cluster.write().level = 1;
    engine.publish(SeismicEvent::ClusterLevelUp(cluster)).await?;
    events += 2;

    let quake = shared(Earthquake::new(EPICENTRE, 10.0, 4.0, Utc::now()).with_region("Almaty region"));
    engine
        .publish(SeismicEvent::QuakeCreate(Arc::clone(&quake)))
        .await?;
    quake.write().revise(|q| q.magnitude = 5.2);
    engine
        .publish(SeismicEvent::QuakeUpdate(Arc::clone(&quake)))
        .await?;
    quake.write().revise(|q| q.quality = QualityClass::B);
    engine
        .publish(SeismicEvent::QuakeUpdate(Arc::clone(&quake)))
        .await?;
    quake.write().revise(|_| {});
    engine
        .publish(SeismicEvent::QuakeUpdate(Arc::clone(&quake)))
        .await?;
    engine
        .publish(SeismicEvent::QuakeArchive(Arc::clone(&quake)))
        .await?;
    quake.write().revise(|q| q.magnitude = 6.6);
    engine.publish(SeismicEvent::QuakeUpdate(quake)).await?;
    events += 6;

    // Let the scanner complete at least one tick
    tokio::time::sleep(scan_interval).await;

    let broadcast = engine.broadcast("Simulation finished").await?;
    let stats = engine.shutdown().await;

    let sent = channel.sent();
    let edited = channel.edited();
    let violations = check_invariants(&sent, &edited);

    tracing::info!(
        events,
        sent = sent.len(),
        edited = edited.len(),
        violations = violations.len(),
        "Simulation finished"
    );

    Ok(SimulationReport {
        config,
        events,
        stats,
        broadcast,
        messages_sent: sent.len(),
        messages_edited: edited.len(),
        violations,
    })
}

fn check_invariants(sent: &[(ChatId, String)], edited: &[(MessageHandle, String)]) -> Vec<String> {
    let mut violations = Vec::new();

    let mut quake_messages: HashMap<ChatId, usize> = HashMap::new();
    for (chat, text) in sent {
        if text.contains(" earthquake, ") {
            *quake_messages.entry(*chat).or_default() += 1;
        }
    }
    for (chat, count) in quake_messages {
        if count > 1 {
            violations.push(format!("chat {chat} received {count} messages for one earthquake"));
        }
    }

    let late = sent
        .iter()
        .map(|(_, text)| text)
        .chain(edited.iter().map(|(_, text)| text))
        .filter(|text| text.starts_with("M6.6"))
        .count();
    if late > 0 {
        violations.push(format!("{late} deliveries carried an update made after archive"));
    }

    violations
}
