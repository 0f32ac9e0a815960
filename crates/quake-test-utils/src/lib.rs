//! Testing utilities for the quake alerts workspace
//!
//! Shared fixtures and a recording delivery channel.

#![allow(missing_docs)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use quake_delivery::{DeliveryChannel, DeliveryError, Image};
use quake_model::geo::EARTH_RADIUS_KM;
use quake_model::{
    shared, ChatId, Cluster, Earthquake, GeoPoint, MessageHandle, Mmi, Shared, Station, StationId,
    Subscriber, SubscriberId,
};
use quake_subscribers::InMemoryStore;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Home location used by the fixtures (Almaty)
pub const HOME: GeoPoint = GeoPoint::new(43.24, 76.89);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

/// Point `km` due north of `origin`
pub fn north_of(origin: GeoPoint, km: f64) -> GeoPoint {
    GeoPoint::new(origin.lat + (km / EARTH_RADIUS_KM).to_degrees(), origin.lon)
}

/// Enabled subscriber at [`HOME`] with default preferences; chat id equals id
pub fn subscriber(id: i64) -> Subscriber {
    Subscriber::new(SubscriberId(id), ChatId(id), HOME)
}

/// Subscriber with tier 1 (M0, 100 km) and tier 2 (M5, 300 km)
pub fn tiered_subscriber(id: i64) -> Subscriber {
    let mut s = subscriber(id);
    s.quakes.min_magnitude_tier1 = 0.0;
    s.quakes.max_distance_tier1_km = 100.0;
    s.quakes.min_magnitude_tier2 = 5.0;
    s.quakes.max_distance_tier2_km = 300.0;
    s.quakes.min_intensity = Mmi::new(5);
    s.quakes.attachments = Default::default();
    s
}

/// Subscriber that only hears about strong, close earthquakes
pub fn tight_subscriber(id: i64) -> Subscriber {
    let mut s = tiered_subscriber(id);
    s.quakes.min_magnitude_tier1 = 6.0;
    s.quakes.max_distance_tier1_km = 50.0;
    s.quakes.min_magnitude_tier2 = 7.5;
    s.quakes.max_distance_tier2_km = 100.0;
    s.quakes.min_intensity = Mmi::MAX;
    s
}

/// Subscriber that hears about everything within 2000 km
pub fn loose_subscriber(id: i64) -> Subscriber {
    let mut s = tiered_subscriber(id);
    s.quakes.max_distance_tier1_km = 2_000.0;
    s.clusters.enabled = true;
    s.clusters.min_level = 0;
    s.clusters.max_distance_km = 2_000.0;
    s.stations.enabled = true;
    s.stations.min_intensity_tier1 = 100.0;
    s.stations.max_distance_tier1_km = 2_000.0;
    s
}

/// Live earthquake `km` north of [`HOME`]
pub fn quake_at(km: f64, magnitude: f64) -> Shared<Earthquake> {
    shared(Earthquake::new(north_of(HOME, km), 10.0, magnitude, Utc::now()).with_region("Test Region"))
}

/// Live cluster `km` north of [`HOME`]
pub fn cluster_at(km: f64, level: u8) -> Shared<Cluster> {
    let mut cluster = Cluster::new(north_of(HOME, km), Utc::now());
    cluster.level = level;
    shared(cluster)
}

/// Live station `km` north of [`HOME`]
pub fn station_at(code: &str, km: f64, intensity: f64) -> Shared<Station> {
    let mut station = Station::new(StationId::new("KZ", code), north_of(HOME, km), Utc::now());
    station.intensity = intensity;
    shared(station)
}

pub fn store_with(subscribers: impl IntoIterator<Item = Subscriber>) -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::with_subscribers(subscribers))
}

/// One platform request as seen by [`RecordingChannel`]
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelCall {
    SendText { chat: ChatId, text: String },
    EditText { handle: MessageHandle, text: String },
    SendLocation { chat: ChatId, point: GeoPoint },
    SendPhoto { chat: ChatId, file_name: String },
    SendDocument { chat: ChatId, file_name: String },
}

impl ChannelCall {
    pub fn chat(&self) -> ChatId {
        match self {
            Self::SendText { chat, .. }
            | Self::SendLocation { chat, .. }
            | Self::SendPhoto { chat, .. }
            | Self::SendDocument { chat, .. } => *chat,
            Self::EditText { handle, .. } => handle.chat(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub call: ChannelCall,
    /// Handle for successful text sends, `None` for other successes
    pub outcome: Result<Option<MessageHandle>, DeliveryError>,
}

/// In-memory messaging platform
///
/// Records every attempt, hands out increasing message ids, answers edits
/// that carry the current text with `NotModified`, and fails calls to chats
/// configured to fail.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    attempts: Mutex<Vec<Attempt>>,
    texts: Mutex<HashMap<MessageHandle, String>>,
    sticky: Mutex<HashMap<ChatId, DeliveryError>>,
    once: Mutex<HashMap<ChatId, VecDeque<DeliveryError>>>,
    latency: Mutex<Option<Duration>>,
    next_id: AtomicI64,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call to `chat` fails with `error`
    pub fn fail_chat(&self, chat: ChatId, error: DeliveryError) {
        self.sticky.lock().insert(chat, error);
    }

    /// The next call to `chat` fails with `error`
    pub fn fail_next(&self, chat: ChatId, error: DeliveryError) {
        self.once.lock().entry(chat).or_default().push_back(error);
    }

    pub fn heal_chat(&self, chat: ChatId) {
        self.sticky.lock().remove(&chat);
        self.once.lock().remove(&chat);
    }

    /// Delay every call
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().clone()
    }

    /// Attempts of any kind addressed to `chat`
    pub fn attempts_to(&self, chat: ChatId) -> usize {
        self.attempts
            .lock()
            .iter()
            .filter(|a| a.call.chat() == chat)
            .count()
    }

    /// Handles of messages successfully created in `chat`
    pub fn created(&self, chat: ChatId) -> Vec<MessageHandle> {
        self.attempts
            .lock()
            .iter()
            .filter_map(|a| match (&a.call, &a.outcome) {
                (ChannelCall::SendText { chat: c, .. }, Ok(Some(handle))) if *c == chat => {
                    Some(*handle)
                }
                _ => None,
            })
            .collect()
    }

    /// Texts successfully applied by edits of `handle`
    pub fn edits(&self, handle: MessageHandle) -> Vec<String> {
        self.attempts
            .lock()
            .iter()
            .filter_map(|a| match (&a.call, &a.outcome) {
                (ChannelCall::EditText { handle: h, text }, Ok(_)) if *h == handle => {
                    Some(text.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Edit attempts of any outcome
    pub fn edit_attempts(&self) -> usize {
        self.attempts
            .lock()
            .iter()
            .filter(|a| matches!(a.call, ChannelCall::EditText { .. }))
            .count()
    }

    pub fn total_created(&self) -> usize {
        self.attempts
            .lock()
            .iter()
            .filter(|a| matches!((&a.call, &a.outcome), (ChannelCall::SendText { .. }, Ok(_))))
            .count()
    }

    /// Current text of a delivered message
    pub fn text_of(&self, handle: MessageHandle) -> Option<String> {
        self.texts.lock().get(&handle).cloned()
    }

    async fn enter(&self, chat: ChatId) -> Result<(), DeliveryError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = self.once.lock().get_mut(&chat).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        match self.sticky.lock().get(&chat) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn record(&self, call: ChannelCall, outcome: Result<Option<MessageHandle>, DeliveryError>) {
        self.attempts.lock().push(Attempt { call, outcome });
    }
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageHandle, DeliveryError> {
        let call = ChannelCall::SendText {
            chat,
            text: text.to_owned(),
        };
        match self.enter(chat).await {
            Ok(()) => {
                let handle = MessageHandle::new(chat, self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
                self.texts.lock().insert(handle, text.to_owned());
                self.record(call, Ok(Some(handle)));
                Ok(handle)
            }
            Err(e) => {
                self.record(call, Err(e.clone()));
                Err(e)
            }
        }
    }

    async fn edit_text(&self, handle: MessageHandle, text: &str) -> Result<(), DeliveryError> {
        let call = ChannelCall::EditText {
            handle,
            text: text.to_owned(),
        };
        let outcome = match self.enter(handle.chat()).await {
            Err(e) => Err(e),
            Ok(()) => {
                let mut texts = self.texts.lock();
                match texts.get_mut(&handle) {
                    None => Err(DeliveryError::from_platform(
                        400,
                        "Bad Request: message to edit not found",
                    )),
                    Some(current) if current == text => Err(DeliveryError::NotModified),
                    Some(current) => {
                        text.clone_into(current);
                        Ok(())
                    }
                }
            }
        };
        self.record(call, outcome.clone().map(|()| None));
        outcome
    }

    async fn send_location(&self, chat: ChatId, point: GeoPoint) -> Result<(), DeliveryError> {
        let outcome = self.enter(chat).await;
        self.record(ChannelCall::SendLocation { chat, point }, outcome.clone().map(|()| None));
        outcome
    }

    async fn send_photo(&self, chat: ChatId, image: &Image) -> Result<(), DeliveryError> {
        let outcome = self.enter(chat).await;
        self.record(
            ChannelCall::SendPhoto {
                chat,
                file_name: image.file_name.clone(),
            },
            outcome.clone().map(|()| None),
        );
        outcome
    }

    async fn send_document(&self, chat: ChatId, image: &Image) -> Result<(), DeliveryError> {
        let outcome = self.enter(chat).await;
        self.record(
            ChannelCall::SendDocument {
                chat,
                file_name: image.file_name.clone(),
            },
            outcome.clone().map(|()| None),
        );
        outcome
    }
}
