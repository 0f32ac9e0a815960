//! Quake Alerts
//!
//! Fan-out and message lifecycle engine for seismic alerts.
//!
//! # Overview
//!
//! The detection pipeline publishes [`SeismicEvent`]s carrying live
//! clusters, earthquakes and station readings. The [`AlertEngine`]
//! snapshots each one and routes it to a per-category worker, where a
//! [`MessageLifecycleManager`] decides for every subscriber whether to
//! create an alert, edit the one already sent, or stay quiet:
//!
//! - **No duplicates**: a subscriber gets at most one message per entity;
//!   later revisions edit it in place.
//! - **No churn**: revisions whose content did not change make no network
//!   calls.
//! - **Archive is terminal**: once an earthquake is archived, late updates
//!   are dropped.
//! - **Unreachable subscribers are disabled**: a permanent delivery failure
//!   deactivates the subscriber exactly once.
//!
//! # Example
//!
//! ```rust,no_run
//! use quake_alerts::prelude::*;
//! use quake_alerts::simulator::LoggingChannel;
//! use quake_subscribers::InMemoryStore;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), EngineError> {
//! let engine = AlertEngine::start(
//!     EngineConfig::default(),
//!     EngineDeps {
//!         store: Arc::new(InMemoryStore::new()),
//!         channel: Arc::new(LoggingChannel::default()),
//!         renderer: Arc::new(PlainTextRenderer),
//!         station_feed: None,
//!     },
//! )?;
//!
//! let quake = shared(Earthquake::new(GeoPoint::new(43.2, 76.9), 10.0, 5.4, chrono::Utc::now()));
//! engine.publish(SeismicEvent::QuakeCreate(quake)).await?;
//!
//! let stats = engine.shutdown().await;
//! println!("created {}", stats.delivery.created);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod manager;
pub mod render;
pub mod scanner;
pub mod simulator;

// Re-exports
pub use config::{ChannelConfig, EngineConfig, ScannerConfig, TrackingConfig};
pub use engine::{AlertEngine, EngineDeps, EngineStats};
pub use error::{ConfigError, EngineError, EngineResult, RenderError};
pub use event::{Command, SeismicEvent};
pub use manager::{Disposition, EvaluationReport, MessageLifecycleManager};
pub use render::{PlainTextRenderer, Renderer};
pub use scanner::{StaticStationFeed, StationFeed};
pub use simulator::{run_simulator, SimulationReport, SimulatorConfig};

/// Common imports for embedding the engine
pub mod prelude {
    pub use crate::{
        AlertEngine, EngineConfig, EngineDeps, EngineError, PlainTextRenderer, SeismicEvent,
    };
    pub use quake_model::{shared, Cluster, Earthquake, GeoPoint, Station};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
