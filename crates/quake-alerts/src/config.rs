//! Engine configuration
//!
//! Every section has defaults, so a TOML file only needs the values it
//! changes:
//!
//! ```toml
//! [tracking]
//! quake_capacity = 100
//!
//! [delivery]
//! rate_per_second = 25
//! ```

use crate::error::ConfigError;
use quake_delivery::DeliveryConfig;
use quake_subscribers::CacheConfig;
use quake_tracking::{EvictionPolicy, DEFAULT_TOMBSTONES};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tracking cache bounds per entity kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Earthquakes tracked at once
    pub quake_capacity: usize,
    /// Clusters tracked at once
    pub cluster_capacity: usize,
    /// Station records expire this long after their last write, in seconds
    pub station_ttl_secs: u64,
    /// Archived ids remembered per kind
    pub tombstones: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            quake_capacity: 50,
            cluster_capacity: 50,
            station_ttl_secs: 300,
            tombstones: DEFAULT_TOMBSTONES,
        }
    }
}

impl TrackingConfig {
    /// Eviction policy for earthquakes
    #[must_use]
    pub fn quake_policy(&self) -> EvictionPolicy {
        EvictionPolicy::Capacity(self.quake_capacity)
    }

    /// Eviction policy for clusters
    #[must_use]
    pub fn cluster_policy(&self) -> EvictionPolicy {
        EvictionPolicy::Capacity(self.cluster_capacity)
    }

    /// Eviction policy for station readings
    #[must_use]
    pub fn station_policy(&self) -> EvictionPolicy {
        EvictionPolicy::SlidingTtl(Duration::from_secs(self.station_ttl_secs))
    }
}

/// Periodic station scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Run the scanner at all
    pub enabled: bool,
    /// Time between scans, in milliseconds
    pub interval_ms: u64,
    /// Readings below this intensity are not evaluated
    pub min_intensity: f64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1_000,
            min_intensity: 100.0,
        }
    }
}

impl ScannerConfig {
    /// Time between scans
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Per-category work queues
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Commands buffered per category before publishers wait
    pub queue_depth: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { queue_depth: 256 }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tracking cache bounds
    pub tracking: TrackingConfig,
    /// Delivery rate limits and timeouts
    pub delivery: DeliveryConfig,
    /// Station scanner
    pub scanner: ScannerConfig,
    /// Work queues
    pub channels: ChannelConfig,
    /// Subscriber cache sizing
    pub subscribers: CacheConfig,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set tracking bounds
    #[must_use]
    pub fn with_tracking(mut self, tracking: TrackingConfig) -> Self {
        self.tracking = tracking;
        self
    }

    /// Set delivery parameters
    #[must_use]
    pub fn with_delivery(mut self, delivery: DeliveryConfig) -> Self {
        self.delivery = delivery;
        self
    }

    /// Set scanner parameters
    #[must_use]
    pub fn with_scanner(mut self, scanner: ScannerConfig) -> Self {
        self.scanner = scanner;
        self
    }

    /// Set queue depth
    #[must_use]
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.channels.queue_depth = depth;
        self
    }

    /// Parse and validate TOML
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(bool, &'static str); 9] = [
            (self.tracking.quake_capacity > 0, "tracking.quake_capacity"),
            (self.tracking.cluster_capacity > 0, "tracking.cluster_capacity"),
            (self.tracking.station_ttl_secs > 0, "tracking.station_ttl_secs"),
            (self.delivery.rate_per_second > 0, "delivery.rate_per_second"),
            (self.delivery.burst > 0, "delivery.burst"),
            (self.delivery.request_timeout_secs > 0, "delivery.request_timeout_secs"),
            (self.delivery.fan_out_concurrency > 0, "delivery.fan_out_concurrency"),
            (self.channels.queue_depth > 0, "channels.queue_depth"),
            (self.scanner.interval_ms > 0, "scanner.interval_ms"),
        ];
        for (ok, field) in checks {
            if !ok {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero",
                });
            }
        }
        if !self.scanner.min_intensity.is_finite() {
            return Err(ConfigError::Invalid {
                field: "scanner.min_intensity",
                reason: "must be finite",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tracking.quake_policy(), EvictionPolicy::Capacity(50));
        assert_eq!(
            config.tracking.station_policy(),
            EvictionPolicy::SlidingTtl(Duration::from_secs(300))
        );
        assert_eq!(config.delivery.rate_per_second, 30);
        assert_eq!(config.channels.queue_depth, 256);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [tracking]
            quake_capacity = 10

            [delivery]
            rate_per_second = 5
            burst = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.tracking.quake_capacity, 10);
        assert_eq!(config.tracking.cluster_capacity, 50);
        assert_eq!(config.delivery.rate_per_second, 5);
        assert_eq!(config.delivery.request_timeout_secs, 10);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = EngineConfig::from_toml_str("[tracking]\ncluster_capacity = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "tracking.cluster_capacity",
                ..
            }
        ));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[channels]\nqueue_depth = 8").unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.channels.queue_depth, 8);

        assert!(matches!(
            EngineConfig::load("/nonexistent/quake.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
