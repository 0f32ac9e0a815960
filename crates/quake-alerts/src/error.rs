//! Error types for the alert engine

use quake_model::EntityKind;
use quake_subscribers::CacheError;
use std::path::PathBuf;

/// Engine operation failures
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Subscriber lookup failed; the affected fan-out was skipped
    #[error("subscriber lookup failed: {0}")]
    Subscribers(#[from] CacheError),

    /// The category worker is gone (engine shut down)
    #[error("{0} channel closed")]
    ChannelClosed(EntityKind),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Rendering failures; the affected delivery is skipped
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// Snapshot carries values that cannot be presented
    #[error("malformed snapshot: {0}")]
    Malformed(String),

    /// Attachment could not be produced
    #[error("attachment failed: {0}")]
    Attachment(String),
}

/// Configuration failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// TOML did not parse
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Value out of range
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Dotted field path
        field: &'static str,
        /// What is wrong with it
        reason: &'static str,
    },
}

/// Result alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
