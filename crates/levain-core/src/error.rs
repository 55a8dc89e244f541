//! Core error types for levain-core.
//!
//! Capability failures inside the notification engine are logged and
//! degraded rather than returned; the types here cover the surfaces that
//! do report errors (stores, configuration, bake storage, the HTTP layer).

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for levain-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Durable key-value store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Bake storage collaborator errors
    #[error("Bake storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Errors raised by a [`DurableStore`](crate::capability::DurableStore).
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite-backed store failed
    #[error("SQLite failure: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Store could not be reached at all
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while presenting a system notification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The user has not granted notification permission
    #[error("Notification permission denied")]
    PermissionDenied,

    /// The platform rejected the notification
    #[error("Notification presentation failed: {0}")]
    PresentFailed(String),
}

/// Errors raised by the bake storage collaborator.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No bake exists with the given id
    #[error("Bake '{0}' not found")]
    NotFound(String),

    /// Backend failure (database, serialization)
    #[error("Storage backend failure: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Errors raised by the sensor collaborator.
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Sensor unavailable: {0}")]
    Unavailable(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Unknown dot-path key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Data directory could not be resolved or created
    #[error("Failed to access data directory: {0}")]
    DataDir(String),
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
