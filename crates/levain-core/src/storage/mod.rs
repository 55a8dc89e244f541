mod bakes;
mod config;
mod kv;

pub use bakes::{BakeStorage, MemoryBakeStorage, SqliteBakeStorage};
pub use config::{
    DispatchConfig, DndConfig, EngineConfig, RecalibrationConfig, ReconciliationConfig,
    SchedulerConfig, ServerConfig, TimezoneConfig,
};
pub use kv::{MemoryStore, SqliteStore};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/levain[-dev]/` based on LEVAIN_ENV.
///
/// Set LEVAIN_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("LEVAIN_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("levain-dev")
    } else {
        base_dir.join("levain")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(e.to_string()))?;
    Ok(dir)
}
