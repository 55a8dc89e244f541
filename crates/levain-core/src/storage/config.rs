//! TOML-based engine configuration.
//!
//! Stores the tunables of every engine component:
//! - Scheduler timing (debounce window, heads-up lead, missed-check delay)
//! - Reconciliation grace period
//! - Time-zone and Do-Not-Disturb polling
//! - Dispatch profiles (vibration patterns, low-priority sound)
//! - Recalibration constants
//! - HTTP server bind address
//!
//! Configuration is stored at `~/.config/levain/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::ConfigError;

/// Scheduler timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_heads_up_minutes")]
    pub heads_up_minutes: i64,
    #[serde(default = "default_missed_check_minutes")]
    pub missed_check_minutes: i64,
    #[serde(default = "default_adaptive_interval")]
    pub adaptive_check_interval_minutes: u32,
}

/// Start-up reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Records overdue by more than this are dropped without dispatch.
    #[serde(default = "default_expiry_grace_minutes")]
    pub expiry_grace_minutes: i64,
}

/// Time-zone monitor polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimezoneConfig {
    #[serde(default = "default_timezone_poll_minutes")]
    pub poll_interval_minutes: u64,
    #[serde(default = "default_foreground_debounce_ms")]
    pub foreground_debounce_ms: u64,
}

/// Do-Not-Disturb heuristic.
///
/// The quiet window wraps midnight when `quiet_start_hour > quiet_end_hour`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DndConfig {
    #[serde(default = "default_dnd_poll_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_quiet_start")]
    pub quiet_start_hour: u32,
    #[serde(default = "default_quiet_end")]
    pub quiet_end_hour: u32,
}

/// Delivery profiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default = "default_high_vibration")]
    pub high_priority_vibration: Vec<u32>,
    #[serde(default = "default_low_vibration")]
    pub low_priority_vibration: Vec<u32>,
    /// Play the gentle tone for low-priority alerts too.
    #[serde(default)]
    pub low_priority_sound: bool,
}

/// Product-tuned recalibration constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalibrationConfig {
    #[serde(default = "default_temperature")]
    pub default_temperature_c: f64,
    #[serde(default = "default_humidity")]
    pub default_humidity_pct: f64,
    #[serde(default = "default_cold_threshold")]
    pub cold_threshold_c: f64,
    #[serde(default = "default_cold_base")]
    pub cold_base_minutes: f64,
    #[serde(default = "default_cold_per_degree")]
    pub cold_minutes_per_degree: f64,
    #[serde(default = "default_warm_threshold")]
    pub warm_threshold_c: f64,
    #[serde(default = "default_warm_base")]
    pub warm_base_minutes: f64,
    #[serde(default = "default_warm_per_degree")]
    pub warm_minutes_per_degree: f64,
    /// humidity >= this
    #[serde(default = "default_humid_min")]
    pub humid_min_pct: f64,
    #[serde(default = "default_humid_multiplier")]
    pub humid_multiplier: f64,
    /// moist_min <= humidity < humid_min
    #[serde(default = "default_moist_min")]
    pub moist_min_pct: f64,
    #[serde(default = "default_moist_multiplier")]
    pub moist_multiplier: f64,
    /// humidity <= this
    #[serde(default = "default_very_dry_max")]
    pub very_dry_max_pct: f64,
    #[serde(default = "default_very_dry_multiplier")]
    pub very_dry_multiplier: f64,
    /// very_dry_max < humidity <= dry_max
    #[serde(default = "default_dry_max")]
    pub dry_max_pct: f64,
    #[serde(default = "default_dry_multiplier")]
    pub dry_multiplier: f64,
}

/// HTTP surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

/// Engine configuration.
///
/// Serialized to/from TOML at `~/.config/levain/config.toml`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub timezone: TimezoneConfig,
    #[serde(default)]
    pub dnd: DndConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub recalibration: RecalibrationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

// Default functions
fn default_debounce_ms() -> u64 {
    500
}
fn default_heads_up_minutes() -> i64 {
    5
}
fn default_missed_check_minutes() -> i64 {
    10
}
fn default_adaptive_interval() -> u32 {
    30
}
fn default_expiry_grace_minutes() -> i64 {
    30
}
fn default_timezone_poll_minutes() -> u64 {
    5
}
fn default_foreground_debounce_ms() -> u64 {
    1000
}
fn default_dnd_poll_secs() -> u64 {
    30
}
fn default_quiet_start() -> u32 {
    21
}
fn default_quiet_end() -> u32 {
    7
}
fn default_icon() -> String {
    "levain-icon".into()
}
fn default_high_vibration() -> Vec<u32> {
    vec![300, 100, 300, 100, 300]
}
fn default_low_vibration() -> Vec<u32> {
    vec![100]
}
fn default_temperature() -> f64 {
    24.0
}
fn default_humidity() -> f64 {
    65.0
}
fn default_cold_threshold() -> f64 {
    22.0
}
fn default_cold_base() -> f64 {
    20.0
}
fn default_cold_per_degree() -> f64 {
    5.0
}
fn default_warm_threshold() -> f64 {
    26.0
}
fn default_warm_base() -> f64 {
    15.0
}
fn default_warm_per_degree() -> f64 {
    3.0
}
fn default_humid_min() -> f64 {
    70.0
}
fn default_humid_multiplier() -> f64 {
    0.85
}
fn default_moist_min() -> f64 {
    55.0
}
fn default_moist_multiplier() -> f64 {
    0.90
}
fn default_very_dry_max() -> f64 {
    30.0
}
fn default_very_dry_multiplier() -> f64 {
    1.15
}
fn default_dry_max() -> f64 {
    40.0
}
fn default_dry_multiplier() -> f64 {
    1.10
}
fn default_bind() -> String {
    "127.0.0.1:8787".into()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            heads_up_minutes: default_heads_up_minutes(),
            missed_check_minutes: default_missed_check_minutes(),
            adaptive_check_interval_minutes: default_adaptive_interval(),
        }
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            expiry_grace_minutes: default_expiry_grace_minutes(),
        }
    }
}

impl Default for TimezoneConfig {
    fn default() -> Self {
        Self {
            poll_interval_minutes: default_timezone_poll_minutes(),
            foreground_debounce_ms: default_foreground_debounce_ms(),
        }
    }
}

impl Default for DndConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_dnd_poll_secs(),
            quiet_start_hour: default_quiet_start(),
            quiet_end_hour: default_quiet_end(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            icon: default_icon(),
            high_priority_vibration: default_high_vibration(),
            low_priority_vibration: default_low_vibration(),
            low_priority_sound: false,
        }
    }
}

impl Default for RecalibrationConfig {
    fn default() -> Self {
        Self {
            default_temperature_c: default_temperature(),
            default_humidity_pct: default_humidity(),
            cold_threshold_c: default_cold_threshold(),
            cold_base_minutes: default_cold_base(),
            cold_minutes_per_degree: default_cold_per_degree(),
            warm_threshold_c: default_warm_threshold(),
            warm_base_minutes: default_warm_base(),
            warm_minutes_per_degree: default_warm_per_degree(),
            humid_min_pct: default_humid_min(),
            humid_multiplier: default_humid_multiplier(),
            moist_min_pct: default_moist_min(),
            moist_multiplier: default_moist_multiplier(),
            very_dry_max_pct: default_very_dry_max(),
            very_dry_multiplier: default_very_dry_multiplier(),
            dry_max_pct: default_dry_max(),
            dry_multiplier: default_dry_multiplier(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl EngineConfig {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let (parents, leaf) = match key.rsplit_once('.') {
            Some((parents, leaf)) => (Some(parents), leaf),
            None => (None, key),
        };
        if leaf.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        if let Some(parents) = parents {
            for part in parents.split('.') {
                current = current.get_mut(part).ok_or_else(unknown)?;
            }
        }

        let obj = current.as_object_mut().ok_or_else(unknown)?;
        let existing = obj.get(leaf).ok_or_else(unknown)?;

        let new_value = match existing {
            serde_json::Value::Bool(_) => serde_json::Value::Bool(
                value
                    .parse::<bool>()
                    .map_err(|e| invalid(e.to_string()))?,
            ),
            serde_json::Value::Number(_) => {
                if let Ok(n) = value.parse::<i64>() {
                    serde_json::Value::Number(n.into())
                } else if let Ok(n) = value.parse::<f64>() {
                    serde_json::Number::from_f64(n)
                        .map(serde_json::Value::Number)
                        .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                } else {
                    return Err(invalid(format!("cannot parse '{value}' as number")));
                }
            }
            serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
            }
            _ => serde_json::Value::String(value.into()),
        };

        obj.insert(leaf.to_string(), new_value);
        Ok(())
    }

    /// `<data_dir>/config.toml`
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default location, writing defaults if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(_) => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
        }
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key in memory. Returns error if key is unknown
    /// or the value has the wrong shape.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        Ok(())
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}
