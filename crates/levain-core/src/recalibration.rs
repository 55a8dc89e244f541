//! Environmental recalibration of a bake's estimated end time.
//!
//! Warm dough ferments faster, cold dough slower; humid air speeds the
//! remaining proof up, dry air slows it down. The rules are fixed,
//! product-tuned bands read from [`RecalibrationConfig`]:
//!
//! ```text
//! temp < 22°C          tempAdj = +(20 + (22 - temp) * 5)
//! temp > 26°C          tempAdj = -(15 + (temp - 26) * 3)
//! humidity >= 70       x0.85   (first match wins, in this order)
//! 55 <= humidity < 70  x0.90
//! humidity <= 30       x1.15
//! 30 < humidity <= 40  x1.10
//! ```
//!
//! The humidity multiplier scales the minutes still remaining until the
//! current estimate. Every run appends exactly one audit entry to the
//! bake, including runs with no reading and runs that change nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::bake::{Bake, BakePatch, SensorReading, TimelineAdjustment};
use crate::capability::Clock;
use crate::error::{SensorError, StorageError};
use crate::storage::{BakeStorage, RecalibrationConfig};

/// Outcome of one recalibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recalibration {
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub temperature_adjustment: f64,
    pub humidity_multiplier: f64,
    pub humidity_adjustment: f64,
    pub total_adjustment_minutes: f64,
    pub new_estimated_end: DateTime<Utc>,
    pub reason: String,
}

/// Compute the adjustment for a raw reading.
///
/// `temperature_tenths` is tenths of a degree Celsius. Absent values fall
/// back to the configured defaults.
pub fn recalibrate(
    temperature_tenths: Option<i32>,
    humidity_pct: Option<i32>,
    estimated_end: DateTime<Utc>,
    now: DateTime<Utc>,
    config: &RecalibrationConfig,
) -> Recalibration {
    let temperature_c = temperature_tenths
        .map(|t| f64::from(t) / 10.0)
        .unwrap_or(config.default_temperature_c);
    let humidity = humidity_pct
        .map(f64::from)
        .unwrap_or(config.default_humidity_pct);

    let mut reason = Vec::new();
    match (temperature_tenths, humidity_pct) {
        (None, None) => reason.push(format!(
            "No sensor reading available; assumed {:.1}°C and {:.0}% humidity.",
            temperature_c, humidity
        )),
        (t, h) => {
            reason.push(format!(
                "Reading {:.1}°C / {:.0}% humidity.",
                temperature_c, humidity
            ));
            if t.is_none() {
                reason.push(format!("Temperature missing, assumed {:.1}°C.", temperature_c));
            }
            if h.is_none() {
                reason.push(format!("Humidity missing, assumed {:.0}%.", humidity));
            }
        }
    }

    let temperature_adjustment = if temperature_c < config.cold_threshold_c {
        let adj = config.cold_base_minutes
            + (config.cold_threshold_c - temperature_c) * config.cold_minutes_per_degree;
        reason.push(format!(
            "Cold dough ({:.1}°C < {}°C): {:+.1} min.",
            temperature_c, config.cold_threshold_c, adj
        ));
        adj
    } else if temperature_c > config.warm_threshold_c {
        let adj = -(config.warm_base_minutes
            + (temperature_c - config.warm_threshold_c) * config.warm_minutes_per_degree);
        reason.push(format!(
            "Warm dough ({:.1}°C > {}°C): {:+.1} min.",
            temperature_c, config.warm_threshold_c, adj
        ));
        adj
    } else {
        reason.push(format!(
            "Temperature {:.1}°C within range: no change.",
            temperature_c
        ));
        0.0
    };

    let humidity_multiplier = humidity_multiplier(humidity, config);
    let humidity_adjustment = if humidity_multiplier != 1.0 {
        let remaining = remaining_minutes(estimated_end, now);
        let adj = remaining * (humidity_multiplier - 1.0);
        reason.push(format!(
            "Humidity {:.0}% (x{:.2} over {:.1} remaining min): {:+.1} min.",
            humidity, humidity_multiplier, remaining, adj
        ));
        adj
    } else {
        reason.push(format!("Humidity {:.0}% neutral: no change.", humidity));
        0.0
    };

    let total_adjustment_minutes = temperature_adjustment + humidity_adjustment;
    reason.push(format!("Total {:+.1} min.", total_adjustment_minutes));

    Recalibration {
        temperature_c,
        humidity_pct: humidity,
        temperature_adjustment,
        humidity_multiplier,
        humidity_adjustment,
        total_adjustment_minutes,
        new_estimated_end: estimated_end + minutes(total_adjustment_minutes),
        reason: reason.join(" "),
    }
}

/// [`recalibrate`] for an optional sensor reading.
pub fn recalibrate_reading(
    reading: Option<&SensorReading>,
    estimated_end: DateTime<Utc>,
    now: DateTime<Utc>,
    config: &RecalibrationConfig,
) -> Recalibration {
    recalibrate(
        reading.and_then(|r| r.temperature),
        reading.and_then(|r| r.humidity),
        estimated_end,
        now,
        config,
    )
}

/// Recalibrate a bake: new estimated end plus one appended audit entry.
pub fn apply_recalibration(
    bake: &Bake,
    reading: Option<&SensorReading>,
    now: DateTime<Utc>,
    config: &RecalibrationConfig,
) -> Bake {
    let result = recalibrate_reading(reading, bake.estimated_end_time, now, config);
    let mut updated = bake.clone();
    updated.estimated_end_time = result.new_estimated_end;
    updated.timeline_adjustments.push(TimelineAdjustment {
        timestamp: now,
        adjustment_minutes: result.total_adjustment_minutes,
        reason: result.reason,
    });
    updated
}

/// First matching band wins.
fn humidity_multiplier(humidity: f64, config: &RecalibrationConfig) -> f64 {
    if humidity >= config.humid_min_pct {
        config.humid_multiplier
    } else if humidity >= config.moist_min_pct {
        config.moist_multiplier
    } else if humidity <= config.very_dry_max_pct {
        config.very_dry_multiplier
    } else if humidity <= config.dry_max_pct {
        config.dry_multiplier
    } else {
        1.0
    }
}

fn remaining_minutes(estimated_end: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    ((estimated_end - now).num_milliseconds() as f64 / 60_000.0).max(0.0)
}

fn minutes(value: f64) -> Duration {
    Duration::milliseconds((value * 60_000.0).round() as i64)
}

/// Sensor collaborator.
#[async_trait]
pub trait SensorSource: Send + Sync {
    async fn latest_reading(&self) -> Result<Option<SensorReading>, SensorError>;
}

/// Sensor that always reports the same values (or nothing).
#[derive(Debug, Clone, Default)]
pub struct StaticSensor {
    pub temperature: Option<i32>,
    pub humidity: Option<i32>,
}

#[async_trait]
impl SensorSource for StaticSensor {
    async fn latest_reading(&self) -> Result<Option<SensorReading>, SensorError> {
        if self.temperature.is_none() && self.humidity.is_none() {
            return Ok(None);
        }
        Ok(Some(SensorReading {
            temperature: self.temperature,
            humidity: self.humidity,
            timestamp: Utc::now(),
        }))
    }
}

/// Loads a bake, recalibrates it from the latest reading, stores it back.
///
/// Runs for the same bake are serialized, so concurrent requests each
/// append their own entry on top of the previous one.
#[derive(Clone)]
pub struct RecalibrationService {
    storage: Arc<dyn BakeStorage>,
    sensor: Arc<dyn SensorSource>,
    clock: Arc<dyn Clock>,
    config: RecalibrationConfig,
    in_flight: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl RecalibrationService {
    pub fn new(
        storage: Arc<dyn BakeStorage>,
        sensor: Arc<dyn SensorSource>,
        clock: Arc<dyn Clock>,
        config: RecalibrationConfig,
    ) -> Self {
        Self {
            storage,
            sensor,
            clock,
            config,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn bake_lock(&self, bake_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(bake_id.to_string())
            .or_default()
            .clone()
    }

    /// Forget the bake's lock once nobody else holds it.
    fn release(&self, bake_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        if in_flight
            .get(bake_id)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            in_flight.remove(bake_id);
        }
    }

    /// # Errors
    /// `StorageError::NotFound` when the bake does not exist; any other
    /// storage failure as `StorageError::Backend`. Sensor failures are
    /// never errors: they recalibrate as "no reading".
    pub async fn recalibrate_bake(&self, bake_id: &str) -> Result<Bake, StorageError> {
        let lock = self.bake_lock(bake_id);
        let result = {
            let _guard = lock.lock().await;
            self.recalibrate_locked(bake_id).await
        };
        self.release(bake_id, lock);
        result
    }

    async fn recalibrate_locked(&self, bake_id: &str) -> Result<Bake, StorageError> {
        let bake = self
            .storage
            .get_bake(bake_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(bake_id.to_string()))?;

        let reading = match self.sensor.latest_reading().await {
            Ok(reading) => reading,
            Err(e) => {
                warn!(bake_id, error = %e, "sensor unavailable, recalibrating without reading");
                None
            }
        };

        let updated = apply_recalibration(&bake, reading.as_ref(), self.clock.now(), &self.config);
        let adjustment = updated
            .timeline_adjustments
            .last()
            .map(|a| a.adjustment_minutes)
            .unwrap_or_default();
        info!(
            bake_id,
            adjustment_minutes = adjustment,
            estimated_end = %updated.estimated_end_time,
            "bake recalibrated"
        );

        self.storage
            .update_bake(
                bake_id,
                BakePatch {
                    estimated_end_time: Some(updated.estimated_end_time),
                    timeline_adjustments: Some(updated.timeline_adjustments),
                    ..BakePatch::default()
                },
            )
            .await
    }
}
