//! Bake-side entities owned by the storage and sensor collaborators.
//!
//! The engine reads these and appends to a bake's adjustment history;
//! it never rewrites existing history entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One audit entry in a bake's append-only adjustment history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineAdjustment {
    pub timestamp: DateTime<Utc>,
    pub adjustment_minutes: f64,
    pub reason: String,
}

/// One in-progress execution of a recipe's step sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bake {
    pub id: String,
    #[serde(default)]
    pub recipe_name: String,
    pub current_step: u32,
    pub start_time: DateTime<Utc>,
    pub estimated_end_time: DateTime<Utc>,
    #[serde(default)]
    pub timeline_adjustments: Vec<TimelineAdjustment>,
}

/// Partial update accepted by `BakeStorage::update_bake`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BakePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline_adjustments: Option<Vec<TimelineAdjustment>>,
}

impl Bake {
    /// Apply a patch in place.
    pub fn apply(&mut self, patch: BakePatch) {
        if let Some(step) = patch.current_step {
            self.current_step = step;
        }
        if let Some(end) = patch.estimated_end_time {
            self.estimated_end_time = end;
        }
        if let Some(adjustments) = patch.timeline_adjustments {
            self.timeline_adjustments = adjustments;
        }
    }
}

/// Latest environmental reading.
///
/// Temperature is in tenths of a degree Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorReading {
    pub temperature: Option<i32>,
    pub humidity: Option<i32>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Active,
    Completed,
    Skipped,
}

/// One stage of a bake as described by the caller.
///
/// A step without an estimated duration is adaptive: the user is
/// reminded periodically to check readiness instead of getting an end
/// alarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineStep {
    pub step_index: u32,
    pub name: String,
    pub estimated_duration_minutes: Option<u32>,
    #[serde(default)]
    pub optimal_temperature: Option<f64>,
    #[serde(default)]
    pub optimal_humidity: Option<f64>,
    pub status: StepStatus,
}

impl TimelineStep {
    pub fn is_adaptive(&self) -> bool {
        self.estimated_duration_minutes.is_none()
    }

    pub fn is_outstanding(&self) -> bool {
        matches!(self.status, StepStatus::Pending | StepStatus::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bake_serializes_camel_case() {
        let bake = Bake {
            id: "b1".into(),
            recipe_name: "Country loaf".into(),
            current_step: 2,
            start_time: "2026-03-01T08:00:00Z".parse().unwrap(),
            estimated_end_time: "2026-03-01T16:00:00Z".parse().unwrap(),
            timeline_adjustments: vec![],
        };
        let json = serde_json::to_value(&bake).unwrap();
        assert!(json.get("estimatedEndTime").is_some());
        assert!(json.get("timelineAdjustments").is_some());
    }

    #[test]
    fn patch_only_touches_present_fields() {
        let mut bake = Bake {
            id: "b1".into(),
            recipe_name: String::new(),
            current_step: 1,
            start_time: "2026-03-01T08:00:00Z".parse().unwrap(),
            estimated_end_time: "2026-03-01T16:00:00Z".parse().unwrap(),
            timeline_adjustments: vec![],
        };
        bake.apply(BakePatch {
            current_step: Some(3),
            ..BakePatch::default()
        });
        assert_eq!(bake.current_step, 3);
        assert_eq!(
            bake.estimated_end_time,
            "2026-03-01T16:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }
}
