//! Bake-timeline notifications.
//!
//! ## Architecture
//!
//! - [`NotificationScheduler`]: turns a step into timed fire events,
//!   debounces rapid reschedules, owns every outstanding timer
//! - [`NotificationDispatcher`]: picks the delivery path and alert profile
//! - [`ReconciliationEngine`]: replays persisted intent after a restart
//!
//! Only alarms that represent scheduling intent (start, end, bedtime,
//! wakeup, adaptive start) are persisted as [`ScheduledNotification`]
//! records; heads-up, missed-check and adaptive-check timers are purely
//! in-memory.

mod dispatcher;
mod records;
mod reconcile;
mod scheduler;

pub use dispatcher::{DeliveryPath, NotificationDispatcher};
pub use records::{load_records, save_records, SCHEDULE_KEY};
pub use reconcile::{
    MissedRecord, ReconciliationEngine, ReconciliationPlan, ReconciliationSummary,
};
pub use scheduler::{
    AlarmSlot, ArmedAlarm, NotificationScheduler, ScheduleOptions, StepAlarmRequest,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted kind of scheduling intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Start,
    End,
    Bedtime,
    Wakeup,
    Adaptive,
}

/// Durable record of one armed, persisted alarm.
///
/// Never mutated in place: rescheduling replaces the record, firing or
/// cancelling deletes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledNotification {
    pub id: String,
    pub step_id: String,
    pub step_name: String,
    pub scheduled_time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub bake_id: String,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptive_interval_minutes: Option<u32>,
}

impl ScheduledNotification {
    /// Active and still in the future.
    pub fn is_pending(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.scheduled_time > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Needs interaction, pronounced vibration, audible.
    High,
    /// Non-blocking, silent unless overridden.
    Low,
}

/// What a dispatched alert is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertKind {
    HeadsUp,
    Start,
    End,
    MissedCheck,
    Bedtime,
    Wakeup,
    AdaptiveStart,
    AdaptiveCheck { check: u32 },
    /// Persisted alarm whose fire time passed while the process was away.
    Missed {
        original: NotificationType,
        minutes_late: i64,
    },
    TimezoneChange {
        from: String,
        to: String,
        affected: usize,
    },
}

impl AlertKind {
    pub fn priority(&self) -> Priority {
        match self {
            AlertKind::Start
            | AlertKind::End
            | AlertKind::MissedCheck
            | AlertKind::Missed { .. }
            | AlertKind::Wakeup
            | AlertKind::AdaptiveStart
            | AlertKind::TimezoneChange { .. } => Priority::High,
            AlertKind::HeadsUp | AlertKind::Bedtime | AlertKind::AdaptiveCheck { .. } => {
                Priority::Low
            }
        }
    }

    /// Stable short name, used in notification tags.
    pub fn label(&self) -> &'static str {
        match self {
            AlertKind::HeadsUp => "heads-up",
            AlertKind::Start => "start",
            AlertKind::End => "end",
            AlertKind::MissedCheck => "missed-check",
            AlertKind::Bedtime => "bedtime",
            AlertKind::Wakeup => "wakeup",
            AlertKind::AdaptiveStart => "adaptive-start",
            AlertKind::AdaptiveCheck { .. } => "adaptive-check",
            AlertKind::Missed { .. } => "missed",
            AlertKind::TimezoneChange { .. } => "timezone-change",
        }
    }
}

/// A fully described alert ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub step_name: String,
    pub bake_id: Option<String>,
    pub title: String,
    pub body: String,
}

impl Alert {
    pub fn new(kind: AlertKind, step_name: impl Into<String>, bake_id: Option<String>) -> Self {
        let step_name = step_name.into();
        let (title, body) = match &kind {
            AlertKind::HeadsUp => (
                format!("Coming up: {step_name}"),
                format!("{step_name} starts in a few minutes."),
            ),
            AlertKind::Start => (
                format!("Time for {step_name}"),
                format!("{step_name} should start now."),
            ),
            AlertKind::End => (
                format!("{step_name} is done"),
                format!("{step_name} has reached its planned end."),
            ),
            AlertKind::MissedCheck => (
                format!("Did you start {step_name}?"),
                format!("{step_name} was due a while ago and hasn't been acknowledged."),
            ),
            AlertKind::Bedtime => (
                format!("Overnight: {step_name}"),
                format!("{step_name} runs overnight. Sleep well."),
            ),
            AlertKind::Wakeup => (
                format!("Good morning: {step_name}"),
                format!("Check on {step_name}."),
            ),
            AlertKind::AdaptiveStart => (
                format!("Start {step_name}"),
                format!("{step_name} has no fixed time. You'll get readiness reminders."),
            ),
            AlertKind::AdaptiveCheck { check } => (
                format!("Check {step_name}"),
                format!("Readiness check #{check} for {step_name}."),
            ),
            AlertKind::Missed {
                original,
                minutes_late,
            } => (
                format!("Missed: {step_name}"),
                format!(
                    "{step_name} ({}) was due {minutes_late} minutes ago.",
                    type_label(*original)
                ),
            ),
            AlertKind::TimezoneChange { from, to, affected } => (
                "Time zone changed".to_string(),
                format!(
                    "Your time zone changed from {from} to {to}. {affected} scheduled alarm(s) may be affected."
                ),
            ),
        };
        Self {
            kind,
            step_name,
            bake_id,
            title,
            body,
        }
    }

    pub fn priority(&self) -> Priority {
        self.kind.priority()
    }

    /// Notification tag; a newer alert with the same tag replaces the older.
    pub fn tag(&self) -> String {
        match &self.bake_id {
            Some(bake) => format!("levain-{bake}-{}-{}", self.step_name, self.kind.label()),
            None => format!("levain-{}", self.kind.label()),
        }
    }
}

fn type_label(kind: NotificationType) -> &'static str {
    match kind {
        NotificationType::Start => "start",
        NotificationType::End => "end",
        NotificationType::Bedtime => "bedtime",
        NotificationType::Wakeup => "wake-up",
        NotificationType::Adaptive => "adaptive start",
    }
}
