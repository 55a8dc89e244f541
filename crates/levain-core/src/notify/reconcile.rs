//! Start-up reconciliation of persisted scheduling intent.
//!
//! After an unknown gap (restart, suspend) every persisted record is
//! classified by `delta = scheduled_time - now`:
//!
//! ```text
//! delta < -grace          expired: dropped, no dispatch
//! -grace <= delta <= 0    missed: one "N minutes late" dispatch, dropped
//! delta > 0, active       re-armed for exactly delta, kept
//! delta > 0, inactive     dropped
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Alert, AlertKind, NotificationScheduler, ScheduledNotification};
use crate::events::{EngineEvent, EventBus};
use crate::storage::ReconciliationConfig;

/// A missed record together with how late it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissedRecord {
    pub record: ScheduledNotification,
    pub minutes_late: i64,
}

/// Classification of every persisted record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    pub rearm: Vec<ScheduledNotification>,
    pub missed: Vec<MissedRecord>,
    pub expired: Vec<ScheduledNotification>,
    /// Future but inactive records.
    pub dropped: Vec<ScheduledNotification>,
}

/// Counts reported to the UI after reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub rescheduled: usize,
    pub expired: usize,
    pub missed: usize,
}

#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    grace: Duration,
}

impl ReconciliationEngine {
    pub fn new(config: &ReconciliationConfig) -> Self {
        Self {
            grace: Duration::minutes(config.expiry_grace_minutes),
        }
    }

    /// Classify records against `now`. Pure.
    pub fn plan(
        &self,
        records: impl IntoIterator<Item = ScheduledNotification>,
        now: DateTime<Utc>,
    ) -> ReconciliationPlan {
        let mut plan = ReconciliationPlan::default();
        for record in records {
            let delta = record.scheduled_time - now;
            if delta < -self.grace {
                plan.expired.push(record);
            } else if delta <= Duration::zero() {
                plan.missed.push(MissedRecord {
                    minutes_late: (-delta).num_minutes(),
                    record,
                });
            } else if record.is_active {
                plan.rearm.push(record);
            } else {
                plan.dropped.push(record);
            }
        }
        plan.rearm.sort_by_key(|r| r.scheduled_time);
        plan.missed.sort_by_key(|m| m.record.scheduled_time);
        plan
    }

    /// Reconcile the scheduler's loaded records.
    ///
    /// Missed records are dispatched, future active records re-armed, the
    /// pruned set persisted, and one summary event emitted.
    pub fn run(
        &self,
        scheduler: &NotificationScheduler,
        events: &EventBus,
        now: DateTime<Utc>,
    ) -> ReconciliationSummary {
        let plan = self.plan(scheduler.records(), now);

        for missed in &plan.missed {
            let record = &missed.record;
            let alert = Alert::new(
                AlertKind::Missed {
                    original: record.notification_type,
                    minutes_late: missed.minutes_late,
                },
                record.step_name.clone(),
                Some(record.bake_id.clone()),
            );
            scheduler.dispatcher().dispatch(&alert);
        }

        let summary = ReconciliationSummary {
            rescheduled: scheduler.restore(plan.rearm),
            expired: plan.expired.len(),
            missed: plan.missed.len(),
        };

        info!(
            rescheduled = summary.rescheduled,
            expired = summary.expired,
            missed = summary.missed,
            dropped = plan.dropped.len(),
            "reconciliation complete"
        );
        events.emit(EngineEvent::ReconciliationSummary {
            rescheduled: summary.rescheduled,
            expired: summary.expired,
            missed: summary.missed,
            at: now,
        });
        summary
    }
}
