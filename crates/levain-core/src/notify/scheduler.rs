//! Step alarm scheduling.
//!
//! A [`StepAlarmRequest`] is debounced per step (trailing edge, last call
//! wins) and then expanded into independent one-shot timers:
//!
//! ```text
//! standard   heads-up (start - 5m)   start   missed-check (start + 10m)   [end]
//! overnight  bedtime                 wakeup
//! adaptive   adaptive-start  -> check #1 -> check #2 -> ... every interval
//! ```
//!
//! All mutable state (armed timers, pending debounced requests, the
//! in-memory mirror of persisted records) lives behind one mutex owned by
//! the scheduler instance. Each armed timer carries a token; a callback
//! whose token no longer matches the armed entry was cancelled or replaced
//! and does nothing.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dispatcher::NotificationDispatcher;
use super::records::{load_records, save_records};
use super::{Alert, AlertKind, NotificationType, ScheduledNotification};
use crate::bake::TimelineStep;
use crate::capability::{
    delay_until, Clock, DurableStore, EngineCapabilities, TimerHandle, TimerPrimitive,
};
use crate::storage::SchedulerConfig;

/// Optional shape of a step's alarms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleOptions {
    #[serde(default)]
    pub is_overnight: bool,
    #[serde(default)]
    pub bedtime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub wakeup: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_adaptive: bool,
    /// Minutes between readiness checks; the configured interval if unset.
    #[serde(default)]
    pub adaptive_check_interval: Option<u32>,
    /// Also arm a persisted end alarm at `start + duration`.
    #[serde(default)]
    pub notify_end: bool,
}

impl ScheduleOptions {
    pub fn overnight(bedtime: DateTime<Utc>, wakeup: DateTime<Utc>) -> Self {
        Self {
            is_overnight: true,
            bedtime: Some(bedtime),
            wakeup: Some(wakeup),
            ..Self::default()
        }
    }

    pub fn adaptive(check_interval: Option<u32>) -> Self {
        Self {
            is_adaptive: true,
            adaptive_check_interval: check_interval,
            ..Self::default()
        }
    }

    fn overnight_window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.is_overnight, self.bedtime, self.wakeup) {
            (true, Some(bedtime), Some(wakeup)) => Some((bedtime, wakeup)),
            _ => None,
        }
    }
}

/// One `schedule_step_alarms` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepAlarmRequest {
    pub step_id: String,
    pub step_name: String,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub bake_id: String,
    #[serde(default)]
    pub options: ScheduleOptions,
}

impl StepAlarmRequest {
    pub fn new(
        step_id: impl Into<String>,
        step_name: impl Into<String>,
        start_time: DateTime<Utc>,
        duration_minutes: u32,
        bake_id: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            step_name: step_name.into(),
            start_time,
            duration_minutes,
            bake_id: bake_id.into(),
            options: ScheduleOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ScheduleOptions) -> Self {
        self.options = options;
        self
    }
}

/// Which of a step's timers an entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlarmSlot {
    HeadsUp,
    Start,
    MissedCheck,
    End,
    Bedtime,
    Wakeup,
    AdaptiveStart,
    AdaptiveCheck,
}

impl AlarmSlot {
    /// Persisted type, for slots that represent scheduling intent.
    pub fn persisted_type(self) -> Option<NotificationType> {
        match self {
            AlarmSlot::Start => Some(NotificationType::Start),
            AlarmSlot::End => Some(NotificationType::End),
            AlarmSlot::Bedtime => Some(NotificationType::Bedtime),
            AlarmSlot::Wakeup => Some(NotificationType::Wakeup),
            AlarmSlot::AdaptiveStart => Some(NotificationType::Adaptive),
            AlarmSlot::HeadsUp | AlarmSlot::MissedCheck | AlarmSlot::AdaptiveCheck => None,
        }
    }

    fn for_type(kind: NotificationType) -> Self {
        match kind {
            NotificationType::Start => AlarmSlot::Start,
            NotificationType::End => AlarmSlot::End,
            NotificationType::Bedtime => AlarmSlot::Bedtime,
            NotificationType::Wakeup => AlarmSlot::Wakeup,
            NotificationType::Adaptive => AlarmSlot::AdaptiveStart,
        }
    }

    fn alert_kind(self, check: u32) -> AlertKind {
        match self {
            AlarmSlot::HeadsUp => AlertKind::HeadsUp,
            AlarmSlot::Start => AlertKind::Start,
            AlarmSlot::MissedCheck => AlertKind::MissedCheck,
            AlarmSlot::End => AlertKind::End,
            AlarmSlot::Bedtime => AlertKind::Bedtime,
            AlarmSlot::Wakeup => AlertKind::Wakeup,
            AlarmSlot::AdaptiveStart => AlertKind::AdaptiveStart,
            AlarmSlot::AdaptiveCheck => AlertKind::AdaptiveCheck { check },
        }
    }
}

/// Snapshot of one outstanding timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmedAlarm {
    pub step_id: String,
    pub step_name: String,
    pub bake_id: String,
    pub slot: AlarmSlot,
    pub fire_at: DateTime<Utc>,
}

type SlotKey = (String, AlarmSlot);

struct Armed {
    handle: TimerHandle,
    token: u64,
    fire_at: DateTime<Utc>,
    step_name: String,
    bake_id: String,
    record_id: Option<String>,
    /// Adaptive cadence in minutes (adaptive slots only).
    interval: u32,
    /// Check counter (adaptive-check only).
    check: u32,
}

struct PendingRequest {
    handle: TimerHandle,
    token: u64,
    request: StepAlarmRequest,
}

#[derive(Default)]
struct SchedulerState {
    next_token: u64,
    armed: HashMap<SlotKey, Armed>,
    debounce: HashMap<String, PendingRequest>,
    records: BTreeMap<String, ScheduledNotification>,
}

impl SchedulerState {
    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }
}

/// Fields copied into every alarm armed for a step.
struct AlarmMeta<'a> {
    step_id: &'a str,
    step_name: &'a str,
    bake_id: &'a str,
    interval: u32,
    check: u32,
}

struct SchedulerInner {
    clock: Arc<dyn Clock>,
    timers: Option<Arc<dyn TimerPrimitive>>,
    store: Arc<dyn DurableStore>,
    dispatcher: NotificationDispatcher,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
}

/// Turns step descriptions into timed alerts.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct NotificationScheduler {
    inner: Arc<SchedulerInner>,
}

impl NotificationScheduler {
    /// Build a scheduler, loading persisted records into memory.
    ///
    /// No timers are armed for loaded records; reconciliation does that.
    pub fn new(
        caps: &EngineCapabilities,
        dispatcher: NotificationDispatcher,
        config: SchedulerConfig,
    ) -> Self {
        let records = load_records(caps.store.as_ref());
        Self {
            inner: Arc::new(SchedulerInner {
                clock: caps.clock.clone(),
                timers: caps.timers.clone(),
                store: caps.store.clone(),
                dispatcher,
                config,
                state: Mutex::new(SchedulerState {
                    records,
                    ..SchedulerState::default()
                }),
            }),
        }
    }

    /// Schedule a step's alarms after the debounce window.
    ///
    /// A later call for the same step inside the window replaces this one.
    /// Without a timer primitive this is a logged no-op.
    pub fn schedule_step_alarms(&self, request: StepAlarmRequest) {
        let inner = &self.inner;
        let Some(timers) = inner.timers.clone() else {
            warn!(step_id = %request.step_id, "no timer primitive available, scheduling skipped");
            return;
        };

        let mut state = inner.lock();
        if let Some(previous) = state.debounce.remove(&request.step_id) {
            timers.cancel(previous.handle);
            debug!(step_id = %request.step_id, "debounced earlier schedule request");
        }

        let token = state.token();
        let step_id = request.step_id.clone();
        let weak = Arc::downgrade(inner);
        let callback_step = step_id.clone();
        let handle = timers.schedule(
            Duration::from_millis(inner.config.debounce_ms),
            Box::new(move || {
                if let Some(inner) = Weak::upgrade(&weak) {
                    inner.flush(&callback_step, token);
                }
            }),
        );
        match handle {
            Some(handle) => {
                state.debounce.insert(
                    step_id,
                    PendingRequest {
                        handle,
                        token,
                        request,
                    },
                );
            }
            None => warn!(step_id = %step_id, "timer primitive unavailable, scheduling skipped"),
        }
    }

    /// Schedule every outstanding step of a bake back to back from `start`.
    ///
    /// Step ids are `"{bake_id}:{step_index}"`. Scheduling stops after the
    /// first adaptive step, since later start times are unknown. Returns the
    /// scheduled step ids.
    pub fn schedule_bake_timeline(
        &self,
        bake_id: &str,
        start: DateTime<Utc>,
        steps: &[TimelineStep],
        options: &ScheduleOptions,
    ) -> Vec<String> {
        let mut cursor = start;
        let mut scheduled = Vec::new();
        for step in steps.iter().filter(|s| s.is_outstanding()) {
            let step_id = format!("{bake_id}:{}", step.step_index);
            let duration = step.estimated_duration_minutes.unwrap_or(0);
            let step_options = if step.is_adaptive() {
                ScheduleOptions::adaptive(options.adaptive_check_interval)
            } else {
                ScheduleOptions {
                    notify_end: options.notify_end,
                    ..ScheduleOptions::default()
                }
            };
            self.schedule_step_alarms(
                StepAlarmRequest::new(step_id.clone(), step.name.clone(), cursor, duration, bake_id)
                    .with_options(step_options),
            );
            scheduled.push(step_id);
            if step.is_adaptive() {
                break;
            }
            cursor += chrono::Duration::minutes(i64::from(duration));
        }
        scheduled
    }

    /// Cancel every timer, pending request and persisted record of a step.
    ///
    /// Safe to call when nothing is scheduled.
    pub fn clear_alarm(&self, step_id: &str) {
        let inner = &self.inner;
        let mut state = inner.lock();
        if let Some(pending) = state.debounce.remove(step_id) {
            inner.cancel_handle(pending.handle);
        }
        if inner.clear_step(&mut state, step_id) {
            inner.persist(&state);
        }
    }

    /// [`clear_alarm`](Self::clear_alarm) for every step of a bake.
    pub fn clear_bake(&self, bake_id: &str) {
        let inner = &self.inner;
        let mut state = inner.lock();

        let pending: Vec<String> = state
            .debounce
            .iter()
            .filter(|(_, p)| p.request.bake_id == bake_id)
            .map(|(step, _)| step.clone())
            .collect();
        for step in pending {
            if let Some(p) = state.debounce.remove(&step) {
                inner.cancel_handle(p.handle);
            }
        }

        let mut steps: Vec<String> = state
            .armed
            .iter()
            .filter(|(_, a)| a.bake_id == bake_id)
            .map(|((step, _), _)| step.clone())
            .chain(
                state
                    .records
                    .values()
                    .filter(|r| r.bake_id == bake_id)
                    .map(|r| r.step_id.clone()),
            )
            .collect();
        steps.sort();
        steps.dedup();

        let mut changed = false;
        for step in &steps {
            changed |= inner.clear_step(&mut state, step);
        }
        if changed {
            inner.persist(&state);
        }
        debug!(bake_id, steps = steps.len(), "cleared bake alarms");
    }

    /// Cancel every outstanding timer and pending request.
    ///
    /// Persisted records are kept, so a later start reconciles them.
    pub fn clear_all_alarms(&self) {
        let inner = &self.inner;
        let mut state = inner.lock();
        let armed = state.armed.len();
        for (_, pending) in state.debounce.drain() {
            inner.cancel_handle(pending.handle);
        }
        for (_, alarm) in state.armed.drain() {
            inner.cancel_handle(alarm.handle);
        }
        debug!(armed, "cleared all timers");
    }

    /// Cancel a step's pending missed-check. Returns whether one was armed.
    pub fn acknowledge_step(&self, step_id: &str) -> bool {
        let inner = &self.inner;
        let mut state = inner.lock();
        match state
            .armed
            .remove(&(step_id.to_string(), AlarmSlot::MissedCheck))
        {
            Some(alarm) => {
                inner.cancel_handle(alarm.handle);
                debug!(step_id, "step acknowledged, missed-check cancelled");
                true
            }
            None => false,
        }
    }

    /// Active records still in the future, soonest first.
    pub fn active_notifications(&self, now: DateTime<Utc>) -> Vec<ScheduledNotification> {
        let mut active: Vec<_> = self
            .inner
            .lock()
            .records
            .values()
            .filter(|r| r.is_pending(now))
            .cloned()
            .collect();
        active.sort_by_key(|r| r.scheduled_time);
        active
    }

    /// Every persisted record held in memory.
    pub fn records(&self) -> Vec<ScheduledNotification> {
        self.inner.lock().records.values().cloned().collect()
    }

    /// Outstanding timers, soonest first.
    pub fn armed(&self) -> Vec<ArmedAlarm> {
        let mut armed: Vec<_> = self
            .inner
            .lock()
            .armed
            .iter()
            .map(|((step_id, slot), a)| ArmedAlarm {
                step_id: step_id.clone(),
                step_name: a.step_name.clone(),
                bake_id: a.bake_id.clone(),
                slot: *slot,
                fire_at: a.fire_at,
            })
            .collect();
        armed.sort_by(|a, b| (a.fire_at, a.slot).cmp(&(b.fire_at, b.slot)));
        armed
    }

    /// Whether a debounced request for the step is still waiting.
    pub fn has_pending_request(&self, step_id: &str) -> bool {
        self.inner.lock().debounce.contains_key(step_id)
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.inner.dispatcher
    }

    /// Apply every waiting debounced request now.
    ///
    /// For short-lived callers that exit before the debounce window ends.
    /// Returns the number of requests applied.
    pub fn flush_pending(&self) -> usize {
        let inner = &self.inner;
        let mut state = inner.lock();
        let pending: Vec<PendingRequest> = state.debounce.drain().map(|(_, p)| p).collect();
        for p in &pending {
            inner.cancel_handle(p.handle);
            inner.apply(&mut state, &p.request);
        }
        if !pending.is_empty() {
            inner.persist(&state);
        }
        pending.len()
    }

    /// Replace the record set with `keep` and make sure each record has a
    /// timer.
    ///
    /// Records already backed by a live timer keep it; timers of records
    /// outside `keep` are cancelled. In-memory slots (heads-up,
    /// missed-check, adaptive checks) are left alone. For duplicate records
    /// of one `(step, type)` only the latest is kept. Records whose timer
    /// cannot be armed stay persisted. Returns the number of records kept.
    pub(crate) fn restore(&self, keep: Vec<ScheduledNotification>) -> usize {
        let inner = &self.inner;
        let now = inner.clock.now();
        let mut state = inner.lock();

        let mut latest: HashMap<SlotKey, ScheduledNotification> = HashMap::new();
        for record in keep {
            let key = (
                record.step_id.clone(),
                AlarmSlot::for_type(record.notification_type),
            );
            let superseded = matches!(
                latest.get(&key),
                Some(existing) if existing.scheduled_time > record.scheduled_time
            );
            if superseded {
                debug!(step_id = %record.step_id, id = %record.id, "duplicate record dropped");
            } else if let Some(older) = latest.insert(key, record) {
                debug!(step_id = %older.step_id, id = %older.id, "duplicate record dropped");
            }
        }
        state.records = latest
            .into_values()
            .map(|record| (record.id.clone(), record))
            .collect();

        let stale: Vec<SlotKey> = state
            .armed
            .iter()
            .filter(|(_, a)| {
                a.record_id
                    .as_ref()
                    .is_some_and(|id| !state.records.contains_key(id))
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            if let Some(alarm) = state.armed.remove(&key) {
                inner.cancel_handle(alarm.handle);
            }
        }

        let records: Vec<ScheduledNotification> = state.records.values().cloned().collect();
        let kept = records.len();
        let mut armed = 0;
        for record in &records {
            let slot = AlarmSlot::for_type(record.notification_type);
            let live = state
                .armed
                .get(&(record.step_id.clone(), slot))
                .is_some_and(|a| a.record_id.as_deref() == Some(record.id.as_str()));
            if live {
                continue;
            }
            let slot = AlarmSlot::for_type(record.notification_type);
            let meta = AlarmMeta {
                step_id: &record.step_id,
                step_name: &record.step_name,
                bake_id: &record.bake_id,
                interval: record
                    .adaptive_interval_minutes
                    .unwrap_or(inner.config.adaptive_check_interval_minutes),
                check: 0,
            };
            if inner.arm(&mut state, &meta, slot, record.scheduled_time, now, Some(record.id.clone())) {
                armed += 1;
            }
        }
        inner.persist(&state);
        debug!(kept, armed, "records restored");
        kept
    }
}

impl SchedulerInner {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &SchedulerState) {
        save_records(self.store.as_ref(), &state.records);
    }

    fn cancel_handle(&self, handle: TimerHandle) {
        if let Some(timers) = &self.timers {
            timers.cancel(handle);
        }
    }

    /// Debounce window elapsed: apply the last request for the step.
    fn flush(self: &Arc<Self>, step_id: &str, token: u64) {
        let mut state = self.lock();
        match state.debounce.get(step_id) {
            Some(pending) if pending.token == token => {}
            _ => return,
        }
        let Some(pending) = state.debounce.remove(step_id) else {
            return;
        };
        self.apply(&mut state, &pending.request);
        self.persist(&state);
    }

    fn apply(self: &Arc<Self>, state: &mut SchedulerState, request: &StepAlarmRequest) {
        let now = self.clock.now();
        self.clear_step(state, &request.step_id);

        let options = &request.options;
        let interval = options
            .adaptive_check_interval
            .unwrap_or(self.config.adaptive_check_interval_minutes)
            .max(1);
        let meta = AlarmMeta {
            step_id: &request.step_id,
            step_name: &request.step_name,
            bake_id: &request.bake_id,
            interval,
            check: 0,
        };

        let mut plan: Vec<(AlarmSlot, DateTime<Utc>)> = Vec::new();
        if let Some((bedtime, wakeup)) = options.overnight_window() {
            plan.push((AlarmSlot::Bedtime, bedtime));
            plan.push((AlarmSlot::Wakeup, wakeup));
        } else if options.is_adaptive {
            // A start in the past begins the check chain right away.
            plan.push((AlarmSlot::AdaptiveStart, request.start_time.max(now)));
        } else {
            let start = request.start_time;
            plan.push((
                AlarmSlot::HeadsUp,
                start - chrono::Duration::minutes(self.config.heads_up_minutes),
            ));
            plan.push((AlarmSlot::Start, start));
            plan.push((
                AlarmSlot::MissedCheck,
                start + chrono::Duration::minutes(self.config.missed_check_minutes),
            ));
            if options.notify_end {
                plan.push((
                    AlarmSlot::End,
                    start + chrono::Duration::minutes(i64::from(request.duration_minutes)),
                ));
            }
        }

        let mut armed = 0;
        for (slot, fire_at) in plan {
            // An unacknowledged step is still worth a nudge when late.
            let fire_at = if slot == AlarmSlot::MissedCheck {
                fire_at.max(now)
            } else {
                fire_at
            };
            if fire_at < now {
                debug!(step_id = %request.step_id, ?slot, "fire time already past, skipped");
                continue;
            }
            let record_id = slot.persisted_type().map(|kind| {
                let record = ScheduledNotification {
                    id: Uuid::new_v4().to_string(),
                    step_id: request.step_id.clone(),
                    step_name: request.step_name.clone(),
                    scheduled_time: fire_at,
                    notification_type: kind,
                    bake_id: request.bake_id.clone(),
                    is_active: true,
                    adaptive_interval_minutes: (kind == NotificationType::Adaptive)
                        .then_some(interval),
                };
                let id = record.id.clone();
                state.records.insert(id.clone(), record);
                id
            });
            if self.arm(state, &meta, slot, fire_at, now, record_id.clone()) {
                armed += 1;
            } else if let Some(id) = record_id {
                state.records.remove(&id);
            }
        }
        info!(
            step_id = %request.step_id,
            bake_id = %request.bake_id,
            armed,
            "step alarms scheduled"
        );
    }

    /// Arm one slot, replacing whatever was armed in it.
    fn arm(
        self: &Arc<Self>,
        state: &mut SchedulerState,
        meta: &AlarmMeta<'_>,
        slot: AlarmSlot,
        fire_at: DateTime<Utc>,
        now: DateTime<Utc>,
        record_id: Option<String>,
    ) -> bool {
        let Some(timers) = &self.timers else {
            return false;
        };
        let key = (meta.step_id.to_string(), slot);
        if let Some(previous) = state.armed.remove(&key) {
            timers.cancel(previous.handle);
        }

        let token = state.token();
        let delay = delay_until(now, fire_at);
        let weak = Arc::downgrade(self);
        let callback_key = key.clone();
        let handle = timers.schedule(
            delay,
            Box::new(move || {
                if let Some(inner) = Weak::upgrade(&weak) {
                    inner.fire(&callback_key, token);
                }
            }),
        );
        let Some(handle) = handle else {
            warn!(step_id = meta.step_id, ?slot, "timer primitive refused, alarm not armed");
            return false;
        };
        debug!(
            step_id = meta.step_id,
            bake_id = meta.bake_id,
            ?slot,
            delay_ms = delay.as_millis() as u64,
            "alarm armed"
        );
        state.armed.insert(
            key,
            Armed {
                handle,
                token,
                fire_at,
                step_name: meta.step_name.to_string(),
                bake_id: meta.bake_id.to_string(),
                record_id,
                interval: meta.interval,
                check: meta.check,
            },
        );
        true
    }

    /// Cancel the step's timers and drop its records. Returns whether any
    /// record was dropped.
    fn clear_step(&self, state: &mut SchedulerState, step_id: &str) -> bool {
        let keys: Vec<SlotKey> = state
            .armed
            .keys()
            .filter(|(step, _)| step == step_id)
            .cloned()
            .collect();
        for key in keys {
            if let Some(alarm) = state.armed.remove(&key) {
                self.cancel_handle(alarm.handle);
                debug!(step_id, slot = ?key.1, "alarm cancelled");
            }
        }
        let before = state.records.len();
        state.records.retain(|_, r| r.step_id != step_id);
        state.records.len() != before
    }

    fn fire(self: &Arc<Self>, key: &SlotKey, token: u64) {
        let (step_id, slot) = (key.0.as_str(), key.1);
        let (alert, record_id) = {
            let mut state = self.lock();
            match state.armed.get(key) {
                Some(alarm) if alarm.token == token => {}
                _ => return,
            }
            let Some(alarm) = state.armed.remove(key) else {
                return;
            };

            // Chain the next readiness check before dispatching, so a
            // clear during dispatch also stops the chain.
            if matches!(slot, AlarmSlot::AdaptiveStart | AlarmSlot::AdaptiveCheck) {
                let now = self.clock.now();
                let meta = AlarmMeta {
                    step_id,
                    step_name: &alarm.step_name,
                    bake_id: &alarm.bake_id,
                    interval: alarm.interval,
                    check: alarm.check + 1,
                };
                let next = now + chrono::Duration::minutes(i64::from(alarm.interval));
                self.arm(&mut state, &meta, AlarmSlot::AdaptiveCheck, next, now, None);
            }

            let bake_id = (!alarm.bake_id.is_empty()).then(|| alarm.bake_id.clone());
            (
                Alert::new(slot.alert_kind(alarm.check), alarm.step_name, bake_id),
                alarm.record_id,
            )
        };

        let path = self.dispatcher.dispatch(&alert);
        debug!(step_id, kind = alert.kind.label(), ?path, "alarm fired");

        if let Some(id) = record_id {
            let mut state = self.lock();
            if state.records.remove(&id).is_some() {
                self.persist(&state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{FixedPlatform, ManualClock, NotificationChannel, RecordingChannel};
    use crate::events::{drain, EngineEvent, EventBus};
    use crate::monitor::DndStatus;
    use crate::notify::records::SCHEDULE_KEY;
    use crate::storage::{DispatchConfig, MemoryStore};

    struct Harness {
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        events: EventBus,
        scheduler: NotificationScheduler,
    }

    fn t0() -> DateTime<Utc> {
        "2026-03-01T08:00:00Z".parse().unwrap()
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(MemoryStore::new());
        let events = EventBus::default();
        let caps = EngineCapabilities {
            clock: clock.clone(),
            timers: Some(clock.clone() as Arc<dyn TimerPrimitive>),
            store: store.clone(),
            channel: Some(Arc::new(RecordingChannel::new()) as Arc<dyn NotificationChannel>),
            audio: None,
            platform: Arc::new(FixedPlatform::new()),
            events: events.clone(),
        };
        let dispatcher = NotificationDispatcher::new(&caps, DndStatus::new(), DispatchConfig::default());
        let scheduler = NotificationScheduler::new(&caps, dispatcher, SchedulerConfig::default());
        Harness {
            clock,
            store,
            events,
            scheduler,
        }
    }

    fn minutes(n: i64) -> chrono::Duration {
        chrono::Duration::minutes(n)
    }

    fn fired_kinds(events: &[EngineEvent]) -> Vec<AlertKind> {
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::AlarmFired { kind, .. } => Some(kind.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn nothing_is_armed_inside_the_debounce_window() {
        let h = harness();
        h.scheduler
            .schedule_step_alarms(StepAlarmRequest::new("s1", "Bulk", t0() + minutes(60), 120, "b1"));
        assert!(h.scheduler.armed().is_empty());
        assert!(h.scheduler.has_pending_request("s1"));

        h.clock.advance(Duration::from_millis(500));
        assert!(!h.scheduler.has_pending_request("s1"));
        let slots: Vec<AlarmSlot> = h.scheduler.armed().iter().map(|a| a.slot).collect();
        assert_eq!(
            slots,
            vec![AlarmSlot::HeadsUp, AlarmSlot::Start, AlarmSlot::MissedCheck]
        );
    }

    #[test]
    fn standard_fire_times() {
        let h = harness();
        let start = t0() + minutes(60);
        h.scheduler.schedule_step_alarms(
            StepAlarmRequest::new("s1", "Bulk", start, 120, "b1").with_options(ScheduleOptions {
                notify_end: true,
                ..ScheduleOptions::default()
            }),
        );
        h.clock.advance(Duration::from_millis(500));

        let fire_at: Vec<_> = h.scheduler.armed().iter().map(|a| a.fire_at).collect();
        assert_eq!(
            fire_at,
            vec![
                start - minutes(5),
                start,
                start + minutes(10),
                start + minutes(120)
            ]
        );
        // Start and end are persisted, the rest is in-memory only.
        let mut types: Vec<_> = h
            .scheduler
            .records()
            .iter()
            .map(|r| r.notification_type)
            .collect();
        types.sort_by_key(|t| *t as u8);
        assert_eq!(types, vec![NotificationType::Start, NotificationType::End]);
        assert!(h.store.raw(SCHEDULE_KEY).is_some());
    }

    #[test]
    fn past_heads_up_and_start_are_skipped_but_missed_check_arms() {
        let h = harness();
        h.scheduler
            .schedule_step_alarms(StepAlarmRequest::new("s1", "Shape", t0() - minutes(3), 30, "b1"));
        h.clock.advance(Duration::from_millis(500));

        let armed = h.scheduler.armed();
        assert_eq!(armed.len(), 1);
        assert_eq!(armed[0].slot, AlarmSlot::MissedCheck);
        assert!(h.scheduler.records().is_empty());
    }

    #[test]
    fn late_missed_check_fires_right_away() {
        let h = harness();
        let mut rx = h.events.subscribe();
        h.scheduler
            .schedule_step_alarms(StepAlarmRequest::new("s1", "Shape", t0() - minutes(45), 30, "b1"));
        h.clock.advance(Duration::from_millis(500));

        assert_eq!(fired_kinds(&drain(&mut rx)), vec![AlertKind::MissedCheck]);
        assert!(h.scheduler.armed().is_empty());
        assert!(h.scheduler.records().is_empty());
    }

    #[test]
    fn flush_pending_applies_without_waiting() {
        let h = harness();
        h.scheduler
            .schedule_step_alarms(StepAlarmRequest::new("s1", "Bulk", t0() + minutes(60), 60, "b1"));
        h.scheduler
            .schedule_step_alarms(StepAlarmRequest::new("s2", "Shape", t0() + minutes(90), 30, "b1"));

        assert_eq!(h.scheduler.flush_pending(), 2);
        assert!(!h.scheduler.has_pending_request("s1"));
        assert_eq!(h.scheduler.armed().len(), 6);
        assert_eq!(h.scheduler.records().len(), 2);
        assert!(h.store.raw(SCHEDULE_KEY).is_some());

        // The cancelled debounce timers stay quiet.
        h.clock.advance(Duration::from_millis(500));
        assert_eq!(h.scheduler.armed().len(), 6);
        assert_eq!(h.scheduler.flush_pending(), 0);
    }

    #[test]
    fn firing_dispatches_and_deletes_the_record() {
        let h = harness();
        let mut rx = h.events.subscribe();
        h.scheduler
            .schedule_step_alarms(StepAlarmRequest::new("s1", "Bulk", t0() + minutes(10), 60, "b1"));
        h.clock.advance_minutes(11);

        assert_eq!(
            fired_kinds(&drain(&mut rx)),
            vec![AlertKind::HeadsUp, AlertKind::Start]
        );
        assert!(h.scheduler.records().is_empty());
        assert_eq!(h.scheduler.armed().len(), 1);

        h.clock.advance_minutes(10);
        assert_eq!(fired_kinds(&drain(&mut rx)), vec![AlertKind::MissedCheck]);
    }

    #[test]
    fn acknowledge_cancels_missed_check() {
        let h = harness();
        let mut rx = h.events.subscribe();
        h.scheduler
            .schedule_step_alarms(StepAlarmRequest::new("s1", "Bulk", t0() + minutes(10), 60, "b1"));
        h.clock.advance_minutes(11);
        assert!(h.scheduler.acknowledge_step("s1"));
        assert!(!h.scheduler.acknowledge_step("s1"));
        h.clock.advance_minutes(60);
        assert!(!fired_kinds(&drain(&mut rx)).contains(&AlertKind::MissedCheck));
    }

    #[test]
    fn rescheduling_replaces_timers_and_records() {
        let h = harness();
        h.scheduler
            .schedule_step_alarms(StepAlarmRequest::new("s1", "Bulk", t0() + minutes(60), 60, "b1"));
        h.clock.advance_minutes(1);
        h.scheduler
            .schedule_step_alarms(StepAlarmRequest::new("s1", "Bulk", t0() + minutes(90), 60, "b1"));
        h.clock.advance_minutes(1);

        assert_eq!(h.scheduler.armed().len(), 3);
        let records = h.scheduler.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].scheduled_time, t0() + minutes(90));
    }

    #[test]
    fn clear_alarm_drops_pending_request() {
        let h = harness();
        h.scheduler
            .schedule_step_alarms(StepAlarmRequest::new("s1", "Bulk", t0() + minutes(60), 60, "b1"));
        h.scheduler.clear_alarm("s1");
        h.scheduler.clear_alarm("s1");
        h.clock.advance_minutes(120);
        assert!(h.scheduler.armed().is_empty());
        assert!(h.scheduler.records().is_empty());
        assert_eq!(h.clock.pending(), 0);
    }

    #[test]
    fn clear_bake_only_touches_that_bake() {
        let h = harness();
        h.scheduler
            .schedule_step_alarms(StepAlarmRequest::new("a:0", "Bulk", t0() + minutes(60), 60, "a"));
        h.scheduler
            .schedule_step_alarms(StepAlarmRequest::new("b:0", "Bulk", t0() + minutes(60), 60, "b"));
        h.clock.advance_minutes(1);

        h.scheduler.clear_bake("a");
        assert!(h.scheduler.armed().iter().all(|a| a.bake_id == "b"));
        assert!(h.scheduler.records().iter().all(|r| r.bake_id == "b"));
    }

    #[test]
    fn clear_all_keeps_persisted_intent() {
        let h = harness();
        h.scheduler
            .schedule_step_alarms(StepAlarmRequest::new("s1", "Bulk", t0() + minutes(60), 60, "b1"));
        h.clock.advance_minutes(1);
        h.scheduler.clear_all_alarms();
        assert!(h.scheduler.armed().is_empty());
        assert_eq!(h.clock.pending(), 0);
        assert_eq!(h.scheduler.records().len(), 1);
    }

    #[test]
    fn adaptive_chain_counts_up() {
        let h = harness();
        let mut rx = h.events.subscribe();
        h.scheduler.schedule_step_alarms(
            StepAlarmRequest::new("s1", "Bulk", t0() + minutes(5), 0, "b1")
                .with_options(ScheduleOptions::adaptive(Some(20))),
        );
        h.clock.advance_minutes(5);
        assert_eq!(fired_kinds(&drain(&mut rx)), vec![AlertKind::AdaptiveStart]);
        assert!(h.scheduler.records().is_empty());

        h.clock.advance_minutes(60);
        assert_eq!(
            fired_kinds(&drain(&mut rx)),
            vec![
                AlertKind::AdaptiveCheck { check: 1 },
                AlertKind::AdaptiveCheck { check: 2 },
                AlertKind::AdaptiveCheck { check: 3 },
            ]
        );
        assert_eq!(h.scheduler.armed()[0].slot, AlarmSlot::AdaptiveCheck);

        h.scheduler.clear_alarm("s1");
        h.clock.advance_minutes(60);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn timeline_schedules_steps_back_to_back() {
        use crate::bake::StepStatus;
        let h = harness();
        let step = |idx: u32, name: &str, minutes: Option<u32>, status| TimelineStep {
            step_index: idx,
            name: name.into(),
            estimated_duration_minutes: minutes,
            optimal_temperature: None,
            optimal_humidity: None,
            status,
        };
        let steps = vec![
            step(0, "Mix", Some(15), StepStatus::Completed),
            step(1, "Autolyse", Some(30), StepStatus::Pending),
            step(2, "Bulk", None, StepStatus::Pending),
            step(3, "Shape", Some(20), StepStatus::Pending),
        ];
        let start = t0() + minutes(10);
        let ids = h
            .scheduler
            .schedule_bake_timeline("b1", start, &steps, &ScheduleOptions::default());
        assert_eq!(ids, vec!["b1:1".to_string(), "b1:2".to_string()]);

        h.clock.advance(Duration::from_millis(500));
        let starts: Vec<_> = h
            .scheduler
            .armed()
            .into_iter()
            .filter(|a| matches!(a.slot, AlarmSlot::Start | AlarmSlot::AdaptiveStart))
            .map(|a| (a.step_id, a.fire_at))
            .collect();
        assert_eq!(
            starts,
            vec![
                ("b1:1".to_string(), start),
                ("b1:2".to_string(), start + minutes(30)),
            ]
        );
    }

    #[test]
    fn no_timer_primitive_is_a_silent_noop() {
        let clock = Arc::new(ManualClock::new(t0()));
        let caps = EngineCapabilities {
            clock: clock.clone(),
            timers: None,
            store: Arc::new(MemoryStore::new()),
            channel: None,
            audio: None,
            platform: Arc::new(FixedPlatform::new()),
            events: EventBus::default(),
        };
        let dispatcher = NotificationDispatcher::new(&caps, DndStatus::new(), DispatchConfig::default());
        let scheduler = NotificationScheduler::new(&caps, dispatcher, SchedulerConfig::default());
        scheduler
            .schedule_step_alarms(StepAlarmRequest::new("s1", "Bulk", t0() + minutes(60), 60, "b1"));
        scheduler.clear_alarm("s1");
        scheduler.clear_all_alarms();
        assert!(scheduler.armed().is_empty());
        assert!(!scheduler.has_pending_request("s1"));
    }
}
