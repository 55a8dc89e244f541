//! Local time-zone change detection.
//!
//! Alarms are anchored to absolute instants, so a zone change does not
//! move them; it only means the user may now read them differently. The
//! monitor warns when that matters (active alarms outstanding) and stays
//! silent otherwise.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capability::{
    Clock, DurableStore, EngineCapabilities, Platform, TimerHandle, TimerPrimitive,
};
use crate::events::{EngineEvent, EventBus};
use crate::notify::{Alert, AlertKind, NotificationScheduler};
use crate::storage::TimezoneConfig;

pub const TIMEZONE_KEY: &str = "levain.timezone_change";

/// Last detected change, persisted under [`TIMEZONE_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimezoneChangeRecord {
    pub from: String,
    pub to: String,
    pub detected_at: DateTime<Utc>,
}

#[derive(Default)]
struct TzState {
    last_known: String,
    running: bool,
    generation: u64,
    poll: Option<TimerHandle>,
    foreground: Option<(TimerHandle, u64)>,
    next_token: u64,
}

struct TzInner {
    clock: Arc<dyn Clock>,
    timers: Option<Arc<dyn TimerPrimitive>>,
    platform: Arc<dyn Platform>,
    store: Arc<dyn DurableStore>,
    events: EventBus,
    scheduler: NotificationScheduler,
    config: TimezoneConfig,
    state: Mutex<TzState>,
}

#[derive(Clone)]
pub struct TimezoneMonitor {
    inner: Arc<TzInner>,
}

impl TimezoneMonitor {
    /// The last known zone is the `to` of the persisted change record if
    /// one exists, otherwise the current zone.
    pub fn new(
        caps: &EngineCapabilities,
        scheduler: NotificationScheduler,
        config: TimezoneConfig,
    ) -> Self {
        let last_known = load_change(caps.store.as_ref())
            .map(|record| record.to)
            .unwrap_or_else(|| caps.platform.time_zone());
        Self {
            inner: Arc::new(TzInner {
                clock: caps.clock.clone(),
                timers: caps.timers.clone(),
                platform: caps.platform.clone(),
                store: caps.store.clone(),
                events: caps.events.clone(),
                scheduler,
                config,
                state: Mutex::new(TzState {
                    last_known,
                    ..TzState::default()
                }),
            }),
        }
    }

    /// Check immediately, then every poll interval.
    pub fn start(&self) {
        let generation = {
            let mut state = self.inner.lock();
            if state.running {
                return;
            }
            state.running = true;
            state.generation += 1;
            state.generation
        };
        self.inner.check();
        self.inner.arm_poll(generation);
    }

    pub fn stop(&self) {
        let mut state = self.inner.lock();
        state.running = false;
        let handles = [state.poll.take(), state.foreground.take().map(|(h, _)| h)];
        if let Some(timers) = &self.inner.timers {
            for handle in handles.into_iter().flatten() {
                timers.cancel(handle);
            }
        }
    }

    /// The app came to the foreground; check after the debounce delay.
    pub fn on_foreground(&self) {
        let inner = &self.inner;
        let Some(timers) = &inner.timers else {
            inner.check();
            return;
        };
        let mut state = inner.lock();
        if let Some((handle, _)) = state.foreground.take() {
            timers.cancel(handle);
        }
        state.next_token += 1;
        let token = state.next_token;
        let weak = Arc::downgrade(inner);
        let handle = timers.schedule(
            Duration::from_millis(inner.config.foreground_debounce_ms),
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.foreground_fired(token);
                }
            }),
        );
        state.foreground = handle.map(|h| (h, token));
    }

    /// Compare against the last known zone now.
    pub fn check_now(&self) -> Option<TimezoneChangeRecord> {
        self.inner.check()
    }

    pub fn last_known(&self) -> String {
        self.inner.lock().last_known.clone()
    }
}

/// Read the persisted change record, if any.
pub fn load_change(store: &dyn DurableStore) -> Option<TimezoneChangeRecord> {
    match store.get(TIMEZONE_KEY) {
        Ok(Some(raw)) => serde_json::from_str(&raw)
            .map_err(|e| warn!(error = %e, "discarding malformed time-zone record"))
            .ok(),
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "failed to read time-zone record");
            None
        }
    }
}

impl TzInner {
    fn lock(&self) -> MutexGuard<'_, TzState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Option<TimezoneChangeRecord> {
        let current = self.platform.time_zone();
        let now = self.clock.now();
        let from = {
            let mut state = self.lock();
            if state.last_known == current {
                return None;
            }
            std::mem::replace(&mut state.last_known, current.clone())
        };

        let record = TimezoneChangeRecord {
            from,
            to: current,
            detected_at: now,
        };
        match serde_json::to_string(&record) {
            Ok(json) => {
                if let Err(e) = self.store.set(TIMEZONE_KEY, &json) {
                    warn!(error = %e, "failed to persist time-zone change");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize time-zone change"),
        }

        let affected = self.scheduler.active_notifications(now);
        if affected.is_empty() {
            debug!(from = %record.from, to = %record.to, "time zone changed, no active alarms");
            return Some(record);
        }

        info!(
            from = %record.from,
            to = %record.to,
            affected = affected.len(),
            "time zone changed with active alarms"
        );
        let alert = Alert::new(
            AlertKind::TimezoneChange {
                from: record.from.clone(),
                to: record.to.clone(),
                affected: affected.len(),
            },
            "",
            None,
        );
        self.scheduler.dispatcher().dispatch(&alert);
        self.events.emit(EngineEvent::TimezoneChanged {
            from: record.from.clone(),
            to: record.to.clone(),
            affected,
            at: now,
        });
        Some(record)
    }

    fn arm_poll(self: &Arc<Self>, generation: u64) {
        let Some(timers) = &self.timers else {
            debug!("no timer primitive, time-zone polling disabled");
            return;
        };
        let mut state = self.lock();
        if !state.running || state.generation != generation {
            return;
        }
        let weak = Arc::downgrade(self);
        state.poll = timers.schedule(
            Duration::from_secs(self.config.poll_interval_minutes * 60),
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.poll_fired(generation);
                }
            }),
        );
    }

    fn poll_fired(self: &Arc<Self>, generation: u64) {
        {
            let state = self.lock();
            if !state.running || state.generation != generation {
                return;
            }
        }
        self.check();
        self.arm_poll(generation);
    }

    fn foreground_fired(&self, token: u64) {
        {
            let mut state = self.lock();
            if !matches!(state.foreground, Some((_, current)) if current == token) {
                return;
            }
            state.foreground = None;
        }
        self.check();
    }
}
