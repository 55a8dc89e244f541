//! Deterministic capability doubles.
//!
//! [`ManualClock`] is both the wall clock and the timer wheel: time only
//! moves when [`ManualClock::advance`] is called, and due callbacks run in
//! chronological order as it passes them. "Wait five hours" becomes an
//! instantaneous, repeatable simulation.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};

use super::{
    AlertTone, AudioAlert, Clock, NotificationChannel, Platform, PresentOptions, TimerCallback,
    TimerHandle, TimerPrimitive,
};
use crate::error::ChannelError;

struct WheelState {
    now: DateTime<Utc>,
    next_id: u64,
    queue: BTreeMap<(DateTime<Utc>, u64), TimerCallback>,
    due_at: HashMap<u64, DateTime<Utc>>,
}

/// Virtual clock with an attached timer wheel.
pub struct ManualClock {
    state: Mutex<WheelState>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(WheelState {
                now,
                next_id: 1,
                queue: BTreeMap::new(),
                due_at: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WheelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move time forward, firing every timer that comes due on the way.
    ///
    /// Callbacks run without the wheel locked, so they may arm or cancel
    /// further timers; newly armed timers that fall inside the window fire
    /// in the same call.
    pub fn advance(&self, by: Duration) {
        let target = {
            let state = self.lock();
            state.now + chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero())
        };

        loop {
            let callback = {
                let mut state = self.lock();
                let next = state
                    .queue
                    .first_key_value()
                    .map(|(key, _)| *key)
                    .filter(|(due, _)| *due <= target);
                match next {
                    Some(key) => {
                        state.now = state.now.max(key.0);
                        state.due_at.remove(&key.1);
                        state.queue.remove(&key)
                    }
                    None => None,
                }
            };
            match callback {
                Some(callback) => callback(),
                None => break,
            }
        }

        let mut state = self.lock();
        state.now = state.now.max(target);
    }

    pub fn advance_minutes(&self, minutes: u64) {
        self.advance(Duration::from_secs(minutes * 60));
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Remaining delay of every armed timer, soonest first.
    pub fn pending_delays(&self) -> Vec<Duration> {
        let state = self.lock();
        state
            .queue
            .keys()
            .map(|(due, _)| (*due - state.now).to_std().unwrap_or(Duration::ZERO))
            .collect()
    }

    /// Due instants of every armed timer, soonest first.
    pub fn pending_due(&self) -> Vec<DateTime<Utc>> {
        self.lock().queue.keys().map(|(due, _)| *due).collect()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }
}

impl TimerPrimitive for ManualClock {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> Option<TimerHandle> {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        let due = state.now + chrono::Duration::from_std(delay).ok()?;
        state.queue.insert((due, id), callback);
        state.due_at.insert(id, due);
        Some(TimerHandle(id))
    }

    fn cancel(&self, handle: TimerHandle) {
        let mut state = self.lock();
        if let Some(due) = state.due_at.remove(&handle.0) {
            state.queue.remove(&(due, handle.0));
        }
    }
}

struct PlatformState {
    zone: String,
    offset: FixedOffset,
    permission: bool,
    standalone: bool,
}

/// Platform double whose signals tests flip directly.
pub struct FixedPlatform {
    state: Mutex<PlatformState>,
}

impl FixedPlatform {
    /// UTC zone, permission granted, not standalone.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlatformState {
                zone: "UTC".to_string(),
                offset: Utc.fix(),
                permission: true,
                standalone: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PlatformState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch zone identifier and the UTC offset used for local hours.
    pub fn set_zone(&self, zone: &str, offset_hours: i32) {
        let mut state = self.lock();
        state.zone = zone.to_string();
        if let Some(offset) = FixedOffset::east_opt(offset_hours * 3600) {
            state.offset = offset;
        }
    }

    pub fn set_permission(&self, granted: bool) {
        self.lock().permission = granted;
    }

    pub fn set_standalone(&self, standalone: bool) {
        self.lock().standalone = standalone;
    }
}

impl Default for FixedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for FixedPlatform {
    fn time_zone(&self) -> String {
        self.lock().zone.clone()
    }

    fn local_hour(&self, at: DateTime<Utc>) -> u32 {
        let offset = self.lock().offset;
        at.with_timezone(&offset).hour()
    }

    fn notification_permission(&self) -> bool {
        self.lock().permission
    }

    fn standalone_mode(&self) -> bool {
        self.lock().standalone
    }
}

/// One call to [`RecordingChannel::present`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presented {
    pub title: String,
    pub body: String,
    pub options: PresentOptions,
}

/// Notification channel that records presentations, optionally failing.
#[derive(Default)]
pub struct RecordingChannel {
    presented: Mutex<Vec<Presented>>,
    failing: AtomicBool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `present` fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn presented(&self) -> Vec<Presented> {
        self.presented
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl NotificationChannel for RecordingChannel {
    fn present(
        &self,
        title: &str,
        body: &str,
        options: &PresentOptions,
    ) -> Result<(), ChannelError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChannelError::PresentFailed("channel offline".to_string()));
        }
        self.presented
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Presented {
                title: title.to_string(),
                body: body.to_string(),
                options: options.clone(),
            });
        Ok(())
    }
}

/// Audio output that records every tone played.
#[derive(Default)]
pub struct RecordingAudio {
    played: Mutex<Vec<AlertTone>>,
}

impl RecordingAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn played(&self) -> Vec<AlertTone> {
        self.played
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AudioAlert for RecordingAudio {
    fn play(&self, tone: AlertTone) {
        self.played
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tone);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        "2026-03-01T08:00:00Z".parse().unwrap()
    }

    #[test]
    fn advance_fires_in_chronological_order() {
        let clock = Arc::new(ManualClock::new(t0()));
        let order = Arc::new(Mutex::new(Vec::new()));
        for secs in [30u64, 10, 20] {
            let order = Arc::clone(&order);
            let c = Arc::clone(&clock);
            clock.schedule(
                Duration::from_secs(secs),
                Box::new(move || order.lock().unwrap().push((secs, c.now()))),
            );
        }

        clock.advance(Duration::from_secs(25));
        let seen = order.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, 10);
        assert_eq!(seen[0].1, t0() + chrono::Duration::seconds(10));
        assert_eq!(seen[1].0, 20);
        assert_eq!(clock.now(), t0() + chrono::Duration::seconds(25));
        assert_eq!(clock.pending_delays(), vec![Duration::from_secs(5)]);
    }

    #[test]
    fn callbacks_can_rearm_within_the_same_advance() {
        let clock = Arc::new(ManualClock::new(t0()));
        let count = Arc::new(AtomicUsize::new(0));

        fn arm(clock: Arc<ManualClock>, count: Arc<AtomicUsize>) {
            let c = Arc::clone(&clock);
            clock.schedule(
                Duration::from_secs(60),
                Box::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                    arm(c, count);
                }),
            );
        }
        arm(Arc::clone(&clock), Arc::clone(&count));

        clock.advance(Duration::from_secs(180));
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(clock.pending(), 1);
    }

    #[test]
    fn cancel_is_idempotent() {
        let clock = ManualClock::new(t0());
        let handle = clock.schedule(Duration::from_secs(1), Box::new(|| {})).unwrap();
        clock.cancel(handle);
        clock.cancel(handle);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn fixed_platform_offsets_local_hour() {
        let platform = FixedPlatform::new();
        assert_eq!(platform.local_hour(t0()), 8);
        platform.set_zone("Asia/Tokyo", 9);
        assert_eq!(platform.local_hour(t0()), 17);
        assert_eq!(platform.time_zone(), "Asia/Tokyo");
    }
}
