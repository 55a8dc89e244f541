//! Do-Not-Disturb heuristic.
//!
//! There is no OS integration: DND counts as active when the local hour is
//! inside the quiet window and notification permission is granted, or when
//! the app runs in standalone mode.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{DndReason, DndStatus};
use crate::capability::{Clock, EngineCapabilities, Platform, TimerHandle, TimerPrimitive};
use crate::events::{EngineEvent, EventBus};
use crate::storage::DndConfig;

/// Whether `hour` falls in `[start, end)`, wrapping past midnight.
fn in_quiet_window(hour: u32, config: &DndConfig) -> bool {
    let (start, end) = (config.quiet_start_hour, config.quiet_end_hour);
    if start <= end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

/// Evaluate the heuristic for one instant.
pub fn evaluate_dnd(
    platform: &dyn Platform,
    at: DateTime<Utc>,
    config: &DndConfig,
) -> (bool, DndReason) {
    let quiet = in_quiet_window(platform.local_hour(at), config);
    if quiet && platform.notification_permission() {
        (true, DndReason::QuietHours)
    } else if platform.standalone_mode() {
        (true, DndReason::PlatformSignal)
    } else {
        (false, DndReason::Unknown)
    }
}

#[derive(Default)]
struct PollState {
    running: bool,
    generation: u64,
    handle: Option<TimerHandle>,
}

struct DndInner {
    clock: Arc<dyn Clock>,
    timers: Option<Arc<dyn TimerPrimitive>>,
    platform: Arc<dyn Platform>,
    events: EventBus,
    status: DndStatus,
    config: DndConfig,
    poll: Mutex<PollState>,
}

/// Polls the heuristic and publishes transitions.
#[derive(Clone)]
pub struct DoNotDisturbMonitor {
    inner: Arc<DndInner>,
}

impl DoNotDisturbMonitor {
    pub fn new(caps: &EngineCapabilities, status: DndStatus, config: DndConfig) -> Self {
        Self {
            inner: Arc::new(DndInner {
                clock: caps.clock.clone(),
                timers: caps.timers.clone(),
                platform: caps.platform.clone(),
                events: caps.events.clone(),
                status,
                config,
                poll: Mutex::new(PollState::default()),
            }),
        }
    }

    /// Check immediately, then every poll interval until [`stop`](Self::stop).
    pub fn start(&self) {
        let generation = {
            let mut poll = self.inner.lock();
            if poll.running {
                return;
            }
            poll.running = true;
            poll.generation += 1;
            poll.generation
        };
        self.inner.check();
        self.inner.arm_next(generation);
    }

    pub fn stop(&self) {
        let mut poll = self.inner.lock();
        poll.running = false;
        if let (Some(handle), Some(timers)) = (poll.handle.take(), &self.inner.timers) {
            timers.cancel(handle);
        }
    }

    /// Evaluate now, emitting an event on a transition. Returns the state.
    pub fn check_now(&self) -> bool {
        self.inner.check()
    }

    pub fn status(&self) -> &DndStatus {
        &self.inner.status
    }
}

impl DndInner {
    fn lock(&self) -> MutexGuard<'_, PollState> {
        self.poll.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> bool {
        let now = self.clock.now();
        let (active, reason) = evaluate_dnd(self.platform.as_ref(), now, &self.config);
        let previous = self.status.set(active);
        if previous != active {
            info!(is_active = active, ?reason, "do-not-disturb changed");
            self.events.emit(EngineEvent::DndStatusChanged {
                is_active: active,
                reason,
                at: now,
            });
        }
        active
    }

    fn arm_next(self: &Arc<Self>, generation: u64) {
        let Some(timers) = &self.timers else {
            debug!("no timer primitive, do-not-disturb polling disabled");
            return;
        };
        let mut poll = self.lock();
        if !poll.running || poll.generation != generation {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        poll.handle = timers.schedule(
            Duration::from_secs(self.config.poll_interval_secs),
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.tick(generation);
                }
            }),
        );
    }

    fn tick(self: &Arc<Self>, generation: u64) {
        {
            let poll = self.lock();
            if !poll.running || poll.generation != generation {
                return;
            }
        }
        self.check();
        self.arm_next(generation);
    }
}
