//! Platform capabilities supplied to the engine at construction.
//!
//! Everything the engine needs from its host (wall clock, one-shot timers,
//! durable key-value storage, system notifications, audio, platform
//! signals) sits behind a small trait here. Production implementations
//! live in [`system`]; deterministic doubles with a virtual clock live in
//! [`manual`].

pub mod manual;
pub mod system;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, StoreError};
use crate::events::EventBus;

pub use manual::{FixedPlatform, ManualClock, RecordingAudio, RecordingChannel};
pub use system::{SystemClock, SystemPlatform, TokioTimer};

/// Wall-clock source.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Opaque handle returned by [`TimerPrimitive::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// Callback run once when a timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// One-shot, cancellable timers.
///
/// Implementations must never invoke the callback from inside `schedule`,
/// even for a zero delay: callers may hold their own locks while arming.
pub trait TimerPrimitive: Send + Sync {
    /// Arm a callback after `delay`. Returns `None` when the platform
    /// cannot provide timers right now.
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> Option<TimerHandle>;

    /// Cancel a pending timer. Unknown or already-fired handles are ignored.
    fn cancel(&self, handle: TimerHandle);
}

/// Key-value persistence that survives a process restart.
pub trait DurableStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Presentation options passed to a [`NotificationChannel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentOptions {
    pub icon: String,
    pub tag: String,
    pub require_interaction: bool,
    pub vibration_pattern: Vec<u32>,
    pub silent: bool,
}

/// System-level alert presentation (OS notification centre).
pub trait NotificationChannel: Send + Sync {
    fn present(&self, title: &str, body: &str, options: &PresentOptions)
        -> Result<(), ChannelError>;
}

/// Tone played through the audio capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertTone {
    /// Pronounced pattern for alerts that need interaction.
    Urgent,
    /// Soft chime, only used when low-priority sound is enabled.
    Gentle,
}

/// Audible alert output.
pub trait AudioAlert: Send + Sync {
    fn play(&self, tone: AlertTone);
}

/// Ambient platform signals the monitors poll.
pub trait Platform: Send + Sync {
    /// Resolved local IANA time-zone identifier (e.g. `Europe/Paris`).
    fn time_zone(&self) -> String;

    /// Local wall-clock hour (0..=23) for the given instant.
    fn local_hour(&self, at: DateTime<Utc>) -> u32;

    /// Whether the user granted system notification permission.
    fn notification_permission(&self) -> bool;

    /// Whether the app runs in standalone/installed mode.
    fn standalone_mode(&self) -> bool;
}

/// The full capability bundle an engine instance is built from.
#[derive(Clone)]
pub struct EngineCapabilities {
    pub clock: Arc<dyn Clock>,
    pub timers: Option<Arc<dyn TimerPrimitive>>,
    pub store: Arc<dyn DurableStore>,
    pub channel: Option<Arc<dyn NotificationChannel>>,
    pub audio: Option<Arc<dyn AudioAlert>>,
    pub platform: Arc<dyn Platform>,
    pub events: EventBus,
}

/// Convert a possibly negative chrono delta into a timer delay.
pub(crate) fn delay_until(now: DateTime<Utc>, at: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}
