//! # Levain Core Library
//!
//! Timing engine of a baking companion: reminders for multi-step bakes that
//! unfold over hours, survive restarts, respect quiet hours, and follow the
//! dough's environment.
//!
//! ## Architecture
//!
//! - **Capabilities**: clock, timers, durable store, notification channel,
//!   audio and platform signals are injected at construction; no globals
//! - **Notify**: scheduler, dispatcher and start-up reconciliation
//! - **Monitors**: time-zone and Do-Not-Disturb pollers
//! - **Recalibration**: temperature/humidity adjustment of a bake's estimated
//!   end, exposed over HTTP
//!
//! ## Key Components
//!
//! - [`NotificationEngine`]: wires everything from an [`EngineCapabilities`]
//! - [`NotificationScheduler`]: debounced per-step alarm scheduling
//! - [`ReconciliationEngine`]: replays persisted intent after a gap
//! - [`RecalibrationService`]: recalibrates a stored bake
//! - [`EngineConfig`]: TOML configuration

pub mod api;
pub mod bake;
pub mod capability;
pub mod engine;
pub mod error;
pub mod events;
pub mod monitor;
pub mod notify;
pub mod recalibration;
pub mod storage;

pub use bake::{Bake, BakePatch, SensorReading, StepStatus, TimelineAdjustment, TimelineStep};
pub use capability::{
    AudioAlert, Clock, DurableStore, EngineCapabilities, ManualClock, NotificationChannel, Platform,
    TimerPrimitive,
};
pub use engine::NotificationEngine;
pub use error::{ChannelError, ConfigError, CoreError, SensorError, StorageError, StoreError};
pub use events::{EngineEvent, EventBus};
pub use monitor::{DndReason, DndStatus, DoNotDisturbMonitor, TimezoneMonitor};
pub use notify::{
    Alert, AlertKind, NotificationScheduler, NotificationType, ReconciliationEngine,
    ReconciliationSummary, ScheduleOptions, ScheduledNotification, StepAlarmRequest,
};
pub use recalibration::{
    apply_recalibration, recalibrate, Recalibration, RecalibrationService, SensorSource,
    StaticSensor,
};
pub use storage::{BakeStorage, EngineConfig, MemoryBakeStorage, SqliteBakeStorage, SqliteStore};
