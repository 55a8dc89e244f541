//! Ambient pollers.
//!
//! Both monitors only raise status events (and, for a zone change with
//! outstanding alarms, a warning alert). Neither cancels nor fires
//! scheduled alarms.

mod dnd;
mod timezone;

pub use dnd::{evaluate_dnd, DoNotDisturbMonitor};
pub use timezone::{load_change, TimezoneChangeRecord, TimezoneMonitor, TIMEZONE_KEY};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Why Do-Not-Disturb is considered active (or not).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DndReason {
    QuietHours,
    PlatformSignal,
    Unknown,
}

/// Shared DND flag; the monitor writes it, the dispatcher reads it.
#[derive(Debug, Clone, Default)]
pub struct DndStatus(Arc<AtomicBool>);

impl DndStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Store a new value, returning the previous one.
    pub fn set(&self, active: bool) -> bool {
        self.0.swap(active, Ordering::SeqCst)
    }
}
