//! Engine root: wires every component from one capability bundle.

use std::sync::Mutex;

use tracing::info;

use crate::capability::EngineCapabilities;
use crate::events::EventBus;
use crate::monitor::{DndStatus, DoNotDisturbMonitor, TimezoneMonitor};
use crate::notify::{
    NotificationDispatcher, NotificationScheduler, ReconciliationEngine, ReconciliationSummary,
};
use crate::storage::EngineConfig;

/// One isolated notification engine.
///
/// Construction loads persisted intent and reconciles it immediately. The
/// monitors are built but only poll after [`start_monitors`].
///
/// [`start_monitors`]: NotificationEngine::start_monitors
pub struct NotificationEngine {
    caps: EngineCapabilities,
    scheduler: NotificationScheduler,
    dnd: DoNotDisturbMonitor,
    timezone: TimezoneMonitor,
    last_reconciliation: Mutex<ReconciliationSummary>,
    reconciliation: ReconciliationEngine,
}

impl NotificationEngine {
    pub fn new(caps: EngineCapabilities, config: &EngineConfig) -> Self {
        let status = DndStatus::new();
        let dispatcher = NotificationDispatcher::new(&caps, status.clone(), config.dispatch.clone());
        let scheduler = NotificationScheduler::new(&caps, dispatcher, config.scheduler.clone());
        let dnd = DoNotDisturbMonitor::new(&caps, status, config.dnd.clone());
        let timezone = TimezoneMonitor::new(&caps, scheduler.clone(), config.timezone.clone());

        let reconciliation = ReconciliationEngine::new(&config.reconciliation);
        let summary = reconciliation.run(&scheduler, &caps.events, caps.clock.now());

        Self {
            caps,
            scheduler,
            dnd,
            timezone,
            last_reconciliation: Mutex::new(summary),
            reconciliation,
        }
    }

    pub fn start_monitors(&self) {
        self.dnd.start();
        self.timezone.start();
        info!("monitors started");
    }

    /// Background-to-foreground transition.
    pub fn on_foreground(&self) {
        self.timezone.on_foreground();
        self.dnd.check_now();
    }

    /// Reconcile persisted records again, e.g. after a long suspend.
    ///
    /// Live timers of future records are kept, as are in-memory heads-up,
    /// missed-check and adaptive-check timers.
    pub fn reconcile(&self) -> ReconciliationSummary {
        let summary = self
            .reconciliation
            .run(&self.scheduler, &self.caps.events, self.caps.clock.now());
        *self
            .last_reconciliation
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = summary;
        summary
    }

    /// Stop the monitors and cancel every timer. Persisted intent is kept.
    pub fn shutdown(&self) {
        self.dnd.stop();
        self.timezone.stop();
        self.scheduler.clear_all_alarms();
        info!("engine shut down");
    }

    pub fn scheduler(&self) -> &NotificationScheduler {
        &self.scheduler
    }

    pub fn dnd(&self) -> &DoNotDisturbMonitor {
        &self.dnd
    }

    pub fn timezone(&self) -> &TimezoneMonitor {
        &self.timezone
    }

    pub fn events(&self) -> &EventBus {
        &self.caps.events
    }

    pub fn last_reconciliation(&self) -> ReconciliationSummary {
        *self
            .last_reconciliation
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn dnd_status(&self) -> &DndStatus {
        self.dnd.status()
    }
}

impl Drop for NotificationEngine {
    fn drop(&mut self) {
        self.dnd.stop();
        self.timezone.stop();
        self.scheduler.clear_all_alarms();
    }
}
