use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::monitor::DndReason;
use crate::notify::{AlertKind, DeliveryPath, ScheduledNotification};

/// Every user-visible engine transition produces an Event.
/// The UI subscribes to them; nothing waits for a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// A timed alarm (or a late catch-up) was dispatched.
    AlarmFired {
        kind: AlertKind,
        step_name: String,
        bake_id: Option<String>,
        delivery: DeliveryPath,
        at: DateTime<Utc>,
    },
    /// The application should render an in-app banner for this alert.
    BannerRequested {
        kind: AlertKind,
        title: String,
        body: String,
        step_name: String,
        bake_id: Option<String>,
        at: DateTime<Utc>,
    },
    /// Start-up reconciliation finished.
    ReconciliationSummary {
        rescheduled: usize,
        expired: usize,
        missed: usize,
        at: DateTime<Utc>,
    },
    DndStatusChanged {
        is_active: bool,
        reason: DndReason,
        at: DateTime<Utc>,
    },
    /// Local time zone changed while alarms were outstanding.
    TimezoneChanged {
        from: String,
        to: String,
        affected: Vec<ScheduledNotification>,
        at: DateTime<Utc>,
    },
}

/// Fire-and-forget fan-out of [`EngineEvent`]s.
///
/// Cloning shares the underlying channel. Events emitted while nobody is
/// subscribed are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        // No listeners is not an error.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Drain everything currently buffered on a receiver.
pub fn drain(receiver: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => out.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}
