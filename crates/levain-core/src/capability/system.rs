//! Production capability implementations.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local, Timelike, Utc};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use super::{Clock, Platform, TimerCallback, TimerHandle, TimerPrimitive};

/// Wall clock backed by the OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Timers backed by spawned `tokio::time::sleep` tasks.
///
/// Cancelling aborts the task. When constructed outside a tokio runtime
/// the primitive reports itself unavailable and every `schedule` returns
/// `None`.
pub struct TokioTimer {
    runtime: Option<Handle>,
    next_id: AtomicU64,
    tasks: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl TokioTimer {
    /// Bind to the current runtime, if any.
    pub fn new() -> Self {
        Self::with_runtime(Handle::try_current().ok())
    }

    pub fn with_runtime(runtime: Option<Handle>) -> Self {
        Self {
            runtime,
            next_id: AtomicU64::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn is_available(&self) -> bool {
        self.runtime.is_some()
    }

    /// Number of timers that have neither fired nor been cancelled.
    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for TokioTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerPrimitive for TokioTimer {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> Option<TimerHandle> {
        let runtime = self.runtime.as_ref()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tasks = Arc::clone(&self.tasks);

        // Held across spawn so the task cannot remove its entry before it exists.
        let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            callback();
        });
        guard.insert(id, task.abort_handle());
        Some(TimerHandle(id))
    }

    fn cancel(&self, handle: TimerHandle) {
        let task = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.0);
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// Platform signals read from the host OS.
///
/// There is no portable "notification permission" or "standalone mode"
/// query on a desktop host, so both are supplied by the embedding
/// application.
#[derive(Debug, Clone)]
pub struct SystemPlatform {
    pub notification_permission: bool,
    pub standalone_mode: bool,
}

impl SystemPlatform {
    pub fn new(notification_permission: bool, standalone_mode: bool) -> Self {
        Self {
            notification_permission,
            standalone_mode,
        }
    }
}

impl Default for SystemPlatform {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl Platform for SystemPlatform {
    fn time_zone(&self) -> String {
        resolve_time_zone()
    }

    fn local_hour(&self, at: DateTime<Utc>) -> u32 {
        at.with_timezone(&Local).hour()
    }

    fn notification_permission(&self) -> bool {
        self.notification_permission
    }

    fn standalone_mode(&self) -> bool {
        self.standalone_mode
    }
}

/// `TZ`, then `/etc/timezone`, then the `/etc/localtime` symlink target.
fn resolve_time_zone() -> String {
    if let Ok(tz) = std::env::var("TZ") {
        let tz = tz.trim_start_matches(':').trim();
        if !tz.is_empty() {
            return tz.to_string();
        }
    }

    if let Ok(content) = std::fs::read_to_string("/etc/timezone") {
        let tz = content.trim();
        if !tz.is_empty() {
            return tz.to_string();
        }
    }

    std::fs::read_link("/etc/localtime")
        .ok()
        .and_then(|target| zone_from_zoneinfo_path(&target))
        .unwrap_or_else(|| "UTC".to_string())
}

fn zone_from_zoneinfo_path(path: &Path) -> Option<String> {
    let text = path.to_string_lossy();
    let (_, zone) = text.split_once("zoneinfo/")?;
    (!zone.is_empty()).then(|| zone.to_string())
}
