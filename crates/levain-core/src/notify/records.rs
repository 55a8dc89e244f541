//! Persistence of scheduling intent.
//!
//! The whole record map is one JSON blob under [`SCHEDULE_KEY`], read once
//! at start-up and rewritten after every mutation. Store failures are
//! logged and treated as "nothing persisted".

use std::collections::BTreeMap;

use tracing::warn;

use super::ScheduledNotification;
use crate::capability::DurableStore;

pub const SCHEDULE_KEY: &str = "levain.scheduled_notifications";

/// Load every persisted record, keyed by id.
pub fn load_records(store: &dyn DurableStore) -> BTreeMap<String, ScheduledNotification> {
    let raw = match store.get(SCHEDULE_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return BTreeMap::new(),
        Err(e) => {
            warn!(error = %e, "failed to read scheduled notifications, starting empty");
            return BTreeMap::new();
        }
    };

    match serde_json::from_str(&raw) {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "discarding malformed scheduled notifications blob");
            BTreeMap::new()
        }
    }
}

/// Rewrite the persisted record map. Returns whether the write landed.
pub fn save_records(
    store: &dyn DurableStore,
    records: &BTreeMap<String, ScheduledNotification>,
) -> bool {
    let json = match serde_json::to_string(records) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialize scheduled notifications");
            return false;
        }
    };
    match store.set(SCHEDULE_KEY, &json) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, records = records.len(), "failed to persist scheduled notifications");
            false
        }
    }
}
