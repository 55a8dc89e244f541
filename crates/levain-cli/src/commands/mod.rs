pub mod alarms;
pub mod bakes;
pub mod config;
pub mod recalibrate;
pub mod serve;

use std::sync::Arc;

use levain_core::capability::{SystemClock, SystemPlatform};
use levain_core::storage::{data_dir, SqliteBakeStorage, SqliteStore};
use levain_core::{EngineCapabilities, EventBus, TimerPrimitive};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// `<data_dir>/bakes.db`
pub fn open_bakes() -> Result<SqliteBakeStorage, Box<dyn std::error::Error>> {
    Ok(SqliteBakeStorage::open(&data_dir()?.join("bakes.db"))?)
}

/// Production capabilities over the default store.
///
/// No notification channel: alerts surface as in-app banner events.
pub fn capabilities(
    timers: Option<Arc<dyn TimerPrimitive>>,
) -> Result<EngineCapabilities, Box<dyn std::error::Error>> {
    Ok(EngineCapabilities {
        clock: Arc::new(SystemClock),
        timers,
        store: Arc::new(SqliteStore::open_default()?),
        channel: None,
        audio: None,
        platform: Arc::new(SystemPlatform::default()),
        events: EventBus::default(),
    })
}
