use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use levain_core::capability::TokioTimer;
use levain_core::notify::{load_records, save_records, NotificationDispatcher};
use levain_core::{
    DndStatus, EngineConfig, NotificationScheduler, ReconciliationEngine, ReconciliationSummary,
    ScheduleOptions, SqliteStore, StepAlarmRequest, TimerPrimitive,
};

use super::{capabilities, CliResult};

#[derive(Subcommand)]
pub enum AlarmsAction {
    /// List persisted alarms
    List {
        /// Include inactive and past records
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a step's alarms for the next running engine
    Schedule(ScheduleArgs),
    /// Preview start-up reconciliation against the current time
    Reconcile,
    /// Remove persisted alarms
    Clear {
        /// Only this bake
        #[arg(long, conflicts_with = "step")]
        bake: Option<String>,
        /// Only this step
        #[arg(long)]
        step: Option<String>,
    },
}

#[derive(Args)]
pub struct ScheduleArgs {
    /// Step ID
    step: String,
    /// Step name shown in alerts
    #[arg(long)]
    name: String,
    /// Bake ID
    #[arg(long)]
    bake: String,
    /// Step start (RFC 3339)
    #[arg(long)]
    start: DateTime<Utc>,
    /// Estimated step duration in minutes
    #[arg(long, default_value_t = 0)]
    minutes: u32,
    /// Also alarm at the end of the step
    #[arg(long)]
    notify_end: bool,
    /// Remind periodically instead of at a fixed end
    #[arg(long, conflicts_with_all = ["bedtime", "wakeup"])]
    adaptive: bool,
    /// Minutes between readiness checks (adaptive steps)
    #[arg(long, requires = "adaptive")]
    interval: Option<u32>,
    /// Overnight step: bedtime alarm (RFC 3339)
    #[arg(long, requires = "wakeup")]
    bedtime: Option<DateTime<Utc>>,
    /// Overnight step: wakeup alarm (RFC 3339)
    #[arg(long, requires = "bedtime")]
    wakeup: Option<DateTime<Utc>>,
}

impl ScheduleArgs {
    fn request(&self) -> StepAlarmRequest {
        let options = match (self.bedtime, self.wakeup) {
            (Some(bedtime), Some(wakeup)) => ScheduleOptions::overnight(bedtime, wakeup),
            _ if self.adaptive => ScheduleOptions::adaptive(self.interval),
            _ => ScheduleOptions {
                notify_end: self.notify_end,
                ..ScheduleOptions::default()
            },
        };
        StepAlarmRequest::new(
            self.step.clone(),
            self.name.clone(),
            self.start,
            self.minutes,
            self.bake.clone(),
        )
        .with_options(options)
    }
}

pub fn run(action: AlarmsAction) -> CliResult {
    let config = EngineConfig::load_or_default();
    match action {
        AlarmsAction::List { all, json } => {
            let now = Utc::now();
            let mut records: Vec<_> = load_records(&SqliteStore::open_default()?)
                .into_values()
                .filter(|r| all || r.is_pending(now))
                .collect();
            records.sort_by_key(|r| r.scheduled_time);
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("no alarms");
            } else {
                for r in &records {
                    println!(
                        "{}  {:<8} {:<20} bake={} step={}",
                        r.scheduled_time.to_rfc3339(),
                        serde_json::to_value(r.notification_type)?
                            .as_str()
                            .unwrap_or_default(),
                        r.step_name,
                        r.bake_id,
                        r.step_id
                    );
                }
            }
        }
        AlarmsAction::Schedule(args) => {
            // No reconciliation here: that is the running engine's job.
            let caps = capabilities(Some(Arc::new(TokioTimer::new()) as Arc<dyn TimerPrimitive>))?;
            let dispatcher =
                NotificationDispatcher::new(&caps, DndStatus::new(), config.dispatch.clone());
            let scheduler = NotificationScheduler::new(&caps, dispatcher, config.scheduler.clone());
            scheduler.schedule_step_alarms(args.request());
            scheduler.flush_pending();

            let mut records: Vec<_> = scheduler
                .records()
                .into_iter()
                .filter(|r| r.step_id == args.step)
                .collect();
            records.sort_by_key(|r| r.scheduled_time);
            scheduler.clear_all_alarms();
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        AlarmsAction::Reconcile => {
            // Dry run: nothing is dispatched or pruned.
            let records = load_records(&SqliteStore::open_default()?);
            let plan =
                ReconciliationEngine::new(&config.reconciliation).plan(records.into_values(), Utc::now());
            let summary = ReconciliationSummary {
                rescheduled: plan.rearm.len(),
                expired: plan.expired.len(),
                missed: plan.missed.len(),
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        AlarmsAction::Clear { bake, step } => {
            let store = SqliteStore::open_default()?;
            let mut records = load_records(&store);
            let before = records.len();
            records.retain(|_, r| match (&bake, &step) {
                (Some(bake), _) => r.bake_id != *bake,
                (None, Some(step)) => r.step_id != *step,
                (None, None) => false,
            });
            let removed = before - records.len();
            if removed > 0 && !save_records(&store, &records) {
                return Err("failed to persist alarms".into());
            }
            println!("removed {removed}");
        }
    }
    Ok(())
}
