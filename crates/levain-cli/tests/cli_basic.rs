//! Basic CLI E2E tests.
//!
//! Each test runs the built binary against its own temporary HOME so the
//! config and databases never touch the real data directory.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

use chrono::{Duration, Utc};
use levain_core::notify::{load_records, save_records};
use levain_core::{NotificationType, ScheduledNotification, SqliteStore};

/// Run a CLI command and return (stdout, stderr, exit code).
fn run_cli(home: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_levain"))
        .args(args)
        .env("HOME", home)
        .env_remove("LEVAIN_ENV")
        .env_remove("XDG_CONFIG_HOME")
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

/// The CLI's alarm store under a test HOME.
fn alarm_store(home: &Path) -> SqliteStore {
    let dir = home.join(".config").join("levain");
    std::fs::create_dir_all(&dir).unwrap();
    SqliteStore::open(&dir.join("levain.db")).unwrap()
}

fn alarm(id: &str, step_id: &str, bake_id: &str, minutes_from_now: i64) -> ScheduledNotification {
    ScheduledNotification {
        id: id.into(),
        step_id: step_id.into(),
        step_name: format!("step {step_id}"),
        scheduled_time: Utc::now() + Duration::minutes(minutes_from_now),
        notification_type: NotificationType::Start,
        bake_id: bake_id.into(),
        is_active: true,
        adaptive_interval_minutes: None,
    }
}

fn seed_alarms(home: &Path, alarms: Vec<ScheduledNotification>) {
    let records: BTreeMap<_, _> = alarms.into_iter().map(|r| (r.id.clone(), r)).collect();
    assert!(save_records(&alarm_store(home), &records));
}

fn run_cli_success(home: &Path, args: &[&str]) -> String {
    let (stdout, stderr, code) = run_cli(home, args);
    assert_eq!(code, 0, "CLI command failed {args:?}: {stderr}");
    stdout
}

#[test]
fn test_config_get_default() {
    let home = tempfile::tempdir().unwrap();
    let out = run_cli_success(home.path(), &["config", "get", "scheduler.debounce_ms"]);
    assert_eq!(out.trim(), "500");
}

#[test]
fn test_config_set_persists() {
    let home = tempfile::tempdir().unwrap();
    run_cli_success(home.path(), &["config", "set", "dnd.quiet_start_hour", "22"]);
    let out = run_cli_success(home.path(), &["config", "get", "dnd.quiet_start_hour"]);
    assert_eq!(out.trim(), "22");
}

#[test]
fn test_config_unknown_key_fails() {
    let home = tempfile::tempdir().unwrap();
    let (_, _, code) = run_cli(home.path(), &["config", "get", "no.such.key"]);
    assert_ne!(code, 0);
}

#[test]
fn test_config_show_is_json() {
    let home = tempfile::tempdir().unwrap();
    let out = run_cli_success(home.path(), &["config", "show"]);
    let json: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(json["server"]["bind"], "127.0.0.1:8787");
}

#[test]
fn test_recalibrate_stored_bake() {
    let home = tempfile::tempdir().unwrap();
    run_cli_success(
        home.path(),
        &[
            "bakes",
            "put",
            "b1",
            "--recipe",
            "Country loaf",
            "--start",
            "2026-03-01T08:00:00Z",
            "--minutes",
            "600",
        ],
    );
    let out = run_cli_success(
        home.path(),
        &["recalibrate", "b1", "--temperature", "240", "--humidity", "50"],
    );
    let bake: serde_json::Value = serde_json::from_str(&out).unwrap();
    let adjustments = bake["timelineAdjustments"].as_array().unwrap();
    assert_eq!(adjustments.len(), 1);
    assert_eq!(adjustments[0]["adjustmentMinutes"], 0.0);
    assert_eq!(bake["estimatedEndTime"], "2026-03-01T18:00:00Z");
}

#[test]
fn test_recalibrate_missing_bake_fails() {
    let home = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(home.path(), &["recalibrate", "nope"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_alarms_list_empty() {
    let home = tempfile::tempdir().unwrap();
    let out = run_cli_success(home.path(), &["alarms", "list", "--json"]);
    let records: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(records.as_array().map(Vec::len), Some(0));
}

#[test]
fn test_alarms_reconcile_empty() {
    let home = tempfile::tempdir().unwrap();
    let out = run_cli_success(home.path(), &["alarms", "reconcile"]);
    let summary: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(summary["rescheduled"], 0);
    assert_eq!(summary["expired"], 0);
    assert_eq!(summary["missed"], 0);
}

#[test]
fn test_alarms_schedule_persists_records() {
    let home = tempfile::tempdir().unwrap();
    let start = (Utc::now() + Duration::hours(2)).to_rfc3339();
    let out = run_cli_success(
        home.path(),
        &[
            "alarms", "schedule", "b1:0", "--name", "Shape", "--bake", "b1", "--start", &start,
            "--minutes", "30", "--notify-end",
        ],
    );
    let scheduled: serde_json::Value = serde_json::from_str(&out).unwrap();
    let types: Vec<_> = scheduled
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["type"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(types, vec!["start", "end"]);

    let out = run_cli_success(home.path(), &["alarms", "list", "--json"]);
    let listed: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(listed.as_array().map(Vec::len), Some(2));
}

#[test]
fn test_alarms_clear_step_keeps_unrelated_missed_record() {
    let home = tempfile::tempdir().unwrap();
    seed_alarms(
        home.path(),
        vec![
            alarm("late", "other:0", "other", -10),
            alarm("target", "b1:target", "b1", 60),
        ],
    );

    let out = run_cli_success(home.path(), &["alarms", "clear", "--step", "b1:target"]);
    assert_eq!(out.trim(), "removed 1");

    let remaining = load_records(&alarm_store(home.path()));
    assert_eq!(remaining.keys().collect::<Vec<_>>(), vec!["late"]);
}

#[test]
fn test_alarms_reconcile_is_a_dry_run() {
    let home = tempfile::tempdir().unwrap();
    seed_alarms(
        home.path(),
        vec![
            alarm("expired", "b1:0", "b1", -90),
            alarm("late", "b1:1", "b1", -10),
            alarm("future", "b1:2", "b1", 60),
        ],
    );

    let out = run_cli_success(home.path(), &["alarms", "reconcile"]);
    let summary: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(summary["rescheduled"], 1);
    assert_eq!(summary["expired"], 1);
    assert_eq!(summary["missed"], 1);

    assert_eq!(load_records(&alarm_store(home.path())).len(), 3);
}
