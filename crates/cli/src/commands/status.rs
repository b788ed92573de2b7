//! Per-type status table.

use anyhow::{Context, Result};
use comfy_table::Cell;

use converge_sync_core::coordinator::SyncCoordinator;

use super::when;
use crate::style;

pub fn run(coordinator: &SyncCoordinator) -> Result<()> {
    let statuses = coordinator
        .get_sync_status()
        .context("failed to read sync status")?;

    println!();
    println!("{}", style::header("Converge Sync Status"));
    println!();

    let mut table = style::table(&["Type", "State", "Last run", "Result", "Entities", "Failures"]);
    for status in &statuses {
        let state = if status.running {
            style::status_running()
        } else {
            style::status_idle()
        };
        let (last_run, result) = match &status.last_run {
            Some(run) => (
                format!("{} {}", run.direction, when(Some(run.started_at))),
                style::run_status_cell(run.status),
            ),
            None => ("never".to_string(), Cell::new("—")),
        };
        table.add_row(vec![
            Cell::new(status.sync_type.as_str()),
            Cell::new(state),
            Cell::new(last_run),
            result,
            Cell::new(status.entity_count),
            Cell::new(status.active_failures),
        ]);
    }
    println!("{table}");

    let failures: i64 = statuses.iter().map(|s| s.active_failures).sum();
    if failures > 0 {
        println!();
        println!(
            "{}",
            style::warn(&format!(
                "{} failed record(s). Run 'converge-sync failed' to review.",
                failures
            ))
        );
    }
    println!();
    Ok(())
}
