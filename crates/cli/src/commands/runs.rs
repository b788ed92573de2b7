//! Recent run history.

use anyhow::{Context, Result};
use comfy_table::Cell;

use converge_sync_core::coordinator::SyncCoordinator;

use super::{parse_optional_type, when};
use crate::style;

pub fn run(coordinator: &SyncCoordinator, sync_type: Option<&str>, limit: u32) -> Result<()> {
    let sync_type = parse_optional_type(sync_type)?;
    let runs = coordinator
        .list_runs(sync_type, limit)
        .context("failed to list runs")?;

    if runs.is_empty() {
        println!("No runs found.");
        return Ok(());
    }

    let mut table = style::table(&[
        "Started", "Type", "Direction", "Status", "Processed", "Failed", "By", "Error",
    ]);
    for run in &runs {
        table.add_row(vec![
            Cell::new(when(Some(run.started_at))),
            Cell::new(run.sync_type.as_str()),
            Cell::new(run.direction.as_str()),
            style::run_status_cell(run.status),
            Cell::new(run.items_processed),
            Cell::new(run.items_failed),
            Cell::new(&run.triggered_by),
            Cell::new(style::truncate(run.error_message.as_deref().unwrap_or(""), 40)),
        ]);
    }
    println!("{table}");
    println!("{}", style::dim(&format!("{} run(s) shown", runs.len())));
    Ok(())
}
