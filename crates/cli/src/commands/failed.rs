//! Failure ledger commands.

use anyhow::{Context, Result};
use comfy_table::Cell;
use dialoguer::Confirm;

use converge_sync_core::coordinator::SyncCoordinator;
use converge_sync_core::models::{FailureFilter, FailureStatus};

use super::{parse_optional_type, when};
use crate::style;
use crate::CLI_ACTOR;

/// `failed [--type] [--status] [--limit]`
pub fn run_list(
    coordinator: &SyncCoordinator,
    sync_type: Option<&str>,
    status: Option<&str>,
    limit: u32,
) -> Result<()> {
    let status = status
        .map(|s| s.parse::<FailureStatus>().map_err(anyhow::Error::msg))
        .transpose()?;
    let filter = FailureFilter {
        sync_type: parse_optional_type(sync_type)?,
        status,
        limit: Some(limit),
    };
    let records = coordinator
        .list_failed(&filter)
        .context("failed to list failed records")?;

    if records.is_empty() {
        println!("{}", style::success("No failed records."));
        return Ok(());
    }

    let mut table = style::table(&[
        "ID", "Type", "Direction", "Reference", "Status", "Retries", "Last attempt", "Reason",
    ]);
    for r in &records {
        table.add_row(vec![
            Cell::new(&r.id),
            Cell::new(r.sync_type.as_str()),
            Cell::new(r.direction.as_str()),
            Cell::new(style::truncate(&r.external_ref, 30)),
            style::failure_status_cell(r.status),
            Cell::new(r.retry_count),
            Cell::new(when(Some(r.last_attempt_at))),
            Cell::new(style::truncate(&r.error_reason, 50)),
        ]);
    }
    println!("{table}");
    println!("{}", style::dim(&format!("{} record(s) shown", records.len())));
    Ok(())
}

/// `retry <id>`
pub async fn run_retry(coordinator: &SyncCoordinator, id: &str) -> Result<()> {
    let spinner = style::spinner(format!("Retrying {}...", id));
    let result = coordinator.retry_sync(id, CLI_ACTOR).await;
    spinner.finish_and_clear();

    let outcome = result?;
    let record = &outcome.record;
    if outcome.resolved {
        println!(
            "{}",
            style::success(&format!("{} {} resolved", record.sync_type, record.external_ref))
        );
    } else {
        println!(
            "{}",
            style::error(&format!(
                "{} {} still failing ({} retries, {})",
                record.sync_type, record.external_ref, record.retry_count, record.status
            ))
        );
        println!("  {}", record.error_reason);
    }
    Ok(())
}

/// `clear-failed [--yes]`
pub fn run_clear(coordinator: &SyncCoordinator, yes: bool) -> Result<()> {
    if !yes {
        let confirmed = Confirm::new()
            .with_prompt("Remove every failed record? This cannot be undone")
            .default(false)
            .interact()
            .context("prompt cancelled")?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let removed = coordinator
        .clear_failed(&FailureFilter::default(), CLI_ACTOR)
        .context("failed to clear failed records")?;
    println!("{}", style::success(&format!("Removed {} failed record(s)", removed)));
    Ok(())
}
