//! Import, sync and export commands.

use anyhow::{Context, Result};
use comfy_table::Cell;
use dialoguer::{Confirm, Select};

use converge_sync_core::coordinator::{ImportAllResult, SyncCoordinator, TypeImportStatus};
use converge_sync_core::import::ImportOutcome;
use converge_sync_core::models::{RowFailure, RunStatus, SyncRun, SyncType};

use super::parse_type;
use crate::style;
use crate::CLI_ACTOR;

/// Row errors printed after an import.
const SHOWN_ERRORS: usize = 5;

/// `import [<type>|all]`
pub async fn run_import(coordinator: &SyncCoordinator, target: Option<&str>) -> Result<()> {
    match target {
        Some(t) if t.eq_ignore_ascii_case("all") => import_all(coordinator).await,
        Some(t) => import_one(coordinator, parse_type(t)?).await.map(|_| ()),
        None => {
            let choice = Select::new()
                .with_prompt("How do you want to import?")
                .items(&["All types at once", "Type by type"])
                .default(0)
                .interact()
                .context("prompt cancelled")?;
            if choice == 0 {
                return import_all(coordinator).await;
            }
            let mut chosen = Vec::new();
            for sync_type in SyncType::ALL {
                let go = Confirm::new()
                    .with_prompt(format!("Import {}?", sync_type))
                    .default(true)
                    .interact()
                    .context("prompt cancelled")?;
                if go {
                    chosen.push(sync_type);
                }
            }
            let failed = import_each(coordinator, &chosen).await;
            if failed.is_empty() {
                println!("{}", style::success("Import complete."));
            } else {
                let names: Vec<&str> = failed.iter().map(|t| t.as_str()).collect();
                println!(
                    "{}",
                    style::warn(&format!(
                        "Import finished with errors in: {}",
                        names.join(", ")
                    ))
                );
            }
            Ok(())
        }
    }
}

/// Import each type in turn. A type that cannot run, or whose run fails
/// or leaves failed rows, is reported and the next type still runs.
/// Returns the types that did not import cleanly.
async fn import_each(coordinator: &SyncCoordinator, types: &[SyncType]) -> Vec<SyncType> {
    let mut failed = Vec::new();
    for &sync_type in types {
        match import_one(coordinator, sync_type).await {
            Ok(RunStatus::Succeeded) => {}
            Ok(_) => failed.push(sync_type),
            Err(e) => {
                println!("{}", style::error(&format!("{}: {:#}", sync_type, e)));
                failed.push(sync_type);
            }
        }
    }
    failed
}

async fn import_one(coordinator: &SyncCoordinator, sync_type: SyncType) -> Result<RunStatus> {
    let spinner = style::spinner(format!("Importing {}...", sync_type));
    let result = coordinator.import_type(sync_type, CLI_ACTOR).await;
    spinner.finish_and_clear();

    let (run, outcome) = result?;
    print_run(&run);
    print_import_counts(&outcome);
    print_row_errors(&outcome.failed_details);
    Ok(run.status)
}

async fn import_all(coordinator: &SyncCoordinator) -> Result<()> {
    let spinner = style::spinner("Importing all configured types...".to_string());
    let result = coordinator.import_all(CLI_ACTOR).await;
    spinner.finish_and_clear();

    print_import_all(&result);
    for r in &result.results {
        if let Some(outcome) = &r.outcome {
            if !outcome.failed_details.is_empty() {
                println!();
                println!("{}", style::header(&format!("{} row errors", r.sync_type)));
                print_row_errors(&outcome.failed_details);
            }
        }
    }
    Ok(())
}

/// `sync <type>`
pub async fn run_sync(coordinator: &SyncCoordinator, sync_type: &str) -> Result<()> {
    let sync_type = parse_type(sync_type)?;
    let spinner = style::spinner(format!("Syncing {}...", sync_type));
    let result = coordinator.trigger_sync(sync_type, CLI_ACTOR).await;
    spinner.finish_and_clear();
    print_run(&result?);
    Ok(())
}

/// `export <type>`
pub async fn run_export(coordinator: &SyncCoordinator, sync_type: &str) -> Result<()> {
    let sync_type = parse_type(sync_type)?;
    let spinner = style::spinner(format!("Exporting {}...", sync_type));
    let result = coordinator.export_type(sync_type, CLI_ACTOR).await;
    spinner.finish_and_clear();

    let (run, outcome) = result?;
    print_run(&run);
    println!("  Created : {}", outcome.created);
    println!("  Updated : {}", outcome.updated);
    println!("  Failed  : {}", outcome.failed);
    print_row_errors(&outcome.failed_details);
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_run(run: &SyncRun) {
    let summary = format!(
        "{} {} run {}: {} processed, {} failed",
        run.sync_type, run.direction, run.status, run.items_processed, run.items_failed
    );
    match run.status {
        RunStatus::Succeeded => println!("{}", style::success(&summary)),
        RunStatus::Partial => println!("{}", style::warn(&summary)),
        _ => println!("{}", style::error(&summary)),
    }
    if let Some(message) = &run.error_message {
        println!("  {}", message);
    }
    println!("  {}", style::dim(&format!("run {}", run.id)));
}

fn print_import_counts(outcome: &ImportOutcome) {
    println!("  Imported : {}", outcome.imported);
    println!("  Updated  : {}", outcome.updated);
    println!("  Unchanged: {}", outcome.unchanged);
    println!("  Failed   : {}", outcome.failed);
}

fn print_row_errors(failures: &[RowFailure]) {
    if failures.is_empty() {
        return;
    }
    for f in failures.iter().take(SHOWN_ERRORS) {
        let row = f
            .row
            .map(|r| format!("row {}", r))
            .unwrap_or_else(|| f.external_ref.clone());
        let field = f.field.as_deref().map(|c| format!(" [{}]", c)).unwrap_or_default();
        println!("  {}", style::error(&format!("{}{}: {}", row, field, f.message)));
    }
    if failures.len() > SHOWN_ERRORS {
        println!(
            "  {}",
            style::dim(&format!(
                "... and {} more. Run 'converge-sync failed' for the full list.",
                failures.len() - SHOWN_ERRORS
            ))
        );
    }
}

fn print_import_all(result: &ImportAllResult) {
    let mut table = style::table(&["Type", "Result", "Imported", "Updated", "Unchanged", "Failed", "Note"]);
    for r in &result.results {
        let status = match r.status {
            TypeImportStatus::Completed => r
                .run
                .as_ref()
                .map(|run| style::run_status_cell(run.status))
                .unwrap_or_else(|| Cell::new("completed")),
            TypeImportStatus::Skipped => Cell::new("skipped"),
            TypeImportStatus::Conflict => Cell::new("conflict").fg(comfy_table::Color::Yellow),
            TypeImportStatus::Error => Cell::new("error").fg(comfy_table::Color::Red),
        };
        let counts = r.outcome.clone().unwrap_or_default();
        table.add_row(vec![
            Cell::new(r.sync_type.as_str()),
            status,
            Cell::new(counts.imported),
            Cell::new(counts.updated),
            Cell::new(counts.unchanged),
            Cell::new(counts.failed),
            Cell::new(style::truncate(r.error.as_deref().unwrap_or(""), 40)),
        ]);
    }
    println!("{table}");
    let t = &result.totals;
    println!(
        "Total: {} imported, {} updated, {} unchanged, {} failed",
        t.imported, t.updated, t.unchanged, t.failed
    );
}
