//! Sheet inspection for debugging column-name mismatches.

use std::collections::HashMap;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color};

use converge_sync_core::config::AppConfig;
use converge_sync_core::mapper::known_columns;
use converge_sync_core::models::SyncType;
use converge_sync_core::sheets::smartsheet::Sheet;
use converge_sync_core::sheets::{cell_text, SmartsheetClient};

use super::parse_type;
use crate::style;

/// `inspect [<type>]`
pub async fn run(config: &AppConfig, sync_type: Option<&str>) -> Result<()> {
    let configured = config.smartsheet.sheets.configured();
    let targets: Vec<SyncType> = match sync_type {
        Some(raw) => vec![parse_type(raw)?],
        None => configured.keys().copied().collect(),
    };
    let client = SmartsheetClient::from_config(&config.smartsheet);

    for sync_type in targets {
        let Some(sheet_id) = configured.get(&sync_type) else {
            println!("{}", style::warn(&format!("no sheet configured for {}", sync_type)));
            continue;
        };
        let spinner = style::spinner(format!("Fetching {} sheet {}...", sync_type, sheet_id));
        let sheet = client.get_sheet(sync_type).await;
        spinner.finish_and_clear();
        let sheet = sheet.with_context(|| format!("failed to fetch {} sheet", sync_type))?;
        print_sheet(sync_type, &sheet);
    }
    Ok(())
}

fn print_sheet(sync_type: SyncType, sheet: &Sheet) {
    println!();
    println!(
        "{} {}",
        style::header(&format!("{} · {}", sync_type, sheet.name)),
        style::dim(&format!(
            "(id {}, {} rows)",
            sheet.id,
            sheet.total_row_count.unwrap_or(sheet.rows.len() as i64)
        ))
    );

    let known = known_columns(sync_type);
    let first_row: HashMap<i64, String> = sheet
        .rows
        .first()
        .map(|row| {
            row.cells
                .iter()
                .filter_map(|c| {
                    let text = c
                        .display_value
                        .clone()
                        .or_else(|| c.value.as_ref().and_then(cell_text))?;
                    Some((c.column_id, text))
                })
                .collect()
        })
        .unwrap_or_default();

    let mut table = style::table(&["Column", "Type", "Read as", "First row"]);
    for column in &sheet.columns {
        let read_as = match known.iter().find(|k| k.matches(&column.title)) {
            Some(k) => Cell::new(k.title).fg(Color::Green),
            None => Cell::new("ignored").fg(Color::DarkGrey),
        };
        let title = if column.primary.unwrap_or(false) {
            format!("{} (primary)", column.title)
        } else {
            column.title.clone()
        };
        table.add_row(vec![
            Cell::new(title),
            Cell::new(column.column_type.as_deref().unwrap_or("—")),
            read_as,
            Cell::new(style::truncate(
                first_row.get(&column.id).map(String::as_str).unwrap_or(""),
                40,
            )),
        ]);
    }
    println!("{table}");

    let missing: Vec<&str> = known
        .iter()
        .filter(|k| !sheet.columns.iter().any(|c| k.matches(&c.title)))
        .map(|k| k.title)
        .collect();
    if !missing.is_empty() {
        println!(
            "{}",
            style::warn(&format!("columns not found on the sheet: {}", missing.join(", ")))
        );
    }
}
