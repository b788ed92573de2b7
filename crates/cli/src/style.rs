//! Shared styling utilities for terminal output.

use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use converge_sync_core::models::{FailureStatus, RunStatus};

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold).
pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Status indicator for a type with a run in progress.
pub fn status_running() -> String {
    let style = Style::new().green();
    format!("{} running", style.apply_to("●"))
}

pub fn status_idle() -> String {
    let style = Style::new().dim();
    format!("{} idle", style.apply_to("○"))
}

/// Table with the shared preset.
pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| Cell::new(*h)));
    table
}

pub fn run_status_cell(status: RunStatus) -> Cell {
    match status {
        RunStatus::Succeeded => Cell::new("✓ succeeded").fg(Color::Green),
        RunStatus::Partial => Cell::new("◐ partial").fg(Color::Yellow),
        RunStatus::Failed => Cell::new("✗ failed").fg(Color::Red),
        RunStatus::Running => Cell::new("⧗ running").fg(Color::Blue),
    }
}

pub fn failure_status_cell(status: FailureStatus) -> Cell {
    match status {
        FailureStatus::Pending => Cell::new("⧗ pending").fg(Color::Yellow),
        FailureStatus::Abandoned => Cell::new("✗ abandoned").fg(Color::Red),
        FailureStatus::Resolved => Cell::new("✓ resolved").fg(Color::Green),
    }
}

/// Spinner shown while a run talks to Smartsheet.
pub fn spinner(msg: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} {msg}") {
        spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    spinner.set_message(msg);
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    spinner
}

/// Shorten `s` to at most `max_len` characters.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
