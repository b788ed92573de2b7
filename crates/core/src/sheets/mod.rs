//! Spreadsheet collaborator: the narrow interface the pipelines consume,
//! the Smartsheet REST implementation, and an in-memory implementation.

pub mod memory;
pub mod smartsheet;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{FetchError, WriteError};
use crate::models::SyncType;

pub use memory::MemorySheets;
pub use smartsheet::SmartsheetClient;

/// One spreadsheet row as delivered by the vendor: cell values keyed by
/// column title. Blank cells are absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SheetRow {
    pub row_id: i64,
    pub row_number: Option<i64>,
    pub cells: BTreeMap<String, serde_json::Value>,
}

impl SheetRow {
    pub fn new(row_id: i64) -> Self {
        Self {
            row_id,
            row_number: None,
            cells: BTreeMap::new(),
        }
    }

    /// Build a row from `(column title, text)` pairs.
    pub fn from_pairs(row_id: i64, pairs: &[(&str, &str)]) -> Self {
        let mut row = Self::new(row_id);
        row.row_number = Some(row_id);
        for (title, value) in pairs {
            row.set(title, serde_json::Value::String((*value).to_string()));
        }
        row
    }

    pub fn set(&mut self, title: &str, value: serde_json::Value) {
        self.cells.insert(title.to_string(), value);
    }

    /// Cell lookup by title, ignoring case and surrounding whitespace.
    pub fn get(&self, title: &str) -> Option<&serde_json::Value> {
        let wanted = title.trim();
        self.cells
            .get(wanted)
            .or_else(|| {
                self.cells
                    .iter()
                    .find(|(k, _)| k.trim().eq_ignore_ascii_case(wanted))
                    .map(|(_, v)| v)
            })
    }

    /// First non-blank cell among `titles`, rendered as trimmed text.
    pub fn text(&self, titles: &[&str]) -> Option<String> {
        titles
            .iter()
            .filter_map(|t| self.get(t))
            .find_map(cell_text)
    }
}

/// Render a cell value as text. Integral numbers lose their `.0`.
pub fn cell_text(value: &serde_json::Value) -> Option<String> {
    let text = match value {
        serde_json::Value::Null => return None,
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// A row to push outward, addressed by natural key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutboundRow {
    pub natural_key: String,
    /// Column whose value identifies the row on the sheet.
    pub key_column: String,
    pub cells: BTreeMap<String, serde_json::Value>,
}

/// A row the spreadsheet refused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RejectedRow {
    pub natural_key: String,
    pub reason: String,
}

/// Acknowledgement of a `write_rows` batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WriteAck {
    pub created: usize,
    pub updated: usize,
    pub rejected: Vec<RejectedRow>,
}

/// Read/write access to the spreadsheet, one sheet per [`SyncType`].
#[async_trait]
pub trait SheetClient: Send + Sync {
    /// Every row of the type's sheet, in sheet order.
    async fn list_rows(&self, sync_type: SyncType) -> Result<Vec<SheetRow>, FetchError>;

    /// Update rows whose natural key already exists on the sheet and append
    /// the rest.
    async fn write_rows(
        &self,
        sync_type: SyncType,
        rows: Vec<OutboundRow>,
    ) -> Result<WriteAck, WriteError>;

    /// Whether a sheet is configured for `sync_type`.
    fn is_configured(&self, _sync_type: SyncType) -> bool {
        true
    }
}
