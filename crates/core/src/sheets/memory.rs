//! In-memory [`SheetClient`] for tests and dry runs.
//!
//! Supports injected fetch failures, rejected writes, and a per-type gate
//! that holds `list_rows` until the caller releases it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{OutboundRow, RejectedRow, SheetClient, SheetRow, WriteAck};
use crate::errors::{FetchError, WriteError};
use crate::mapper;
use crate::models::SyncType;

#[derive(Default)]
struct State {
    rows: HashMap<SyncType, Vec<SheetRow>>,
    fetch_failures: HashMap<SyncType, String>,
    write_failures: HashMap<SyncType, String>,
    rejected_keys: HashSet<String>,
    unconfigured: HashSet<SyncType>,
    gates: HashMap<SyncType, Arc<Semaphore>>,
    next_row_id: i64,
}

/// A spreadsheet held entirely in memory.
#[derive(Default)]
pub struct MemorySheets {
    state: Mutex<State>,
}

impl MemorySheets {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the sheet for `sync_type`.
    pub fn set_rows(&self, sync_type: SyncType, rows: Vec<SheetRow>) {
        let mut state = self.state();
        let max_id = rows.iter().map(|r| r.row_id).max().unwrap_or(0);
        state.next_row_id = state.next_row_id.max(max_id);
        state.rows.insert(sync_type, rows);
    }

    /// Current contents of the sheet for `sync_type`.
    pub fn rows(&self, sync_type: SyncType) -> Vec<SheetRow> {
        self.state().rows.get(&sync_type).cloned().unwrap_or_default()
    }

    /// Make every `list_rows` for `sync_type` fail until cleared.
    pub fn fail_fetches(&self, sync_type: SyncType, message: &str) {
        self.state()
            .fetch_failures
            .insert(sync_type, message.to_string());
    }

    /// Make every `write_rows` for `sync_type` fail until cleared.
    pub fn fail_writes(&self, sync_type: SyncType, message: &str) {
        self.state()
            .write_failures
            .insert(sync_type, message.to_string());
    }

    pub fn clear_failures(&self, sync_type: SyncType) {
        let mut state = self.state();
        state.fetch_failures.remove(&sync_type);
        state.write_failures.remove(&sync_type);
    }

    /// Reject any written row with this natural key.
    pub fn reject_key(&self, natural_key: &str) {
        self.state().rejected_keys.insert(natural_key.to_string());
    }

    /// Report `sync_type` as having no sheet.
    pub fn unconfigure(&self, sync_type: SyncType) {
        self.state().unconfigured.insert(sync_type);
    }

    /// Hold `list_rows` for `sync_type` until a permit is added to the
    /// returned semaphore.
    pub fn pause(&self, sync_type: SyncType) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.state().gates.insert(sync_type, gate.clone());
        gate
    }
}

#[async_trait]
impl SheetClient for MemorySheets {
    async fn list_rows(&self, sync_type: SyncType) -> Result<Vec<SheetRow>, FetchError> {
        let gate = self.state().gates.get(&sync_type).cloned();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| FetchError::Unavailable("sheet gate closed".into()))?;
        }

        let state = self.state();
        if state.unconfigured.contains(&sync_type) {
            return Err(FetchError::NotConfigured(sync_type));
        }
        if let Some(message) = state.fetch_failures.get(&sync_type) {
            return Err(FetchError::Unavailable(message.clone()));
        }
        Ok(state.rows.get(&sync_type).cloned().unwrap_or_default())
    }

    async fn write_rows(
        &self,
        sync_type: SyncType,
        rows: Vec<OutboundRow>,
    ) -> Result<WriteAck, WriteError> {
        let mut state = self.state();
        if state.unconfigured.contains(&sync_type) {
            return Err(WriteError::NotConfigured(sync_type));
        }
        if let Some(message) = state.write_failures.get(&sync_type) {
            return Err(WriteError::Unavailable(message.clone()));
        }

        let mut ack = WriteAck::default();
        for row in rows {
            if state.rejected_keys.contains(&row.natural_key) {
                ack.rejected.push(RejectedRow {
                    natural_key: row.natural_key,
                    reason: "row rejected by sheet".into(),
                });
                continue;
            }

            let position = state.rows.get(&sync_type).and_then(|sheet| {
                sheet.iter().position(|r| {
                    mapper::natural_key_of(sync_type, r).as_deref()
                        == Some(row.natural_key.as_str())
                })
            });
            match position {
                Some(index) => {
                    if let Some(existing) = state
                        .rows
                        .get_mut(&sync_type)
                        .and_then(|sheet| sheet.get_mut(index))
                    {
                        existing.cells.extend(row.cells);
                    }
                    ack.updated += 1;
                }
                None => {
                    state.next_row_id += 1;
                    let mut new_row = SheetRow::new(state.next_row_id);
                    let sheet = state.rows.entry(sync_type).or_default();
                    new_row.row_number = Some(sheet.len() as i64 + 1);
                    new_row.cells = row.cells;
                    sheet.push(new_row);
                    ack.created += 1;
                }
            }
        }
        Ok(ack)
    }

    fn is_configured(&self, sync_type: SyncType) -> bool {
        !self.state().unconfigured.contains(&sync_type)
    }
}
