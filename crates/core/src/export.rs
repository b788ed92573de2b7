//! Export pipeline: locally changed entities back to the spreadsheet.
//!
//! The sheet client upserts by natural key, so pushing the same entity
//! twice updates one row instead of appending a duplicate.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::errors::WriteError;
use crate::ledger::FailureLedger;
use crate::mapper;
use crate::models::{RowFailure, SyncDirection, SyncType};
use crate::sheets::{OutboundRow, SheetClient};
use crate::store::{EntityStore, StoredEntity};

/// Watermark key holding the start time of the last non-failed export.
pub fn watermark_key(sync_type: SyncType) -> String {
    format!("export:{}", sync_type)
}

/// Aggregated result of one export run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExportOutcome {
    /// Rows accepted by the sheet (`created + updated`).
    pub processed: usize,
    pub failed: usize,
    pub created: usize,
    pub updated: usize,
    /// Serialized as `errors`, the name API clients read.
    #[serde(rename = "errors", alias = "failedDetails")]
    pub failed_details: Vec<RowFailure>,
}

pub struct ExportPipeline<'a> {
    sheets: &'a dyn SheetClient,
    store: &'a dyn EntityStore,
    ledger: &'a FailureLedger,
}

impl<'a> ExportPipeline<'a> {
    pub fn new(
        sheets: &'a dyn SheetClient,
        store: &'a dyn EntityStore,
        ledger: &'a FailureLedger,
    ) -> Self {
        Self {
            sheets,
            store,
            ledger,
        }
    }

    /// Push entities of `sync_type` changed since `since` under run `run_id`.
    pub async fn export_type(
        &self,
        run_id: &str,
        sync_type: SyncType,
        since: Option<DateTime<Utc>>,
    ) -> Result<ExportOutcome, WriteError> {
        let changed = self.store.find_changed_since(sync_type, since.as_ref())?;
        info!(run_id, %sync_type, changed = changed.len(), "exporting local changes");
        if changed.is_empty() {
            return Ok(ExportOutcome::default());
        }

        let rows: Vec<OutboundRow> = changed
            .iter()
            .map(|stored| mapper::to_outbound(&stored.entity))
            .collect();
        let ack = self.sheets.write_rows(sync_type, rows).await.map_err(|e| {
            error!(run_id, %sync_type, error = %e, "could not write sheet rows");
            e
        })?;

        let rejected: HashMap<&str, &str> = ack
            .rejected
            .iter()
            .map(|r| (r.natural_key.as_str(), r.reason.as_str()))
            .collect();

        let mut outcome = ExportOutcome {
            processed: ack.created + ack.updated,
            created: ack.created,
            updated: ack.updated,
            ..Default::default()
        };

        for stored in &changed {
            let key = stored.entity.natural_key();
            match rejected.get(key) {
                Some(reason) => {
                    self.record_rejection(run_id, stored, reason);
                    outcome.failed += 1;
                    outcome.failed_details.push(RowFailure {
                        row: None,
                        external_ref: key.to_string(),
                        field: None,
                        message: reason.to_string(),
                    });
                }
                None => {
                    if let Err(e) = self.store.mark_synced(stored) {
                        warn!(%sync_type, key, error = %e, "could not mark entity synced");
                    }
                    debug!(%sync_type, key, "entity pushed");
                }
            }
        }

        info!(
            run_id,
            %sync_type,
            created = outcome.created,
            updated = outcome.updated,
            failed = outcome.failed,
            "export finished"
        );
        Ok(outcome)
    }

    /// Push a single stored entity. Used when retrying an export failure.
    pub async fn push_entity(&self, stored: &StoredEntity) -> Result<(), WriteError> {
        let sync_type = stored.entity.sync_type();
        let ack = self
            .sheets
            .write_rows(sync_type, vec![mapper::to_outbound(&stored.entity)])
            .await?;
        if let Some(rejected) = ack.rejected.into_iter().next() {
            return Err(WriteError::Rejected {
                natural_key: rejected.natural_key,
                reason: rejected.reason,
            });
        }
        if let Err(e) = self.store.mark_synced(stored) {
            warn!(%sync_type, key = stored.entity.natural_key(), error = %e, "could not mark entity synced");
        }
        Ok(())
    }

    fn record_rejection(&self, run_id: &str, stored: &StoredEntity, reason: &str) {
        let sync_type = stored.entity.sync_type();
        let key = stored.entity.natural_key();
        let snapshot = stored.entity.to_payload().unwrap_or_default();
        if let Err(e) = self.ledger.record(
            run_id,
            sync_type,
            SyncDirection::Export,
            key,
            &snapshot,
            reason,
        ) {
            error!(run_id, %sync_type, key, error = %e, "could not write failure ledger");
        }
    }
}
