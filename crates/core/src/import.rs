//! Import pipeline: spreadsheet rows into the entity store.
//!
//! Rows are applied one at a time in sheet order. A row that fails to map
//! or store is written to the failure ledger and the run moves on; only a
//! failed fetch aborts the whole import.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::entities::InternalEntity;
use crate::errors::{FetchError, RowError};
use crate::ledger::FailureLedger;
use crate::mapper;
use crate::models::{RowFailure, SyncDirection, SyncType};
use crate::sheets::{SheetClient, SheetRow};
use crate::store::{EntityStore, UpsertOutcome};

/// Aggregated result of one import run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    /// Rows applied successfully (`imported + updated + unchanged`).
    pub processed: usize,
    pub failed: usize,
    pub imported: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Serialized as `errors`, the name API clients read.
    #[serde(rename = "errors", alias = "failedDetails")]
    pub failed_details: Vec<RowFailure>,
}

impl ImportOutcome {
    fn count(&mut self, outcome: UpsertOutcome) {
        self.processed += 1;
        match outcome {
            UpsertOutcome::Inserted => self.imported += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// Map one vendor row and upsert it. Shared by the pipeline and retry.
pub fn apply_row(
    store: &dyn EntityStore,
    sync_type: SyncType,
    row: &SheetRow,
) -> Result<(InternalEntity, UpsertOutcome), RowError> {
    let entity = mapper::map_sheet_row(sync_type, row)?;
    let outcome = store.upsert(&entity, true)?;
    Ok((entity, outcome))
}

pub struct ImportPipeline<'a> {
    sheets: &'a dyn SheetClient,
    store: &'a dyn EntityStore,
    ledger: &'a FailureLedger,
}

impl<'a> ImportPipeline<'a> {
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

    /// Import every row of `sync_type` under run `run_id`.
    pub async fn import_type(
        &self,
        run_id: &str,
        sync_type: SyncType,
    ) -> Result<ImportOutcome, FetchError> {
        let rows = self.sheets.list_rows(sync_type).await.map_err(|e| {
            error!(run_id, %sync_type, error = %e, "could not fetch sheet rows");
            e
        })?;
        info!(run_id, %sync_type, rows = rows.len(), "importing rows");

        let mut outcome = ImportOutcome::default();
        for row in &rows {
            match apply_row(self.store, sync_type, row) {
                Ok((entity, result)) => {
                    debug!(
                        %sync_type,
                        key = entity.natural_key(),
                        outcome = ?result,
                        "row applied"
                    );
                    outcome.count(result);
                }
                Err(e) => {
                    let failure = self.record_failure(run_id, sync_type, row, &e);
                    outcome.failed += 1;
                    outcome.failed_details.push(failure);
                }
            }
        }

        info!(
            run_id,
            %sync_type,
            processed = outcome.processed,
            failed = outcome.failed,
            imported = outcome.imported,
            updated = outcome.updated,
            unchanged = outcome.unchanged,
            "import finished"
        );
        Ok(outcome)
    }

    fn record_failure(
        &self,
        run_id: &str,
        sync_type: SyncType,
        row: &SheetRow,
        err: &RowError,
    ) -> RowFailure {
        let external_ref = mapper::external_ref(sync_type, row);
        let snapshot = serde_json::to_value(row).unwrap_or_default();
        // A ledger write failure still counts the row as failed.
        if let Err(db_err) = self.ledger.record(
            run_id,
            sync_type,
            SyncDirection::Import,
            &external_ref,
            &snapshot,
            &err.to_string(),
        ) {
            error!(
                run_id,
                %sync_type,
                external_ref = %external_ref,
                error = %db_err,
                "could not write failure ledger"
            );
        }
        RowFailure {
            row: row.row_number,
            external_ref,
            field: err.field().map(str::to_string),
            message: match err {
                RowError::Mapping(m) => m.reason.clone(),
                RowError::Store(_) => err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::FailureFilter;
    use crate::sheets::MemorySheets;
    use std::sync::Arc;

    fn project(id: &str, title: &str) -> SheetRow {
        SheetRow::from_pairs(
            id.trim_start_matches("P-").parse().unwrap_or(0),
            &[("Project ID", id), ("Project Title", title), ("Stage", "Prototype")],
        )
    }

    fn setup() -> (Arc<Database>, FailureLedger, MemorySheets, String) {
        let db = Arc::new(Database::in_memory().unwrap());
        db.initialize().unwrap();
        let run = db
            .try_start_run(SyncType::Projects, SyncDirection::Import, "tester")
            .unwrap()
            .unwrap();
        let ledger = FailureLedger::new(db.clone(), 5);
        (db, ledger, MemorySheets::new(), run.id)
    }

    #[tokio::test]
    async fn test_import_counts_outcomes() {
        let (db, ledger, sheets, run_id) = setup();
        sheets.set_rows(
            SyncType::Projects,
            vec![project("P-1", "Swarm"), project("P-2", "Mesh")],
        );
        let pipeline = ImportPipeline::new(&sheets, db.as_ref(), &ledger);

        let first = pipeline.import_type(&run_id, SyncType::Projects).await.unwrap();
        assert_eq!((first.processed, first.imported, first.failed), (2, 2, 0));

        sheets.set_rows(
            SyncType::Projects,
            vec![project("P-1", "Swarm"), project("P-2", "Mesh Networking")],
        );
        let second = pipeline.import_type(&run_id, SyncType::Projects).await.unwrap();
        assert_eq!((second.unchanged, second.updated, second.imported), (1, 1, 0));
        assert_eq!(db.count_entities(SyncType::Projects).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_bad_row_is_isolated() {
        let (db, ledger, sheets, run_id) = setup();
        let mut bad = project("P-2", "Mesh");
        bad.set("Stage", serde_json::Value::String("Vaporware".into()));
        sheets.set_rows(
            SyncType::Projects,
            vec![project("P-1", "Swarm"), bad, project("P-3", "Edge")],
        );
        let pipeline = ImportPipeline::new(&sheets, db.as_ref(), &ledger);

        let outcome = pipeline.import_type(&run_id, SyncType::Projects).await.unwrap();
        assert_eq!(outcome.processed, 2);
        assert_eq!(outcome.failed, 1);
        let detail = &outcome.failed_details[0];
        assert_eq!(detail.row, Some(2));
        assert_eq!(detail.external_ref, "P-2");
        assert_eq!(detail.field.as_deref(), Some("Stage"));

        let records = ledger.list(&FailureFilter::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].external_ref, "P-2");
        assert_eq!(records[0].sync_run_id, run_id);
        assert_eq!(records[0].payload_snapshot["rowId"], 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts() {
        let (db, ledger, sheets, run_id) = setup();
        sheets.fail_fetches(SyncType::Projects, "503 from vendor");
        let pipeline = ImportPipeline::new(&sheets, db.as_ref(), &ledger);
        let err = pipeline.import_type(&run_id, SyncType::Projects).await.unwrap_err();
        assert!(err.to_string().contains("503"));
        assert_eq!(db.count_entities(SyncType::Projects).unwrap(), 0);
    }
}
