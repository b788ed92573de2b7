//! Sync coordinator: runs, single-flight locking, retry and status.
//!
//! Each [`SyncType`] moves `Idle → Running → Idle`. A run holds two locks:
//! an in-process atomic flag for its type and the `running` row in
//! `sync_runs`, which the partial unique index keeps unique across
//! processes sharing the database. Both are released by [`RunGuard`], so a
//! run that errors, panics or is dropped mid-flight still ends up `failed`
//! and frees its type.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::db::{format_timestamp, Database};
use crate::errors::{SyncError, WriteError};
use crate::export::{watermark_key, ExportOutcome, ExportPipeline};
use crate::import::{apply_row, ImportOutcome, ImportPipeline};
use crate::ledger::FailureLedger;
use crate::mapper;
use crate::models::{
    AuditEntry, FailedSyncRecord, FailureFilter, FailureStatus, RetryOutcome, RunStatus,
    SyncDirection, SyncRun, SyncType, TypeStatus,
};
use crate::sheets::SheetClient;
use crate::store::EntityStore;

/// Error message stored on runs that never reached their own finalization.
pub const INTERRUPTED: &str = "run interrupted before completion";

// ---------------------------------------------------------------------------
// import_all result
// ---------------------------------------------------------------------------

/// How one type fared in [`SyncCoordinator::import_all`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TypeImportStatus {
    Completed,
    /// No sheet is configured for the type.
    Skipped,
    /// Another run of the type was in progress.
    Conflict,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeImportResult {
    pub sync_type: SyncType,
    pub status: TypeImportStatus,
    pub run: Option<SyncRun>,
    pub outcome: Option<ImportOutcome>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportTotals {
    pub processed: usize,
    pub failed: usize,
    pub imported: usize,
    pub updated: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportAllResult {
    pub results: Vec<TypeImportResult>,
    pub totals: ImportTotals,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct SyncCoordinator {
    db: Arc<Database>,
    store: Arc<dyn EntityStore>,
    sheets: Arc<dyn SheetClient>,
    ledger: FailureLedger,
    /// One flag per type, indexed by [`SyncType::index`].
    running: Arc<[AtomicBool; 5]>,
}

impl SyncCoordinator {
    pub fn new(db: Arc<Database>, sheets: Arc<dyn SheetClient>, max_retries: u32) -> Self {
        info!(max_retries, "initializing sync coordinator");
        Self {
            store: db.clone(),
            ledger: FailureLedger::new(db.clone(), max_retries),
            db,
            sheets,
            running: Arc::new(Default::default()),
        }
    }

    /// Replace the entity store (the database by default).
    pub fn with_store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.store = store;
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn ledger(&self) -> &FailureLedger {
        &self.ledger
    }

    /// Whether this process is running `sync_type`.
    pub fn is_running(&self, sync_type: SyncType) -> bool {
        self.running[sync_type.index()].load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Run lifecycle
    // -----------------------------------------------------------------------

    fn conflict(&self, sync_type: SyncType) -> SyncError {
        let started_at = self
            .db
            .get_running_run(sync_type)
            .ok()
            .flatten()
            .map(|run| run.started_at.to_rfc3339())
            .unwrap_or_else(|| "unknown".into());
        SyncError::Conflict {
            sync_type,
            started_at,
        }
    }

    /// Take the type lock and create the `running` run record.
    fn begin_run(
        &self,
        sync_type: SyncType,
        direction: SyncDirection,
        actor: &str,
    ) -> Result<(SyncRun, RunGuard), SyncError> {
        let flag = &self.running[sync_type.index()];
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(self.conflict(sync_type));
        }
        let mut guard = RunGuard {
            running: self.running.clone(),
            index: sync_type.index(),
            db: self.db.clone(),
            run_id: None,
        };

        let run = self
            .db
            .try_start_run(sync_type, direction, actor)?
            .ok_or_else(|| self.conflict(sync_type))?;
        guard.run_id = Some(run.id.clone());
        info!(run_id = %run.id, %sync_type, %direction, actor, "sync run started");
        Ok((run, guard))
    }

    fn audit(&self, entry: AuditEntry) {
        if let Err(e) = self.db.insert_audit_entry(&entry) {
            warn!(action = %entry.action, error = %e, "could not write audit entry");
        }
    }

    fn audit_run(&self, action: &str, run: &SyncRun, actor: &str) {
        let details = format!(
            "run {} {}: {} processed, {} failed{}",
            run.id,
            run.status,
            run.items_processed,
            run.items_failed,
            run.error_message
                .as_deref()
                .map(|m| format!(" ({})", m))
                .unwrap_or_default()
        );
        let entry = if run.status == RunStatus::Failed {
            AuditEntry::failure(action, Some(run.sync_type), actor, &details)
        } else {
            AuditEntry::success(action, Some(run.sync_type), actor, &details)
        };
        self.audit(entry);
    }

    fn audit_refused(&self, action: &str, sync_type: SyncType, actor: &str, err: &SyncError) {
        self.audit(AuditEntry::failure(action, Some(sync_type), actor, &err.to_string()));
    }

    // -----------------------------------------------------------------------
    // Import
    // -----------------------------------------------------------------------

    /// Run an import of `sync_type` and return the finished run.
    pub async fn trigger_sync(&self, sync_type: SyncType, actor: &str) -> Result<SyncRun, SyncError> {
        self.import_type(sync_type, actor).await.map(|(run, _)| run)
    }

    /// Run an import of `sync_type`, returning the run and row detail.
    ///
    /// A fetch failure is not an error here: the run is finished as
    /// `failed` with the message and returned.
    pub async fn import_type(
        &self,
        sync_type: SyncType,
        actor: &str,
    ) -> Result<(SyncRun, ImportOutcome), SyncError> {
        let (run, guard) = match self.begin_run(sync_type, SyncDirection::Import, actor) {
            Ok(started) => started,
            Err(e) => {
                self.audit_refused("import_run", sync_type, actor, &e);
                return Err(e);
            }
        };

        let pipeline = ImportPipeline::new(self.sheets.as_ref(), self.store.as_ref(), &self.ledger);
        let (finished, outcome) = match pipeline.import_type(&run.id, sync_type).await {
            Ok(outcome) => {
                let status = RunStatus::for_row_counts(outcome.failed);
                let finished = guard.finish(
                    status,
                    outcome.processed as i64,
                    outcome.failed as i64,
                    None,
                )?;
                (finished, outcome)
            }
            Err(e) => {
                error!(run_id = %run.id, %sync_type, error = %e, "import run failed");
                let finished = guard.finish(RunStatus::Failed, 0, 0, Some(&e.to_string()))?;
                (finished, ImportOutcome::default())
            }
        };

        info!(
            run_id = %finished.id,
            %sync_type,
            status = %finished.status,
            processed = finished.items_processed,
            failed = finished.items_failed,
            "sync run finished"
        );
        self.audit_run("import_run", &finished, actor);
        Ok((finished, outcome))
    }

    /// Import every type in order, one after another. Unconfigured types
    /// are skipped; a conflict or error on one type does not stop the rest.
    pub async fn import_all(&self, actor: &str) -> ImportAllResult {
        let mut results = Vec::with_capacity(SyncType::ALL.len());
        let mut totals = ImportTotals::default();

        for sync_type in SyncType::ALL {
            if !self.sheets.is_configured(sync_type) {
                info!(%sync_type, "no sheet configured, skipping");
                results.push(TypeImportResult {
                    sync_type,
                    status: TypeImportStatus::Skipped,
                    run: None,
                    outcome: None,
                    error: None,
                });
                continue;
            }

            let result = match self.import_type(sync_type, actor).await {
                Ok((run, outcome)) => {
                    totals.processed += outcome.processed;
                    totals.failed += outcome.failed;
                    totals.imported += outcome.imported;
                    totals.updated += outcome.updated;
                    totals.unchanged += outcome.unchanged;
                    let failed = run.status == RunStatus::Failed;
                    TypeImportResult {
                        sync_type,
                        status: if failed {
                            TypeImportStatus::Error
                        } else {
                            TypeImportStatus::Completed
                        },
                        error: if failed { run.error_message.clone() } else { None },
                        run: Some(run),
                        outcome: Some(outcome),
                    }
                }
                Err(e) => TypeImportResult {
                    sync_type,
                    status: match e {
                        SyncError::Conflict { .. } => TypeImportStatus::Conflict,
                        _ => TypeImportStatus::Error,
                    },
                    run: None,
                    outcome: None,
                    error: Some(e.to_string()),
                },
            };
            results.push(result);
        }

        info!(
            processed = totals.processed,
            failed = totals.failed,
            "import of all types finished"
        );
        ImportAllResult { results, totals }
    }

    // -----------------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------------

    /// Push entities changed since the last export of `sync_type`.
    pub async fn export_type(
        &self,
        sync_type: SyncType,
        actor: &str,
    ) -> Result<(SyncRun, ExportOutcome), SyncError> {
        let (run, guard) = match self.begin_run(sync_type, SyncDirection::Export, actor) {
            Ok(started) => started,
            Err(e) => {
                self.audit_refused("export_run", sync_type, actor, &e);
                return Err(e);
            }
        };

        let key = watermark_key(sync_type);
        let since = self
            .db
            .get_watermark(&key)?
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let pipeline = ExportPipeline::new(self.sheets.as_ref(), self.store.as_ref(), &self.ledger);
        let (finished, outcome) = match pipeline.export_type(&run.id, sync_type, since).await {
            Ok(outcome) => {
                let status = RunStatus::for_row_counts(outcome.failed);
                let finished = guard.finish(
                    status,
                    outcome.processed as i64,
                    outcome.failed as i64,
                    None,
                )?;
                self.db
                    .set_watermark(&key, &format_timestamp(&run.started_at))?;
                (finished, outcome)
            }
            Err(e) => {
                error!(run_id = %run.id, %sync_type, error = %e, "export run failed");
                let finished = guard.finish(RunStatus::Failed, 0, 0, Some(&e.to_string()))?;
                (finished, ExportOutcome::default())
            }
        };

        info!(
            run_id = %finished.id,
            %sync_type,
            status = %finished.status,
            "export run finished"
        );
        self.audit_run("export_run", &finished, actor);
        Ok((finished, outcome))
    }

    // -----------------------------------------------------------------------
    // Retry
    // -----------------------------------------------------------------------

    /// Retry one failed record.
    ///
    /// Import failures re-fetch the type's rows and re-apply the row with
    /// the same external reference; export failures push the stored entity
    /// again. A failed attempt is counted on the record.
    pub async fn retry_sync(&self, id: &str, actor: &str) -> Result<RetryOutcome, SyncError> {
        let record = self
            .ledger
            .get(id)?
            .filter(|r| r.status != FailureStatus::Resolved)
            .ok_or_else(|| SyncError::NotFound(id.to_string()))?;

        info!(
            record_id = id,
            sync_type = %record.sync_type,
            direction = %record.direction,
            external_ref = %record.external_ref,
            "retrying failed record"
        );

        let outcome = match self.attempt(&record).await {
            Ok(()) => {
                if !self.ledger.resolve(id)? {
                    return Err(SyncError::NotFound(id.to_string()));
                }
                let record = self
                    .ledger
                    .get(id)?
                    .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
                RetryOutcome {
                    resolved: true,
                    record,
                }
            }
            Err(reason) => {
                let record = self
                    .ledger
                    .record_retry_failure(id, &reason)?
                    .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
                RetryOutcome {
                    resolved: false,
                    record,
                }
            }
        };

        let details = format!(
            "record {} ({}) {}",
            id,
            outcome.record.external_ref,
            if outcome.resolved { "resolved" } else { "still failing" }
        );
        let entry = if outcome.resolved {
            AuditEntry::success("retry", Some(outcome.record.sync_type), actor, &details)
        } else {
            AuditEntry::failure("retry", Some(outcome.record.sync_type), actor, &details)
        };
        self.audit(entry);
        Ok(outcome)
    }

    /// One retry attempt. `Err` carries the reason recorded on the record.
    async fn attempt(&self, record: &FailedSyncRecord) -> Result<(), String> {
        let sync_type = record.sync_type;
        match record.direction {
            SyncDirection::Import => {
                let rows = self
                    .sheets
                    .list_rows(sync_type)
                    .await
                    .map_err(|e| e.to_string())?;
                let row = rows
                    .iter()
                    .find(|row| mapper::external_ref(sync_type, row) == record.external_ref)
                    .ok_or_else(|| {
                        format!("row '{}' is no longer on the sheet", record.external_ref)
                    })?;
                apply_row(self.store.as_ref(), sync_type, row)
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            SyncDirection::Export => {
                let stored = self
                    .store
                    .get(sync_type, &record.external_ref)
                    .map_err(|e| e.to_string())?
                    .ok_or_else(|| format!("entity '{}' no longer exists", record.external_ref))?;
                let pipeline =
                    ExportPipeline::new(self.sheets.as_ref(), self.store.as_ref(), &self.ledger);
                pipeline
                    .push_entity(&stored)
                    .await
                    .map_err(|e: WriteError| e.to_string())
            }
        }
    }

    /// Pending records whose last attempt is at least `min_age` old.
    pub fn retry_candidates(
        &self,
        min_age: chrono::Duration,
        limit: u32,
    ) -> Result<Vec<FailedSyncRecord>, SyncError> {
        let cutoff = Utc::now() - min_age;
        Ok(self.db.list_retry_candidates(&cutoff, limit)?)
    }

    // -----------------------------------------------------------------------
    // Status & ledger
    // -----------------------------------------------------------------------

    /// Read-only status of every type.
    pub fn get_sync_status(&self) -> Result<Vec<TypeStatus>, SyncError> {
        SyncType::ALL
            .into_iter()
            .map(|sync_type| -> Result<TypeStatus, SyncError> {
                let running = self.is_running(sync_type)
                    || self.db.get_running_run(sync_type)?.is_some();
                Ok(TypeStatus {
                    sync_type,
                    running,
                    last_run: self.db.get_last_run(sync_type)?,
                    active_failures: self.ledger.count_active(Some(sync_type))?,
                    entity_count: self.store.count(sync_type)?,
                })
            })
            .collect()
    }

    pub fn list_failed(&self, filter: &FailureFilter) -> Result<Vec<FailedSyncRecord>, SyncError> {
        Ok(self.ledger.list(filter)?)
    }

    /// Remove failure records matching `filter`, sparing those of running
    /// runs. Returns the number removed.
    pub fn clear_failed(&self, filter: &FailureFilter, actor: &str) -> Result<usize, SyncError> {
        let removed = self.ledger.clear_all(filter)?;
        self.audit(AuditEntry::success(
            "clear_failed",
            filter.sync_type,
            actor,
            &format!("removed {} failed records", removed),
        ));
        Ok(removed)
    }

    pub fn list_runs(
        &self,
        sync_type: Option<SyncType>,
        limit: u32,
    ) -> Result<Vec<SyncRun>, SyncError> {
        Ok(self.db.list_runs(sync_type, limit)?)
    }

    /// Fail runs left `running` by a crashed process so their types can run
    /// again. Call once at start-up, before serving requests.
    pub fn recover_interrupted_runs(&self) -> Result<usize, SyncError> {
        let recovered = self.db.fail_running_runs(INTERRUPTED)?;
        if recovered > 0 {
            warn!(recovered, "marked interrupted runs as failed");
        }
        Ok(recovered)
    }
}

// ---------------------------------------------------------------------------
// Run guard
// ---------------------------------------------------------------------------

/// Releases a type's lock on drop, failing the run first if it was never
/// finished.
struct RunGuard {
    running: Arc<[AtomicBool; 5]>,
    index: usize,
    db: Arc<Database>,
    run_id: Option<String>,
}

impl RunGuard {
    fn finish(
        mut self,
        status: RunStatus,
        items_processed: i64,
        items_failed: i64,
        error_message: Option<&str>,
    ) -> Result<SyncRun, SyncError> {
        let Some(run_id) = self.run_id.take() else {
            return Err(SyncError::NotFound("run".into()));
        };
        let result = self
            .db
            .finish_run(&run_id, status, items_processed, items_failed, error_message);
        if result.is_err() {
            // Leave the run for Drop to fail.
            self.run_id = Some(run_id);
        }
        Ok(result?)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some(run_id) = self.run_id.take() {
            error!(run_id = %run_id, "run ended without finishing, marking failed");
            if let Err(e) = self
                .db
                .finish_run(&run_id, RunStatus::Failed, 0, 0, Some(INTERRUPTED))
            {
                error!(run_id = %run_id, error = %e, "could not fail interrupted run");
            }
        }
        self.running[self.index].store(false, Ordering::SeqCst);
    }
}
