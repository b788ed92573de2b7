//! Failure ledger: durable record of rows that failed to import or export.
//!
//! Records are keyed by id for targeted retry and carry the external
//! reference and a payload snapshot so a retry can find the row again.

use std::sync::Arc;

use tracing::{info, warn};

use crate::db::Database;
use crate::errors::DatabaseError;
use crate::models::{FailedSyncRecord, FailureFilter, SyncDirection, SyncType};

#[derive(Clone)]
pub struct FailureLedger {
    db: Arc<Database>,
    max_retries: u32,
}

impl FailureLedger {
    /// `max_retries` of 0 never abandons a record.
    pub fn new(db: Arc<Database>, max_retries: u32) -> Self {
        Self { db, max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Record a failed row as `pending` and return the record id.
    pub fn record(
        &self,
        run_id: &str,
        sync_type: SyncType,
        direction: SyncDirection,
        external_ref: &str,
        payload: &serde_json::Value,
        reason: &str,
    ) -> Result<String, DatabaseError> {
        let id = self.db.insert_failed_record(
            run_id,
            sync_type,
            direction,
            external_ref,
            payload,
            reason,
        )?;
        warn!(
            record_id = %id,
            %sync_type,
            %direction,
            external_ref,
            reason,
            "row failed, recorded for retry"
        );
        Ok(id)
    }

    /// Records matching `filter`, newest first. Without a status only active
    /// (pending or abandoned) records are listed.
    pub fn list(&self, filter: &FailureFilter) -> Result<Vec<FailedSyncRecord>, DatabaseError> {
        self.db.list_failed_records(filter)
    }

    pub fn get(&self, id: &str) -> Result<Option<FailedSyncRecord>, DatabaseError> {
        self.db.get_failed_record(id)
    }

    /// Returns `false` if the record was missing or already resolved.
    pub fn resolve(&self, id: &str) -> Result<bool, DatabaseError> {
        let resolved = self.db.resolve_failed_record(id)?;
        if resolved {
            info!(record_id = id, "failed record resolved");
        }
        Ok(resolved)
    }

    /// Count a failed retry, abandoning the record at the retry limit.
    pub fn record_retry_failure(
        &self,
        id: &str,
        reason: &str,
    ) -> Result<Option<FailedSyncRecord>, DatabaseError> {
        self.db.record_retry_failure(id, reason, self.max_retries)?;
        let record = self.db.get_failed_record(id)?;
        if let Some(ref r) = record {
            warn!(
                record_id = id,
                retry_count = r.retry_count,
                status = %r.status,
                reason,
                "retry failed"
            );
        }
        Ok(record)
    }

    /// Remove every record matching `filter` regardless of status, except
    /// those owned by a run that is still running.
    pub fn clear_all(&self, filter: &FailureFilter) -> Result<usize, DatabaseError> {
        let removed = self.db.clear_failed_records(filter)?;
        info!(removed, "cleared failure ledger");
        Ok(removed)
    }

    pub fn count_active(&self, sync_type: Option<SyncType>) -> Result<i64, DatabaseError> {
        self.db.count_active_failures(sync_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailureStatus, RunStatus};
    use serde_json::json;

    fn setup() -> (Arc<Database>, FailureLedger, String) {
        let db = Arc::new(Database::in_memory().unwrap());
        db.initialize().unwrap();
        let run = db
            .try_start_run(SyncType::Projects, SyncDirection::Import, "tester")
            .unwrap()
            .unwrap();
        let ledger = FailureLedger::new(db.clone(), 2);
        (db, ledger, run.id)
    }

    #[test]
    fn test_record_and_resolve() {
        let (_db, ledger, run_id) = setup();
        let id = ledger
            .record(&run_id, SyncType::Projects, SyncDirection::Import, "P-1", &json!({}), "bad")
            .unwrap();
        assert_eq!(ledger.count_active(Some(SyncType::Projects)).unwrap(), 1);
        assert_eq!(ledger.count_active(Some(SyncType::Sessions)).unwrap(), 0);
        assert!(ledger.resolve(&id).unwrap());
        assert!(ledger.list(&FailureFilter::default()).unwrap().is_empty());
        assert_eq!(ledger.get(&id).unwrap().unwrap().status, FailureStatus::Resolved);
    }

    #[test]
    fn test_retry_failures_reach_abandoned() {
        let (_db, ledger, run_id) = setup();
        let id = ledger
            .record(&run_id, SyncType::Projects, SyncDirection::Import, "P-1", &json!({}), "bad")
            .unwrap();
        let first = ledger.record_retry_failure(&id, "still bad").unwrap().unwrap();
        assert_eq!(first.status, FailureStatus::Pending);
        let second = ledger.record_retry_failure(&id, "still bad").unwrap().unwrap();
        assert_eq!(second.status, FailureStatus::Abandoned);
        assert_eq!(second.retry_count, 2);
        assert_eq!(ledger.list(&FailureFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_clear_spares_running_runs() {
        let (db, ledger, run_id) = setup();
        ledger
            .record(&run_id, SyncType::Projects, SyncDirection::Import, "P-1", &json!({}), "bad")
            .unwrap();
        assert_eq!(ledger.clear_all(&FailureFilter::default()).unwrap(), 0);

        db.finish_run(&run_id, RunStatus::Partial, 0, 1, None).unwrap();
        assert_eq!(ledger.clear_all(&FailureFilter::default()).unwrap(), 1);
    }
}
