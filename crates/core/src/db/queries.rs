//! Typed query helpers for every table in the Converge Sync database.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, ErrorCode, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{
    AuditEntry, FailedSyncRecord, FailureFilter, FailureStatus, RunStatus, SyncDirection, SyncRun,
    SyncType,
};
use crate::store::UpsertOutcome;

/// Default page size for listings when the caller gives none.
pub const DEFAULT_LIST_LIMIT: u32 = 100;

// ---------------------------------------------------------------------------
// Domain structs returned by queries
// ---------------------------------------------------------------------------

/// A row from the `entities` table.
#[derive(Debug, Clone)]
pub struct EntityRow {
    pub entity_type: String,
    pub natural_key: String,
    pub payload: String,
    pub content_hash: String,
    pub created_at: String,
    pub updated_at: String,
    pub last_synced_at: Option<String>,
}

/// A row from the `watermarks` table.
#[derive(Debug, Clone)]
pub struct WatermarkEntry {
    pub source: String,
    pub value: String,
    pub updated_at: String,
}

/// Fixed-width UTC timestamp; string order matches time order.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

const RUN_COLUMNS: &str = "id, sync_type, direction, status, started_at, completed_at,
     items_processed, items_failed, error_message, triggered_by";

const RECORD_COLUMNS: &str = "id, sync_run_id, sync_type, direction, external_ref,
     payload_snapshot, error_reason, retry_count, last_attempt_at, status, created_at,
     resolved_at";

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- sync_runs ----------------------------------------------------------

    /// Insert a `running` run unless one is already running for the type.
    ///
    /// Returns `None` when another run holds the type. The partial unique
    /// index backs the `NOT EXISTS` check when several processes race.
    pub fn try_start_run(
        &self,
        sync_type: SyncType,
        direction: SyncDirection,
        triggered_by: &str,
    ) -> Result<Option<SyncRun>, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let conn = self.conn();
        let result = conn.execute(
            "INSERT INTO sync_runs (id, sync_type, direction, status, started_at, triggered_by)
             SELECT ?1, ?2, ?3, 'running', ?4, ?5
             WHERE NOT EXISTS (
                 SELECT 1 FROM sync_runs WHERE sync_type = ?2 AND status = 'running'
             )",
            params![
                id,
                sync_type.as_str(),
                direction.as_str(),
                format_timestamp(&started_at),
                triggered_by
            ],
        );
        let inserted = match result {
            Ok(n) => n,
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                0
            }
            Err(e) => return Err(e.into()),
        };
        if inserted == 0 {
            debug!(%sync_type, "run already in progress");
            return Ok(None);
        }
        debug!(id = %id, %sync_type, %direction, "started sync run");
        Ok(Some(SyncRun {
            id,
            sync_type,
            direction,
            status: RunStatus::Running,
            started_at,
            completed_at: None,
            items_processed: 0,
            items_failed: 0,
            error_message: None,
            triggered_by: triggered_by.to_string(),
        }))
    }

    /// Move a running run to a terminal status. A run that is no longer
    /// running is left untouched.
    pub fn finish_run(
        &self,
        id: &str,
        status: RunStatus,
        items_processed: i64,
        items_failed: i64,
        error_message: Option<&str>,
    ) -> Result<SyncRun, DatabaseError> {
        let now = format_timestamp(&Utc::now());
        {
            let conn = self.conn();
            let changed = conn.execute(
                "UPDATE sync_runs
                 SET status = ?1, completed_at = ?2, items_processed = ?3, items_failed = ?4,
                     error_message = ?5
                 WHERE id = ?6 AND status = 'running'",
                params![
                    status.as_str(),
                    now,
                    items_processed,
                    items_failed,
                    error_message,
                    id
                ],
            )?;
            debug!(id, %status, changed, "finished sync run");
        }
        self.get_run(id)?.ok_or_else(|| DatabaseError::NotFound {
            entity: "sync_run".into(),
            id: id.to_string(),
        })
    }

    pub fn get_run(&self, id: &str) -> Result<Option<SyncRun>, DatabaseError> {
        let conn = self.conn();
        let sql = format!("SELECT {} FROM sync_runs WHERE id = ?1", RUN_COLUMNS);
        let raw = conn
            .query_row(&sql, params![id], RawRun::from_row)
            .optional()?;
        raw.map(RawRun::into_run).transpose()
    }

    /// The currently running run for `sync_type`, if any.
    pub fn get_running_run(&self, sync_type: SyncType) -> Result<Option<SyncRun>, DatabaseError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM sync_runs WHERE sync_type = ?1 AND status = 'running' LIMIT 1",
            RUN_COLUMNS
        );
        let raw = conn
            .query_row(&sql, params![sync_type.as_str()], RawRun::from_row)
            .optional()?;
        raw.map(RawRun::into_run).transpose()
    }

    /// The most recently started run for `sync_type`.
    pub fn get_last_run(&self, sync_type: SyncType) -> Result<Option<SyncRun>, DatabaseError> {
        Ok(self.list_runs(Some(sync_type), 1)?.into_iter().next())
    }

    /// Recent runs, newest first.
    pub fn list_runs(
        &self,
        sync_type: Option<SyncType>,
        limit: u32,
    ) -> Result<Vec<SyncRun>, DatabaseError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM sync_runs
             WHERE (?1 IS NULL OR sync_type = ?1)
             ORDER BY started_at DESC, rowid DESC LIMIT ?2",
            RUN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(
                params![sync_type.map(|t| t.as_str()), limit],
                RawRun::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawRun::into_run).collect()
    }

    /// Fail every run still marked `running`. Used at start-up, when no run
    /// can legitimately be in progress in this process.
    pub fn fail_running_runs(&self, reason: &str) -> Result<usize, DatabaseError> {
        let now = format_timestamp(&Utc::now());
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE sync_runs SET status = 'failed', completed_at = ?1, error_message = ?2
             WHERE status = 'running'",
            params![now, reason],
        )?;
        debug!(changed, "failed leftover running runs");
        Ok(changed)
    }

    // -- failed_sync_records ------------------------------------------------

    /// Insert a pending failure record and return its id.
    pub fn insert_failed_record(
        &self,
        sync_run_id: &str,
        sync_type: SyncType,
        direction: SyncDirection,
        external_ref: &str,
        payload_snapshot: &serde_json::Value,
        error_reason: &str,
    ) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = format_timestamp(&Utc::now());
        let payload = serde_json::to_string(payload_snapshot)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO failed_sync_records (id, sync_run_id, sync_type, direction, external_ref,
             payload_snapshot, error_reason, retry_count, last_attempt_at, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, 'pending', ?8)",
            params![
                id,
                sync_run_id,
                sync_type.as_str(),
                direction.as_str(),
                external_ref,
                payload,
                error_reason,
                now
            ],
        )?;
        debug!(id = %id, %sync_type, external_ref, "recorded failed row");
        Ok(id)
    }

    pub fn get_failed_record(&self, id: &str) -> Result<Option<FailedSyncRecord>, DatabaseError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM failed_sync_records WHERE id = ?1",
            RECORD_COLUMNS
        );
        let raw = conn
            .query_row(&sql, params![id], RawRecord::from_row)
            .optional()?;
        raw.map(RawRecord::into_record).transpose()
    }

    /// List records matching `filter`, newest first. Without a status filter
    /// only active (non-resolved) records are returned.
    pub fn list_failed_records(
        &self,
        filter: &FailureFilter,
    ) -> Result<Vec<FailedSyncRecord>, DatabaseError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM failed_sync_records
             WHERE (?1 IS NULL OR sync_type = ?1)
               AND ((?2 IS NULL AND status != 'resolved') OR status = ?2)
             ORDER BY created_at DESC, rowid DESC LIMIT ?3",
            RECORD_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(
                params![
                    filter.sync_type.map(|t| t.as_str()),
                    filter.status.map(|s| s.as_str()),
                    filter.limit.unwrap_or(DEFAULT_LIST_LIMIT)
                ],
                RawRecord::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawRecord::into_record).collect()
    }

    /// Pending records whose last attempt is at or before `cutoff`, oldest
    /// first.
    pub fn list_retry_candidates(
        &self,
        cutoff: &DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<FailedSyncRecord>, DatabaseError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM failed_sync_records
             WHERE status = 'pending' AND last_attempt_at <= ?1
             ORDER BY last_attempt_at ASC LIMIT ?2",
            RECORD_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params![format_timestamp(cutoff), limit], RawRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawRecord::into_record).collect()
    }

    /// Mark a record resolved. Returns `false` if it was missing or already
    /// resolved.
    pub fn resolve_failed_record(&self, id: &str) -> Result<bool, DatabaseError> {
        let now = format_timestamp(&Utc::now());
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE failed_sync_records
             SET status = 'resolved', resolved_at = ?1, last_attempt_at = ?1
             WHERE id = ?2 AND status != 'resolved'",
            params![now, id],
        )?;
        debug!(id, changed, "resolved failed record");
        Ok(changed > 0)
    }

    /// Count a failed retry. The record is abandoned once `retry_count`
    /// reaches `max_retries` (0 never abandons). Resolved records are left
    /// untouched.
    pub fn record_retry_failure(
        &self,
        id: &str,
        error_reason: &str,
        max_retries: u32,
    ) -> Result<bool, DatabaseError> {
        let now = format_timestamp(&Utc::now());
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE failed_sync_records
             SET retry_count = retry_count + 1,
                 last_attempt_at = ?1,
                 error_reason = ?2,
                 status = CASE
                     WHEN ?3 > 0 AND retry_count + 1 >= ?3 THEN 'abandoned'
                     ELSE status
                 END
             WHERE id = ?4 AND status != 'resolved'",
            params![now, error_reason, max_retries, id],
        )?;
        debug!(id, changed, "recorded retry failure");
        Ok(changed > 0)
    }

    /// Delete every record matching `filter` in one statement, sparing
    /// records whose run is still running.
    pub fn clear_failed_records(&self, filter: &FailureFilter) -> Result<usize, DatabaseError> {
        let conn = self.conn();
        let removed = conn.execute(
            "DELETE FROM failed_sync_records
             WHERE sync_run_id NOT IN (SELECT id FROM sync_runs WHERE status = 'running')
               AND (?1 IS NULL OR sync_type = ?1)
               AND (?2 IS NULL OR status = ?2)",
            params![
                filter.sync_type.map(|t| t.as_str()),
                filter.status.map(|s| s.as_str())
            ],
        )?;
        debug!(removed, "cleared failed records");
        Ok(removed)
    }

    /// Count pending and abandoned records, optionally for one type.
    pub fn count_active_failures(&self, sync_type: Option<SyncType>) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM failed_sync_records
             WHERE status != 'resolved' AND (?1 IS NULL OR sync_type = ?1)",
            params![sync_type.map(|t| t.as_str())],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // -- entities -----------------------------------------------------------

    /// Insert or update an entity by natural key.
    ///
    /// Content with an unchanged hash is not rewritten. When `synced_at` is
    /// given the write came from the spreadsheet and `last_synced_at` equals
    /// the new `updated_at`.
    pub fn upsert_entity(
        &self,
        entity_type: SyncType,
        natural_key: &str,
        payload: &str,
        content_hash: &str,
        from_sheet: bool,
    ) -> Result<UpsertOutcome, DatabaseError> {
        let now = format_timestamp(&Utc::now());
        let synced_at = from_sheet.then(|| now.clone());
        self.transaction(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT content_hash FROM entities WHERE entity_type = ?1 AND natural_key = ?2",
                    params![entity_type.as_str(), natural_key],
                    |row| row.get(0),
                )
                .optional()?;

            let outcome = match existing {
                None => {
                    conn.execute(
                        "INSERT INTO entities (entity_type, natural_key, payload, content_hash,
                         created_at, updated_at, last_synced_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6)",
                        params![
                            entity_type.as_str(),
                            natural_key,
                            payload,
                            content_hash,
                            now,
                            synced_at
                        ],
                    )?;
                    UpsertOutcome::Inserted
                }
                Some(hash) if hash == content_hash => UpsertOutcome::Unchanged,
                Some(_) => {
                    conn.execute(
                        "UPDATE entities
                         SET payload = ?3, content_hash = ?4, updated_at = ?5,
                             last_synced_at = COALESCE(?6, last_synced_at)
                         WHERE entity_type = ?1 AND natural_key = ?2",
                        params![
                            entity_type.as_str(),
                            natural_key,
                            payload,
                            content_hash,
                            now,
                            synced_at
                        ],
                    )?;
                    UpsertOutcome::Updated
                }
            };
            debug!(%entity_type, natural_key, ?outcome, "upserted entity");
            Ok(outcome)
        })
    }

    pub fn get_entity(
        &self,
        entity_type: SyncType,
        natural_key: &str,
    ) -> Result<Option<EntityRow>, DatabaseError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT entity_type, natural_key, payload, content_hash, created_at, updated_at,
                        last_synced_at
                 FROM entities WHERE entity_type = ?1 AND natural_key = ?2",
                params![entity_type.as_str(), natural_key],
                entity_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Entities updated after `since` (when given) and after their last
    /// sync, i.e. changed by the application rather than by an import.
    pub fn list_entities_changed_since(
        &self,
        entity_type: SyncType,
        since: Option<&DateTime<Utc>>,
    ) -> Result<Vec<EntityRow>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT entity_type, natural_key, payload, content_hash, created_at, updated_at,
                    last_synced_at
             FROM entities
             WHERE entity_type = ?1
               AND (?2 IS NULL OR updated_at > ?2)
               AND (last_synced_at IS NULL OR updated_at > last_synced_at)
             ORDER BY updated_at ASC, natural_key ASC",
        )?;
        let rows = stmt
            .query_map(
                params![entity_type.as_str(), since.map(format_timestamp)],
                entity_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Record that the version of an entity written at `updated_at` is now
    /// on the sheet. A newer local edit keeps the entity pending.
    pub fn mark_entity_synced(
        &self,
        entity_type: SyncType,
        natural_key: &str,
        updated_at: &str,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE entities SET last_synced_at = updated_at
             WHERE entity_type = ?1 AND natural_key = ?2 AND updated_at = ?3",
            params![entity_type.as_str(), natural_key, updated_at],
        )?;
        Ok(changed > 0)
    }

    pub fn count_entities(&self, entity_type: SyncType) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE entity_type = ?1",
            params![entity_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // -- watermarks ---------------------------------------------------------

    /// Get the watermark value for a given source.
    pub fn get_watermark(&self, source: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT value FROM watermarks WHERE source = ?1",
                params![source],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Set (upsert) the watermark value for a given source.
    pub fn set_watermark(&self, source: &str, value: &str) -> Result<(), DatabaseError> {
        let now = format_timestamp(&Utc::now());
        let conn = self.conn();
        conn.execute(
            "INSERT INTO watermarks (source, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(source) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![source, value, now],
        )?;
        debug!(source, value, "set watermark");
        Ok(())
    }

    pub fn list_watermarks(&self) -> Result<Vec<WatermarkEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT source, value, updated_at FROM watermarks ORDER BY source")?;
        let entries = stmt
            .query_map([], |row| {
                Ok(WatermarkEntry {
                    source: row.get(0)?,
                    value: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // -- audit_log ----------------------------------------------------------

    pub fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO audit_log (action, sync_type, actor, details, success, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.action,
                entry.sync_type.map(|t| t.as_str()),
                entry.actor,
                entry.details,
                entry.success,
                format_timestamp(&entry.timestamp)
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, action = %entry.action, "inserted audit entry");
        Ok(id)
    }

    /// Most recent audit entries, newest first.
    pub fn list_audit_entries(&self, limit: u32) -> Result<Vec<AuditEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT action, sync_type, actor, details, success, created_at
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit], |row| {
                let sync_type: Option<String> = row.get(1)?;
                let created_at: String = row.get(5)?;
                Ok(AuditEntry {
                    action: row.get(0)?,
                    sync_type: sync_type.and_then(|t| t.parse().ok()),
                    actor: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    details: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    success: row.get(4)?,
                    timestamp: parse_datetime(&created_at),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn entity_row(row: &Row<'_>) -> rusqlite::Result<EntityRow> {
    Ok(EntityRow {
        entity_type: row.get(0)?,
        natural_key: row.get(1)?,
        payload: row.get(2)?,
        content_hash: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        last_synced_at: row.get(6)?,
    })
}

struct RawRun {
    id: String,
    sync_type: String,
    direction: String,
    status: String,
    started_at: String,
    completed_at: Option<String>,
    items_processed: i64,
    items_failed: i64,
    error_message: Option<String>,
    triggered_by: String,
}

impl RawRun {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sync_type: row.get(1)?,
            direction: row.get(2)?,
            status: row.get(3)?,
            started_at: row.get(4)?,
            completed_at: row.get(5)?,
            items_processed: row.get(6)?,
            items_failed: row.get(7)?,
            error_message: row.get(8)?,
            triggered_by: row.get(9)?,
        })
    }

    fn into_run(self) -> Result<SyncRun, DatabaseError> {
        Ok(SyncRun {
            sync_type: parse_sync_type(&self.sync_type)?,
            direction: parse_direction(&self.direction)?,
            status: RunStatus::from_str_val(&self.status).ok_or_else(|| corrupt("status", &self.status))?,
            started_at: parse_datetime(&self.started_at),
            completed_at: self.completed_at.as_deref().map(parse_datetime),
            id: self.id,
            items_processed: self.items_processed,
            items_failed: self.items_failed,
            error_message: self.error_message,
            triggered_by: self.triggered_by,
        })
    }
}

struct RawRecord {
    id: String,
    sync_run_id: String,
    sync_type: String,
    direction: String,
    external_ref: String,
    payload_snapshot: String,
    error_reason: String,
    retry_count: i64,
    last_attempt_at: Option<String>,
    status: String,
    created_at: String,
    resolved_at: Option<String>,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sync_run_id: row.get(1)?,
            sync_type: row.get(2)?,
            direction: row.get(3)?,
            external_ref: row.get(4)?,
            payload_snapshot: row.get(5)?,
            error_reason: row.get(6)?,
            retry_count: row.get(7)?,
            last_attempt_at: row.get(8)?,
            status: row.get(9)?,
            created_at: row.get(10)?,
            resolved_at: row.get(11)?,
        })
    }

    fn into_record(self) -> Result<FailedSyncRecord, DatabaseError> {
        let created_at = parse_datetime(&self.created_at);
        Ok(FailedSyncRecord {
            sync_type: parse_sync_type(&self.sync_type)?,
            direction: parse_direction(&self.direction)?,
            status: FailureStatus::from_str_val(&self.status)
                .ok_or_else(|| corrupt("status", &self.status))?,
            payload_snapshot: serde_json::from_str(&self.payload_snapshot)?,
            last_attempt_at: self
                .last_attempt_at
                .as_deref()
                .map(parse_datetime)
                .unwrap_or(created_at),
            resolved_at: self.resolved_at.as_deref().map(parse_datetime),
            created_at,
            id: self.id,
            sync_run_id: self.sync_run_id,
            external_ref: self.external_ref,
            error_reason: self.error_reason,
            retry_count: self.retry_count,
        })
    }
}

fn corrupt(column: &str, value: &str) -> DatabaseError {
    DatabaseError::Corrupt {
        column: column.to_string(),
        detail: format!("unexpected value '{}'", value),
    }
}

fn parse_sync_type(s: &str) -> Result<SyncType, DatabaseError> {
    s.parse().map_err(|_| corrupt("sync_type", s))
}

fn parse_direction(s: &str) -> Result<SyncDirection, DatabaseError> {
    SyncDirection::from_str_val(s).ok_or_else(|| corrupt("direction", s))
}

/// Parse a datetime string, returning Utc::now() as a fallback if parsing fails.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn start(db: &Database, sync_type: SyncType) -> SyncRun {
        db.try_start_run(sync_type, SyncDirection::Import, "tester")
            .unwrap()
            .expect("type should be idle")
    }

    #[test]
    fn test_run_lifecycle() {
        let db = setup_db();
        let run = start(&db, SyncType::Sessions);
        assert!(run.is_running());
        assert_eq!(
            db.get_running_run(SyncType::Sessions).unwrap().unwrap().id,
            run.id
        );

        let done = db
            .finish_run(&run.id, RunStatus::Partial, 9, 1, None)
            .unwrap();
        assert_eq!(done.status, RunStatus::Partial);
        assert_eq!(done.items_processed, 9);
        assert!(done.completed_at.is_some());
        assert!(db.get_running_run(SyncType::Sessions).unwrap().is_none());

        // terminal runs are not overwritten
        let again = db
            .finish_run(&run.id, RunStatus::Failed, 0, 0, Some("late"))
            .unwrap();
        assert_eq!(again.status, RunStatus::Partial);
    }

    #[test]
    fn test_second_start_refused_per_type() {
        let db = setup_db();
        let first = start(&db, SyncType::Projects);
        assert!(db
            .try_start_run(SyncType::Projects, SyncDirection::Export, "other")
            .unwrap()
            .is_none());
        // other types are independent
        start(&db, SyncType::Partners);

        db.finish_run(&first.id, RunStatus::Succeeded, 1, 0, None).unwrap();
        start(&db, SyncType::Projects);
    }

    #[test]
    fn test_list_runs_newest_first() {
        let db = setup_db();
        for _ in 0..3 {
            let run = start(&db, SyncType::Attendees);
            db.finish_run(&run.id, RunStatus::Succeeded, 0, 0, None).unwrap();
        }
        let run = start(&db, SyncType::Sessions);
        db.finish_run(&run.id, RunStatus::Failed, 0, 0, Some("boom")).unwrap();

        assert_eq!(db.list_runs(None, 10).unwrap().len(), 4);
        assert_eq!(db.list_runs(Some(SyncType::Attendees), 2).unwrap().len(), 2);
        let last = db.get_last_run(SyncType::Sessions).unwrap().unwrap();
        assert_eq!(last.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_fail_running_runs() {
        let db = setup_db();
        start(&db, SyncType::Sessions);
        start(&db, SyncType::Projects);
        assert_eq!(db.fail_running_runs("interrupted").unwrap(), 2);
        let last = db.get_last_run(SyncType::Sessions).unwrap().unwrap();
        assert_eq!(last.status, RunStatus::Failed);
        assert_eq!(last.error_message.as_deref(), Some("interrupted"));
    }

    #[test]
    fn test_failed_record_lifecycle() {
        let db = setup_db();
        let run = start(&db, SyncType::Sessions);
        let id = db
            .insert_failed_record(
                &run.id,
                SyncType::Sessions,
                SyncDirection::Import,
                "S-1",
                &json!({"rowId": 1}),
                "invalid field 'Start'",
            )
            .unwrap();

        let record = db.get_failed_record(&id).unwrap().unwrap();
        assert_eq!(record.status, FailureStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.payload_snapshot["rowId"], 1);
        assert_eq!(db.count_active_failures(Some(SyncType::Sessions)).unwrap(), 1);

        assert!(db.record_retry_failure(&id, "still bad", 5).unwrap());
        let record = db.get_failed_record(&id).unwrap().unwrap();
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.error_reason, "still bad");

        assert!(db.resolve_failed_record(&id).unwrap());
        assert!(!db.resolve_failed_record(&id).unwrap());
        assert!(!db.record_retry_failure(&id, "x", 5).unwrap());
        let record = db.get_failed_record(&id).unwrap().unwrap();
        assert_eq!(record.status, FailureStatus::Resolved);
        assert!(record.resolved_at.is_some());
        assert_eq!(db.count_active_failures(None).unwrap(), 0);
    }

    #[test]
    fn test_retry_failures_abandon_at_limit() {
        let db = setup_db();
        let run = start(&db, SyncType::Partners);
        let id = db
            .insert_failed_record(&run.id, SyncType::Partners, SyncDirection::Import, "acme", &json!({}), "bad")
            .unwrap();
        db.record_retry_failure(&id, "bad", 2).unwrap();
        assert_eq!(
            db.get_failed_record(&id).unwrap().unwrap().status,
            FailureStatus::Pending
        );
        db.record_retry_failure(&id, "bad", 2).unwrap();
        let record = db.get_failed_record(&id).unwrap().unwrap();
        assert_eq!(record.status, FailureStatus::Abandoned);
        assert_eq!(record.retry_count, 2);
        // abandoned records stay active
        assert_eq!(db.count_active_failures(None).unwrap(), 1);

        let other = db
            .insert_failed_record(&run.id, SyncType::Partners, SyncDirection::Import, "beta", &json!({}), "bad")
            .unwrap();
        for _ in 0..10 {
            db.record_retry_failure(&other, "bad", 0).unwrap();
        }
        assert_eq!(
            db.get_failed_record(&other).unwrap().unwrap().status,
            FailureStatus::Pending
        );
    }

    #[test]
    fn test_list_and_clear_failed_records() {
        let db = setup_db();
        let run = start(&db, SyncType::Sessions);
        let mut ids = Vec::new();
        for key in ["a", "b", "c", "d"] {
            ids.push(
                db.insert_failed_record(&run.id, SyncType::Sessions, SyncDirection::Import, key, &json!({}), "bad")
                    .unwrap(),
            );
        }
        db.resolve_failed_record(&ids[0]).unwrap();

        // still running: nothing may be cleared
        assert_eq!(db.clear_failed_records(&FailureFilter::default()).unwrap(), 0);
        db.finish_run(&run.id, RunStatus::Partial, 0, 4, None).unwrap();

        assert_eq!(db.list_failed_records(&FailureFilter::default()).unwrap().len(), 3);
        let resolved = FailureFilter {
            status: Some(FailureStatus::Resolved),
            ..Default::default()
        };
        assert_eq!(db.list_failed_records(&resolved).unwrap().len(), 1);
        let limited = FailureFilter {
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(db.list_failed_records(&limited).unwrap().len(), 2);

        assert_eq!(db.clear_failed_records(&FailureFilter::default()).unwrap(), 4);
        assert!(db.list_failed_records(&FailureFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_retry_candidates() {
        let db = setup_db();
        let run = start(&db, SyncType::Sessions);
        let id = db
            .insert_failed_record(&run.id, SyncType::Sessions, SyncDirection::Import, "a", &json!({}), "bad")
            .unwrap();
        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(db.list_retry_candidates(&past, 10).unwrap().is_empty());
        let future = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(db.list_retry_candidates(&future, 10).unwrap()[0].id, id);
    }

    #[test]
    fn test_upsert_entity_outcomes() {
        let db = setup_db();
        let t = SyncType::Projects;
        assert_eq!(
            db.upsert_entity(t, "P-1", "{}", "h1", true).unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            db.upsert_entity(t, "P-1", "{}", "h1", true).unwrap(),
            UpsertOutcome::Unchanged
        );
        assert_eq!(
            db.upsert_entity(t, "P-1", "{\"a\":1}", "h2", true).unwrap(),
            UpsertOutcome::Updated
        );
        assert_eq!(db.count_entities(t).unwrap(), 1);
        let row = db.get_entity(t, "P-1").unwrap().unwrap();
        assert_eq!(row.content_hash, "h2");
        assert_eq!(row.last_synced_at.as_deref(), Some(row.updated_at.as_str()));
    }

    #[test]
    fn test_changed_since_excludes_imported_rows() {
        let db = setup_db();
        let t = SyncType::Partners;
        db.upsert_entity(t, "imported", "{}", "h1", true).unwrap();
        db.upsert_entity(t, "local", "{}", "h2", false).unwrap();

        let changed = db.list_entities_changed_since(t, None).unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].natural_key, "local");

        let future = Utc::now() + chrono::Duration::seconds(5);
        assert!(db.list_entities_changed_since(t, Some(&future)).unwrap().is_empty());

        assert!(db.mark_entity_synced(t, "local", &changed[0].updated_at).unwrap());
        assert!(db.list_entities_changed_since(t, None).unwrap().is_empty());
    }

    #[test]
    fn test_watermark_crud() {
        let db = setup_db();
        assert!(db.get_watermark("export:sessions").unwrap().is_none());
        db.set_watermark("export:sessions", "100").unwrap();
        assert_eq!(db.get_watermark("export:sessions").unwrap().as_deref(), Some("100"));
        db.set_watermark("export:sessions", "200").unwrap();
        assert_eq!(db.get_watermark("export:sessions").unwrap().as_deref(), Some("200"));
        assert_eq!(db.list_watermarks().unwrap().len(), 1);
    }

    #[test]
    fn test_audit_log() {
        let db = setup_db();
        db.insert_audit_entry(&AuditEntry::success(
            "sync_triggered",
            Some(SyncType::Sessions),
            "admin",
            "run abc",
        ))
        .unwrap();
        db.insert_audit_entry(&AuditEntry::failure("failed_cleared", None, "admin", "boom"))
            .unwrap();
        let entries = db.list_audit_entries(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "failed_cleared");
        assert!(!entries[0].success);
        assert_eq!(entries[1].sync_type, Some(SyncType::Sessions));
    }
}
