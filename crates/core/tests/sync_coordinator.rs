//! End-to-end tests for the sync coordinator.
//!
//! These run the real `SyncCoordinator` against:
//! - A file-backed SQLite database in a temp dir
//! - The in-memory sheet client, with injected failures and fetch gates
//!
//! No network I/O.

use std::sync::Arc;

use serde_json::Value;
use tempfile::TempDir;

use converge_sync_core::coordinator::{SyncCoordinator, TypeImportStatus};
use converge_sync_core::db::Database;
use converge_sync_core::entities::{InternalEntity, Partner};
use converge_sync_core::errors::SyncError;
use converge_sync_core::export::watermark_key;
use converge_sync_core::models::{FailureFilter, FailureStatus, RunStatus, SyncDirection, SyncType};
use converge_sync_core::sheets::{MemorySheets, SheetRow};
use converge_sync_core::store::EntityStore;

// ===========================================================================
// Helpers
// ===========================================================================

struct Harness {
    dir: TempDir,
    db: Arc<Database>,
    sheets: Arc<MemorySheets>,
    coordinator: Arc<SyncCoordinator>,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Database::open_and_migrate(dir.path().join("sync.db")).unwrap());
    let sheets = Arc::new(MemorySheets::new());
    let coordinator = Arc::new(SyncCoordinator::new(db.clone(), sheets.clone(), 2));
    Harness {
        dir,
        db,
        sheets,
        coordinator,
    }
}

fn project(row_id: i64, id: &str, title: &str, stage: &str) -> SheetRow {
    SheetRow::from_pairs(
        row_id,
        &[("Project ID", id), ("Project Title", title), ("Stage", stage)],
    )
}

fn session(row_id: i64, id: &str, title: &str) -> SheetRow {
    SheetRow::from_pairs(
        row_id,
        &[
            ("Session ID", id),
            ("Title", title),
            ("Start", "2026-03-04 09:00"),
            ("End", "2026-03-04 10:00"),
            ("Session Type", "Keynote"),
        ],
    )
}

fn partner(org: &str, description: &str) -> InternalEntity {
    InternalEntity::Partner(Partner {
        partner_key: org.to_lowercase().replace(' ', "-"),
        organization: org.into(),
        website: None,
        description: Some(description.into()),
        focus_areas: vec![],
        poc_name: None,
        poc_email: None,
        interests: vec![],
    })
}

async fn wait_until_running(coordinator: &SyncCoordinator, sync_type: SyncType) {
    while !coordinator.is_running(sync_type) {
        tokio::task::yield_now().await;
    }
}

// ===========================================================================
// Import
// ===========================================================================

#[tokio::test]
async fn test_reimporting_same_sheet_is_idempotent() {
    let h = harness();
    h.sheets.set_rows(
        SyncType::Projects,
        vec![
            project(1, "P-1", "Swarm Autonomy", "Prototype"),
            project(2, "P-2", "Mesh Radios", "Fielded"),
        ],
    );

    let (first, outcome) = h.coordinator.import_type(SyncType::Projects, "tester").await.unwrap();
    assert_eq!(first.status, RunStatus::Succeeded);
    assert_eq!(outcome.imported, 2);

    let (second, outcome) = h.coordinator.import_type(SyncType::Projects, "tester").await.unwrap();
    assert_eq!(second.status, RunStatus::Succeeded);
    assert_eq!(second.items_processed, 2);
    assert_eq!((outcome.imported, outcome.updated, outcome.unchanged), (0, 0, 2));
    assert_eq!(h.db.count(SyncType::Projects).unwrap(), 2);

    // nothing imported from the sheet is pending export
    assert!(h
        .db
        .find_changed_since(SyncType::Projects, None)
        .unwrap()
        .is_empty());
}

/// Two rows per type, plus a second rendering of the same rows as a
/// spreadsheet editor might leave them (re-cased email, padded keys).
fn rows_for(sync_type: SyncType, rerendered: bool) -> Vec<SheetRow> {
    let pad = |s: &str| if rerendered { format!("  {s} ") } else { s.to_string() };
    match sync_type {
        SyncType::Sessions => vec![
            session(1, &pad("S-1"), "Opening Keynote"),
            session(2, &pad("S-2"), "Autonomy Panel"),
        ],
        SyncType::Projects => vec![
            project(1, &pad("P-1"), "Swarm Autonomy", "Prototype"),
            project(2, &pad("P-2"), "Mesh Radios", "Fielded"),
        ],
        SyncType::Opportunities => ["O-1", "O-2"]
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let id = pad(*id);
                SheetRow::from_pairs(
                    i as i64 + 1,
                    &[
                        ("Opportunity ID", id.as_str()),
                        ("Title", "Maritime Autonomy BAA"),
                        ("Type", "BAA"),
                        ("Deadline", "04/01/2026"),
                    ],
                )
            })
            .collect(),
        SyncType::Partners => ["Acme Robotics, Inc.", "Blue Water Labs"]
            .iter()
            .enumerate()
            .map(|(i, org)| {
                let org = pad(*org);
                SheetRow::from_pairs(
                    i as i64 + 1,
                    &[("Organization", org.as_str()), ("Focus Areas", "UxV, Edge AI")],
                )
            })
            .collect(),
        SyncType::Attendees => {
            let emails = if rerendered {
                ["ANA.RUIZ@nps.edu", " Ben.Cole@NPS.EDU"]
            } else {
                ["ana.ruiz@nps.edu", "ben.cole@nps.edu"]
            };
            emails
                .iter()
                .enumerate()
                .map(|(i, email)| {
                    SheetRow::from_pairs(
                        i as i64 + 1,
                        &[("Email", *email), ("Full Name", "Guest"), ("Role", "Faculty")],
                    )
                })
                .collect()
        }
    }
}

#[tokio::test]
async fn test_reimport_is_idempotent_for_every_type() {
    let h = harness();
    for sync_type in SyncType::ALL {
        h.sheets.set_rows(sync_type, rows_for(sync_type, false));
        let (run, outcome) = h.coordinator.import_type(sync_type, "tester").await.unwrap();
        assert_eq!(run.status, RunStatus::Succeeded, "{sync_type}: {:?}", outcome.failed_details);
        assert_eq!(outcome.imported, 2, "{sync_type}");

        h.sheets.set_rows(sync_type, rows_for(sync_type, true));
        let (run, outcome) = h.coordinator.import_type(sync_type, "tester").await.unwrap();
        assert_eq!(run.status, RunStatus::Succeeded, "{sync_type}: {:?}", outcome.failed_details);
        assert_eq!(
            (outcome.imported, outcome.updated, outcome.unchanged),
            (0, 0, 2),
            "{sync_type}"
        );
        assert_eq!(h.db.count(sync_type).unwrap(), 2, "{sync_type}");
    }
}

#[tokio::test]
async fn test_bad_row_makes_run_partial_and_is_recorded() {
    let h = harness();
    h.sheets.set_rows(
        SyncType::Projects,
        vec![
            project(1, "P-1", "Swarm Autonomy", "Prototype"),
            project(2, "P-2", "Mesh Radios", "Vaporware"),
            project(3, "P-3", "Edge Compute", "Concept"),
        ],
    );

    let (run, outcome) = h.coordinator.import_type(SyncType::Projects, "tester").await.unwrap();
    assert_eq!(run.status, RunStatus::Partial);
    assert_eq!((run.items_processed, run.items_failed), (2, 1));
    assert_eq!(outcome.failed_details[0].field.as_deref(), Some("Stage"));

    let failed = h.coordinator.list_failed(&FailureFilter::default()).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].external_ref, "P-2");
    assert_eq!(failed[0].sync_run_id, run.id);
    assert_eq!(failed[0].direction, SyncDirection::Import);
}

#[tokio::test]
async fn test_fetch_failure_fails_run_without_error() {
    let h = harness();
    h.sheets.fail_fetches(SyncType::Sessions, "vendor returned 503");

    let run = h.coordinator.trigger_sync(SyncType::Sessions, "tester").await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error_message.unwrap().contains("503"));
    assert!(!h.coordinator.is_running(SyncType::Sessions));

    // the type is free again
    h.sheets.clear_failures(SyncType::Sessions);
    h.sheets.set_rows(SyncType::Sessions, vec![session(1, "S-1", "Opening")]);
    let run = h.coordinator.trigger_sync(SyncType::Sessions, "tester").await.unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_import_all_skips_unconfigured_and_continues_past_errors() {
    let h = harness();
    h.sheets.set_rows(SyncType::Sessions, vec![session(1, "S-1", "Opening")]);
    h.sheets.set_rows(
        SyncType::Projects,
        vec![project(1, "P-1", "Swarm Autonomy", "Prototype")],
    );
    h.sheets.fail_fetches(SyncType::Opportunities, "timeout");
    h.sheets.unconfigure(SyncType::Partners);

    let result = h.coordinator.import_all("tester").await;
    let status_of = |t: SyncType| {
        result
            .results
            .iter()
            .find(|r| r.sync_type == t)
            .map(|r| r.status)
            .unwrap()
    };
    assert_eq!(result.results.len(), 5);
    assert_eq!(status_of(SyncType::Sessions), TypeImportStatus::Completed);
    assert_eq!(status_of(SyncType::Projects), TypeImportStatus::Completed);
    assert_eq!(status_of(SyncType::Opportunities), TypeImportStatus::Error);
    assert_eq!(status_of(SyncType::Partners), TypeImportStatus::Skipped);
    assert_eq!(status_of(SyncType::Attendees), TypeImportStatus::Completed);
    assert_eq!(result.totals.imported, 2);
}

// ===========================================================================
// Single-flight
// ===========================================================================

#[tokio::test]
async fn test_second_run_of_same_type_conflicts() {
    let h = harness();
    h.sheets.set_rows(
        SyncType::Projects,
        vec![project(1, "P-1", "Swarm Autonomy", "Prototype")],
    );
    let gate = h.sheets.pause(SyncType::Projects);

    let coordinator = h.coordinator.clone();
    let first = tokio::spawn(async move {
        coordinator.trigger_sync(SyncType::Projects, "first").await
    });
    wait_until_running(&h.coordinator, SyncType::Projects).await;

    let err = h
        .coordinator
        .trigger_sync(SyncType::Projects, "second")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Conflict { sync_type: SyncType::Projects, .. }
    ));

    // other types are unaffected
    h.sheets.set_rows(SyncType::Sessions, vec![session(1, "S-1", "Opening")]);
    let other = h.coordinator.trigger_sync(SyncType::Sessions, "third").await.unwrap();
    assert_eq!(other.status, RunStatus::Succeeded);

    let status = h.coordinator.get_sync_status().unwrap();
    assert!(status[SyncType::Projects.index()].running);
    assert!(!status[SyncType::Sessions.index()].running);

    gate.add_permits(1);
    let run = first.await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.triggered_by, "first");

    // exactly one run for the conflicted type
    assert_eq!(h.coordinator.list_runs(Some(SyncType::Projects), 10).unwrap().len(), 1);
}

#[tokio::test]
async fn test_run_in_another_process_conflicts() {
    let h = harness();
    let gate = h.sheets.pause(SyncType::Attendees);
    let coordinator = h.coordinator.clone();
    let first = tokio::spawn(async move {
        coordinator.trigger_sync(SyncType::Attendees, "daemon").await
    });
    wait_until_running(&h.coordinator, SyncType::Attendees).await;

    // a second coordinator on the same database file, as the CLI would open
    let dir_db = Arc::new(Database::open_and_migrate(h.dir.path().join("sync.db")).unwrap());
    let other = SyncCoordinator::new(dir_db, Arc::new(MemorySheets::new()), 2);
    let err = other.trigger_sync(SyncType::Attendees, "cli").await.unwrap_err();
    match err {
        SyncError::Conflict { started_at, .. } => assert_ne!(started_at, "unknown"),
        other => panic!("expected conflict, got {other:?}"),
    }

    gate.add_permits(1);
    first.await.unwrap().unwrap();
    let run = other.trigger_sync(SyncType::Attendees, "cli").await.unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_recover_interrupted_runs_frees_type() {
    let h = harness();
    h.db
        .try_start_run(SyncType::Partners, SyncDirection::Import, "crashed")
        .unwrap()
        .unwrap();
    assert!(h.coordinator.trigger_sync(SyncType::Partners, "tester").await.is_err());

    assert_eq!(h.coordinator.recover_interrupted_runs().unwrap(), 1);
    let runs = h.coordinator.list_runs(Some(SyncType::Partners), 10).unwrap();
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(h.coordinator.trigger_sync(SyncType::Partners, "tester").await.is_ok());
}

// ===========================================================================
// Retry & ledger
// ===========================================================================

#[tokio::test]
async fn test_retry_resolves_after_sheet_is_fixed() {
    let h = harness();
    h.sheets.set_rows(
        SyncType::Projects,
        vec![project(7, "P-7", "Mesh Radios", "Vaporware")],
    );
    h.coordinator.trigger_sync(SyncType::Projects, "tester").await.unwrap();
    let record = h.coordinator.list_failed(&FailureFilter::default()).unwrap()[0].clone();

    // still broken: counted, not resolved
    let outcome = h.coordinator.retry_sync(&record.id, "tester").await.unwrap();
    assert!(!outcome.resolved);
    assert_eq!(outcome.record.retry_count, 1);
    assert_eq!(outcome.record.status, FailureStatus::Pending);

    h.sheets.set_rows(
        SyncType::Projects,
        vec![project(7, "P-7", "Mesh Radios", "Prototype")],
    );
    let outcome = h.coordinator.retry_sync(&record.id, "tester").await.unwrap();
    assert!(outcome.resolved);
    assert_eq!(outcome.record.status, FailureStatus::Resolved);
    assert!(h.db.get(SyncType::Projects, "P-7").unwrap().is_some());

    // resolved records are gone from the default listing and cannot be retried
    assert!(h.coordinator.list_failed(&FailureFilter::default()).unwrap().is_empty());
    assert!(matches!(
        h.coordinator.retry_sync(&record.id, "tester").await,
        Err(SyncError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_retry_unknown_id_is_not_found() {
    let h = harness();
    assert!(matches!(
        h.coordinator.retry_sync("no-such-record", "tester").await,
        Err(SyncError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_retry_gives_up_at_limit() {
    let h = harness();
    h.sheets.set_rows(
        SyncType::Projects,
        vec![project(1, "P-1", "Mesh Radios", "Vaporware")],
    );
    h.coordinator.trigger_sync(SyncType::Projects, "tester").await.unwrap();
    let id = h.coordinator.list_failed(&FailureFilter::default()).unwrap()[0]
        .id
        .clone();

    h.coordinator.retry_sync(&id, "tester").await.unwrap();
    let outcome = h.coordinator.retry_sync(&id, "tester").await.unwrap();
    assert_eq!(outcome.record.status, FailureStatus::Abandoned);

    // abandoned records stay listed
    let listed = h.coordinator.list_failed(&FailureFilter::default()).unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn test_retry_of_vanished_row_counts_as_failure() {
    let h = harness();
    h.sheets.set_rows(
        SyncType::Projects,
        vec![project(1, "P-1", "Mesh Radios", "Vaporware")],
    );
    h.coordinator.trigger_sync(SyncType::Projects, "tester").await.unwrap();
    let id = h.coordinator.list_failed(&FailureFilter::default()).unwrap()[0]
        .id
        .clone();

    h.sheets.set_rows(SyncType::Projects, vec![]);
    let outcome = h.coordinator.retry_sync(&id, "tester").await.unwrap();
    assert!(!outcome.resolved);
    assert!(outcome.record.error_reason.contains("no longer on the sheet"));
}

#[tokio::test]
async fn test_clear_failed_spares_running_run() {
    let h = harness();
    h.sheets.set_rows(
        SyncType::Projects,
        vec![project(1, "P-1", "Mesh Radios", "Vaporware")],
    );
    h.coordinator.trigger_sync(SyncType::Projects, "tester").await.unwrap();

    // a run still in progress elsewhere, with its own failure
    let running = h
        .db
        .try_start_run(SyncType::Sessions, SyncDirection::Import, "daemon")
        .unwrap()
        .unwrap();
    h.coordinator
        .ledger()
        .record(
            &running.id,
            SyncType::Sessions,
            SyncDirection::Import,
            "S-1",
            &Value::Null,
            "bad start",
        )
        .unwrap();

    assert_eq!(h.coordinator.clear_failed(&FailureFilter::default(), "tester").unwrap(), 1);
    let left = h.coordinator.list_failed(&FailureFilter::default()).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].sync_run_id, running.id);
}

// ===========================================================================
// Export
// ===========================================================================

#[tokio::test]
async fn test_export_pushes_local_changes_once() {
    let h = harness();
    h.db.upsert(&partner("Acme Robotics", "drones"), false).unwrap();
    h.db.upsert(&partner("Blue Harbor", "sensors"), false).unwrap();

    let (run, outcome) = h.coordinator.export_type(SyncType::Partners, "tester").await.unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.direction, SyncDirection::Export);
    assert_eq!(outcome.created, 2);
    assert!(h.db.get_watermark(&watermark_key(SyncType::Partners)).unwrap().is_some());

    let (run, outcome) = h.coordinator.export_type(SyncType::Partners, "tester").await.unwrap();
    assert_eq!(run.items_processed, 0);
    assert_eq!(outcome.created + outcome.updated, 0);
    assert_eq!(h.sheets.rows(SyncType::Partners).len(), 2);

    // a later local edit updates the same row
    h.db.upsert(&partner("Acme Robotics", "drones and sensors"), false).unwrap();
    let (_, outcome) = h.coordinator.export_type(SyncType::Partners, "tester").await.unwrap();
    assert_eq!(outcome.updated, 1);
    assert_eq!(h.sheets.rows(SyncType::Partners).len(), 2);
}

#[tokio::test]
async fn test_rejected_export_retries_after_sheet_accepts() {
    let h = harness();
    h.db.upsert(&partner("Acme Robotics", "drones"), false).unwrap();
    h.sheets.reject_key("acme-robotics");

    let (run, _) = h.coordinator.export_type(SyncType::Partners, "tester").await.unwrap();
    assert_eq!(run.status, RunStatus::Partial);
    let record = h.coordinator.list_failed(&FailureFilter::default()).unwrap()[0].clone();
    assert_eq!(record.direction, SyncDirection::Export);

    let outcome = h.coordinator.retry_sync(&record.id, "tester").await.unwrap();
    assert!(!outcome.resolved);

    // a fresh sheet client that accepts the row
    let sheets = Arc::new(MemorySheets::new());
    let coordinator = SyncCoordinator::new(h.db.clone(), sheets.clone(), 2);
    let outcome = coordinator.retry_sync(&record.id, "tester").await.unwrap();
    assert!(outcome.resolved);
    assert_eq!(sheets.rows(SyncType::Partners).len(), 1);
}

#[tokio::test]
async fn test_export_write_failure_keeps_watermark() {
    let h = harness();
    h.db.upsert(&partner("Acme Robotics", "drones"), false).unwrap();
    h.sheets.fail_writes(SyncType::Partners, "quota exceeded");

    let (run, _) = h.coordinator.export_type(SyncType::Partners, "tester").await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(h.db.get_watermark(&watermark_key(SyncType::Partners)).unwrap().is_none());
    assert_eq!(h.db.find_changed_since(SyncType::Partners, None).unwrap().len(), 1);
}
