//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The `user_version`
//! pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
/// Versions start at 1. The current schema version is stored in the SQLite
/// `user_version` pragma.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            id               TEXT PRIMARY KEY,
            sync_type        TEXT    NOT NULL,
            direction        TEXT    NOT NULL CHECK (direction IN ('import', 'export')),
            status           TEXT    NOT NULL
                             CHECK (status IN ('running', 'succeeded', 'partial', 'failed')),
            started_at       TEXT    NOT NULL,
            completed_at     TEXT,
            items_processed  INTEGER NOT NULL DEFAULT 0,
            items_failed     INTEGER NOT NULL DEFAULT 0,
            error_message    TEXT,
            triggered_by     TEXT    NOT NULL DEFAULT ''
        );

        CREATE INDEX IF NOT EXISTS idx_sync_runs_type_started
            ON sync_runs (sync_type, started_at);

        CREATE TABLE IF NOT EXISTS failed_sync_records (
            id                TEXT PRIMARY KEY,
            sync_run_id       TEXT    NOT NULL REFERENCES sync_runs (id),
            sync_type         TEXT    NOT NULL,
            direction         TEXT    NOT NULL,
            external_ref      TEXT    NOT NULL,
            payload_snapshot  TEXT    NOT NULL DEFAULT '{}',
            error_reason      TEXT    NOT NULL,
            retry_count       INTEGER NOT NULL DEFAULT 0,
            last_attempt_at   TEXT,
            status            TEXT    NOT NULL DEFAULT 'pending'
                              CHECK (status IN ('pending', 'resolved', 'abandoned')),
            created_at        TEXT    NOT NULL,
            resolved_at       TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_failed_records_status ON failed_sync_records (status);
        CREATE INDEX IF NOT EXISTS idx_failed_records_type ON failed_sync_records (sync_type);
        CREATE INDEX IF NOT EXISTS idx_failed_records_run ON failed_sync_records (sync_run_id);

        CREATE TABLE IF NOT EXISTS watermarks (
            source      TEXT PRIMARY KEY,
            value       TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            action      TEXT NOT NULL,
            sync_type   TEXT,
            actor       TEXT,
            details     TEXT,
            success     INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log (created_at);
        CREATE INDEX IF NOT EXISTS idx_audit_log_action ON audit_log (action);
        "#,
    ),
    (
        2,
        "entity store",
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            entity_type     TEXT NOT NULL,
            natural_key     TEXT NOT NULL,
            payload         TEXT NOT NULL,
            content_hash    TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            last_synced_at  TEXT,
            PRIMARY KEY (entity_type, natural_key)
        );

        CREATE INDEX IF NOT EXISTS idx_entities_updated_at
            ON entities (entity_type, updated_at);
        "#,
    ),
    (
        3,
        "one running run per type",
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_runs_one_running
            ON sync_runs (sync_type) WHERE status = 'running';
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version via the SQLite `user_version` pragma.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_idempotently() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 3);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };

        for table in [
            "sync_runs",
            "failed_sync_records",
            "entities",
            "watermarks",
            "audit_log",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[test]
    fn test_second_running_run_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let insert = "INSERT INTO sync_runs (id, sync_type, direction, status, started_at)
                      VALUES (?1, 'sessions', 'import', ?2, '2026-03-01T00:00:00Z')";
        conn.execute(insert, rusqlite::params!["a", "running"]).unwrap();
        assert!(conn.execute(insert, rusqlite::params!["b", "running"]).is_err());
        // finished runs are unconstrained
        conn.execute(insert, rusqlite::params!["c", "succeeded"]).unwrap();
        conn.execute(insert, rusqlite::params!["d", "failed"]).unwrap();
    }
}
