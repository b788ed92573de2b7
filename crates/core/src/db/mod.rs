//! SQLite store shared by the daemon and the CLI.
//!
//! Both processes open the same file, so single-flight for a sync type is
//! enforced here as well as in memory (see [`Database::try_start_run`]).

pub mod queries;
pub mod schema;

pub use queries::{format_timestamp, EntityRow, WatermarkEntry, DEFAULT_LIST_LIMIT};

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::errors::DatabaseError;

/// How long a writer waits on another process's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One connection behind a mutex, so the handle can live in an `Arc`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file at `path` in WAL mode. Does not
    /// migrate; see [`Database::open_and_migrate`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, "database opened");
        Self::configure(conn)
    }

    /// Open `path`, creating its directory, and bring the schema up to date.
    pub fn open_and_migrate<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Self::open(path)?;
        db.initialize()?;
        Ok(db)
    }

    /// Private in-memory database. Callers still run [`Database::initialize`].
    pub fn in_memory() -> Result<Self, DatabaseError> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self, DatabaseError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn initialize(&self) -> Result<(), DatabaseError> {
        schema::run_migrations(&self.conn())
    }

    /// Lock the connection. A poisoned lock is taken over; the connection
    /// itself is still usable after a panicking holder.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run `f` in a transaction, committed only if it returns `Ok`.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SyncDirection, SyncType};

    fn pragma_i64(db: &Database, name: &str) -> i64 {
        db.conn()
            .pragma_query_value(None, name, |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_open_and_migrate_creates_directory_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("converge-sync.db");

        let db = Database::open_and_migrate(&path).unwrap();
        assert!(path.exists());
        let version = pragma_i64(&db, "user_version");
        assert!(version > 0);
        let run = db
            .try_start_run(SyncType::Partners, SyncDirection::Import, "tester")
            .unwrap()
            .unwrap();
        drop(db);

        // Reopening keeps the data and does not re-run migrations.
        let db = Database::open_and_migrate(&path).unwrap();
        assert_eq!(pragma_i64(&db, "user_version"), version);
        assert_eq!(
            db.get_running_run(SyncType::Partners).unwrap().map(|r| r.id),
            Some(run.id)
        );
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        let result: Result<(), DatabaseError> = db.transaction(|conn| {
            conn.execute(
                "INSERT INTO watermarks (source, value, updated_at) VALUES ('export:projects', 'x', 'y')",
                [],
            )?;
            Err(DatabaseError::NotFound {
                entity: "entity".into(),
                id: "P-1".into(),
            })
        });
        assert!(result.is_err());
        assert_eq!(db.get_watermark("export:projects").unwrap(), None);
    }

    #[test]
    fn test_connection_settings() {
        let dir = tempfile::tempdir().unwrap();
        let file = Database::open(dir.path().join("sync.db")).unwrap();
        let mode: String = file
            .conn()
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        let memory = Database::in_memory().unwrap();
        for db in [&file, &memory] {
            assert_eq!(pragma_i64(db, "foreign_keys"), 1);
            assert_eq!(pragma_i64(db, "busy_timeout"), BUSY_TIMEOUT.as_millis() as i64);
        }
    }
}
