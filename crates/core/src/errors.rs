//! Error types for the Converge sync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

use crate::models::SyncType;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Mapping errors
// ---------------------------------------------------------------------------

/// A single spreadsheet row could not be turned into an internal entity.
///
/// Row-level and recoverable: the import pipeline records it in the failure
/// ledger and moves on to the next row.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid field '{field}': {reason}")]
pub struct MappingError {
    pub field: String,
    pub reason: String,
}

impl MappingError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a required column that is absent or blank.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, "required value is missing")
    }
}

/// Why a single row could not be applied during import or retry.
#[derive(Debug, Error)]
pub enum RowError {
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// The entity mapped but could not be stored.
    #[error("could not store entity: {0}")]
    Store(#[from] DatabaseError),
}

impl RowError {
    /// Offending column, for mapping failures.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Mapping(e) => Some(&e.field),
            Self::Store(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Spreadsheet errors
// ---------------------------------------------------------------------------

/// Errors while reading rows from the spreadsheet service.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No sheet is configured for this data type.
    #[error("no sheet configured for {0}")]
    NotConfigured(SyncType),

    /// HTTP-level transport error (network, TLS, etc.).
    #[error("spreadsheet HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("spreadsheet API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("spreadsheet response parse error: {0}")]
    Parse(String),

    /// The collaborator is unreachable for a non-HTTP reason.
    #[error("spreadsheet unavailable: {0}")]
    Unavailable(String),
}

/// Errors while pushing rows to the spreadsheet service.
#[derive(Debug, Error)]
pub enum WriteError {
    /// No sheet is configured for this data type.
    #[error("no sheet configured for {0}")]
    NotConfigured(SyncType),

    /// HTTP-level transport error.
    #[error("spreadsheet HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API rejected the batch.
    #[error("spreadsheet API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    /// Reading the sheet before writing failed.
    #[error("could not read sheet before writing: {0}")]
    Fetch(#[from] FetchError),

    /// The sheet refused a single row.
    #[error("sheet rejected row '{natural_key}': {reason}")]
    Rejected { natural_key: String, reason: String },

    /// Loading local changes to push failed.
    #[error("could not read local changes: {0}")]
    Store(#[from] DatabaseError),

    /// The collaborator is unreachable for a non-HTTP reason.
    #[error("spreadsheet unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Sync coordinator errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the sync coordinator to its callers.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another run for the same type is active.
    #[error("a {sync_type} sync is already running (started at {started_at})")]
    Conflict {
        sync_type: SyncType,
        started_at: String,
    },

    /// The retry target does not exist or is already resolved.
    #[error("failed sync record not found: {0}")]
    NotFound(String),

    /// Fetch failure outside of a run (runs record it as their status).
    #[error("sync fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Write failure outside of a run.
    #[error("sync write error: {0}")]
    Write(#[from] WriteError),

    /// Database error while bookkeeping runs or the ledger.
    #[error("sync database error: {0}")]
    Database(#[from] DatabaseError),
}

/// A path segment or argument did not name a known data type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown sync type '{0}': expected one of sessions, projects, opportunities, partners, attendees")]
pub struct UnknownSyncType(pub String);

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A stored value could not be decoded.
    #[error("corrupt {column} value: {detail}")]
    Corrupt { column: String, detail: String },

    /// JSON payload (de)serialization failed.
    #[error("payload serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = MappingError::new("start", "unrecognized date-time 'soon'");
        assert_eq!(
            err.to_string(),
            "invalid field 'start': unrecognized date-time 'soon'"
        );

        let err = FetchError::NotConfigured(SyncType::Opportunities);
        assert_eq!(err.to_string(), "no sheet configured for opportunities");

        let err = SyncError::Conflict {
            sync_type: SyncType::Projects,
            started_at: "2026-01-01T00:00:00Z".into(),
        };
        assert!(err.to_string().contains("projects sync is already running"));

        let err = UnknownSyncType("widgets".into());
        assert!(err.to_string().contains("'widgets'"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let core_err: CoreError = MappingError::missing("email").into();
        assert!(matches!(core_err, CoreError::Mapping(_)));

        let db_err = DatabaseError::NotFound {
            entity: "sync_run".into(),
            id: "abc".into(),
        };
        let sync_err: SyncError = db_err.into();
        let core_err: CoreError = sync_err.into();
        assert!(matches!(core_err, CoreError::Sync(SyncError::Database(_))));
    }
}
