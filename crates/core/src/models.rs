//! Domain model types used throughout Converge sync.
//!
//! These types bridge the coordinator, the database layer, and the web API.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::UnknownSyncType;

// ---------------------------------------------------------------------------
// Sync type
// ---------------------------------------------------------------------------

/// The closed set of data types kept in the spreadsheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    Sessions,
    Projects,
    Opportunities,
    Partners,
    Attendees,
}

impl SyncType {
    /// Every type, in the order `import_all` runs them.
    pub const ALL: [SyncType; 5] = [
        SyncType::Sessions,
        SyncType::Projects,
        SyncType::Opportunities,
        SyncType::Partners,
        SyncType::Attendees,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sessions => "sessions",
            Self::Projects => "projects",
            Self::Opportunities => "opportunities",
            Self::Partners => "partners",
            Self::Attendees => "attendees",
        }
    }

    /// Stable slot used for per-type lock arrays.
    pub fn index(&self) -> usize {
        match self {
            Self::Sessions => 0,
            Self::Projects => 1,
            Self::Opportunities => 2,
            Self::Partners => 3,
            Self::Attendees => 4,
        }
    }
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncType {
    type Err = UnknownSyncType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sessions" | "session" => Ok(Self::Sessions),
            "projects" | "project" => Ok(Self::Projects),
            "opportunities" | "opportunity" => Ok(Self::Opportunities),
            "partners" | "partner" => Ok(Self::Partners),
            "attendees" | "attendee" => Ok(Self::Attendees),
            _ => Err(UnknownSyncType(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// Direction of a sync run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    Import,
    Export,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Export => "export",
        }
    }

    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "import" => Some(Self::Import),
            "export" => Some(Self::Export),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a sync run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal status for a run that processed every row it fetched.
    pub fn for_row_counts(failed: usize) -> Self {
        if failed > 0 {
            Self::Partial
        } else {
            Self::Succeeded
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of the import or export pipeline for a single type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRun {
    pub id: String,
    pub sync_type: SyncType,
    pub direction: SyncDirection,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub items_processed: i64,
    pub items_failed: i64,
    pub error_message: Option<String>,
    pub triggered_by: String,
}

impl SyncRun {
    pub fn is_running(&self) -> bool {
        self.completed_at.is_none()
    }
}

// ---------------------------------------------------------------------------
// Failure ledger
// ---------------------------------------------------------------------------

/// Status of a row-level failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureStatus {
    Pending,
    Resolved,
    Abandoned,
}

impl FailureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "resolved" => Some(Self::Resolved),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_val(&s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("unknown failure status '{}'", s))
    }
}

/// A row that failed to import or export, kept for inspection and retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedSyncRecord {
    pub id: String,
    pub sync_run_id: String,
    pub sync_type: SyncType,
    pub direction: SyncDirection,
    pub external_ref: String,
    pub payload_snapshot: serde_json::Value,
    pub error_reason: String,
    pub retry_count: i64,
    pub last_attempt_at: DateTime<Utc>,
    pub status: FailureStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Selection used when listing or clearing ledger records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureFilter {
    pub sync_type: Option<SyncType>,
    /// `None` selects every non-resolved record when listing, and every
    /// record when clearing.
    pub status: Option<FailureStatus>,
    pub limit: Option<u32>,
}

/// A row failure as reported in a pipeline outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RowFailure {
    /// 1-based sheet row number when known.
    pub row: Option<i64>,
    pub external_ref: String,
    pub field: Option<String>,
    pub message: String,
}

/// Result of a manual retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryOutcome {
    pub resolved: bool,
    pub record: FailedSyncRecord,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Per-type status summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeStatus {
    pub sync_type: SyncType,
    pub running: bool,
    pub last_run: Option<SyncRun>,
    pub active_failures: i64,
    pub entity_count: i64,
}

// ---------------------------------------------------------------------------
// Audit Entry
// ---------------------------------------------------------------------------

/// An audit-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub sync_type: Option<SyncType>,
    pub actor: String,
    pub details: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    /// Create a success audit entry.
    pub fn success(action: &str, sync_type: Option<SyncType>, actor: &str, details: &str) -> Self {
        Self {
            action: action.to_string(),
            sync_type,
            actor: actor.to_string(),
            details: details.to_string(),
            success: true,
            timestamp: Utc::now(),
        }
    }

    /// Create a failure audit entry.
    pub fn failure(action: &str, sync_type: Option<SyncType>, actor: &str, details: &str) -> Self {
        Self {
            success: false,
            ..Self::success(action, sync_type, actor, details)
        }
    }
}
