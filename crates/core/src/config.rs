//! TOML-based configuration for Converge Sync.
//!
//! Secrets (the Smartsheet API token, the admin token) are stored as `_env`
//! fields that reference environment variable names. The actual values are
//! resolved at runtime via [`AppConfig::resolve_env_vars`].

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::models::SyncType;

/// File name of the SQLite database inside `daemon.data_dir`.
pub const DATABASE_FILE: &str = "converge-sync.db";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Smartsheet API access and sheet ids.
    pub smartsheet: SmartsheetConfig,

    /// Admin REST API settings.
    #[serde(default)]
    pub web: WebConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    /// Background retry sweeper.
    #[serde(default)]
    pub retry: RetryConfig,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for persistent data (the database).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/converge-sync")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl DaemonConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

// ---------------------------------------------------------------------------
// Smartsheet
// ---------------------------------------------------------------------------

/// Smartsheet REST API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartsheetConfig {
    /// API base URL (default `https://api.smartsheet.com/2.0`).
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Environment variable holding the API access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// One sheet id per data type.
    #[serde(default)]
    pub sheets: SheetIds,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_api_url() -> String {
    "https://api.smartsheet.com/2.0".into()
}
fn default_token_env() -> String {
    "SMARTSHEET_API_KEY".into()
}

impl Default for SmartsheetConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token_env: default_token_env(),
            sheets: SheetIds::default(),
            token: None,
        }
    }
}

/// Sheet ids keyed by data type. A type without an id is not synced.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SheetIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projects: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opportunities: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partners: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendees: Option<String>,
}

impl SheetIds {
    pub fn get(&self, sync_type: SyncType) -> Option<&str> {
        let id = match sync_type {
            SyncType::Sessions => &self.sessions,
            SyncType::Projects => &self.projects,
            SyncType::Opportunities => &self.opportunities,
            SyncType::Partners => &self.partners,
            SyncType::Attendees => &self.attendees,
        };
        id.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Configured types and their sheet ids.
    pub fn configured(&self) -> BTreeMap<SyncType, String> {
        SyncType::ALL
            .into_iter()
            .filter_map(|t| self.get(t).map(|id| (t, id.to_string())))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Web
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Listen address (default `127.0.0.1:3000`).
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Environment variable holding the admin bearer token.
    #[serde(default)]
    pub admin_token_env: Option<String>,

    /// Resolved admin token. Admin routes are unauthenticated when unset.
    #[serde(skip)]
    pub admin_token: Option<String>,
}

fn default_listen() -> String {
    "127.0.0.1:3000".into()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            admin_token_env: None,
            admin_token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Sync behaviour
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Failed retries after which a record is abandoned. 0 never abandons.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    5
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

/// Retry sweeper schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Seconds between sweeps; 0 disables the sweeper.
    #[serde(default)]
    pub interval_secs: u64,

    /// Only records whose last attempt is at least this old are retried.
    #[serde(default = "default_min_age")]
    pub min_age_secs: u64,
}

fn default_min_age() -> u64 {
    300
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 0,
            min_age_secs: default_min_age(),
        }
    }
}

impl RetryConfig {
    pub fn enabled(&self) -> bool {
        self.interval_secs > 0
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables.
    ///
    /// Missing variables are logged but do not fail; the Smartsheet client
    /// reports the missing token on first use.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        self.smartsheet.token =
            resolve_optional_env(&self.smartsheet.token_env, "smartsheet.token_env");

        if let Some(ref env_name) = self.web.admin_token_env {
            self.web.admin_token = resolve_optional_env(env_name, "web.admin_token_env");
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.smartsheet.api_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "smartsheet.api_url".into(),
                detail: "API URL must not be empty".into(),
            });
        }

        let sheets = self.smartsheet.sheets.configured();
        if sheets.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "smartsheet.sheets".into(),
                detail: "at least one sheet id must be configured".into(),
            });
        }
        for (sync_type, id) in &sheets {
            if !id.chars().all(|c| c.is_ascii_digit()) {
                return Err(ConfigError::InvalidValue {
                    field: format!("smartsheet.sheets.{}", sync_type),
                    detail: format!("sheet id '{}' must be numeric", id),
                });
            }
        }

        if self.web.listen.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidValue {
                field: "web.listen".into(),
                detail: format!("'{}' is not a socket address", self.web.listen),
            });
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Commented starter configuration written by `converge-sync init`.
pub const EXAMPLE_CONFIG: &str = r#"# Converge Sync configuration

[daemon]
log_level = "info"
data_dir = "/var/lib/converge-sync"

[smartsheet]
api_url = "https://api.smartsheet.com/2.0"
# Name of the environment variable holding the API access token.
token_env = "SMARTSHEET_API_KEY"

# One sheet per data type. Types without a sheet are skipped.
[smartsheet.sheets]
sessions = "0000000000000000"
projects = "0000000000000000"
# opportunities = "0000000000000000"
partners = "0000000000000000"
attendees = "0000000000000000"

[web]
listen = "127.0.0.1:3000"
admin_token_env = "CONVERGE_ADMIN_TOKEN"

[sync]
# Failed retries before a record is abandoned (0 = never).
max_retries = 5

[retry]
# Seconds between automatic retry sweeps (0 = disabled).
interval_secs = 0
min_age_secs = 300
"#;

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
