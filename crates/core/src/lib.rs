//! Converge sync core library.
//!
//! Keeps the Converge portal's internal records in step with the
//! Smartsheet sheets its staff edit: configuration, SQLite persistence,
//! row mapping, the import and export pipelines, the failure ledger, and
//! the coordinator that runs them one sync type at a time.

pub mod config;
pub mod coordinator;
pub mod db;
pub mod entities;
pub mod errors;
pub mod export;
pub mod import;
pub mod ledger;
pub mod mapper;
pub mod models;
pub mod sheets;
pub mod store;

// Re-exports for convenience.
pub use config::AppConfig;
pub use coordinator::SyncCoordinator;
pub use db::Database;
pub use entities::InternalEntity;
pub use ledger::FailureLedger;
pub use models::{SyncDirection, SyncType};
pub use sheets::{MemorySheets, SheetClient, SmartsheetClient};
pub use store::EntityStore;
