//! Converge Sync daemon entry point.
//!
//! Loads configuration, opens the database, recovers interrupted runs,
//! serves the admin API and the optional retry sweeper, and handles
//! graceful shutdown.

mod retry_sweeper;
mod signals;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use converge_sync_core::config::AppConfig;
use converge_sync_core::coordinator::SyncCoordinator;
use converge_sync_core::db::Database;
use converge_sync_core::sheets::SmartsheetClient;
use converge_sync_web::WebServer;

use crate::retry_sweeper::RetrySweeper;

/// How long the sweeper may take to finish its pass at shutdown.
const SWEEPER_STOP_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// Converge Sync daemon.
#[derive(Parser, Debug)]
#[command(
    name = "converge-sync-daemon",
    version,
    about = "Smartsheet synchronization service for Converge"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "CONVERGE_SYNC_CONFIG")]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config =
        AppConfig::load_and_resolve(&args.config).context("failed to load configuration")?;

    // Initialize tracing
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.daemon.log_level);
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    let sheets = config.smartsheet.sheets.configured();
    info!("========================================");
    info!("  Converge Sync Daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", args.config.display());
    info!("Smartsheet API: {}", config.smartsheet.api_url);
    info!(
        "Sheets        : {}",
        sheets.keys().map(|t| t.as_str()).collect::<Vec<_>>().join(", ")
    );
    info!("Web listen    : {}", config.web.listen);
    info!("Data dir      : {}", config.daemon.data_dir.display());
    info!("Log level     : {}", log_level);
    info!("========================================");

    if config.smartsheet.token.is_none() {
        warn!(
            env = %config.smartsheet.token_env,
            "Smartsheet token not set, every fetch will fail"
        );
    }

    // Database
    let db_path = config.daemon.database_path();
    let db = Arc::new(Database::open_and_migrate(&db_path).context("failed to open database")?);
    info!("Database initialized at {}", db_path.display());

    // Coordinator
    let client = Arc::new(SmartsheetClient::from_config(&config.smartsheet));
    let coordinator = Arc::new(SyncCoordinator::new(
        db,
        client,
        config.sync.max_retries,
    ));
    coordinator
        .recover_interrupted_runs()
        .context("failed to recover interrupted runs")?;

    let shutdown = Arc::new(Notify::new());

    // Web server
    let web_server = WebServer::new(coordinator.clone(), &config.web);
    let listen_addr = config.web.listen.clone();
    let web_shutdown = shutdown.clone();
    let web_handle = tokio::spawn(async move {
        let signal = async move { web_shutdown.notified().await };
        if let Err(e) = web_server.start(&listen_addr, signal).await {
            error!("Web server error: {}", e);
        }
    });

    // Retry sweeper
    let sweeper_shutdown = Arc::new(Notify::new());
    let sweeper_handle = if config.retry.enabled() {
        let sweeper = RetrySweeper::new(
            coordinator.clone(),
            Duration::from_secs(config.retry.interval_secs),
            Duration::from_secs(config.retry.min_age_secs),
        );
        let stop = sweeper_shutdown.clone();
        Some(tokio::spawn(async move { sweeper.run(stop).await }))
    } else {
        info!("retry sweeper disabled");
        None
    };

    signals::wait_for_shutdown().await;
    info!("Shutdown signal received, stopping...");

    if let Some(handle) = sweeper_handle {
        sweeper_shutdown.notify_one();
        match tokio::time::timeout(SWEEPER_STOP_TIMEOUT, handle).await {
            Ok(Ok(())) => info!("retry sweeper stopped gracefully"),
            Ok(Err(e)) => warn!("retry sweeper task error: {}", e),
            Err(_) => warn!("retry sweeper did not stop within 10s, forcing shutdown"),
        }
    }

    shutdown.notify_one();
    if tokio::time::timeout(SWEEPER_STOP_TIMEOUT, web_handle)
        .await
        .is_err()
    {
        warn!("web server did not drain within 10s");
    }

    info!("Converge Sync daemon stopped.");
    Ok(())
}
