//! Converge Sync command-line management tool.
//!
//! Runs imports, exports and retries against the same database as the
//! daemon, and inspects run history, the failure ledger and the configured
//! Smartsheet sheets.

mod commands;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use converge_sync_core::config::{AppConfig, EXAMPLE_CONFIG};
use converge_sync_core::coordinator::SyncCoordinator;
use converge_sync_core::db::Database;
use converge_sync_core::sheets::SmartsheetClient;

/// Actor recorded in the audit log for CLI-triggered work.
pub const CLI_ACTOR: &str = "cli";

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Converge Sync command-line management tool.
#[derive(Parser, Debug)]
#[command(
    name = "converge-sync",
    version,
    about = "Synchronize Converge records with Smartsheet"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        env = "CONVERGE_SYNC_CONFIG",
        default_value = "/etc/converge-sync/config.toml"
    )]
    config: PathBuf,

    /// Log level for diagnostic output (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./converge-sync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Show per-type sync status.
    Status,

    /// Import rows from Smartsheet. Prompts when no target is given.
    Import {
        /// A sync type, or `all`.
        target: Option<String>,
    },

    /// Run a single import of one type and print the run.
    Sync {
        sync_type: String,
    },

    /// Push local changes of one type to Smartsheet.
    Export {
        sync_type: String,
    },

    /// List failed records.
    Failed {
        /// Filter by sync type.
        #[arg(short = 't', long = "type")]
        sync_type: Option<String>,

        /// Filter by status: pending, abandoned, resolved.
        #[arg(short, long)]
        status: Option<String>,

        #[arg(short, long, default_value = "50")]
        limit: u32,
    },

    /// Retry one failed record.
    Retry {
        /// Failed record ID.
        id: String,
    },

    /// Remove every failed record, except those of runs still in progress.
    ClearFailed {
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show recent runs.
    Runs {
        #[arg(short = 't', long = "type")]
        sync_type: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Show a sheet's columns and first row as Smartsheet returns them.
    Inspect {
        /// Sync type to inspect. All configured sheets when omitted.
        sync_type: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .without_time()
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("Error: {:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        Commands::Inspect { sync_type } => {
            let config = load_config(&cli.config)?;
            commands::inspect::run(&config, sync_type.as_deref()).await
        }
        command => {
            // Everything else drives the coordinator
            let config = load_config(&cli.config)?;
            let coordinator = open_coordinator(&config)?;

            match command {
                Commands::Status => commands::status::run(&coordinator),
                Commands::Import { target } => {
                    commands::import::run_import(&coordinator, target.as_deref()).await
                }
                Commands::Sync { sync_type } => {
                    commands::import::run_sync(&coordinator, &sync_type).await
                }
                Commands::Export { sync_type } => {
                    commands::import::run_export(&coordinator, &sync_type).await
                }
                Commands::Failed {
                    sync_type,
                    status,
                    limit,
                } => commands::failed::run_list(
                    &coordinator,
                    sync_type.as_deref(),
                    status.as_deref(),
                    limit,
                ),
                Commands::Retry { id } => commands::failed::run_retry(&coordinator, &id).await,
                Commands::ClearFailed { yes } => commands::failed::run_clear(&coordinator, yes),
                Commands::Runs { sync_type, limit } => {
                    commands::runs::run(&coordinator, sync_type.as_deref(), limit)
                }
                Commands::Init { .. } | Commands::Validate | Commands::Inspect { .. } => {
                    Ok(())
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_resolve(path).context("failed to load configuration")
}

fn open_coordinator(config: &AppConfig) -> Result<SyncCoordinator> {
    let db_path = config.daemon.database_path();
    tracing::debug!(path = %db_path.display(), "opening database");
    let db = Database::open_and_migrate(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    let client = Arc::new(SmartsheetClient::from_config(&config.smartsheet));
    Ok(SyncCoordinator::new(
        Arc::new(db),
        client,
        config.sync.max_retries,
    ))
}

// ---------------------------------------------------------------------------
// Config subcommands
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, EXAMPLE_CONFIG).context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Fill in the sheet IDs for each data type you sync");
    println!("  2. Set SMARTSHEET_API_KEY and CONVERGE_ADMIN_TOKEN in the environment");
    println!(
        "  3. Validate with: converge-sync validate --config {}",
        output.display()
    );
    println!(
        "  4. Start the daemon: converge-sync-daemon --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    if let Err(e) = config.validate() {
        println!("  [FAIL] Validation error: {}", e);
        anyhow::bail!("configuration validation failed");
    }
    println!("  [OK] All required fields are valid");

    let set_or_not = |v: bool| if v { "set" } else { "NOT SET" };
    println!();
    println!("Configuration summary:");
    println!("  Smartsheet API : {}", config.smartsheet.api_url);
    println!(
        "  API token      : {} (${})",
        set_or_not(config.smartsheet.token.is_some()),
        config.smartsheet.token_env
    );
    for (sync_type, sheet_id) in config.smartsheet.sheets.configured() {
        println!("  Sheet {:<9}: {}", sync_type.as_str(), sheet_id);
    }
    println!(
        "  Admin token    : {}",
        set_or_not(config.web.admin_token.is_some())
    );
    println!("  Web listen     : {}", config.web.listen);
    println!("  Max retries    : {}", config.sync.max_retries);
    println!(
        "  Retry sweeper  : {}",
        if config.retry.enabled() {
            format!("every {}s", config.retry.interval_secs)
        } else {
            "disabled".to_string()
        }
    );
    println!("  Data directory : {}", config.daemon.data_dir.display());
    println!();
    println!("{}", style::success("Configuration is valid."));

    Ok(())
}
