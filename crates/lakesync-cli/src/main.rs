//! Lakesync CLI - CDC envelope decoding and schema-history replay tool.

use anyhow::Result;
use clap::{Parser, Subcommand};
use lakesync_core::config::LogFormat;
use lakesync_core::Config;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
/// - 128+N: Signal N received (e.g., 130 = SIGINT)
#[repr(i32)]
#[derive(Debug, Clone, Copy)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, missing required fields)
    ConfigError = 1,
    /// CDC decoding error (malformed envelope or history record)
    CdcError = 2,
    /// Schema evolution error (conflicting table change)
    SchemaError = 3,
    /// Catalog / metastore error
    CatalogError = 4,
    /// Lock acquisition error
    LockError = 5,
    /// Storage error (S3, GCS, Azure, filesystem)
    StorageError = 6,
    /// General runtime error
    RuntimeError = 10,
    /// Signal interrupt (SIGINT = 2, so 128 + 2 = 130)
    SignalInterrupt = 130,
}

impl ExitCode {
    /// Convert an error to an exit code by inspecting the error message.
    fn from_error(error: &anyhow::Error) -> Self {
        let error_str = error.to_string().to_lowercase();

        if error_str.contains("config") || error_str.contains("toml") {
            ExitCode::ConfigError
        } else if error_str.contains("change event") || error_str.contains("history record") {
            ExitCode::CdcError
        } else if error_str.contains("cannot apply") {
            ExitCode::SchemaError
        } else if error_str.contains("catalog") || error_str.contains("metastore") {
            ExitCode::CatalogError
        } else if error_str.contains("lock") {
            ExitCode::LockError
        } else if error_str.contains("storage") || error_str.contains("object") {
            ExitCode::StorageError
        } else {
            ExitCode::RuntimeError
        }
    }
}

mod commands;

#[derive(Parser)]
#[command(name = "lakesync")]
#[command(about = "CDC envelope decoding and schema-history replay CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode CDC envelopes from a file (one JSON envelope per line)
    Decode {
        /// File with raw envelopes
        file: PathBuf,

        /// Only report events for this source database
        #[arg(long)]
        database: Option<String>,

        /// Only report events for this source table
        #[arg(long)]
        table: Option<String>,
    },

    /// Replay a schema-history record against a schema file
    Replay {
        /// JSON file holding the current table schema
        #[arg(long)]
        schema: PathBuf,

        /// File holding the serialized history record
        #[arg(long)]
        history: PathBuf,

        /// Only apply changes for this source database
        #[arg(long)]
        database: Option<String>,

        /// Only apply changes for this source table
        #[arg(long)]
        table: Option<String>,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Try to load config for log format settings (optional - falls back to JSON)
    let log_format = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.log_format)
        .unwrap_or(LogFormat::Json);

    // Initialize logging
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }

    let result = execute_command(cli).await;

    match result {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Decode {
            file,
            database,
            table,
        } => {
            let (database, table) = with_config_filter(&cli.config, database, table);
            commands::decode::run(&file, database, table).await?;
        }

        Commands::Replay {
            schema,
            history,
            database,
            table,
        } => {
            let (database, table) = with_config_filter(&cli.config, database, table);
            commands::replay::run(&schema, &history, database, table).await?;
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            config.validate()?;
            println!("Configuration is valid");
        }
    }

    Ok(())
}

/// Flag-side source filter, falling back to the config's CDC filter.
fn with_config_filter(
    config_path: &Option<PathBuf>,
    database: Option<String>,
    table: Option<String>,
) -> (Option<String>, Option<String>) {
    let cdc = config_path
        .as_ref()
        .and_then(|path| Config::from_file(path).ok())
        .map(|config| config.cdc)
        .unwrap_or_default();
    (database.or(cdc.database), table.or(cdc.table))
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    let path = path.clone().unwrap_or_else(|| PathBuf::from("config.toml"));

    let content = std::fs::read_to_string(&path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}
