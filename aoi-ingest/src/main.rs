//! aoi-ingest - batch ingestion of AOI defect exports
//!
//! Reads export files (given on the command line, or discovered in the
//! configured source directory), consolidates them into the defect store and
//! optionally writes a JSON batch report.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use aoi_common::config::{RootFolderInitializer, RootFolderResolver, TomlConfig};
use aoi_common::db::init_database;
use aoi_ingest::{IngestSettings, Ingestor};
use clap::Parser;
use tracing::info;

/// Command-line arguments for aoi-ingest
#[derive(Parser, Debug)]
#[command(name = "aoi-ingest")]
#[command(about = "Consolidate AOI defect exports into the defect store")]
#[command(version)]
struct Args {
    /// Export files to ingest (default: every matching file in the source directory)
    files: Vec<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root folder holding the defect database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Directory scanned for exports when no files are given
    #[arg(long)]
    source_dir: Option<PathBuf>,

    /// Apply files that predate already-ingested data for the same boards
    #[arg(long)]
    confirm_out_of_order: bool,

    /// Write the batch report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Timestamps within this many minutes of a pass start belong to that pass
    #[arg(long)]
    pass_window_minutes: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = TomlConfig::load(args.config.as_deref());

    let level = config
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    info!(
        "Starting AOI ingest (aoi-ingest) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let config = config.context("Failed to load configuration")?;

    let root_folder = RootFolderResolver::new()
        .with_cli_arg(args.root_folder.clone())
        .with_toml(&config)
        .resolve();
    let initializer =
        RootFolderInitializer::new(root_folder).with_database_file(config.database_file.clone());
    initializer.ensure_directory_exists()?;

    let db_path = initializer.database_path();
    info!("Database path: {}", db_path.display());
    let pool = init_database(&db_path)
        .await
        .context("Failed to open defect database")?;

    let mut settings = IngestSettings::from_config(&config, initializer.root_folder());
    if let Some(dir) = args.source_dir {
        settings.source_dir = dir;
    }
    if let Some(minutes) = args.pass_window_minutes {
        settings.pass_window_minutes = minutes;
    }
    settings.confirm_out_of_order |= args.confirm_out_of_order;

    let ingestor = Ingestor::new(pool, settings);
    let report = ingestor
        .run_or_discover(&args.files)
        .await
        .context("Failed to list export files")?;

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Batch report written to {}", path.display());
    }

    if let Some(fatal) = &report.fatal {
        bail!("ingestion aborted: {}", fatal);
    }

    Ok(())
}
