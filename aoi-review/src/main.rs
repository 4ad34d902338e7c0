//! aoi-review - query and aggregation service for consolidated AOI defects
//!
//! Serves filtered defect records, outcome/top-N/pivot summaries and
//! TSV/JSON exports over HTTP, and exposes an ingestion trigger. With
//! `--export` it writes the consolidated store to a file and exits.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use aoi_common::config::{RootFolderInitializer, RootFolderResolver, TomlConfig};
use aoi_common::db::init_database;
use aoi_ingest::IngestSettings;
use aoi_review::aggregate::outcome_counts;
use aoi_review::export::{records_to_tsv, ExportFormat};
use aoi_review::query::{fetch_all_records, DefectFilter};
use aoi_review::{build_router, AppState};
use clap::Parser;
use sqlx::SqlitePool;
use tokio::signal;
use tracing::{error, info};

/// Command-line arguments for aoi-review
#[derive(Parser, Debug)]
#[command(name = "aoi-review")]
#[command(about = "Query and aggregation service for consolidated AOI defects")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root folder holding the defect database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Address to bind (overrides `[review] bind`)
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on (overrides `[review] port`)
    #[arg(short, long, env = "AOI_REVIEW_PORT")]
    port: Option<u16>,

    /// Write every consolidated record to this file (`.json` or `.tsv`) and
    /// exit instead of serving
    #[arg(long)]
    export: Option<PathBuf>,
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
        "Starting AOI review service (aoi-review) v{} [{}] built {} ({})",
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
    let pool = match init_database(&db_path).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };

    if let Some(path) = &args.export {
        return export_records(&pool, path).await;
    }

    let settings = IngestSettings::from_config(&config, initializer.root_folder());
    let state = AppState::new(pool, settings, config.review.top_n);
    let app = build_router(state);

    let bind = args.bind.unwrap_or(config.review.bind);
    let port = args.port.unwrap_or(config.review.port);
    let addr = format!("{}:{}", bind, port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("aoi-review listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// One-shot export of the whole store, followed by an outcome summary
async fn export_records(pool: &SqlitePool, path: &Path) -> Result<()> {
    let format = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => ExportFormat::Json,
        _ => ExportFormat::Tsv,
    };

    let filter = DefectFilter::default();
    let records = fetch_all_records(pool, &filter).await?;
    let body = match format {
        ExportFormat::Tsv => records_to_tsv(&records),
        ExportFormat::Json => serde_json::to_string_pretty(&records)?,
    };
    std::fs::write(path, body)
        .with_context(|| format!("Failed to write export to {}", path.display()))?;
    info!(records = records.len(), "Export written to {}", path.display());

    for count in outcome_counts(pool, &filter).await? {
        info!(outcome = %count.outcome, count = count.count, "Outcome count");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
