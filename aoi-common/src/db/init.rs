//! Database initialization
//!
//! Creates the SQLite file on first run and brings the schema up to date.
//! Every statement is idempotent, so both services may call
//! [`init_database`] on every start.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Current schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 2;

const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
///
/// WAL journaling lets readers (the review service) run while a single
/// ingestion writer commits; a reader sees either all or none of a file's
/// transaction.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema_version_table(&pool).await?;
    create_store_meta_table(&pool).await?;
    create_source_files_table(&pool).await?;
    create_observations_table(&pool).await?;
    create_defect_records_table(&pool).await?;
    create_issues_table(&pool).await?;
    create_issue_changelog_table(&pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(&pool)
        .await?;

    Ok(pool)
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Key/value counters; `generation` is bumped by every committed record write
async fn create_store_meta_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS store_meta (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO store_meta (key, value) VALUES ('generation', 0)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Ledger of ingested export files, keyed by content hash
async fn create_source_files_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_files (
            content_hash TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            exported_at TEXT NOT NULL,
            accepted_rows INTEGER NOT NULL,
            rejected_rows INTEGER NOT NULL,
            ingestion_batch_id TEXT NOT NULL,
            ingested_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Every accepted observation, so consolidation can replay full history
async fn create_observations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS observations (
            content_hash TEXT NOT NULL REFERENCES source_files(content_hash),
            row_index INTEGER NOT NULL,
            file_name TEXT NOT NULL,
            exported_at TEXT NOT NULL,
            serial_number TEXT NOT NULL,
            ref_id TEXT NOT NULL,
            defect_code TEXT NOT NULL,
            rework_status TEXT NOT NULL,
            loop_index INTEGER,
            inspected_at TEXT,
            part_number TEXT,
            component_pn TEXT,
            machine_name TEXT,
            operation_name TEXT,
            line_name TEXT,
            PRIMARY KEY (content_hash, row_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_observations_serial ON observations(serial_number)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_defect_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS defect_records (
            serial_number TEXT NOT NULL,
            ref_id TEXT NOT NULL,
            defect_code TEXT NOT NULL,
            outcome TEXT NOT NULL,
            first_seen_loop INTEGER,
            first_seen_at TEXT,
            last_seen_loop INTEGER,
            last_seen_at TEXT,
            pass_count INTEGER NOT NULL,
            reworkable_count INTEGER NOT NULL,
            overridden_count INTEGER NOT NULL,
            false_call_count INTEGER NOT NULL,
            part_number TEXT,
            component_pn TEXT,
            machine_name TEXT,
            operation_name TEXT,
            line_name TEXT,
            inspected_at TEXT,
            exported_at TEXT NOT NULL,
            ingestion_batch_id TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (serial_number, ref_id, defect_code)
        )
        "#,
    )
    .execute(pool)
    .await?;

    for (name, column) in [
        ("idx_defect_records_outcome", "outcome"),
        ("idx_defect_records_ref_id", "ref_id"),
        ("idx_defect_records_part_number", "part_number"),
        ("idx_defect_records_component_pn", "component_pn"),
        ("idx_defect_records_exported_at", "exported_at"),
    ] {
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {} ON defect_records({})",
            name, column
        );
        sqlx::query(&sql).execute(pool).await?;
    }

    Ok(())
}

/// Quality issues raised against AOI findings (5W2H, actions, RCA)
///
/// `aoi_*` columns hold the outcome counts captured when the issue was
/// raised; they are never recomputed.
async fn create_issues_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS issues (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date_reported TEXT NOT NULL,
            line_name TEXT NOT NULL DEFAULT '',
            component_pn TEXT NOT NULL DEFAULT '',
            ref_id TEXT NOT NULL DEFAULT '',
            issue_category TEXT NOT NULL,
            issue_type TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            what_issue TEXT NOT NULL DEFAULT '',
            where_occurred TEXT NOT NULL DEFAULT '',
            why_preliminary TEXT NOT NULL DEFAULT '',
            when_happened TEXT NOT NULL DEFAULT '',
            who_detected TEXT NOT NULL DEFAULT '',
            how_detected TEXT NOT NULL DEFAULT '',
            how_much_impact TEXT NOT NULL DEFAULT '',
            short_term_fix TEXT NOT NULL DEFAULT '',
            long_term_action TEXT NOT NULL DEFAULT '',
            responsible_person TEXT NOT NULL DEFAULT '',
            due_date TEXT,
            status TEXT NOT NULL,
            rca_completed INTEGER NOT NULL DEFAULT 0,
            rca_method TEXT NOT NULL DEFAULT '',
            root_cause_final TEXT NOT NULL DEFAULT '',
            effectiveness_check INTEGER NOT NULL DEFAULT 0,
            aoi_false INTEGER NOT NULL DEFAULT 0,
            aoi_real INTEGER NOT NULL DEFAULT 0,
            aoi_fixed INTEGER NOT NULL DEFAULT 0,
            aoi_suspect INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_issues_date_reported ON issues(date_reported)")
        .execute(pool)
        .await?;

    Ok(())
}

/// One row per changed issue field
async fn create_issue_changelog_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS issue_changelog (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            issue_id INTEGER NOT NULL REFERENCES issues(id),
            field_name TEXT NOT NULL,
            old_value TEXT NOT NULL,
            new_value TEXT NOT NULL,
            changed_by TEXT NOT NULL,
            changed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_issue_changelog_issue ON issue_changelog(issue_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
