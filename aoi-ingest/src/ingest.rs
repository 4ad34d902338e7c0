//! Batch ingestion driver
//!
//! **Algorithm:**
//! 1. Read every input file (unreadable files are reported and skipped)
//! 2. Sort chronologically by export timestamp, then file name
//! 3. Per file, in order:
//!    - skip if its content hash is already in the ledger
//!    - normalize rows; rejections reach the report once the file applies
//!    - hold back if it predates stored data for its boards, unless confirmed
//!    - apply in one transaction (observations, re-consolidation, upsert)
//! 4. A storage write failure stops the batch; earlier files stay committed

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use aoi_common::config::TomlConfig;
use aoi_common::Origin;
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::consolidate::{Consolidator, DEFAULT_PASS_WINDOW_MINUTES};
use crate::error::{IngestError, IngestResult};
use crate::normalize::normalize;
use crate::report::{BatchReport, FileReport, FileStatus, OrderingViolationReport};
use crate::source::{discover_exports, read_export, sort_chronologically, ExportFile};
use crate::store::{ApplyOutcome, IngestionStore};

/// Runtime options for one ingestion run
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub source_dir: PathBuf,
    pub file_prefix: String,
    pub pass_window_minutes: u32,
    pub confirm_out_of_order: bool,
    pub sample_limit: usize,
}

impl IngestSettings {
    /// Settings from the TOML `[ingest]` section; `source_dir` defaults to
    /// the root folder
    pub fn from_config(config: &TomlConfig, root_folder: &Path) -> Self {
        let ingest = &config.ingest;
        Self {
            source_dir: ingest
                .source_dir
                .clone()
                .unwrap_or_else(|| root_folder.to_path_buf()),
            file_prefix: ingest.file_prefix.clone(),
            pass_window_minutes: ingest.pass_window_minutes,
            confirm_out_of_order: ingest.confirm_out_of_order,
            sample_limit: ingest.sample_limit,
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            file_prefix: "Defect RawData".to_string(),
            pass_window_minutes: DEFAULT_PASS_WINDOW_MINUTES,
            confirm_out_of_order: false,
            sample_limit: 20,
        }
    }
}

/// Runs ingestion batches against one store
pub struct Ingestor {
    store: IngestionStore,
    consolidator: Consolidator,
    settings: IngestSettings,
}

impl Ingestor {
    pub fn new(db: SqlitePool, settings: IngestSettings) -> Self {
        Self {
            store: IngestionStore::new(db),
            consolidator: Consolidator::new(settings.pass_window_minutes),
            settings,
        }
    }

    pub fn store(&self) -> &IngestionStore {
        &self.store
    }

    /// Export files waiting in the configured source directory
    pub async fn discover(&self) -> IngestResult<Vec<PathBuf>> {
        discover_exports(&self.settings.source_dir, &self.settings.file_prefix).await
    }

    /// Ingest the given files, or everything discovered when `paths` is empty
    pub async fn run_or_discover(&self, paths: &[PathBuf]) -> IngestResult<BatchReport> {
        if paths.is_empty() {
            let discovered = self.discover().await?;
            info!(
                dir = %self.settings.source_dir.display(),
                count = discovered.len(),
                "Discovered export files"
            );
            Ok(self.run(&discovered).await)
        } else {
            Ok(self.run(paths).await)
        }
    }

    /// Ingest one batch of files
    ///
    /// Never fails as a whole: per-file problems land in the report, and a
    /// fatal storage error is recorded in [`BatchReport::fatal`].
    pub async fn run(&self, paths: &[PathBuf]) -> BatchReport {
        let batch_id = Uuid::new_v4();
        let mut report = BatchReport::new(batch_id, self.settings.sample_limit);
        info!(batch_id = %batch_id, files = paths.len(), "Starting ingestion batch");

        let mut exports = Vec::with_capacity(paths.len());
        for path in paths {
            match read_export(path).await {
                Ok(export) => exports.push(export),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable export");
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let mut file_report = FileReport::new(path.clone(), name, FileStatus::Unreadable);
                    file_report.message = Some(e.to_string());
                    report.files.push(file_report);
                }
            }
        }

        sort_chronologically(&mut exports);

        for export in &exports {
            match self.ingest_file(export, batch_id, &mut report).await {
                Ok(file_report) => report.files.push(file_report),
                Err(e) => {
                    error!(file = %export.file_name, error = %e, "Ingestion batch aborted");
                    let mut file_report = describe(export, FileStatus::Failed);
                    file_report.message = Some(e.to_string());
                    report.files.push(file_report);
                    report.fatal = Some(e.to_string());
                    break;
                }
            }
        }

        report.finish();
        report.log_summary();
        report
    }

    async fn ingest_file(
        &self,
        export: &ExportFile,
        batch_id: Uuid,
        report: &mut BatchReport,
    ) -> IngestResult<FileReport> {
        let storage = |source| IngestError::StorageWrite {
            file: export.file_name.clone(),
            source,
        };

        if self
            .store
            .is_ingested(&export.content_hash)
            .await
            .map_err(storage)?
        {
            info!(file = %export.file_name, "File already ingested; skipping");
            return Ok(describe(export, FileStatus::Duplicate));
        }

        let mut observations = Vec::with_capacity(export.rows.len());
        let mut rejections = Vec::new();
        for (idx, raw) in export.rows.iter().enumerate() {
            let origin = Origin {
                content_hash: export.content_hash.clone(),
                file_name: export.file_name.clone(),
                exported_at: export.exported_at,
                row: idx as u32,
            };
            match normalize(raw, origin) {
                Ok(obs) => observations.push(obs),
                Err(e) => {
                    debug!(file = %export.file_name, row = idx, error = %e, "Row rejected");
                    rejections.push((idx, e));
                }
            }
        }
        let rejected = rejections.len();

        let mut status = FileStatus::Applied;
        let serials: Vec<String> = observations
            .iter()
            .map(|o| o.key.serial_number.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let latest = self
            .store
            .latest_export_for_serials(&serials)
            .await
            .map_err(storage)?;

        if let Some(latest_ingested) = latest.filter(|l| *l > export.exported_at) {
            let violation = IngestError::OrderingViolation {
                file: export.file_name.clone(),
                exported_at: export.exported_at,
                latest_ingested,
            };
            let confirmed = self.settings.confirm_out_of_order;
            report.ordering_violations.push(OrderingViolationReport {
                file_name: export.file_name.clone(),
                exported_at: export.exported_at,
                latest_ingested,
                confirmed,
            });

            if !confirmed {
                warn!(file = %export.file_name, "{}; held back until confirmed", violation);
                let mut file_report = describe(export, FileStatus::HeldBack);
                file_report.accepted_rows = observations.len();
                file_report.rejected_rows = rejected;
                file_report.message = Some(violation.to_string());
                return Ok(file_report);
            }

            warn!(file = %export.file_name, "{}; applying as confirmed", violation);
            status = FileStatus::AppliedOutOfOrder;
        }

        let applied = match self
            .store
            .apply_file(export, &observations, rejected, &self.consolidator, batch_id)
            .await?
        {
            ApplyOutcome::Applied(applied) => applied,
            ApplyOutcome::AlreadyIngested => {
                info!(file = %export.file_name, "File ingested concurrently; skipping");
                return Ok(describe(export, FileStatus::Duplicate));
            }
        };

        // Batch totals count rejections of applied files only
        report.rows_accepted += observations.len();
        for (idx, e) in &rejections {
            report.record_rejection(&export.file_name, *idx, e);
        }

        let mut file_report = describe(export, status);
        file_report.accepted_rows = observations.len();
        file_report.rejected_rows = rejected;
        file_report.records_inserted = applied.records_inserted;
        file_report.records_updated = applied.records_updated;
        file_report.records_unchanged = applied.records_unchanged;
        file_report.ties = applied.ties.len();
        report.record_ties(applied.ties);

        Ok(file_report)
    }
}

fn describe(export: &ExportFile, status: FileStatus) -> FileReport {
    let mut file_report = FileReport::new(export.path.clone(), export.file_name.clone(), status);
    file_report.content_hash = Some(export.content_hash.clone());
    file_report.exported_at = Some(export.exported_at);
    file_report.export_date_source = Some(export.date_source);
    file_report
}
