//! Batch ingestion report
//!
//! Collected while a batch runs and written out as JSON by the CLI (or
//! returned by the review service's ingest trigger).

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::consolidate::PassTie;
use crate::error::RowError;
use crate::source::ExportDateSource;

/// What happened to one input file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Applied,
    /// Applied although older than stored data for its boards (operator confirmed)
    AppliedOutOfOrder,
    /// Content hash already in the ledger
    Duplicate,
    /// Older than stored data for its boards; awaiting confirmation
    HeldBack,
    /// Could not be read or decoded
    Unreadable,
    /// Storage write failed; the file's transaction was rolled back
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub file_name: String,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_date_source: Option<ExportDateSource>,
    pub accepted_rows: usize,
    pub rejected_rows: usize,
    pub records_inserted: usize,
    pub records_updated: usize,
    pub records_unchanged: usize,
    pub ties: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FileReport {
    pub fn new(path: PathBuf, file_name: String, status: FileStatus) -> Self {
        Self {
            path,
            file_name,
            status,
            content_hash: None,
            exported_at: None,
            export_date_source: None,
            accepted_rows: 0,
            rejected_rows: 0,
            records_inserted: 0,
            records_updated: 0,
            records_unchanged: 0,
            ties: 0,
            message: None,
        }
    }
}

/// A rejected row kept as an example in the report
#[derive(Debug, Clone, Serialize)]
pub struct RejectedRowSample {
    pub file_name: String,
    pub row: usize,
    pub error: RowError,
    pub reason: String,
}

/// A file held back (or applied on confirmation) because it predates stored data
#[derive(Debug, Clone, Serialize)]
pub struct OrderingViolationReport {
    pub file_name: String,
    pub exported_at: NaiveDateTime,
    pub latest_ingested: NaiveDateTime,
    pub confirmed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub files: Vec<FileReport>,
    pub rows_accepted: usize,
    pub rows_rejected: usize,
    pub rejections_by_kind: BTreeMap<String, usize>,
    pub rejected_samples: Vec<RejectedRowSample>,
    pub tie_count: usize,
    pub tie_samples: Vec<PassTie>,
    pub ordering_violations: Vec<OrderingViolationReport>,
    /// Set when a storage write aborted the batch
    pub fatal: Option<String>,
    #[serde(skip)]
    sample_limit: usize,
}

impl BatchReport {
    pub fn new(batch_id: Uuid, sample_limit: usize) -> Self {
        Self {
            batch_id,
            started_at: aoi_common::time::now(),
            finished_at: None,
            files: Vec::new(),
            rows_accepted: 0,
            rows_rejected: 0,
            rejections_by_kind: BTreeMap::new(),
            rejected_samples: Vec::new(),
            tie_count: 0,
            tie_samples: Vec::new(),
            ordering_violations: Vec::new(),
            fatal: None,
            sample_limit,
        }
    }

    pub fn record_rejection(&mut self, file_name: &str, row: usize, error: &RowError) {
        self.rows_rejected += 1;
        *self
            .rejections_by_kind
            .entry(error.kind().to_string())
            .or_insert(0) += 1;

        if self.rejected_samples.len() < self.sample_limit {
            self.rejected_samples.push(RejectedRowSample {
                file_name: file_name.to_string(),
                row,
                error: error.clone(),
                reason: error.to_string(),
            });
        }
    }

    pub fn record_ties(&mut self, ties: Vec<PassTie>) {
        self.tie_count += ties.len();
        let room = self.sample_limit.saturating_sub(self.tie_samples.len());
        self.tie_samples.extend(ties.into_iter().take(room));
    }

    pub fn count_files(&self, status: FileStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }

    pub fn has_fatal_error(&self) -> bool {
        self.fatal.is_some()
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(aoi_common::time::now());
    }

    /// One INFO line for the batch, plus WARN lines for data-quality signals
    pub fn log_summary(&self) {
        info!(
            batch_id = %self.batch_id,
            files = self.files.len(),
            applied = self.count_files(FileStatus::Applied) + self.count_files(FileStatus::AppliedOutOfOrder),
            duplicates = self.count_files(FileStatus::Duplicate),
            held_back = self.count_files(FileStatus::HeldBack),
            unreadable = self.count_files(FileStatus::Unreadable),
            rows_accepted = self.rows_accepted,
            rows_rejected = self.rows_rejected,
            "Ingestion batch finished"
        );

        if self.rows_rejected > 0 {
            warn!(
                batch_id = %self.batch_id,
                rejected = self.rows_rejected,
                by_kind = ?self.rejections_by_kind,
                "Rows rejected during normalization"
            );
        }
        if self.tie_count > 0 {
            warn!(batch_id = %self.batch_id, ties = self.tie_count, "Same-pass duplicate observations resolved");
        }
        if let Some(fatal) = &self.fatal {
            warn!(batch_id = %self.batch_id, error = %fatal, "Batch aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing() -> RowError {
        RowError::MissingField {
            field: "SerialNumber".to_string(),
        }
    }

    #[test]
    fn test_rejections_counted_by_kind_and_sampled() {
        let mut report = BatchReport::new(Uuid::nil(), 2);
        for row in 0..3 {
            report.record_rejection("a.json", row, &missing());
        }
        report.record_rejection(
            "a.json",
            7,
            &RowError::InvalidEnum {
                field: "ReworkStatus".to_string(),
                value: "Maybe".to_string(),
            },
        );

        assert_eq!(report.rows_rejected, 4);
        assert_eq!(report.rejections_by_kind.get("missing_field"), Some(&3));
        assert_eq!(report.rejections_by_kind.get("invalid_enum"), Some(&1));
        assert_eq!(report.rejected_samples.len(), 2);
        assert_eq!(report.rejected_samples[0].reason, "missing field 'SerialNumber'");
    }

    #[test]
    fn test_report_serializes() {
        let mut report = BatchReport::new(Uuid::nil(), 5);
        report.record_rejection("a.json", 0, &missing());
        report.files.push(FileReport::new(
            PathBuf::from("/tmp/a.json"),
            "a.json".to_string(),
            FileStatus::HeldBack,
        ));
        report.finish();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["files"][0]["status"], "held_back");
        assert_eq!(json["rejected_samples"][0]["error"]["kind"], "missing_field");
        assert!(json.get("sample_limit").is_none());
    }
}
