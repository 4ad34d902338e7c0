//! Error types for aoi-ingest
//!
//! Row-level problems ([`RowError`]) are recoverable: the row is skipped and
//! counted in the batch report. [`IngestError`] covers file- and batch-level
//! failures.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Why a raw export row was rejected at the normalization boundary
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowError {
    /// Mandatory column absent or blank
    #[error("missing field '{field}'")]
    MissingField { field: String },

    /// Enumerated column holds an unrecognized value
    #[error("invalid value '{value}' for '{field}'")]
    InvalidEnum { field: String, value: String },

    /// Column present but cannot be coerced to its type
    #[error("cannot read '{value}' as {field}: {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl RowError {
    /// Short label used to tally rejections by kind
    pub fn kind(&self) -> &'static str {
        match self {
            RowError::MissingField { .. } => "missing_field",
            RowError::InvalidEnum { .. } => "invalid_enum",
            RowError::InvalidValue { .. } => "invalid_value",
        }
    }
}

/// File- and batch-level ingestion errors
#[derive(Debug, Error)]
pub enum IngestError {
    /// Export file could not be read or decoded
    #[error("cannot read export {path}: {reason}")]
    Source { path: PathBuf, reason: String },

    /// File is older than already-ingested data for the same boards
    #[error(
        "{file} (exported {exported_at}) predates already-ingested data for the same serial numbers (latest {latest_ingested})"
    )]
    OrderingViolation {
        file: String,
        exported_at: NaiveDateTime,
        latest_ingested: NaiveDateTime,
    },

    /// Writing a file's results failed; its transaction was rolled back
    #[error("storage write failed while applying {file}: {source}")]
    StorageWrite {
        file: String,
        #[source]
        source: aoi_common::Error,
    },

    #[error(transparent)]
    Common(#[from] aoi_common::Error),
}

pub type IngestResult<T> = Result<T, IngestError>;
