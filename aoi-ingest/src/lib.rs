//! aoi-ingest library - AOI export ingestion and loop consolidation
//!
//! Turns raw AOI defect exports into one consolidated record per
//! (serial number, reference designator, defect code):
//! - [`normalize`]: schema boundary for raw export rows
//! - [`classify`]: per-pass candidate outcome
//! - [`consolidate`]: cross-pass reduction and "fixed" detection
//! - [`store`]: transactional persistence and upsert
//! - [`ingest`]: chronological batch driver with its [`report`]

pub mod classify;
pub mod consolidate;
pub mod error;
pub mod ingest;
pub mod normalize;
pub mod report;
pub mod source;
pub mod store;

pub use consolidate::{Consolidation, Consolidator, PassTie};
pub use error::{IngestError, IngestResult, RowError};
pub use ingest::{IngestSettings, Ingestor};
pub use report::{BatchReport, FileReport, FileStatus};
pub use store::IngestionStore;
