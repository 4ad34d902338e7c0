//! # AOI Common Library
//!
//! Shared code for the AOI defect consolidation services:
//! - Defect data model (observations, occurrence keys, consolidated records)
//! - Database initialization, schema and record decoding
//! - Configuration loading and root folder resolution
//! - Timestamp parsing and formatting

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod time;

pub use error::{Error, Result};
pub use model::{
    ConsolidatedDefectRecord, DefectObservation, Descriptors, InspectionPass, OccurrenceKey,
    Origin, Outcome, ReworkStatus,
};
