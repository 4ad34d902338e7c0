//! In-process ingestion trigger
//!
//! Only one ingestion runs at a time; a second trigger while one is running
//! is rejected with 409. The aggregate cache is cleared after every run.

use std::path::PathBuf;

use aoi_ingest::BatchReport;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Optional request body; no body (or no files) means discover from the
/// configured source directory
#[derive(Debug, Default, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

/// POST /api/ingest
pub async fn trigger_ingest(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<BatchReport>)> {
    let request: IngestRequest = if body.iter().all(u8::is_ascii_whitespace) {
        IngestRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid ingest request: {}", e)))?
    };

    let _guard = state
        .ingest_lock
        .try_lock()
        .map_err(|_| ApiError::Conflict("an ingestion is already running".to_string()))?;

    info!(files = request.files.len(), "Ingestion triggered over HTTP");
    let result = state.ingestor.run_or_discover(&request.files).await;
    state.cache.invalidate();
    let report = result?;

    let status = if report.has_fatal_error() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    Ok((status, Json(report)))
}
