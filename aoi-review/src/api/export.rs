//! File downloads of filtered records and pivots

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::summary::{cached_pivot, PivotQuery};
use super::FilterParams;
use crate::aggregate::PivotSpec;
use crate::error::{ApiError, ApiResult};
use crate::export::{pivot_to_tsv, records_to_tsv, ExportFormat};
use crate::query::{self, DefectFilter};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct FormatQuery {
    #[serde(default)]
    pub format: ExportFormat,
}

/// GET /api/export/defects
pub async fn export_defects(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
    Query(format): Query<FormatQuery>,
) -> ApiResult<Response> {
    let filter = DefectFilter::try_from(params)?;
    let records = query::fetch_all_records(&state.db, &filter).await?;

    let body = match format.format {
        ExportFormat::Tsv => records_to_tsv(&records),
        ExportFormat::Json => to_json(&records)?,
    };
    Ok(download("defects", format.format, body))
}

/// GET /api/export/pivot
pub async fn export_pivot(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
    Query(pivot): Query<PivotQuery>,
    Query(format): Query<FormatQuery>,
) -> ApiResult<Response> {
    let filter = DefectFilter::try_from(params)?;
    let spec = PivotSpec::try_from(pivot)?;
    let table = cached_pivot(&state, &filter, &spec).await?;

    let body = match format.format {
        ExportFormat::Tsv => pivot_to_tsv(&table),
        ExportFormat::Json => to_json(&table)?,
    };
    Ok(download("pivot_defects", format.format, body))
}

fn to_json<T: serde::Serialize>(value: &T) -> ApiResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| ApiError::Internal(e.to_string()))
}

fn download(stem: &str, format: ExportFormat, body: String) -> Response {
    let disposition = format!("attachment; filename=\"{}.{}\"", stem, format.extension());
    (
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}
