//! Defect record browsing

use aoi_common::{ConsolidatedDefectRecord, OccurrenceKey};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::FilterParams;
use crate::error::{ApiError, ApiResult};
use crate::query::{self, DefectFilter, RecordPage};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// Page number (1-indexed)
    #[serde(default = "default_page")]
    pub page: i64,
}

fn default_page() -> i64 {
    1
}

/// GET /api/defects
pub async fn list_defects(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<RecordPage>> {
    let filter = DefectFilter::try_from(params)?;
    let page = query::fetch_records(&state.db, &filter, page.page).await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    /// Absent means the blank defect code
    #[serde(default)]
    pub defect_code: String,
}

/// GET /api/defects/:serial/:ref_id?defect_code=...
pub async fn get_defect(
    State(state): State<AppState>,
    Path((serial, ref_id)): Path<(String, String)>,
    Query(key): Query<KeyQuery>,
) -> ApiResult<Json<ConsolidatedDefectRecord>> {
    let key = OccurrenceKey::new(serial, ref_id, key.defect_code);
    query::find_by_key(&state.db, &key)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no defect record for {}", key)))
}
