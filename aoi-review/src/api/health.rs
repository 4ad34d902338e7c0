//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    /// Store generation; moves whenever an export file is applied
    pub generation: i64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let generation = aoi_common::db::store_generation(&state.db).await?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        module: "aoi-review".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        generation,
    }))
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
