//! Aggregate summaries, served through the aggregate cache

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::FilterParams;
use crate::aggregate::{self, Dimension, OutcomeCount, PivotSpec, PivotTable, RankedCount};
use crate::error::{ApiError, ApiResult};
use crate::query::DefectFilter;
use crate::AppState;

/// GET /api/summary/outcomes
pub async fn outcome_summary(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
) -> ApiResult<Json<Vec<OutcomeCount>>> {
    let filter = DefectFilter::try_from(params)?;
    let counts = state
        .cache
        .get_or_compute(&state.db, "outcome_counts", &filter, || {
            aggregate::outcome_counts(&state.db, &filter)
        })
        .await?;
    Ok(Json(counts))
}

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    pub limit: Option<usize>,
    /// Collapse pin-level refs (`R205.1` → `R205`); default on
    pub dedup_pins: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct TopResponse {
    pub limit: usize,
    pub items: Vec<RankedCount>,
}

/// GET /api/summary/top-refs
pub async fn top_refs(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
    Query(top): Query<TopQuery>,
) -> ApiResult<Json<TopResponse>> {
    let filter = DefectFilter::try_from(params)?;
    let limit = top.limit.unwrap_or(state.top_n);
    let dedup_pins = top.dedup_pins.unwrap_or(true);

    let items = state
        .cache
        .get_or_compute(&state.db, "top_ref_ids", &(&filter, limit, dedup_pins), || {
            aggregate::top_ref_ids(&state.db, &filter, limit, dedup_pins)
        })
        .await?;
    Ok(Json(TopResponse { limit, items }))
}

/// GET /api/summary/top-components
pub async fn top_components(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
    Query(top): Query<TopQuery>,
) -> ApiResult<Json<TopResponse>> {
    let filter = DefectFilter::try_from(params)?;
    let limit = top.limit.unwrap_or(state.top_n);

    let items = state
        .cache
        .get_or_compute(&state.db, "top_component_pns", &(&filter, limit), || {
            aggregate::top_component_pns(&state.db, &filter, limit)
        })
        .await?;
    Ok(Json(TopResponse { limit, items }))
}

/// Pivot shape parameters
///
/// `rows` is a comma-separated dimension list; `top_components=0` disables
/// the component restriction.
#[derive(Debug, Default, Deserialize)]
pub struct PivotQuery {
    pub rows: Option<String>,
    pub column: Option<String>,
    pub top_components: Option<usize>,
}

impl TryFrom<PivotQuery> for PivotSpec {
    type Error = ApiError;

    fn try_from(query: PivotQuery) -> ApiResult<Self> {
        let mut spec = PivotSpec::default();
        if let Some(rows) = query.rows.as_deref().filter(|r| !r.trim().is_empty()) {
            spec.rows = rows
                .split(',')
                .map(str::parse::<Dimension>)
                .collect::<Result<Vec<_>, _>>()?;
        }
        if let Some(column) = query.column.as_deref() {
            spec.column = column.parse()?;
        }
        if let Some(k) = query.top_components {
            spec.top_components = (k > 0).then_some(k);
        }
        spec.validate()?;
        Ok(spec)
    }
}

pub(crate) async fn cached_pivot(
    state: &AppState,
    filter: &DefectFilter,
    spec: &PivotSpec,
) -> ApiResult<PivotTable> {
    let table = state
        .cache
        .get_or_compute(&state.db, "pivot", &(filter, spec), || {
            aggregate::pivot(&state.db, filter, spec)
        })
        .await?;
    Ok(table)
}

/// GET /api/summary/pivot
pub async fn pivot_summary(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
    Query(pivot): Query<PivotQuery>,
) -> ApiResult<Json<PivotTable>> {
    let filter = DefectFilter::try_from(params)?;
    let spec = PivotSpec::try_from(pivot)?;
    Ok(Json(cached_pivot(&state, &filter, &spec).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pivot_query_defaults() {
        let spec = PivotSpec::try_from(PivotQuery::default()).unwrap();
        assert_eq!(spec, PivotSpec::default());
    }

    #[test]
    fn test_pivot_query_custom() {
        let spec = PivotSpec::try_from(PivotQuery {
            rows: Some("part_number,ref_base".to_string()),
            column: Some("outcome".to_string()),
            top_components: Some(0),
        })
        .unwrap();
        assert_eq!(spec.rows, vec![Dimension::PartNumber, Dimension::RefBase]);
        assert_eq!(spec.column, Dimension::Outcome);
        assert_eq!(spec.top_components, None);
    }

    #[test]
    fn test_pivot_query_unknown_dimension() {
        let result = PivotSpec::try_from(PivotQuery {
            column: Some("colour".to_string()),
            ..Default::default()
        });
        assert!(matches!(result, Err(ApiError::Common(_))));
    }
}
