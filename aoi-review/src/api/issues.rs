//! Issue ledger routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use super::{parse_date, split_list};
use crate::error::{ApiError, ApiResult};
use crate::issues::{
    self as ledger, Issue, IssueCategory, IssueChange, IssueFilter, IssuePatch, IssueStatus,
    NewIssue, DEFAULT_CHANGED_BY,
};
use crate::AppState;

/// Comma-separated list filters, like the defect routes
#[derive(Debug, Default, Deserialize)]
pub struct IssueParams {
    pub from: Option<String>,
    pub to: Option<String>,
    pub line: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
}

impl TryFrom<IssueParams> for IssueFilter {
    type Error = ApiError;

    fn try_from(params: IssueParams) -> ApiResult<Self> {
        let categories = split_list(params.category.as_deref())
            .iter()
            .map(|s| s.parse::<IssueCategory>())
            .collect::<Result<Vec<_>, _>>()?;
        let statuses = split_list(params.status.as_deref())
            .iter()
            .map(|s| s.parse::<IssueStatus>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(IssueFilter {
            from: parse_date("from", params.from.as_deref())?,
            to: parse_date("to", params.to.as_deref())?,
            lines: split_list(params.line.as_deref()),
            categories,
            statuses,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct IssueUpdate {
    #[serde(flatten)]
    pub patch: IssuePatch,
    pub changed_by: Option<String>,
}

/// GET /api/issues
pub async fn list_issues(
    State(state): State<AppState>,
    Query(params): Query<IssueParams>,
) -> ApiResult<Json<Vec<Issue>>> {
    let filter = IssueFilter::try_from(params)?;
    Ok(Json(ledger::list_issues(&state.db, &filter).await?))
}

/// POST /api/issues
pub async fn create_issue(
    State(state): State<AppState>,
    Json(new): Json<NewIssue>,
) -> ApiResult<(StatusCode, Json<Issue>)> {
    let issue = ledger::create_issue(&state.db, &new).await?;
    Ok((StatusCode::CREATED, Json(issue)))
}

/// GET /api/issues/:id
pub async fn get_issue(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Issue>> {
    Ok(Json(ledger::get_issue(&state.db, id).await?))
}

/// PATCH /api/issues/:id
pub async fn update_issue(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<IssueUpdate>,
) -> ApiResult<Json<Issue>> {
    let changed_by = update
        .changed_by
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_CHANGED_BY);
    Ok(Json(
        ledger::update_issue(&state.db, id, &update.patch, changed_by).await?,
    ))
}

/// GET /api/issues/:id/changelog
pub async fn issue_changelog(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<IssueChange>>> {
    Ok(Json(ledger::issue_changelog(&state.db, id).await?))
}
