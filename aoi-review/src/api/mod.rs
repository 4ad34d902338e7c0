//! HTTP API handlers for aoi-review

pub mod defects;
pub mod export;
pub mod health;
pub mod ingest;
pub mod issues;
pub mod summary;

use aoi_common::Outcome;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::query::DefectFilter;

pub use defects::{get_defect, list_defects};
pub use export::{export_defects, export_pivot};
pub use health::health_routes;
pub use ingest::trigger_ingest;
pub use issues::{create_issue, get_issue, issue_changelog, list_issues, update_issue};
pub use summary::{outcome_summary, pivot_summary, top_components, top_refs};

/// Filter query parameters shared by listing, summary and export routes
///
/// List-valued parameters are comma-separated (`outcome=Real,Suspect`).
#[derive(Debug, Default, Deserialize)]
pub struct FilterParams {
    pub outcome: Option<String>,
    pub serial: Option<String>,
    pub ref_id: Option<String>,
    pub defect_code: Option<String>,
    pub part_number: Option<String>,
    pub component_pn: Option<String>,
    pub machine: Option<String>,
    pub operation: Option<String>,
    pub line: Option<String>,
    /// Inclusive start date, `YYYY-MM-DD`
    pub from: Option<String>,
    /// Inclusive end date, `YYYY-MM-DD`
    pub to: Option<String>,
}

impl TryFrom<FilterParams> for DefectFilter {
    type Error = ApiError;

    fn try_from(params: FilterParams) -> ApiResult<Self> {
        let outcomes = split_list(params.outcome.as_deref())
            .iter()
            .map(|s| s.parse::<Outcome>())
            .collect::<Result<Vec<_>, _>>()?;

        let from = parse_date("from", params.from.as_deref())?;
        let to = parse_date("to", params.to.as_deref())?;
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(ApiError::BadRequest(format!(
                    "'from' ({}) is after 'to' ({})",
                    from, to
                )));
            }
        }

        Ok(DefectFilter {
            outcomes,
            serial_numbers: split_list(params.serial.as_deref()),
            ref_ids: split_list(params.ref_id.as_deref()),
            defect_codes: split_list(params.defect_code.as_deref()),
            part_numbers: split_list(params.part_number.as_deref()),
            component_pns: split_list(params.component_pn.as_deref()),
            machines: split_list(params.machine.as_deref()),
            operations: split_list(params.operation.as_deref()),
            lines: split_list(params.line.as_deref()),
            from,
            to,
        })
    }
}

pub(crate) fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

pub(crate) fn parse_date(name: &str, raw: Option<&str>) -> ApiResult<Option<NaiveDate>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("'{}' must be YYYY-MM-DD, got '{}'", name, s))),
    }
}
