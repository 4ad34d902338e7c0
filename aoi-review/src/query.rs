//! Filtered reads of consolidated defect records
//!
//! [`DefectFilter`] renders to SQL conditions through `sqlx::QueryBuilder`;
//! every value is bound, never interpolated.

use aoi_common::db::{record_from_row, RECORD_COLUMNS};
use aoi_common::time::format_timestamp;
use aoi_common::{ConsolidatedDefectRecord, OccurrenceKey, Outcome, Result};
use chrono::{Days, NaiveDate};
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::pagination::{Pagination, PAGE_SIZE};

/// Restriction on defect records; an empty dimension does not restrict
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DefectFilter {
    pub outcomes: Vec<Outcome>,
    pub serial_numbers: Vec<String>,
    pub ref_ids: Vec<String>,
    pub defect_codes: Vec<String>,
    pub part_numbers: Vec<String>,
    pub component_pns: Vec<String>,
    pub machines: Vec<String>,
    pub operations: Vec<String>,
    pub lines: Vec<String>,
    /// Inclusive export date range
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DefectFilter {
    /// Filter matching exactly one occurrence key
    pub fn for_key(key: &OccurrenceKey) -> Self {
        Self {
            serial_numbers: vec![key.serial_number.clone()],
            ref_ids: vec![key.ref_id.clone()],
            defect_codes: vec![key.defect_code.clone()],
            ..Default::default()
        }
    }

    /// Append ` AND ...` conditions; the builder must already hold a
    /// `WHERE` clause (e.g. `WHERE 1=1`)
    pub fn push_conditions(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        let outcomes: Vec<String> = self.outcomes.iter().map(|o| o.as_str().to_string()).collect();
        push_in(builder, "outcome", &outcomes);
        push_in(builder, "serial_number", &self.serial_numbers);
        push_in(builder, "ref_id", &self.ref_ids);
        push_in(builder, "defect_code", &self.defect_codes);
        push_in(builder, "part_number", &self.part_numbers);
        push_in(builder, "component_pn", &self.component_pns);
        push_in(builder, "machine_name", &self.machines);
        push_in(builder, "operation_name", &self.operations);
        push_in(builder, "line_name", &self.lines);

        if let Some(from) = self.from.and_then(|d| d.and_hms_opt(0, 0, 0)) {
            builder
                .push(" AND exported_at >= ")
                .push_bind(format_timestamp(&from));
        }
        if let Some(end) = self
            .to
            .and_then(|d| d.checked_add_days(Days::new(1)))
            .and_then(|d| d.and_hms_opt(0, 0, 0))
        {
            builder
                .push(" AND exported_at < ")
                .push_bind(format_timestamp(&end));
        }
    }
}

pub(crate) fn push_in(builder: &mut QueryBuilder<'_, Sqlite>, column: &str, values: &[String]) {
    if values.is_empty() {
        return;
    }
    builder.push(" AND ").push(column).push(" IN (");
    let mut separated = builder.separated(", ");
    for value in values {
        separated.push_bind(value.clone());
    }
    separated.push_unseparated(")");
}

/// One page of filtered records
#[derive(Debug, Clone, Serialize)]
pub struct RecordPage {
    pub total_results: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub records: Vec<ConsolidatedDefectRecord>,
}

pub async fn count_records(db: &SqlitePool, filter: &DefectFilter) -> Result<i64> {
    let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM defect_records WHERE 1=1");
    filter.push_conditions(&mut builder);
    let count: i64 = builder.build_query_scalar().fetch_one(db).await?;
    Ok(count)
}

/// Filtered records ordered by occurrence key, one page at a time
pub async fn fetch_records(
    db: &SqlitePool,
    filter: &DefectFilter,
    requested_page: i64,
) -> Result<RecordPage> {
    let total_results = count_records(db, filter).await?;
    let p = Pagination::new(total_results, requested_page);

    let records = select_records(db, filter, Some((PAGE_SIZE, p.offset))).await?;

    Ok(RecordPage {
        total_results,
        page: p.page,
        page_size: PAGE_SIZE,
        total_pages: p.total_pages,
        records,
    })
}

/// Every filtered record (exports)
pub async fn fetch_all_records(
    db: &SqlitePool,
    filter: &DefectFilter,
) -> Result<Vec<ConsolidatedDefectRecord>> {
    select_records(db, filter, None).await
}

/// The record for one occurrence key, looked up through the filter path
pub async fn find_by_key(
    db: &SqlitePool,
    key: &OccurrenceKey,
) -> Result<Option<ConsolidatedDefectRecord>> {
    let records = select_records(db, &DefectFilter::for_key(key), Some((2, 0))).await?;
    if records.len() > 1 {
        return Err(aoi_common::Error::Corrupt(format!(
            "{} matches more than one record",
            key
        )));
    }
    Ok(records.into_iter().next())
}

async fn select_records(
    db: &SqlitePool,
    filter: &DefectFilter,
    limit: Option<(i64, i64)>,
) -> Result<Vec<ConsolidatedDefectRecord>> {
    let mut builder = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {} FROM defect_records WHERE 1=1",
        RECORD_COLUMNS
    ));
    filter.push_conditions(&mut builder);
    builder.push(" ORDER BY serial_number, ref_id, defect_code");
    if let Some((limit, offset)) = limit {
        builder
            .push(" LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
    }

    let rows = builder.build().fetch_all(db).await?;
    rows.iter().map(record_from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_adds_nothing() {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT 1 FROM defect_records WHERE 1=1");
        DefectFilter::default().push_conditions(&mut builder);
        assert_eq!(builder.sql(), "SELECT 1 FROM defect_records WHERE 1=1");
    }

    #[test]
    fn test_conditions_are_bound() {
        let filter = DefectFilter {
            outcomes: vec![Outcome::Real, Outcome::Suspect],
            ref_ids: vec!["C100".to_string()],
            from: NaiveDate::from_ymd_opt(2025, 7, 1),
            to: NaiveDate::from_ymd_opt(2025, 7, 31),
            ..Default::default()
        };
        let mut builder = QueryBuilder::<Sqlite>::new("WHERE 1=1");
        filter.push_conditions(&mut builder);
        assert_eq!(
            builder.sql(),
            "WHERE 1=1 AND outcome IN (?, ?) AND ref_id IN (?) AND exported_at >= ? AND exported_at < ?"
        );
    }

    #[test]
    fn test_for_key_restricts_all_key_columns() {
        let filter = DefectFilter::for_key(&OccurrenceKey::new("SN1", "R205.1", ""));
        assert_eq!(filter.serial_numbers, vec!["SN1"]);
        assert_eq!(filter.ref_ids, vec!["R205.1"]);
        assert_eq!(filter.defect_codes, vec![""]);
        assert!(filter.outcomes.is_empty());
    }
}
