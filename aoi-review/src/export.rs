//! Tabular exports of records and pivots
//!
//! TSV output escapes nothing: tabs and line breaks inside cells are replaced
//! with spaces so every record stays on one line.

use aoi_common::time::format_timestamp;
use aoi_common::ConsolidatedDefectRecord;
use serde::Deserialize;

use crate::aggregate::PivotTable;

/// Download format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Tsv,
    Json,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Tsv => "text/tab-separated-values; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Tsv => "tsv",
            ExportFormat::Json => "json",
        }
    }
}

const RECORD_HEADER: [&str; 19] = [
    "SerialNumber",
    "Ref_Id",
    "DefectCode",
    "Outcome",
    "FirstSeen",
    "LastSeen",
    "PassCount",
    "ReworkableCount",
    "OverriddenCount",
    "FalseCallCount",
    "PartNumber",
    "ComponentPN",
    "MachineName",
    "OperationName",
    "LineName",
    "InspectedAt",
    "ExportedAt",
    "IngestionBatchId",
    "UpdatedAt",
];

/// Records as tab-separated text with a header line
pub fn records_to_tsv(records: &[ConsolidatedDefectRecord]) -> String {
    let mut out = String::new();
    push_line(&mut out, RECORD_HEADER.iter().map(|h| h.to_string()));

    for r in records {
        let optional = |v: &Option<String>| v.clone().unwrap_or_default();
        push_line(
            &mut out,
            [
                r.key.serial_number.clone(),
                r.key.ref_id.clone(),
                r.key.defect_code.clone(),
                r.outcome.to_string(),
                r.first_seen.to_string(),
                r.last_seen.to_string(),
                r.pass_count.to_string(),
                r.reworkable_count.to_string(),
                r.overridden_count.to_string(),
                r.false_call_count.to_string(),
                optional(&r.descriptors.part_number),
                optional(&r.descriptors.component_pn),
                optional(&r.descriptors.machine_name),
                optional(&r.descriptors.operation_name),
                optional(&r.descriptors.line_name),
                r.inspected_at.as_ref().map(format_timestamp).unwrap_or_default(),
                format_timestamp(&r.exported_at),
                r.ingestion_batch_id.to_string(),
                r.updated_at.to_rfc3339(),
            ],
        );
    }
    out
}

/// Pivot as tab-separated text: row dimension headers, then one column per
/// pivot column value
pub fn pivot_to_tsv(table: &PivotTable) -> String {
    let mut out = String::new();
    push_line(
        &mut out,
        table
            .row_dimensions
            .iter()
            .map(|d| d.to_string())
            .chain(table.columns.iter().cloned()),
    );
    for row in &table.rows {
        push_line(
            &mut out,
            row.keys
                .iter()
                .cloned()
                .chain(row.counts.iter().map(|c| c.to_string())),
        );
    }
    out
}

fn push_line(out: &mut String, cells: impl IntoIterator<Item = String>) {
    let line: Vec<String> = cells.into_iter().map(|c| clean_cell(&c)).collect();
    out.push_str(&line.join("\t"));
    out.push('\n');
}

fn clean_cell(cell: &str) -> String {
    cell.replace(|c: char| matches!(c, '\t' | '\r' | '\n'), " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{Dimension, PivotRow};
    use aoi_common::{Descriptors, InspectionPass, OccurrenceKey, Outcome};
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    #[test]
    fn test_records_tsv_shape() {
        let exported_at = NaiveDate::from_ymd_opt(2025, 7, 26)
            .unwrap()
            .and_hms_opt(15, 10, 30)
            .unwrap();
        let record = ConsolidatedDefectRecord {
            key: OccurrenceKey::new("SN1", "C100", "Missing"),
            outcome: Outcome::FixedFromPreviouslyCaught,
            first_seen: InspectionPass::Loop(1),
            last_seen: InspectionPass::Loop(1),
            pass_count: 1,
            reworkable_count: 1,
            overridden_count: 0,
            false_call_count: 0,
            descriptors: Descriptors {
                part_number: Some("PCB\t100".to_string()),
                ..Default::default()
            },
            inspected_at: None,
            exported_at,
            ingestion_batch_id: Uuid::nil(),
            updated_at: Utc::now(),
        };

        let tsv = records_to_tsv(&[record]);
        let lines: Vec<&str> = tsv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("SerialNumber\tRef_Id\tDefectCode\tOutcome"));

        let cells: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(cells.len(), RECORD_HEADER.len());
        assert_eq!(cells[3], "Fixed from previously caught");
        assert_eq!(cells[4], "loop 1");
        assert_eq!(cells[10], "PCB 100");
        assert_eq!(cells[16], "2025-07-26 15:10:30.000");
    }

    #[test]
    fn test_pivot_tsv() {
        let table = PivotTable {
            row_dimensions: vec![Dimension::ComponentPn, Dimension::RefBase],
            column_dimension: Dimension::DefectCode,
            columns: vec!["Missing".to_string(), "Tombstone".to_string()],
            rows: vec![PivotRow {
                keys: vec!["CAP-0402".to_string(), "C100".to_string()],
                counts: vec![3, 0],
            }],
        };
        assert_eq!(
            pivot_to_tsv(&table),
            "component_pn\tref_base\tMissing\tTombstone\nCAP-0402\tC100\t3\t0\n"
        );
    }
}
