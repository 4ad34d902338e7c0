//! Row normalization
//!
//! The schema boundary between loosely typed export rows and the defect
//! model. Only presence checks and type coercion happen here; column names
//! are matched exactly so renamed columns fail fast instead of flowing
//! downstream as blanks.

use aoi_common::time::parse_timestamp;
use aoi_common::{DefectObservation, Descriptors, InspectionPass, OccurrenceKey, Origin, ReworkStatus};
use serde_json::Value;

use crate::error::RowError;

/// One export row: column name to cell value
pub type RawRow = serde_json::Map<String, Value>;

/// Export column names
pub mod columns {
    pub const SERIAL_NUMBER: &str = "SerialNumber";
    pub const REF_ID: &str = "Ref_Id";
    pub const DEFECT_CODE: &str = "DefectCode";
    pub const REWORK_STATUS: &str = "ReworkStatus";
    pub const LOOP: &str = "Loop";
    pub const EVENT_DATE: &str = "EventDate";
    pub const PART_NUMBER: &str = "PartNumber";
    pub const COMPONENT_PN: &str = "ComponentPN";
    pub const MACHINE_NAME: &str = "MachineName";
    pub const OPERATION_NAME: &str = "OperationName";
    pub const LINE_NAME: &str = "LineName";
}

/// Validate and coerce one raw row
pub fn normalize(raw: &RawRow, origin: Origin) -> Result<DefectObservation, RowError> {
    let serial_number = required_text(raw, columns::SERIAL_NUMBER)?;
    let ref_id = required_text(raw, columns::REF_ID)?;

    // Blank defect codes are a valid (empty) part of the key; a missing
    // column is schema drift.
    if !raw.contains_key(columns::DEFECT_CODE) {
        return Err(missing(columns::DEFECT_CODE));
    }
    let defect_code = cell_text(raw, columns::DEFECT_CODE).unwrap_or_default();

    let status_text = required_text(raw, columns::REWORK_STATUS)?;
    let rework_status =
        ReworkStatus::from_raw(&status_text).ok_or_else(|| RowError::InvalidEnum {
            field: columns::REWORK_STATUS.to_string(),
            value: status_text.clone(),
        })?;

    let loop_index = loop_cell(raw)?;
    let inspected_at = timestamp_cell(raw)?;
    let pass = match (loop_index, inspected_at) {
        (Some(n), _) => InspectionPass::Loop(n),
        (None, Some(ts)) => InspectionPass::At(ts),
        (None, None) => {
            return Err(missing(&format!(
                "{} or {}",
                columns::LOOP,
                columns::EVENT_DATE
            )))
        }
    };

    Ok(DefectObservation {
        key: OccurrenceKey {
            serial_number,
            ref_id,
            defect_code,
        },
        rework_status,
        pass,
        inspected_at,
        descriptors: Descriptors {
            part_number: cell_text(raw, columns::PART_NUMBER),
            component_pn: cell_text(raw, columns::COMPONENT_PN),
            machine_name: cell_text(raw, columns::MACHINE_NAME),
            operation_name: cell_text(raw, columns::OPERATION_NAME),
            line_name: cell_text(raw, columns::LINE_NAME),
        },
        origin,
    })
}

fn missing(field: &str) -> RowError {
    RowError::MissingField {
        field: field.to_string(),
    }
}

fn required_text(raw: &RawRow, column: &str) -> Result<String, RowError> {
    cell_text(raw, column).ok_or_else(|| missing(column))
}

/// Cell as trimmed text; `None` when absent, null, or blank
fn cell_text(raw: &RawRow, column: &str) -> Option<String> {
    let text = match raw.get(column)? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn loop_cell(raw: &RawRow) -> Result<Option<u32>, RowError> {
    let invalid = |value: &Value, reason: &str| RowError::InvalidValue {
        field: columns::LOOP.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let Some(value) = raw.get(columns::LOOP) else {
        return Ok(None);
    };

    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<u32>() {
                return Ok(Some(n));
            }
            match s.parse::<f64>() {
                Ok(f) => integral_loop(f).map(Some).ok_or_else(|| invalid(value, "not a whole loop number")),
                Err(_) => Err(invalid(value, "not a number")),
            }
        }
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                return u32::try_from(u)
                    .map(Some)
                    .map_err(|_| invalid(value, "loop number too large"));
            }
            n.as_f64()
                .and_then(integral_loop)
                .map(Some)
                .ok_or_else(|| invalid(value, "not a whole loop number"))
        }
        _ => Err(invalid(value, "not a number")),
    }
}

/// Spreadsheet tools often write whole numbers as `2.0`
fn integral_loop(f: f64) -> Option<u32> {
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64 {
        Some(f as u32)
    } else {
        None
    }
}

fn timestamp_cell(raw: &RawRow) -> Result<Option<chrono::NaiveDateTime>, RowError> {
    let Some(value) = raw.get(columns::EVENT_DATE) else {
        return Ok(None);
    };

    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => parse_timestamp(s)
            .map(Some)
            .ok_or_else(|| RowError::InvalidValue {
                field: columns::EVENT_DATE.to_string(),
                value: s.clone(),
                reason: "unrecognized date/time layout".to_string(),
            }),
        other => Err(RowError::InvalidValue {
            field: columns::EVENT_DATE.to_string(),
            value: other.to_string(),
            reason: "expected a date/time string".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn origin() -> Origin {
        Origin {
            content_hash: "abc".to_string(),
            file_name: "Defect RawData - 2025-07-26.json".to_string(),
            exported_at: NaiveDate::from_ymd_opt(2025, 7, 26)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            row: 0,
        }
    }

    fn row(value: Value) -> RawRow {
        match value {
            Value::Object(map) => map,
            _ => panic!("test rows must be objects"),
        }
    }

    fn full_row() -> RawRow {
        row(json!({
            "SerialNumber": "SN001",
            "Ref_Id": "C100",
            "DefectCode": "Missing",
            "ReworkStatus": "Reworkable",
            "Loop": 1,
            "PartNumber": "PCBA-01",
            "ComponentPN": "CAP-0603",
            "MachineName": "AOI-3",
            "OperationName": "SMT Top",
            "LineName": "Line 3"
        }))
    }

    #[test]
    fn test_complete_row_normalizes() {
        let obs = normalize(&full_row(), origin()).unwrap();
        assert_eq!(obs.key, OccurrenceKey::new("SN001", "C100", "Missing"));
        assert_eq!(obs.rework_status, ReworkStatus::Reworkable);
        assert_eq!(obs.pass, InspectionPass::Loop(1));
        assert_eq!(obs.inspected_at, None);
        assert_eq!(obs.descriptors.part_number.as_deref(), Some("PCBA-01"));
        assert_eq!(obs.descriptors.component_pn.as_deref(), Some("CAP-0603"));
        assert_eq!(obs.descriptors.machine_name.as_deref(), Some("AOI-3"));
        assert_eq!(obs.descriptors.operation_name.as_deref(), Some("SMT Top"));
        assert_eq!(obs.descriptors.line_name.as_deref(), Some("Line 3"));
    }

    #[test]
    fn test_missing_serial_number_rejected() {
        let mut raw = full_row();
        raw.remove("SerialNumber");
        assert_eq!(
            normalize(&raw, origin()),
            Err(RowError::MissingField {
                field: "SerialNumber".to_string()
            })
        );
    }

    #[test]
    fn test_blank_ref_id_rejected() {
        let mut raw = full_row();
        raw.insert("Ref_Id".to_string(), json!("   "));
        let err = normalize(&raw, origin()).unwrap_err();
        assert_eq!(err.kind(), "missing_field");
    }

    #[test]
    fn test_null_rework_status_rejected() {
        let mut raw = full_row();
        raw.insert("ReworkStatus".to_string(), Value::Null);
        assert!(matches!(
            normalize(&raw, origin()),
            Err(RowError::MissingField { field }) if field == "ReworkStatus"
        ));
    }

    #[test]
    fn test_unknown_rework_status_not_defaulted() {
        let mut raw = full_row();
        raw.insert("ReworkStatus".to_string(), json!("Pending"));
        assert_eq!(
            normalize(&raw, origin()),
            Err(RowError::InvalidEnum {
                field: "ReworkStatus".to_string(),
                value: "Pending".to_string()
            })
        );
    }

    #[test]
    fn test_false_call_text_recognized() {
        let mut raw = full_row();
        raw.insert("ReworkStatus".to_string(), json!(" False call "));
        let obs = normalize(&raw, origin()).unwrap();
        assert_eq!(obs.rework_status, ReworkStatus::FalseCall);
    }

    #[test]
    fn test_numeric_serial_coerced_to_text() {
        let mut raw = full_row();
        raw.insert("SerialNumber".to_string(), json!(100234));
        let obs = normalize(&raw, origin()).unwrap();
        assert_eq!(obs.key.serial_number, "100234");
    }

    #[test]
    fn test_blank_defect_code_is_empty_key_part() {
        let mut raw = full_row();
        raw.insert("DefectCode".to_string(), Value::Null);
        let obs = normalize(&raw, origin()).unwrap();
        assert_eq!(obs.key.defect_code, "");
    }

    #[test]
    fn test_missing_defect_code_column_is_schema_drift() {
        let mut raw = full_row();
        raw.remove("DefectCode");
        raw.insert("Defect_Code".to_string(), json!("Missing"));
        assert!(matches!(
            normalize(&raw, origin()),
            Err(RowError::MissingField { field }) if field == "DefectCode"
        ));
    }

    #[test]
    fn test_loop_coercions() {
        for (cell, expected) in [(json!(2), 2), (json!("3"), 3), (json!(4.0), 4), (json!(" 5.0 "), 5)] {
            let mut raw = full_row();
            raw.insert("Loop".to_string(), cell);
            let obs = normalize(&raw, origin()).unwrap();
            assert_eq!(obs.pass, InspectionPass::Loop(expected));
        }
    }

    #[test]
    fn test_bad_loop_values_rejected() {
        for cell in [json!(1.5), json!(-1), json!("two"), json!([1])] {
            let mut raw = full_row();
            raw.insert("Loop".to_string(), cell);
            let err = normalize(&raw, origin()).unwrap_err();
            assert_eq!(err.kind(), "invalid_value");
        }
    }

    #[test]
    fn test_event_date_used_when_no_loop() {
        let mut raw = full_row();
        raw.remove("Loop");
        raw.insert("EventDate".to_string(), json!("2025-07-26 15:10:30"));
        let obs = normalize(&raw, origin()).unwrap();
        let expected = NaiveDate::from_ymd_opt(2025, 7, 26)
            .unwrap()
            .and_hms_opt(15, 10, 30)
            .unwrap();
        assert_eq!(obs.pass, InspectionPass::At(expected));
        assert_eq!(obs.inspected_at, Some(expected));
    }

    #[test]
    fn test_loop_wins_over_event_date_but_timestamp_kept() {
        let mut raw = full_row();
        raw.insert("EventDate".to_string(), json!("2025-07-26 15:10:30"));
        let obs = normalize(&raw, origin()).unwrap();
        assert_eq!(obs.pass, InspectionPass::Loop(1));
        assert!(obs.inspected_at.is_some());
    }

    #[test]
    fn test_missing_ordering_key_rejected() {
        let mut raw = full_row();
        raw.remove("Loop");
        let err = normalize(&raw, origin()).unwrap_err();
        assert_eq!(
            err,
            RowError::MissingField {
                field: "Loop or EventDate".to_string()
            }
        );
    }

    #[test]
    fn test_unparseable_event_date_rejected() {
        let mut raw = full_row();
        raw.remove("Loop");
        raw.insert("EventDate".to_string(), json!("last tuesday"));
        assert_eq!(normalize(&raw, origin()).unwrap_err().kind(), "invalid_value");

        raw.insert("EventDate".to_string(), json!(1_753_542_630_000_i64));
        assert_eq!(normalize(&raw, origin()).unwrap_err().kind(), "invalid_value");
    }

    #[test]
    fn test_blank_optional_descriptors_become_none() {
        let mut raw = full_row();
        raw.insert("MachineName".to_string(), json!(""));
        raw.remove("LineName");
        let obs = normalize(&raw, origin()).unwrap();
        assert_eq!(obs.descriptors.machine_name, None);
        assert_eq!(obs.descriptors.line_name, None);
    }
}
