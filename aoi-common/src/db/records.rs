//! Consolidated defect record reads
//!
//! Both the ingestion store (comparing against what is already persisted)
//! and the review service (filtered queries) decode `defect_records` rows
//! through [`record_from_row`].

use crate::model::{ConsolidatedDefectRecord, Descriptors, InspectionPass, OccurrenceKey, Outcome};
use crate::time::parse_timestamp;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

/// Column list matching [`record_from_row`]
pub const RECORD_COLUMNS: &str = "serial_number, ref_id, defect_code, outcome, \
    first_seen_loop, first_seen_at, last_seen_loop, last_seen_at, \
    pass_count, reworkable_count, overridden_count, false_call_count, \
    part_number, component_pn, machine_name, operation_name, line_name, \
    inspected_at, exported_at, ingestion_batch_id, updated_at";

/// Decode one `defect_records` row selected with [`RECORD_COLUMNS`]
pub fn record_from_row(row: &SqliteRow) -> Result<ConsolidatedDefectRecord> {
    let key = OccurrenceKey {
        serial_number: row.try_get("serial_number")?,
        ref_id: row.try_get("ref_id")?,
        defect_code: row.try_get("defect_code")?,
    };

    let outcome: String = row.try_get("outcome")?;
    let outcome: Outcome = outcome
        .parse()
        .map_err(|_| Error::Corrupt(format!("{}: unknown outcome '{}'", key, outcome)))?;

    let first_seen = decode_pass(row, &key, "first_seen_loop", "first_seen_at")?;
    let last_seen = decode_pass(row, &key, "last_seen_loop", "last_seen_at")?;

    let inspected_at: Option<String> = row.try_get("inspected_at")?;
    let inspected_at = inspected_at.as_deref().and_then(parse_timestamp);

    let exported_at: String = row.try_get("exported_at")?;
    let exported_at = parse_timestamp(&exported_at)
        .ok_or_else(|| Error::Corrupt(format!("{}: bad exported_at '{}'", key, exported_at)))?;

    let batch: String = row.try_get("ingestion_batch_id")?;
    let ingestion_batch_id = Uuid::parse_str(&batch)
        .map_err(|e| Error::Corrupt(format!("{}: bad batch id: {}", key, e)))?;

    let updated_at: String = row.try_get("updated_at")?;
    let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map_err(|e| Error::Corrupt(format!("{}: bad updated_at: {}", key, e)))?
        .with_timezone(&Utc);

    Ok(ConsolidatedDefectRecord {
        outcome,
        first_seen,
        last_seen,
        pass_count: count_column(row, "pass_count")?,
        reworkable_count: count_column(row, "reworkable_count")?,
        overridden_count: count_column(row, "overridden_count")?,
        false_call_count: count_column(row, "false_call_count")?,
        descriptors: Descriptors {
            part_number: row.try_get("part_number")?,
            component_pn: row.try_get("component_pn")?,
            machine_name: row.try_get("machine_name")?,
            operation_name: row.try_get("operation_name")?,
            line_name: row.try_get("line_name")?,
        },
        inspected_at,
        exported_at,
        ingestion_batch_id,
        updated_at,
        key,
    })
}

fn decode_pass(
    row: &SqliteRow,
    key: &OccurrenceKey,
    loop_column: &str,
    at_column: &str,
) -> Result<InspectionPass> {
    let loop_index: Option<i64> = row.try_get(loop_column)?;
    let at: Option<String> = row.try_get(at_column)?;
    InspectionPass::from_columns(loop_index, at.as_deref())
        .ok_or_else(|| Error::Corrupt(format!("{}: missing {} / {}", key, loop_column, at_column)))
}

fn count_column(row: &SqliteRow, column: &str) -> Result<u32> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value).map_err(|_| Error::Corrupt(format!("{} out of range: {}", column, value)))
}

/// Load the record for one occurrence key
pub async fn load_record<'e, E>(
    executor: E,
    key: &OccurrenceKey,
) -> Result<Option<ConsolidatedDefectRecord>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM defect_records WHERE serial_number = ? AND ref_id = ? AND defect_code = ?",
        RECORD_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(&key.serial_number)
        .bind(&key.ref_id)
        .bind(&key.defect_code)
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// Serial numbers bound per `IN (...)` statement; keeps every query well
/// under SQLite's bound-variable limit however many boards a file holds
pub const SERIAL_CHUNK_SIZE: usize = 500;

/// Load every record belonging to the given serial numbers, ordered by key
pub async fn load_records_for_serials(
    conn: &mut SqliteConnection,
    serials: &[String],
) -> Result<Vec<ConsolidatedDefectRecord>> {
    let mut records = Vec::new();
    for chunk in serials.chunks(SERIAL_CHUNK_SIZE) {
        let mut builder = sqlx::QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM defect_records WHERE serial_number IN (",
            RECORD_COLUMNS
        ));
        let mut separated = builder.separated(", ");
        for serial in chunk {
            separated.push_bind(serial);
        }
        separated.push_unseparated(")");

        let rows = builder.build().fetch_all(&mut *conn).await?;
        for row in &rows {
            records.push(record_from_row(row)?);
        }
    }

    records.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(records)
}

/// Count all consolidated records
pub async fn count_records<'e, E>(executor: E) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM defect_records")
        .fetch_one(executor)
        .await?;
    Ok(count)
}

/// Current store generation; changes whenever an export file is applied
pub async fn store_generation<'e, E>(executor: E) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let generation: Option<i64> =
        sqlx::query_scalar("SELECT value FROM store_meta WHERE key = 'generation'")
            .fetch_optional(executor)
            .await?;
    Ok(generation.unwrap_or(0))
}
