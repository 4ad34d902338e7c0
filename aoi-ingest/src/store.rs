//! Ingestion store
//!
//! Persists observations and consolidated records. Every applied export file
//! is one transaction: ledger row, observations, re-consolidated records for
//! each serial number in the file, and the store generation bump.

use std::collections::{BTreeSet, HashMap};

use aoi_common::db::{load_records_for_serials, store_generation, SERIAL_CHUNK_SIZE};
use aoi_common::time::{format_timestamp, parse_timestamp};
use aoi_common::{
    ConsolidatedDefectRecord, DefectObservation, Descriptors, Error, InspectionPass,
    OccurrenceKey, Origin, ReworkStatus,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::consolidate::{Consolidator, PassTie};
use crate::error::{IngestError, IngestResult};
use crate::source::ExportFile;

/// Result of applying one export file
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied(AppliedFile),
    /// Another run recorded the same content hash first
    AlreadyIngested,
}

/// Record-level changes made by one applied file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppliedFile {
    pub records_inserted: usize,
    pub records_updated: usize,
    pub records_unchanged: usize,
    /// Same-pass ties involving this file's rows
    pub ties: Vec<PassTie>,
}

/// SQLite-backed store for observations and consolidated records
#[derive(Clone)]
pub struct IngestionStore {
    db: SqlitePool,
}

impl IngestionStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Whether a file with this content hash was already applied
    pub async fn is_ingested(&self, content_hash: &str) -> aoi_common::Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM source_files WHERE content_hash = ?")
                .bind(content_hash)
                .fetch_optional(&self.db)
                .await?;
        Ok(found.is_some())
    }

    /// Latest export timestamp among stored observations of these boards
    pub async fn latest_export_for_serials(
        &self,
        serials: &[String],
    ) -> aoi_common::Result<Option<NaiveDateTime>> {
        let mut latest: Option<NaiveDateTime> = None;
        for chunk in serials.chunks(SERIAL_CHUNK_SIZE) {
            let mut builder = sqlx::QueryBuilder::<Sqlite>::new(
                "SELECT MAX(exported_at) FROM observations WHERE serial_number IN (",
            );
            let mut separated = builder.separated(", ");
            for serial in chunk {
                separated.push_bind(serial);
            }
            separated.push_unseparated(")");

            let max: Option<String> = builder
                .build_query_scalar()
                .fetch_one(&self.db)
                .await?;

            if let Some(text) = max {
                let ts = parse_timestamp(&text).ok_or_else(|| {
                    Error::Corrupt(format!("bad observation exported_at '{}'", text))
                })?;
                latest = latest.max(Some(ts));
            }
        }
        Ok(latest)
    }

    /// Full stored observation history for these boards
    pub async fn load_observations_for_serials(
        &self,
        serials: &[String],
    ) -> aoi_common::Result<Vec<DefectObservation>> {
        let mut conn = self.db.acquire().await?;
        load_observations(&mut conn, serials).await
    }

    pub async fn load_record(
        &self,
        key: &OccurrenceKey,
    ) -> aoi_common::Result<Option<ConsolidatedDefectRecord>> {
        aoi_common::db::load_record(&self.db, key).await
    }

    /// Insert or replace one consolidated record
    ///
    /// Bumps the store generation in the same transaction, so cached
    /// aggregates never outlive the write.
    pub async fn upsert(&self, record: &ConsolidatedDefectRecord) -> aoi_common::Result<()> {
        let mut tx = self.db.begin().await?;
        upsert_record(&mut *tx, record).await?;
        bump_generation(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn generation(&self) -> aoi_common::Result<i64> {
        store_generation(&self.db).await
    }

    /// Apply one export file atomically
    ///
    /// `observations` are the file's accepted rows; `rejected_rows` is
    /// recorded in the ledger for reference. Any storage failure rolls the
    /// whole file back and surfaces as [`IngestError::StorageWrite`].
    pub async fn apply_file(
        &self,
        file: &ExportFile,
        observations: &[DefectObservation],
        rejected_rows: usize,
        consolidator: &Consolidator,
        batch_id: Uuid,
    ) -> IngestResult<ApplyOutcome> {
        self.apply_file_tx(file, observations, rejected_rows, consolidator, batch_id)
            .await
            .map_err(|source| IngestError::StorageWrite {
                file: file.file_name.clone(),
                source,
            })
    }

    async fn apply_file_tx(
        &self,
        file: &ExportFile,
        observations: &[DefectObservation],
        rejected_rows: usize,
        consolidator: &Consolidator,
        batch_id: Uuid,
    ) -> aoi_common::Result<ApplyOutcome> {
        let now = aoi_common::time::now();
        let mut tx = self.db.begin().await?;

        let ledger = sqlx::query(
            r#"
            INSERT OR IGNORE INTO source_files (
                content_hash, file_name, exported_at, accepted_rows, rejected_rows,
                ingestion_batch_id, ingested_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.content_hash)
        .bind(&file.file_name)
        .bind(format_timestamp(&file.exported_at))
        .bind(observations.len() as i64)
        .bind(rejected_rows as i64)
        .bind(batch_id.to_string())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        if ledger.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(ApplyOutcome::AlreadyIngested);
        }

        for obs in observations {
            insert_observation(&mut *tx, obs).await?;
        }

        let serials: Vec<String> = observations
            .iter()
            .map(|o| o.key.serial_number.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let history = load_observations(&mut *tx, &serials).await?;
        let existing: HashMap<OccurrenceKey, ConsolidatedDefectRecord> =
            load_records_for_serials(&mut *tx, &serials)
                .await?
                .into_iter()
                .map(|r| (r.key.clone(), r))
                .collect();

        let consolidation = consolidator.consolidate(&history, batch_id, now);

        let mut applied = AppliedFile::default();
        for record in &consolidation.records {
            match existing.get(&record.key) {
                Some(stored) if stored.same_resolution(record) => {
                    applied.records_unchanged += 1;
                    continue;
                }
                Some(stored) => {
                    debug!(
                        key = %record.key,
                        from = %stored.outcome,
                        to = %record.outcome,
                        "Outcome re-resolved"
                    );
                    applied.records_updated += 1;
                }
                None => applied.records_inserted += 1,
            }
            upsert_record(&mut *tx, record).await?;
        }

        applied.ties = consolidation
            .ties
            .into_iter()
            .filter(|tie| {
                tie.kept.content_hash == file.content_hash
                    || tie.dropped.content_hash == file.content_hash
            })
            .collect();

        bump_generation(&mut *tx).await?;
        tx.commit().await?;

        info!(
            file = %file.file_name,
            serials = serials.len(),
            inserted = applied.records_inserted,
            updated = applied.records_updated,
            unchanged = applied.records_unchanged,
            "Applied export file"
        );

        Ok(ApplyOutcome::Applied(applied))
    }
}

async fn bump_generation<'e, E>(executor: E) -> aoi_common::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE store_meta SET value = value + 1 WHERE key = 'generation'")
        .execute(executor)
        .await?;
    Ok(())
}

async fn insert_observation<'e, E>(executor: E, obs: &DefectObservation) -> aoi_common::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO observations (
            content_hash, row_index, file_name, exported_at,
            serial_number, ref_id, defect_code, rework_status,
            loop_index, inspected_at,
            part_number, component_pn, machine_name, operation_name, line_name
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&obs.origin.content_hash)
    .bind(i64::from(obs.origin.row))
    .bind(&obs.origin.file_name)
    .bind(format_timestamp(&obs.origin.exported_at))
    .bind(&obs.key.serial_number)
    .bind(&obs.key.ref_id)
    .bind(&obs.key.defect_code)
    .bind(obs.rework_status.as_str())
    .bind(obs.pass.loop_index().map(i64::from))
    .bind(obs.inspected_at.as_ref().map(format_timestamp))
    .bind(&obs.descriptors.part_number)
    .bind(&obs.descriptors.component_pn)
    .bind(&obs.descriptors.machine_name)
    .bind(&obs.descriptors.operation_name)
    .bind(&obs.descriptors.line_name)
    .execute(executor)
    .await?;

    Ok(())
}

/// Load stored observations for the given boards, in processing order
pub async fn load_observations(
    conn: &mut SqliteConnection,
    serials: &[String],
) -> aoi_common::Result<Vec<DefectObservation>> {
    let mut observations = Vec::new();
    for chunk in serials.chunks(SERIAL_CHUNK_SIZE) {
        let mut builder = sqlx::QueryBuilder::<Sqlite>::new(
            "SELECT content_hash, row_index, file_name, exported_at, \
             serial_number, ref_id, defect_code, rework_status, loop_index, inspected_at, \
             part_number, component_pn, machine_name, operation_name, line_name \
             FROM observations WHERE serial_number IN (",
        );
        let mut separated = builder.separated(", ");
        for serial in chunk {
            separated.push_bind(serial);
        }
        separated.push_unseparated(")");

        let rows = builder.build().fetch_all(&mut *conn).await?;
        for row in &rows {
            observations.push(observation_from_row(row)?);
        }
    }

    observations.sort_by(|a, b| a.origin.sort_key().cmp(&b.origin.sort_key()));
    Ok(observations)
}

fn observation_from_row(row: &SqliteRow) -> aoi_common::Result<DefectObservation> {
    let key = OccurrenceKey {
        serial_number: row.try_get("serial_number")?,
        ref_id: row.try_get("ref_id")?,
        defect_code: row.try_get("defect_code")?,
    };

    let status: String = row.try_get("rework_status")?;
    let rework_status = ReworkStatus::from_raw(&status)
        .ok_or_else(|| Error::Corrupt(format!("{}: unknown rework status '{}'", key, status)))?;

    let loop_index: Option<i64> = row.try_get("loop_index")?;
    let inspected_at: Option<String> = row.try_get("inspected_at")?;
    let pass = InspectionPass::from_columns(loop_index, inspected_at.as_deref())
        .ok_or_else(|| Error::Corrupt(format!("{}: observation without a pass", key)))?;

    let exported_at: String = row.try_get("exported_at")?;
    let exported_at = parse_timestamp(&exported_at)
        .ok_or_else(|| Error::Corrupt(format!("{}: bad exported_at '{}'", key, exported_at)))?;

    let row_index: i64 = row.try_get("row_index")?;
    let row_index = u32::try_from(row_index)
        .map_err(|_| Error::Corrupt(format!("{}: row index out of range", key)))?;

    Ok(DefectObservation {
        rework_status,
        pass,
        inspected_at: inspected_at.as_deref().and_then(parse_timestamp),
        descriptors: Descriptors {
            part_number: row.try_get("part_number")?,
            component_pn: row.try_get("component_pn")?,
            machine_name: row.try_get("machine_name")?,
            operation_name: row.try_get("operation_name")?,
            line_name: row.try_get("line_name")?,
        },
        origin: Origin {
            content_hash: row.try_get("content_hash")?,
            file_name: row.try_get("file_name")?,
            exported_at,
            row: row_index,
        },
        key,
    })
}

/// Insert or replace a consolidated record by occurrence key
pub async fn upsert_record<'e, E>(
    executor: E,
    record: &ConsolidatedDefectRecord,
) -> aoi_common::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let updated_at: DateTime<Utc> = record.updated_at;

    sqlx::query(
        r#"
        INSERT INTO defect_records (
            serial_number, ref_id, defect_code, outcome,
            first_seen_loop, first_seen_at, last_seen_loop, last_seen_at,
            pass_count, reworkable_count, overridden_count, false_call_count,
            part_number, component_pn, machine_name, operation_name, line_name,
            inspected_at, exported_at, ingestion_batch_id, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(serial_number, ref_id, defect_code) DO UPDATE SET
            outcome = excluded.outcome,
            first_seen_loop = excluded.first_seen_loop,
            first_seen_at = excluded.first_seen_at,
            last_seen_loop = excluded.last_seen_loop,
            last_seen_at = excluded.last_seen_at,
            pass_count = excluded.pass_count,
            reworkable_count = excluded.reworkable_count,
            overridden_count = excluded.overridden_count,
            false_call_count = excluded.false_call_count,
            part_number = excluded.part_number,
            component_pn = excluded.component_pn,
            machine_name = excluded.machine_name,
            operation_name = excluded.operation_name,
            line_name = excluded.line_name,
            inspected_at = excluded.inspected_at,
            exported_at = excluded.exported_at,
            ingestion_batch_id = excluded.ingestion_batch_id,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&record.key.serial_number)
    .bind(&record.key.ref_id)
    .bind(&record.key.defect_code)
    .bind(record.outcome.as_str())
    .bind(record.first_seen.loop_index().map(i64::from))
    .bind(record.first_seen.timestamp().as_ref().map(format_timestamp))
    .bind(record.last_seen.loop_index().map(i64::from))
    .bind(record.last_seen.timestamp().as_ref().map(format_timestamp))
    .bind(i64::from(record.pass_count))
    .bind(i64::from(record.reworkable_count))
    .bind(i64::from(record.overridden_count))
    .bind(i64::from(record.false_call_count))
    .bind(&record.descriptors.part_number)
    .bind(&record.descriptors.component_pn)
    .bind(&record.descriptors.machine_name)
    .bind(&record.descriptors.operation_name)
    .bind(&record.descriptors.line_name)
    .bind(record.inspected_at.as_ref().map(format_timestamp))
    .bind(format_timestamp(&record.exported_at))
    .bind(record.ingestion_batch_id.to_string())
    .bind(updated_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}
