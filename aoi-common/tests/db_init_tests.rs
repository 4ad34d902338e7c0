//! Database initialization and record decoding

use aoi_common::db::{
    count_records, init_database, load_record, load_records_for_serials, store_generation,
    SCHEMA_VERSION,
};
use aoi_common::{InspectionPass, OccurrenceKey, Outcome};

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("sub").join("aoi.db");

    let result = init_database(&db_path).await;
    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("aoi.db");

    let pool1 = init_database(&db_path).await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());

    let versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version WHERE version = ?")
        .bind(SCHEMA_VERSION)
        .fetch_one(&pool2.unwrap())
        .await
        .unwrap();
    assert_eq!(versions, 1);
}

#[tokio::test]
async fn test_fresh_store_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("aoi.db")).await.unwrap();

    assert_eq!(count_records(&pool).await.unwrap(), 0);
    assert_eq!(store_generation(&pool).await.unwrap(), 0);

    let key = OccurrenceKey::new("SN1", "C100", "Missing");
    assert!(load_record(&pool, &key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_record_row_decodes() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("aoi.db")).await.unwrap();

    sqlx::query(
        r#"
        INSERT INTO defect_records (
            serial_number, ref_id, defect_code, outcome,
            first_seen_loop, first_seen_at, last_seen_loop, last_seen_at,
            pass_count, reworkable_count, overridden_count, false_call_count,
            part_number, component_pn, machine_name, operation_name, line_name,
            inspected_at, exported_at, ingestion_batch_id, updated_at
        ) VALUES (
            'SN1', 'R205.1', 'Tombstone', 'Fixed from previously caught',
            1, NULL, 2, NULL,
            2, 2, 0, 0,
            'PCBA-01', 'RES-0402', 'AOI-3', 'SMT Top', 'Line 3',
            '2025-07-26 15:10:30.000', '2025-07-26 16:00:00.000',
            '6f9619ff-8b86-d011-b42d-00cf4fc964ff', '2025-07-26T16:05:00+00:00'
        )
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    let key = OccurrenceKey::new("SN1", "R205.1", "Tombstone");
    let record = load_record(&pool, &key).await.unwrap().expect("record present");

    assert_eq!(record.key, key);
    assert_eq!(record.outcome, Outcome::FixedFromPreviouslyCaught);
    assert_eq!(record.first_seen, InspectionPass::Loop(1));
    assert_eq!(record.last_seen, InspectionPass::Loop(2));
    assert_eq!(record.pass_count, 2);
    assert_eq!(record.reworkable_count, 2);
    assert_eq!(record.descriptors.component_pn.as_deref(), Some("RES-0402"));
    assert_eq!(record.descriptors.line_name.as_deref(), Some("Line 3"));
    assert!(record.inspected_at.is_some());

    let mut conn = pool.acquire().await.unwrap();
    let by_serial = load_records_for_serials(&mut conn, &["SN1".to_string(), "SN2".to_string()])
        .await
        .unwrap();
    assert_eq!(by_serial.len(), 1);

    let none = load_records_for_serials(&mut conn, &[]).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_corrupt_outcome_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("aoi.db")).await.unwrap();

    sqlx::query(
        r#"
        INSERT INTO defect_records (
            serial_number, ref_id, defect_code, outcome,
            first_seen_loop, last_seen_loop,
            pass_count, reworkable_count, overridden_count, false_call_count,
            exported_at, ingestion_batch_id, updated_at
        ) VALUES (
            'SN1', 'C1', '', 'Unknown', 1, 1, 1, 1, 0, 0,
            '2025-07-26 16:00:00.000', '6f9619ff-8b86-d011-b42d-00cf4fc964ff',
            '2025-07-26T16:05:00+00:00'
        )
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    let result = load_record(&pool, &OccurrenceKey::new("SN1", "C1", "")).await;
    assert!(matches!(result, Err(aoi_common::Error::Corrupt(_))));
}
