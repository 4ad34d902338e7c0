//! Shared fixture: a throwaway store seeded through the real ingestion path
//!
//! Seeded outcomes after both exports:
//! - SN1 C100 Missing: Fixed from previously caught (absent in loop 2)
//! - SN1 R205.1 Tombstone: Real (seen in loops 1 and 2)
//! - SN1 R205.2 Tombstone: Fixed from previously caught
//! - SN2 C100 Missing: False (false call)
//! - SN2 U7 Bridge: False (overridden)
//! - SN3 C100 Missing: Real (seen in loops 1 and 2)

#![allow(dead_code)]

use std::path::PathBuf;

use aoi_common::db::init_database;
use aoi_ingest::{IngestSettings, Ingestor};
use aoi_review::AppState;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;

pub struct Seeded {
    pub dir: TempDir,
    pub db: SqlitePool,
    pub settings: IngestSettings,
}

impl Seeded {
    pub fn state(&self) -> AppState {
        AppState::new(self.db.clone(), self.settings.clone(), 20)
    }

    pub fn export(&self, name: &str, rows: Value) -> PathBuf {
        write_export(&self.dir, name, rows)
    }
}

pub fn row(serial: &str, ref_id: &str, code: &str, status: &str, loop_index: u32, component: &str) -> Value {
    json!({
        "SerialNumber": serial,
        "Ref_Id": ref_id,
        "DefectCode": code,
        "ReworkStatus": status,
        "Loop": loop_index,
        "PartNumber": "PCB-100",
        "ComponentPN": component,
        "MachineName": "AOI-1",
        "OperationName": "SMT-Top",
        "LineName": "L1",
    })
}

fn write_export(dir: &TempDir, name: &str, rows: Value) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, serde_json::to_string(&rows).unwrap()).unwrap();
    path
}

pub async fn seeded_store() -> Seeded {
    let dir = TempDir::new().unwrap();
    let db = init_database(&dir.path().join("aoi_defects.db")).await.unwrap();
    let settings = IngestSettings {
        source_dir: dir.path().to_path_buf(),
        ..Default::default()
    };

    let day1 = write_export(
        &dir,
        "Defect RawData - 2025-07-01.json",
        json!([
            row("SN1", "C100", "Missing", "Reworkable", 1, "CAP-0402"),
            row("SN1", "R205.1", "Tombstone", "Reworkable", 1, "RES-0603"),
            row("SN1", "R205.2", "Tombstone", "Reworkable", 1, "RES-0603"),
            row("SN2", "C100", "Missing", "False call", 1, "CAP-0402"),
            row("SN2", "U7", "Bridge", "Overridden", 1, "IC-SOIC8"),
            row("SN3", "C100", "Missing", "Reworkable", 1, "CAP-0402"),
        ]),
    );
    let day2 = write_export(
        &dir,
        "Defect RawData - 2025-07-02.json",
        json!([
            row("SN1", "R205.1", "Tombstone", "Reworkable", 2, "RES-0603"),
            row("SN3", "C100", "Missing", "Reworkable", 2, "CAP-0402"),
        ]),
    );

    let report = Ingestor::new(db.clone(), settings.clone())
        .run(&[day1, day2])
        .await;
    assert!(!report.has_fatal_error());
    assert_eq!(report.rows_accepted, 8);

    Seeded { dir, db, settings }
}
