//! Export file discovery and loading
//!
//! An export file is read whole, hashed (SHA-256 of the raw bytes, used as
//! its identity in the ledger), decoded into raw rows and stamped with its
//! export timestamp.

use std::path::{Path, PathBuf};

use aoi_common::time::{embedded_timestamp, parse_timestamp};
use chrono::{DateTime, Local, NaiveDateTime};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{IngestError, IngestResult};
use crate::normalize::{columns, RawRow};

/// File extensions the loader understands
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["json", "jsonl", "ndjson"];

/// Where a file's export timestamp was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportDateSource {
    FileName,
    LatestEventDate,
    ModifiedTime,
}

/// One decoded export file
#[derive(Debug, Clone)]
pub struct ExportFile {
    pub path: PathBuf,
    pub file_name: String,
    pub content_hash: String,
    pub exported_at: NaiveDateTime,
    pub date_source: ExportDateSource,
    pub rows: Vec<RawRow>,
}

/// List export files in `dir` whose names start with `prefix`
///
/// Not recursive. Results are sorted by file name.
pub async fn discover_exports(dir: &Path, prefix: &str) -> IngestResult<Vec<PathBuf>> {
    let source_error = |e: std::io::Error| IngestError::Source {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(source_error)?;
    let mut found = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(source_error)? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(prefix) || !is_supported(&path) {
            continue;
        }
        if entry.file_type().await.map_err(source_error)?.is_file() {
            found.push(path);
        }
    }

    found.sort();
    debug!(dir = %dir.display(), count = found.len(), "Discovered export files");
    Ok(found)
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(e))
        })
        .unwrap_or(false)
}

/// Read, hash and decode one export file
pub async fn read_export(path: &Path) -> IngestResult<ExportFile> {
    let source_error = |reason: String| IngestError::Source {
        path: path.to_path_buf(),
        reason,
    };

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| source_error("file name is not valid UTF-8".to_string()))?;

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| source_error(e.to_string()))?;
    let content_hash = content_hash(&bytes);
    let rows = parse_rows(path, &bytes).map_err(source_error)?;

    let (exported_at, date_source) = if let Some(ts) = embedded_timestamp(&file_name) {
        (ts, ExportDateSource::FileName)
    } else if let Some(ts) = latest_event_date(&rows) {
        (ts, ExportDateSource::LatestEventDate)
    } else {
        let modified = tokio::fs::metadata(path)
            .await
            .and_then(|m| m.modified())
            .map_err(|e| source_error(format!("no export date available: {}", e)))?;
        let ts = DateTime::<Local>::from(modified).naive_local();
        warn!(
            file = %file_name,
            exported_at = %ts,
            "No export date in file name or rows; using file modification time"
        );
        (ts, ExportDateSource::ModifiedTime)
    };

    debug!(
        file = %file_name,
        rows = rows.len(),
        exported_at = %exported_at,
        "Loaded export file"
    );

    Ok(ExportFile {
        path: path.to_path_buf(),
        file_name,
        content_hash,
        exported_at,
        date_source,
        rows,
    })
}

/// Hex-encoded SHA-256 of a file's bytes
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Decode rows: a JSON array of objects, or one object per line for
/// `.jsonl`/`.ndjson`
pub fn parse_rows(path: &Path, bytes: &[u8]) -> Result<Vec<RawRow>, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| format!("not UTF-8: {}", e))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let line_delimited = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("jsonl") || e.eq_ignore_ascii_case("ndjson"))
        .unwrap_or(false);

    if line_delimited {
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                let value: Value = serde_json::from_str(line)
                    .map_err(|e| format!("line {}: {}", idx + 1, e))?;
                into_row(value).ok_or_else(|| format!("line {}: not a JSON object", idx + 1))
            })
            .collect()
    } else {
        let values: Vec<Value> =
            serde_json::from_str(text).map_err(|e| format!("expected a JSON array of rows: {}", e))?;
        values
            .into_iter()
            .enumerate()
            .map(|(idx, value)| {
                into_row(value).ok_or_else(|| format!("element {}: not a JSON object", idx))
            })
            .collect()
    }
}

fn into_row(value: Value) -> Option<RawRow> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn latest_event_date(rows: &[RawRow]) -> Option<NaiveDateTime> {
    rows.iter()
        .filter_map(|row| row.get(columns::EVENT_DATE)?.as_str())
        .filter_map(parse_timestamp)
        .max()
}

/// Processing order for a batch: export timestamp, then file name
pub fn sort_chronologically(files: &mut [ExportFile]) {
    files.sort_by(|a, b| {
        a.exported_at
            .cmp(&b.exported_at)
            .then_with(|| a.file_name.cmp(&b.file_name))
    });
}
