//! Defect data model
//!
//! Raw rework statuses come from the AOI export; outcomes are what the
//! consolidation engine resolves them to. Both carry the exact text the
//! shop floor uses so exported tables stay readable.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Disposition reported by the AOI station for one inspection pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReworkStatus {
    /// Defect flagged and not yet cleared by an operator
    Reworkable,
    /// Operator manually cleared the flag as not real
    Overridden,
    /// Inspection system marked the flag as a nuisance call
    #[serde(rename = "False call")]
    FalseCall,
}

impl ReworkStatus {
    pub const ALL: [ReworkStatus; 3] = [
        ReworkStatus::Reworkable,
        ReworkStatus::Overridden,
        ReworkStatus::FalseCall,
    ];

    /// Export text for this status
    pub fn as_str(&self) -> &'static str {
        match self {
            ReworkStatus::Reworkable => "Reworkable",
            ReworkStatus::Overridden => "Overridden",
            ReworkStatus::FalseCall => "False call",
        }
    }

    /// Map a raw export cell to a status
    ///
    /// Matching ignores surrounding whitespace and ASCII case. Anything else
    /// is unknown and returns `None`; callers must not default it.
    pub fn from_raw(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(raw))
    }
}

impl fmt::Display for ReworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved classification of one defect occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Outcome {
    /// Confirmed rework requirement
    Real,
    /// Operator-cleared or machine false call
    False,
    /// Pending operator review
    Suspect,
    /// Previously flagged, no longer reported in a later pass
    #[serde(rename = "Fixed from previously caught")]
    FixedFromPreviouslyCaught,
}

impl Outcome {
    pub const ALL: [Outcome; 4] = [
        Outcome::Real,
        Outcome::False,
        Outcome::Suspect,
        Outcome::FixedFromPreviouslyCaught,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Real => "Real",
            Outcome::False => "False",
            Outcome::Suspect => "Suspect",
            Outcome::FixedFromPreviouslyCaught => "Fixed from previously caught",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = crate::Error;

    /// Accepts the display text, the variant name, and the short alias `Fixed`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("fixed") || s.eq_ignore_ascii_case("FixedFromPreviouslyCaught") {
            return Ok(Outcome::FixedFromPreviouslyCaught);
        }
        Outcome::ALL
            .into_iter()
            .find(|o| o.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| crate::Error::InvalidInput(format!("unknown outcome '{}'", s)))
    }
}

/// Ordering key identifying which inspection pass produced an observation
///
/// Loop passes order before timestamp passes; a single board is expected to
/// use one kind consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionPass {
    Loop(u32),
    At(NaiveDateTime),
}

impl InspectionPass {
    pub fn loop_index(&self) -> Option<u32> {
        match self {
            InspectionPass::Loop(n) => Some(*n),
            InspectionPass::At(_) => None,
        }
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            InspectionPass::Loop(_) => None,
            InspectionPass::At(ts) => Some(*ts),
        }
    }

    /// Rebuild a pass from its two nullable storage columns
    pub fn from_columns(loop_index: Option<i64>, at: Option<&str>) -> Option<Self> {
        if let Some(n) = loop_index {
            return u32::try_from(n).ok().map(InspectionPass::Loop);
        }
        at.and_then(crate::time::parse_timestamp).map(InspectionPass::At)
    }
}

impl fmt::Display for InspectionPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InspectionPass::Loop(n) => write!(f, "loop {}", n),
            InspectionPass::At(ts) => write!(f, "{}", crate::time::format_timestamp(ts)),
        }
    }
}

/// Identity of one physical defect site across inspection loops
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OccurrenceKey {
    pub serial_number: String,
    pub ref_id: String,
    pub defect_code: String,
}

impl OccurrenceKey {
    pub fn new(
        serial_number: impl Into<String>,
        ref_id: impl Into<String>,
        defect_code: impl Into<String>,
    ) -> Self {
        Self {
            serial_number: serial_number.into(),
            ref_id: ref_id.into(),
            defect_code: defect_code.into(),
        }
    }
}

impl fmt::Display for OccurrenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.serial_number, self.ref_id, self.defect_code)
    }
}

/// Optional descriptive attributes carried through unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptors {
    pub part_number: Option<String>,
    pub component_pn: Option<String>,
    pub machine_name: Option<String>,
    pub operation_name: Option<String>,
    pub line_name: Option<String>,
}

/// Where an observation came from
///
/// `(exported_at, file_name, row)` is the deterministic processing order
/// used to break ties between observations of the same pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    /// SHA-256 of the source file contents
    pub content_hash: String,
    pub file_name: String,
    pub exported_at: NaiveDateTime,
    /// Zero-based row index within the source file
    pub row: u32,
}

impl Origin {
    pub fn sort_key(&self) -> (NaiveDateTime, &str, u32) {
        (self.exported_at, self.file_name.as_str(), self.row)
    }
}

/// One inspection-pass row after normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefectObservation {
    pub key: OccurrenceKey,
    pub rework_status: ReworkStatus,
    pub pass: InspectionPass,
    pub inspected_at: Option<NaiveDateTime>,
    pub descriptors: Descriptors,
    pub origin: Origin,
}

/// The persisted unit: one resolved outcome per occurrence key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedDefectRecord {
    pub key: OccurrenceKey,
    pub outcome: Outcome,
    pub first_seen: InspectionPass,
    pub last_seen: InspectionPass,
    pub pass_count: u32,
    pub reworkable_count: u32,
    pub overridden_count: u32,
    pub false_call_count: u32,
    pub descriptors: Descriptors,
    pub inspected_at: Option<NaiveDateTime>,
    pub exported_at: NaiveDateTime,
    pub ingestion_batch_id: Uuid,
    pub updated_at: DateTime<Utc>,
}

impl ConsolidatedDefectRecord {
    /// True when both records resolve to the same stored content
    ///
    /// Provenance (`ingestion_batch_id`, `updated_at`) is ignored, so an
    /// unchanged re-consolidation does not rewrite the row.
    pub fn same_resolution(&self, other: &ConsolidatedDefectRecord) -> bool {
        self.key == other.key
            && self.outcome == other.outcome
            && self.first_seen == other.first_seen
            && self.last_seen == other.last_seen
            && self.pass_count == other.pass_count
            && self.reworkable_count == other.reworkable_count
            && self.overridden_count == other.overridden_count
            && self.false_call_count == other.false_call_count
            && self.descriptors == other.descriptors
            && self.inspected_at == other.inspected_at
            && self.exported_at == other.exported_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_rework_status_from_raw() {
        assert_eq!(ReworkStatus::from_raw("Reworkable"), Some(ReworkStatus::Reworkable));
        assert_eq!(ReworkStatus::from_raw(" overridden "), Some(ReworkStatus::Overridden));
        assert_eq!(ReworkStatus::from_raw("False call"), Some(ReworkStatus::FalseCall));
        assert_eq!(ReworkStatus::from_raw("FALSE CALL"), Some(ReworkStatus::FalseCall));
    }

    #[test]
    fn test_rework_status_unknown_is_not_defaulted() {
        assert_eq!(ReworkStatus::from_raw(""), None);
        assert_eq!(ReworkStatus::from_raw("FalseCall"), None);
        assert_eq!(ReworkStatus::from_raw("Repaired"), None);
    }

    #[test]
    fn test_outcome_text_round_trip() {
        for outcome in Outcome::ALL {
            assert_eq!(outcome.as_str().parse::<Outcome>().unwrap(), outcome);
        }
        assert_eq!("fixed".parse::<Outcome>().unwrap(), Outcome::FixedFromPreviouslyCaught);
        assert!("Maybe".parse::<Outcome>().is_err());
    }

    #[test]
    fn test_outcome_serializes_as_shop_floor_text() {
        let json = serde_json::to_string(&Outcome::FixedFromPreviouslyCaught).unwrap();
        assert_eq!(json, "\"Fixed from previously caught\"");
        let json = serde_json::to_string(&ReworkStatus::FalseCall).unwrap();
        assert_eq!(json, "\"False call\"");
    }

    #[test]
    fn test_inspection_pass_ordering() {
        let ts = NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert!(InspectionPass::Loop(1) < InspectionPass::Loop(2));
        assert!(InspectionPass::Loop(99) < InspectionPass::At(ts));
    }

    #[test]
    fn test_inspection_pass_from_columns() {
        assert_eq!(
            InspectionPass::from_columns(Some(3), Some("2025-01-01 00:00:00.000")),
            Some(InspectionPass::Loop(3))
        );
        let pass = InspectionPass::from_columns(None, Some("2025-01-01 08:30:00.000")).unwrap();
        assert_eq!(pass.loop_index(), None);
        assert!(pass.timestamp().is_some());
        assert_eq!(InspectionPass::from_columns(None, None), None);
        assert_eq!(InspectionPass::from_columns(Some(-1), None), None);
    }
}
