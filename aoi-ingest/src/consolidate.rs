//! Loop consolidation
//!
//! Reduces every observation of an occurrence key, across all inspection
//! passes ever ingested for its board, to one [`ConsolidatedDefectRecord`].
//!
//! **Algorithm:**
//! 1. Group observations by serial number and build the board's pass
//!    timeline (loop indices as-is; timestamps clustered by `pass_window`)
//! 2. Group by occurrence key and sort by (pass, source order)
//! 3. Collapse same-pass duplicates: the later source wins, the tie is logged
//! 4. Classify survivors (first survivor is the first sighting)
//! 5. Resolve, most authoritative first:
//!    - latest candidate False → False
//!    - key absent from a later pass of its board → Fixed from previously caught
//!    - any candidate Real → Real
//!    - otherwise Suspect
//!
//! The result depends only on the set of observations given, never on the
//! order they arrive in, so re-running over a superset of earlier input is
//! stable.

use std::collections::{BTreeMap, BTreeSet};

use aoi_common::{
    ConsolidatedDefectRecord, DefectObservation, InspectionPass, OccurrenceKey, Origin, Outcome,
    ReworkStatus,
};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::classify::candidate_outcomes;

/// Default gap that separates two timestamped passes of the same board
pub const DEFAULT_PASS_WINDOW_MINUTES: u32 = 10;

/// Two observations of the same key landed in the same pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassTie {
    pub key: OccurrenceKey,
    pub pass: InspectionPass,
    pub kept: Origin,
    pub dropped: Origin,
}

/// Output of one consolidation run
#[derive(Debug, Clone, Default)]
pub struct Consolidation {
    /// One record per occurrence key, ordered by key
    pub records: Vec<ConsolidatedDefectRecord>,
    pub ties: Vec<PassTie>,
    /// Boards reporting both loop indices and timestamps as ordering keys
    pub mixed_pass_serials: Vec<String>,
}

/// Reduces observation history to consolidated records
#[derive(Debug, Clone)]
pub struct Consolidator {
    pass_window: Duration,
}

impl Default for Consolidator {
    fn default() -> Self {
        Self::new(DEFAULT_PASS_WINDOW_MINUTES)
    }
}

impl Consolidator {
    pub fn new(pass_window_minutes: u32) -> Self {
        Self {
            pass_window: Duration::minutes(i64::from(pass_window_minutes)),
        }
    }

    /// Consolidate the full observation history of one or more boards
    ///
    /// `observations` must contain every stored observation for each serial
    /// number it mentions; absence detection looks at the whole board.
    pub fn consolidate(
        &self,
        observations: &[DefectObservation],
        batch_id: Uuid,
        updated_at: DateTime<Utc>,
    ) -> Consolidation {
        let mut by_serial: BTreeMap<&str, Vec<&DefectObservation>> = BTreeMap::new();
        for obs in observations {
            by_serial
                .entry(obs.key.serial_number.as_str())
                .or_default()
                .push(obs);
        }

        let mut result = Consolidation::default();

        for (serial, board) in by_serial {
            let timeline = PassTimeline::build(&board, self.pass_window);
            if timeline.mixed {
                warn!(
                    serial = %serial,
                    "Board reports both loop indices and timestamps; loop passes are ordered first"
                );
                result.mixed_pass_serials.push(serial.to_string());
            }

            let mut by_key: BTreeMap<&OccurrenceKey, Vec<(usize, &DefectObservation)>> =
                BTreeMap::new();
            for obs in board {
                by_key
                    .entry(&obs.key)
                    .or_default()
                    .push((timeline.ordinal(&obs.pass), obs));
            }

            for (key, mut history) in by_key {
                history.sort_by(|(a_pass, a), (b_pass, b)| {
                    a_pass
                        .cmp(b_pass)
                        .then_with(|| a.origin.sort_key().cmp(&b.origin.sort_key()))
                });

                let survivors = collapse_ties(history, &mut result.ties);
                let record = resolve(
                    key,
                    &survivors,
                    timeline.last_ordinal(),
                    batch_id,
                    updated_at,
                );
                result.records.push(record);
            }
        }

        result
    }
}

/// Ordered passes of one board
struct PassTimeline {
    loops: Vec<u32>,
    /// Start timestamp of each clustered pass
    starts: Vec<NaiveDateTime>,
    mixed: bool,
}

impl PassTimeline {
    fn build(board: &[&DefectObservation], window: Duration) -> Self {
        let mut loops = BTreeSet::new();
        let mut stamps = BTreeSet::new();
        for obs in board {
            match obs.pass {
                InspectionPass::Loop(n) => {
                    loops.insert(n);
                }
                InspectionPass::At(ts) => {
                    stamps.insert(ts);
                }
            }
        }

        let mut starts: Vec<NaiveDateTime> = Vec::new();
        for ts in &stamps {
            match starts.last() {
                Some(start) if ts.signed_duration_since(*start) <= window => {}
                _ => starts.push(*ts),
            }
        }

        Self {
            mixed: !loops.is_empty() && !stamps.is_empty(),
            loops: loops.into_iter().collect(),
            starts,
        }
    }

    /// Position of a pass in the board's timeline
    fn ordinal(&self, pass: &InspectionPass) -> usize {
        match pass {
            InspectionPass::Loop(n) => self.loops.partition_point(|l| l < n),
            InspectionPass::At(ts) => {
                let cluster = self.starts.partition_point(|s| s <= ts).saturating_sub(1);
                self.loops.len() + cluster
            }
        }
    }

    fn last_ordinal(&self) -> usize {
        (self.loops.len() + self.starts.len()).saturating_sub(1)
    }
}

/// Keep one observation per pass; the later source replaces the earlier one
fn collapse_ties<'a>(
    history: Vec<(usize, &'a DefectObservation)>,
    ties: &mut Vec<PassTie>,
) -> Vec<(usize, &'a DefectObservation)> {
    let mut survivors: Vec<(usize, &DefectObservation)> = Vec::with_capacity(history.len());

    for (ordinal, obs) in history {
        match survivors.last_mut() {
            Some((last_ordinal, kept)) if *last_ordinal == ordinal => {
                warn!(
                    key = %obs.key,
                    pass = %obs.pass,
                    kept_file = %obs.origin.file_name,
                    kept_row = obs.origin.row,
                    dropped_file = %kept.origin.file_name,
                    dropped_row = kept.origin.row,
                    "Same defect reported twice in one pass; later source wins"
                );
                ties.push(PassTie {
                    key: obs.key.clone(),
                    pass: obs.pass,
                    kept: obs.origin.clone(),
                    dropped: kept.origin.clone(),
                });
                *kept = obs;
            }
            _ => survivors.push((ordinal, obs)),
        }
    }

    survivors
}

fn resolve(
    key: &OccurrenceKey,
    survivors: &[(usize, &DefectObservation)],
    board_last_ordinal: usize,
    batch_id: Uuid,
    updated_at: DateTime<Utc>,
) -> ConsolidatedDefectRecord {
    let candidates = candidate_outcomes(survivors.iter().map(|(_, obs)| obs.rework_status));

    // Every key has at least one observation, so both ends exist
    let (first_ordinal, first) = survivors[0];
    let (last_ordinal, latest) = survivors[survivors.len() - 1];
    debug_assert!(first_ordinal <= last_ordinal);

    let outcome = if candidates.last() == Some(&Outcome::False) {
        Outcome::False
    } else if last_ordinal < board_last_ordinal {
        Outcome::FixedFromPreviouslyCaught
    } else if candidates.contains(&Outcome::Real) {
        Outcome::Real
    } else {
        Outcome::Suspect
    };

    let count = |status: ReworkStatus| {
        survivors
            .iter()
            .filter(|(_, obs)| obs.rework_status == status)
            .count() as u32
    };

    let exported_at = survivors
        .iter()
        .map(|(_, obs)| obs.origin.exported_at)
        .max()
        .unwrap_or(latest.origin.exported_at);

    ConsolidatedDefectRecord {
        key: key.clone(),
        outcome,
        first_seen: first.pass,
        last_seen: latest.pass,
        pass_count: survivors.len() as u32,
        reworkable_count: count(ReworkStatus::Reworkable),
        overridden_count: count(ReworkStatus::Overridden),
        false_call_count: count(ReworkStatus::FalseCall),
        descriptors: latest.descriptors.clone(),
        inspected_at: latest.inspected_at,
        exported_at,
        ingestion_batch_id: batch_id,
        updated_at,
    }
}
