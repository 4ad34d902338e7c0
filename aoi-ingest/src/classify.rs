//! Per-observation classification
//!
//! Proposes a candidate outcome for a single inspection pass. Resolving
//! disagreement between passes, and detecting the "fixed" case, belongs to
//! the consolidator.

use aoi_common::{Outcome, ReworkStatus};

/// Whether an observation is the earliest pass of its occurrence key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sighting {
    First,
    Repeat,
}

/// Candidate outcome for one observation
///
/// Rules, first match wins:
/// 1. `False call` → False
/// 2. `Overridden` → False (operator-cleared)
/// 3. `Reworkable` on first sighting → Real
/// 4. any other `Reworkable` → Suspect
///
/// `FixedFromPreviouslyCaught` is never produced here; it needs cross-pass
/// absence detection.
pub fn classify(status: ReworkStatus, sighting: Sighting) -> Outcome {
    match (status, sighting) {
        (ReworkStatus::FalseCall, _) => Outcome::False,
        (ReworkStatus::Overridden, _) => Outcome::False,
        (ReworkStatus::Reworkable, Sighting::First) => Outcome::Real,
        (ReworkStatus::Reworkable, Sighting::Repeat) => Outcome::Suspect,
    }
}

/// Candidates for a key's observations, already in pass order
pub fn candidate_outcomes<I>(statuses: I) -> Vec<Outcome>
where
    I: IntoIterator<Item = ReworkStatus>,
{
    statuses
        .into_iter()
        .enumerate()
        .map(|(idx, status)| {
            let sighting = if idx == 0 {
                Sighting::First
            } else {
                Sighting::Repeat
            };
            classify(status, sighting)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_false_call_is_false() {
        assert_eq!(classify(ReworkStatus::FalseCall, Sighting::First), Outcome::False);
        assert_eq!(classify(ReworkStatus::FalseCall, Sighting::Repeat), Outcome::False);
    }

    #[test]
    fn test_overridden_is_false() {
        assert_eq!(classify(ReworkStatus::Overridden, Sighting::First), Outcome::False);
        assert_eq!(classify(ReworkStatus::Overridden, Sighting::Repeat), Outcome::False);
    }

    #[test]
    fn test_first_reworkable_is_real() {
        assert_eq!(classify(ReworkStatus::Reworkable, Sighting::First), Outcome::Real);
    }

    #[test]
    fn test_repeat_reworkable_is_suspect() {
        assert_eq!(classify(ReworkStatus::Reworkable, Sighting::Repeat), Outcome::Suspect);
    }

    #[test]
    fn test_classify_is_total_and_never_fixed() {
        for status in ReworkStatus::ALL {
            for sighting in [Sighting::First, Sighting::Repeat] {
                let first = classify(status, sighting);
                assert_eq!(first, classify(status, sighting));
                assert_ne!(first, Outcome::FixedFromPreviouslyCaught);
            }
        }
    }

    #[test]
    fn test_candidates_mark_only_first_as_first_sighting() {
        let candidates = candidate_outcomes([
            ReworkStatus::Reworkable,
            ReworkStatus::Reworkable,
            ReworkStatus::FalseCall,
        ]);
        assert_eq!(candidates, vec![Outcome::Real, Outcome::Suspect, Outcome::False]);
    }

    #[test]
    fn test_candidates_empty() {
        assert!(candidate_outcomes(Vec::new()).is_empty());
    }
}
