//! Edit overlay merge for past races.

use crate::state::race::{FinalizationRecord, RankMap};

/// Effective results of a past race: the finalized results with every overlay
/// correction applied on top.
///
/// A `None` overlay entry clears the pilot. Cleared pilots are dropped from the
/// output. The base record is only read.
pub fn merge(base: Option<&FinalizationRecord>, overlay: &RankMap) -> RankMap {
    let mut merged = base.map(FinalizationRecord::results_as_ranks).unwrap_or_default();
    for (pilot, rank) in overlay {
        merged.insert(pilot.clone(), *rank);
    }
    merged.retain(|_, rank| rank.is_some());
    merged
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn record(results: &[(&str, u32)]) -> FinalizationRecord {
        FinalizationRecord {
            race_key: "1".into(),
            grid_size: 3,
            results: results
                .iter()
                .map(|(pilot, rank)| (pilot.to_string(), *rank))
                .collect(),
            points: BTreeMap::new(),
            finalized_at: None,
        }
    }

    #[test]
    fn empty_overlay_yields_base_results() {
        let base = record(&[("p1", 1), ("p2", 2)]);
        let merged = merge(Some(&base), &RankMap::new());
        assert_eq!(merged.get("p1"), Some(&Some(1)));
        assert_eq!(merged.get("p2"), Some(&Some(2)));
    }

    #[test]
    fn overlay_overwrites_and_clears() {
        let base = record(&[("p1", 1), ("p2", 2), ("p3", 3)]);
        let overlay = RankMap::from([
            ("p1".to_string(), Some(2)),
            ("p2".to_string(), Some(1)),
            ("p3".to_string(), None),
        ]);
        let merged = merge(Some(&base), &overlay);
        assert_eq!(merged.get("p1"), Some(&Some(2)));
        assert_eq!(merged.get("p2"), Some(&Some(1)));
        assert!(!merged.contains_key("p3"));
        assert_eq!(base.results.get("p3"), Some(&3));
    }

    #[test]
    fn overlay_without_base_is_used_alone() {
        let overlay = RankMap::from([("p9".to_string(), Some(4))]);
        let merged = merge(None, &overlay);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.get("p9"), Some(&Some(4)));
    }
}
