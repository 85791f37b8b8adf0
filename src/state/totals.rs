//! Per-phase totals rebuilt from finalization records and bonus awards.

use std::collections::BTreeMap;

use tracing::warn;

use crate::state::{
    points::PointsOverflow,
    race::{FinalizationRecord, Phase, PilotId, Totals},
};

/// Full recomputation of the totals of a phase.
///
/// `awards` maps an award name to the pilot holding it (`None` when unset) and
/// `award_values` gives the fixed points of each award name.
pub fn compute_totals<'a>(
    phase: Phase,
    records: impl IntoIterator<Item = &'a FinalizationRecord>,
    awards: &BTreeMap<String, Option<PilotId>>,
    award_values: &BTreeMap<String, i32>,
) -> Result<Totals, PointsOverflow> {
    let mut totals = Totals::new();

    for record in records {
        for (pilot, points) in &record.points {
            credit(&mut totals, phase, pilot, points.final_points)?;
        }
    }

    for (award, holder) in awards {
        let Some(pilot) = holder else {
            continue;
        };
        match award_values.get(award) {
            Some(value) => credit(&mut totals, phase, pilot, *value)?,
            None => warn!(%phase, award = %award, "bonus award has no configured value; ignoring it"),
        }
    }

    Ok(totals)
}

fn credit(
    totals: &mut Totals,
    phase: Phase,
    pilot: &PilotId,
    points: i32,
) -> Result<(), PointsOverflow> {
    let total = totals.entry(pilot.clone()).or_default();
    *total = total.checked_add(points).ok_or_else(|| PointsOverflow {
        phase,
        pilot: pilot.clone(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::race::PilotPoints;

    fn record(key: &str, points: &[(&str, i32)]) -> FinalizationRecord {
        FinalizationRecord {
            race_key: key.into(),
            grid_size: 12,
            results: BTreeMap::new(),
            points: points
                .iter()
                .enumerate()
                .map(|(index, (pilot, final_points))| {
                    (
                        pilot.to_string(),
                        PilotPoints {
                            rank: index as u32 + 1,
                            base_points: *final_points,
                            doubled: false,
                            final_points: *final_points,
                        },
                    )
                })
                .collect(),
            finalized_at: None,
        }
    }

    fn award_values() -> BTreeMap<String, i32> {
        BTreeMap::from([("public_vote".to_string(), 10), ("jury_vote".to_string(), 5)])
    }

    #[test]
    fn sums_every_record_and_awards() {
        let records = [
            record("1", &[("p1", 15), ("p2", 12)]),
            record("2", &[("p2", 15), ("p1", 12)]),
        ];
        let awards = BTreeMap::from([
            ("public_vote".to_string(), Some("p2".to_string())),
            ("jury_vote".to_string(), None),
        ]);
        let totals = compute_totals(Phase::A, &records, &awards, &award_values()).unwrap();
        assert_eq!(totals.get("p1"), Some(&27));
        assert_eq!(totals.get("p2"), Some(&37));
    }

    #[test]
    fn award_can_create_a_total_on_its_own() {
        let awards = BTreeMap::from([("jury_vote".to_string(), Some("p9".to_string()))]);
        let totals = compute_totals(Phase::B, &[], &awards, &award_values()).unwrap();
        assert_eq!(totals, Totals::from([("p9".to_string(), 5)]));
    }

    #[test]
    fn unknown_awards_are_ignored() {
        let awards = BTreeMap::from([("mystery".to_string(), Some("p1".to_string()))]);
        assert!(
            compute_totals(Phase::A, &[], &awards, &award_values())
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn recomputation_is_stable() {
        let records = [record("1", &[("p1", 15)]), record("2", &[("p1", 10)])];
        let awards = BTreeMap::new();
        let first = compute_totals(Phase::A, &records, &awards, &award_values());
        let second = compute_totals(Phase::A, &records, &awards, &award_values());
        assert_eq!(first, second);
    }

    #[test]
    fn overflowing_sum_is_an_error() {
        let records = [
            record("1", &[("p1", i32::MAX)]),
            record("2", &[("p2", 3), ("p1", 1)]),
        ];
        let err = compute_totals(Phase::A, &records, &BTreeMap::new(), &award_values())
            .unwrap_err();
        assert_eq!(
            err,
            PointsOverflow {
                phase: Phase::A,
                pilot: "p1".into(),
            }
        );
    }

    #[test]
    fn award_on_top_of_a_full_total_overflows() {
        let records = [record("1", &[("p1", i32::MAX - 4)])];
        let awards = BTreeMap::from([("jury_vote".to_string(), Some("p1".to_string()))]);
        assert!(compute_totals(Phase::B, &records, &awards, &award_values()).is_err());
    }
}
