//! Store path layout. Every path is `{root}/{phase}/...`.

use crate::state::race::Phase;

/// Root of the active pointers.
pub const ACTIVE_POINTER: &str = "activePointer";
/// Root of the live submissions.
pub const SUBMISSIONS: &str = "submissions";
/// Root of the finalized flags.
pub const FINALIZED: &str = "finalized";
/// Root of the finalization records.
pub const HISTORY: &str = "history";
/// Root of the edit overlays.
pub const EDIT_OVERLAY: &str = "editOverlay";
/// Root of the points matrices.
pub const POINTS_MATRIX: &str = "pointsMatrix";
/// Root of the doubled flags.
pub const DOUBLED: &str = "doubled";
/// Root of the totals.
pub const TOTALS: &str = "totals";
/// Root of the bonus awards.
pub const BONUS_AWARDS: &str = "bonusAwards";

const CURRENT: &str = "current";

/// Active pointer of `phase`.
pub fn active_pointer(phase: Phase) -> String {
    format!("{ACTIVE_POINTER}/{phase}")
}

/// Live submissions of the active race of `phase`.
pub fn submissions(phase: Phase) -> String {
    format!("{SUBMISSIONS}/{phase}/{CURRENT}")
}

/// Live submission of one pilot.
pub fn submission(phase: Phase, pilot_id: &str) -> String {
    format!("{SUBMISSIONS}/{phase}/{CURRENT}/{pilot_id}")
}

/// Finalized flags of every race of `phase`.
pub fn finalized_flags(phase: Phase) -> String {
    format!("{FINALIZED}/{phase}")
}

/// Finalized flag of one race.
pub fn finalized_flag(phase: Phase, race_key: &str) -> String {
    format!("{FINALIZED}/{phase}/{race_key}")
}

/// Finalization records of `phase`.
pub fn history(phase: Phase) -> String {
    format!("{HISTORY}/{phase}")
}

/// Finalization record of one race.
pub fn history_record(phase: Phase, race_key: &str) -> String {
    format!("{HISTORY}/{phase}/{race_key}")
}

/// Edit overlay of a past race.
pub fn overlay(phase: Phase, race_key: &str) -> String {
    format!("{EDIT_OVERLAY}/{phase}/{race_key}")
}

/// Overlay correction of one pilot.
pub fn overlay_entry(phase: Phase, race_key: &str, pilot_id: &str) -> String {
    format!("{EDIT_OVERLAY}/{phase}/{race_key}/{pilot_id}")
}

/// Points matrix document of `phase`.
pub fn points_matrix(phase: Phase) -> String {
    format!("{POINTS_MATRIX}/{phase}")
}

/// Doubled flags of a race.
pub fn doubled(phase: Phase, race_key: &str) -> String {
    format!("{DOUBLED}/{phase}/{race_key}")
}

/// Doubled flag of one pilot.
pub fn doubled_entry(phase: Phase, race_key: &str, pilot_id: &str) -> String {
    format!("{DOUBLED}/{phase}/{race_key}/{pilot_id}")
}

/// Totals of `phase`.
pub fn totals(phase: Phase) -> String {
    format!("{TOTALS}/{phase}")
}

/// Bonus award holders of `phase`.
pub fn bonus_awards(phase: Phase) -> String {
    format!("{BONUS_AWARDS}/{phase}")
}

/// Holder of one award.
pub fn bonus_award(phase: Phase, award: &str) -> String {
    format!("{BONUS_AWARDS}/{phase}/{award}")
}

/// Split a change path into its root segment, phase and the remaining segments.
pub fn parse(path: &str) -> Option<(&str, Phase, Vec<&str>)> {
    let mut segments = path.split('/').filter(|segment| !segment.is_empty());
    let root = segments.next()?;
    let phase = segments.next()?.parse().ok()?;
    Some((root, phase, segments.collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_documented_layout() {
        assert_eq!(submission(Phase::A, "p7"), "submissions/A/current/p7");
        assert_eq!(overlay_entry(Phase::B, "survival-1", "p2"), "editOverlay/B/survival-1/p2");
        assert_eq!(history_record(Phase::A, "3"), "history/A/3");
        assert_eq!(active_pointer(Phase::B), "activePointer/B");
    }

    #[test]
    fn parse_splits_root_phase_and_rest() {
        let (root, phase, rest) = parse("editOverlay/B/4/p1").unwrap();
        assert_eq!(root, EDIT_OVERLAY);
        assert_eq!(phase, Phase::B);
        assert_eq!(rest, vec!["4", "p1"]);
        assert!(parse("totals").is_none());
        assert!(parse("totals/Z").is_none());
    }
}
