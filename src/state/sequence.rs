//! Active race pointer resolution and advancement over a phase sequence.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::state::race::{Phase, Race, RaceKey, RaceSequence};

/// Pointer value as found in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredPointer {
    /// No pointer document at all.
    Missing,
    /// Pointer document explicitly set to null: every race has been run.
    Exhausted,
    /// Pointer to a race key (which may be stale).
    Race(RaceKey),
}

/// Which resolution tier produced the active race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PointerSource {
    /// The stored pointer was present and valid.
    Stored,
    /// First race of the sequence that is not finalized yet.
    FirstUnfinalized,
    /// Every race is finalized; the last race is used.
    LastRace,
}

/// Outcome of the active race resolution for a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveResolution {
    /// Race accepting live submissions, `None` when the sequence is exhausted.
    pub race: Option<Race>,
    pub source: PointerSource,
}

impl ActiveResolution {
    /// Key of the active race, if any.
    pub fn key(&self) -> Option<&str> {
        self.race.as_ref().map(|race| race.key.as_str())
    }

    /// Whether `key` is the active race.
    pub fn is_active(&self, key: &str) -> bool {
        self.key() == Some(key)
    }
}

/// Resolve the active race: stored pointer when valid, else the first race not
/// finalized, else the last race.
pub fn resolve_active(
    phase: Phase,
    sequence: &RaceSequence,
    stored: &StoredPointer,
    finalized: &BTreeMap<RaceKey, bool>,
) -> ActiveResolution {
    match stored {
        StoredPointer::Exhausted => {
            return ActiveResolution {
                race: None,
                source: PointerSource::Stored,
            };
        }
        StoredPointer::Race(key) => {
            if let Some(race) = sequence.get(key) {
                return ActiveResolution {
                    race: Some(race.clone()),
                    source: PointerSource::Stored,
                };
            }
            warn!(%phase, race_key = %key, "stored active pointer is not in the sequence; ignoring it");
        }
        StoredPointer::Missing => {}
    }

    if let Some(race) = sequence
        .iter()
        .find(|race| !finalized.get(&race.key).copied().unwrap_or(false))
    {
        return ActiveResolution {
            race: Some(race.clone()),
            source: PointerSource::FirstUnfinalized,
        };
    }

    ActiveResolution {
        race: sequence.last().cloned(),
        source: PointerSource::LastRace,
    }
}

/// Pointer value after the race `current` has been finalized.
pub fn advance(sequence: &RaceSequence, current: &str) -> Option<RaceKey> {
    sequence.next_after(current).map(|race| race.key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::race::RaceKind;

    fn sequence() -> RaceSequence {
        RaceSequence::new(vec![
            Race::new("1", RaceKind::Normal),
            Race::new("2", RaceKind::Normal),
            Race::new("3", RaceKind::Normal),
        ])
        .unwrap()
    }

    fn flags(entries: &[(&str, bool)]) -> BTreeMap<RaceKey, bool> {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), *value))
            .collect()
    }

    #[test]
    fn valid_stored_pointer_wins() {
        let resolution = resolve_active(
            Phase::A,
            &sequence(),
            &StoredPointer::Race("3".into()),
            &flags(&[("1", false)]),
        );
        assert_eq!(resolution.key(), Some("3"));
        assert_eq!(resolution.source, PointerSource::Stored);
    }

    #[test]
    fn explicit_null_pointer_means_exhausted() {
        let resolution = resolve_active(
            Phase::A,
            &sequence(),
            &StoredPointer::Exhausted,
            &BTreeMap::new(),
        );
        assert_eq!(resolution.key(), None);
        assert_eq!(resolution.source, PointerSource::Stored);
    }

    #[test]
    fn missing_pointer_falls_back_to_first_unfinalized() {
        let resolution = resolve_active(
            Phase::A,
            &sequence(),
            &StoredPointer::Missing,
            &flags(&[("1", true), ("2", false)]),
        );
        assert_eq!(resolution.key(), Some("2"));
        assert_eq!(resolution.source, PointerSource::FirstUnfinalized);
    }

    #[test]
    fn stale_pointer_falls_back_to_first_unfinalized() {
        let resolution = resolve_active(
            Phase::B,
            &sequence(),
            &StoredPointer::Race("42".into()),
            &flags(&[("1", true)]),
        );
        assert_eq!(resolution.key(), Some("2"));
    }

    #[test]
    fn all_finalized_falls_back_to_last_race() {
        let resolution = resolve_active(
            Phase::A,
            &sequence(),
            &StoredPointer::Missing,
            &flags(&[("1", true), ("2", true), ("3", true)]),
        );
        assert_eq!(resolution.key(), Some("3"));
        assert_eq!(resolution.source, PointerSource::LastRace);
    }

    #[test]
    fn advance_moves_to_next_or_null() {
        let seq = sequence();
        assert_eq!(advance(&seq, "1").as_deref(), Some("2"));
        assert_eq!(advance(&seq, "3"), None);
    }
}
