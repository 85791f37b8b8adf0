use std::{collections::BTreeMap, fmt, str::FromStr};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;

/// Identifier of a pilot as used in store paths and result maps.
pub type PilotId = String;
/// Identifier of a race inside a phase sequence (`"1"`, `"survival-final"`, ...).
pub type RaceKey = String;
/// Raw pilot → rank mapping. `None` (or a non-positive rank) means "not filled".
pub type RankMap = BTreeMap<PilotId, Option<i64>>;

/// One of the two independent tournament tracks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
pub enum Phase {
    /// First tournament track (small grid).
    A,
    /// Second tournament track (large grid, survival races).
    B,
}

impl Phase {
    /// Every phase, in display order.
    pub const ALL: [Phase; 2] = [Phase::A, Phase::B];

    /// Path segment used for this phase in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::A => "A",
            Phase::B => "B",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "A" | "a" => Ok(Phase::A),
            "B" | "b" => Ok(Phase::B),
            other => Err(format!("unknown phase `{other}`")),
        }
    }
}

/// Category of a race, used to pick the points column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum RaceKind {
    /// Regular race.
    #[default]
    Normal,
    /// First survival stage.
    SurvivalStage1,
    /// Survival final.
    SurvivalFinal,
}

/// Static definition of one race in a phase sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Race {
    /// Sequence key of the race.
    pub key: RaceKey,
    /// Kind of the race.
    #[serde(default)]
    pub kind: RaceKind,
}

impl Race {
    /// Build a race definition.
    pub fn new(key: impl Into<RaceKey>, kind: RaceKind) -> Self {
        Self {
            key: key.into(),
            kind,
        }
    }
}

/// Ordered, immutable list of races for one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceSequence {
    races: IndexMap<RaceKey, Race>,
}

impl RaceSequence {
    /// Build a sequence, rejecting duplicated or malformed keys.
    pub fn new(races: Vec<Race>) -> Result<Self, String> {
        let mut map = IndexMap::with_capacity(races.len());
        for race in races {
            if race.key.is_empty() || race.key.contains('/') {
                return Err(format!("invalid race key `{}`", race.key));
            }
            if map.contains_key(&race.key) {
                return Err(format!("duplicate race key `{}`", race.key));
            }
            map.insert(race.key.clone(), race);
        }
        Ok(Self { races: map })
    }

    /// Race definition for `key`, if it belongs to the sequence.
    pub fn get(&self, key: &str) -> Option<&Race> {
        self.races.get(key)
    }

    /// Whether the sequence contains `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.races.contains_key(key)
    }

    /// Races in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = &Race> {
        self.races.values()
    }

    /// First race of the sequence.
    pub fn first(&self) -> Option<&Race> {
        self.races.first().map(|(_, race)| race)
    }

    /// Last race of the sequence.
    pub fn last(&self) -> Option<&Race> {
        self.races.last().map(|(_, race)| race)
    }

    /// Race following `key`, or `None` when `key` is the last one (or unknown).
    pub fn next_after(&self, key: &str) -> Option<&Race> {
        let index = self.races.get_index_of(key)?;
        self.races.get_index(index + 1).map(|(_, race)| race)
    }

    /// Number of races.
    pub fn len(&self) -> usize {
        self.races.len()
    }

    /// Whether the sequence has no race at all.
    pub fn is_empty(&self) -> bool {
        self.races.is_empty()
    }
}

/// Points breakdown for one pilot in a finalized race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PilotPoints {
    pub rank: u32,
    pub base_points: i32,
    pub doubled: bool,
    pub final_points: i32,
}

/// Immutable snapshot written when a race is finalized.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinalizationRecord {
    pub race_key: RaceKey,
    pub grid_size: u32,
    #[serde(default)]
    pub results: BTreeMap<PilotId, u32>,
    #[serde(default)]
    pub points: BTreeMap<PilotId, PilotPoints>,
    /// RFC 3339 timestamp of the finalization.
    pub finalized_at: Option<String>,
}

impl FinalizationRecord {
    /// Results as a raw rank map, ready to be merged with an overlay.
    pub fn results_as_ranks(&self) -> RankMap {
        self.results
            .iter()
            .map(|(pilot, rank)| (pilot.clone(), Some(i64::from(*rank))))
            .collect()
    }
}

/// Per-pilot cumulative points for a phase.
pub type Totals = BTreeMap<PilotId, i32>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence() -> RaceSequence {
        RaceSequence::new(vec![
            Race::new("1", RaceKind::Normal),
            Race::new("2", RaceKind::Normal),
            Race::new("survival-final", RaceKind::SurvivalFinal),
        ])
        .unwrap()
    }

    #[test]
    fn next_after_walks_in_order() {
        let seq = sequence();
        assert_eq!(seq.next_after("1").map(|r| r.key.as_str()), Some("2"));
        assert_eq!(
            seq.next_after("2").map(|r| r.key.as_str()),
            Some("survival-final")
        );
        assert!(seq.next_after("survival-final").is_none());
        assert!(seq.next_after("missing").is_none());
    }

    #[test]
    fn rejects_duplicate_and_malformed_keys() {
        assert!(
            RaceSequence::new(vec![
                Race::new("1", RaceKind::Normal),
                Race::new("1", RaceKind::Normal)
            ])
            .is_err()
        );
        assert!(RaceSequence::new(vec![Race::new("a/b", RaceKind::Normal)]).is_err());
        assert!(RaceSequence::new(vec![Race::new("", RaceKind::Normal)]).is_err());
    }

    #[test]
    fn phase_parses_from_path_segment() {
        assert_eq!("A".parse::<Phase>().unwrap(), Phase::A);
        assert_eq!("b".parse::<Phase>().unwrap(), Phase::B);
        assert!("C".parse::<Phase>().is_err());
    }

    #[test]
    fn record_uses_camel_case_fields() {
        let record = FinalizationRecord {
            race_key: "1".into(),
            grid_size: 12,
            results: BTreeMap::from([("p1".to_string(), 1)]),
            points: BTreeMap::from([(
                "p1".to_string(),
                PilotPoints {
                    rank: 1,
                    base_points: 15,
                    doubled: true,
                    final_points: 30,
                },
            )]),
            finalized_at: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["raceKey"], "1");
        assert_eq!(value["gridSize"], 12);
        assert_eq!(value["points"]["p1"]["finalPoints"], 30);
        assert!(value.get("finalizedAt").is_none());
    }
}
