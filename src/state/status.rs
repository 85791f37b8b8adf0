//! Live classification of a race from its rank submissions.
//!
//! Everything here is pure: the status is re-derived from a snapshot every time
//! it is needed and never persisted.

use std::collections::BTreeMap;

use serde::Serialize;
use utoipa::ToSchema;

use crate::state::race::RankMap;

/// Derived state of a rank set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RaceStatus {
    /// No pilot has a rank yet.
    Empty,
    /// Some ranks are filled, no duplicates, grid not full yet.
    Filled,
    /// At least one rank value is used by two pilots or more.
    Conflict,
    /// Exactly `grid_size` distinct ranks are filled.
    Complete,
}

/// Status plus the details the presentation layer needs to decorate tiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Classification {
    pub status: RaceStatus,
    /// Number of pilots holding a positive rank.
    pub filled: usize,
    /// Rank values held by more than one pilot, ascending.
    pub conflicting_ranks: Vec<i64>,
}

impl Classification {
    /// Shorthand for `status == Complete`.
    pub fn is_complete(&self) -> bool {
        self.status == RaceStatus::Complete
    }
}

/// Classify `ranks` against the expected `grid_size`.
///
/// Conflicts dominate: a duplicated rank yields [`RaceStatus::Conflict`] whatever the
/// fill level. Non-positive ranks count as empty.
pub fn classify(ranks: &RankMap, grid_size: u32) -> Classification {
    let mut occurrences: BTreeMap<i64, usize> = BTreeMap::new();
    for rank in ranks.values().flatten().copied().filter(|rank| *rank > 0) {
        *occurrences.entry(rank).or_default() += 1;
    }

    let filled = occurrences.values().sum::<usize>();
    let conflicting_ranks = occurrences
        .iter()
        .filter(|(_, count)| **count >= 2)
        .map(|(rank, _)| *rank)
        .collect::<Vec<_>>();

    let status = if !conflicting_ranks.is_empty() {
        RaceStatus::Conflict
    } else if filled == grid_size as usize {
        RaceStatus::Complete
    } else if filled > 0 {
        RaceStatus::Filled
    } else {
        RaceStatus::Empty
    };

    Classification {
        status,
        filled,
        conflicting_ranks,
    }
}
