//! Points matrices and their per-phase cache.

use std::{collections::BTreeMap, sync::Arc};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::state::race::{Phase, PilotId, RaceKind};

/// Largest absolute value a matrix cell may hold.
pub const MAX_CELL_POINTS: i32 = 100_000;

/// Points of a pilot no longer fit an `i32`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("points of pilot {pilot} in phase {phase} overflow")]
pub struct PointsOverflow {
    /// Phase being scored.
    pub phase: Phase,
    /// First pilot whose points overflowed.
    pub pilot: PilotId,
}

/// Points granted for one rank, either flat or split by race kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum PointsRow {
    /// Same value for every race kind.
    Flat(i32),
    /// One column per race kind.
    ByKind(KindPoints),
}

/// Columns of a by-kind points row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct KindPoints {
    #[serde(default)]
    pub normal: i32,
    #[serde(default)]
    pub survival_stage1: i32,
    #[serde(default)]
    pub survival_final: i32,
}

impl PointsRow {
    /// Value of the row for `kind`.
    pub fn for_kind(&self, kind: RaceKind) -> i32 {
        match self {
            PointsRow::Flat(points) => *points,
            PointsRow::ByKind(columns) => match kind {
                RaceKind::Normal => columns.normal,
                RaceKind::SurvivalStage1 => columns.survival_stage1,
                RaceKind::SurvivalFinal => columns.survival_final,
            },
        }
    }

    fn cells(&self) -> [i32; 3] {
        match self {
            PointsRow::Flat(points) => [*points; 3],
            PointsRow::ByKind(columns) => [
                columns.normal,
                columns.survival_stage1,
                columns.survival_final,
            ],
        }
    }
}

/// Versioned rank → points document of a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PointsMatrix {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub ranks: BTreeMap<u32, PointsRow>,
}

impl PointsMatrix {
    /// Base points for `rank` in a race of `kind`. Unknown ranks resolve to 0.
    pub fn resolve(&self, kind: RaceKind, rank: u32) -> i32 {
        self.ranks
            .get(&rank)
            .map(|row| row.for_kind(kind))
            .unwrap_or(0)
    }

    /// First cell beyond [`MAX_CELL_POINTS`] in either direction, as `(rank, points)`.
    pub fn out_of_bounds_cell(&self) -> Option<(u32, i32)> {
        self.ranks.iter().find_map(|(rank, row)| {
            row.cells()
                .into_iter()
                .find(|points| points.unsigned_abs() > MAX_CELL_POINTS.unsigned_abs())
                .map(|points| (*rank, points))
        })
    }

    /// Built-in table for phase A: flat points for a 12-pilot grid.
    pub fn default_phase_a() -> Self {
        const POINTS: [i32; 12] = [15, 12, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1];
        Self {
            version: 1,
            ranks: (1u32..)
                .zip(POINTS)
                .map(|(rank, points)| (rank, PointsRow::Flat(points)))
                .collect(),
        }
    }

    /// Built-in table for phase B: three columns for a 24-pilot grid.
    pub fn default_phase_b() -> Self {
        const NORMAL: [i32; 24] = [
            25, 21, 18, 16, 15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 1, 1, 1, 1, 1,
        ];
        const STAGE1: [i32; 24] = [
            12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        ];
        const FINAL: [i32; 24] = [
            40, 34, 29, 25, 22, 20, 18, 16, 14, 12, 10, 8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        ];
        Self {
            version: 1,
            ranks: (0..24)
                .map(|index| {
                    (
                        index as u32 + 1,
                        PointsRow::ByKind(KindPoints {
                            normal: NORMAL[index],
                            survival_stage1: STAGE1[index],
                            survival_final: FINAL[index],
                        }),
                    )
                })
                .collect(),
        }
    }

    /// Built-in table for `phase`.
    pub fn default_for(phase: Phase) -> Self {
        match phase {
            Phase::A => Self::default_phase_a(),
            Phase::B => Self::default_phase_b(),
        }
    }
}

/// Per-phase cache of loaded matrices. Entries only go away through [`MatrixCache::invalidate`].
#[derive(Default)]
pub struct MatrixCache {
    entries: DashMap<Phase, Arc<PointsMatrix>>,
}

impl MatrixCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached matrix for `phase`, if loaded.
    pub fn get(&self, phase: Phase) -> Option<Arc<PointsMatrix>> {
        self.entries.get(&phase).map(|entry| entry.value().clone())
    }

    /// Store a freshly loaded matrix.
    pub fn insert(&self, phase: Phase, matrix: PointsMatrix) -> Arc<PointsMatrix> {
        let matrix = Arc::new(matrix);
        debug!(%phase, version = matrix.version, "caching points matrix");
        self.entries.insert(phase, matrix.clone());
        matrix
    }

    /// Drop the cached matrix so the next lookup re-reads the store.
    pub fn invalidate(&self, phase: Phase) {
        if self.entries.remove(&phase).is_some() {
            info!(%phase, "points matrix cache invalidated");
        }
    }
}
