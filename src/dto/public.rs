use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationErrors};

use crate::{
    dto::validation::validate_path_segment,
    state::{
        race::{FinalizationRecord, Phase, PilotId, RaceKey, RaceKind, Totals},
        sequence::PointerSource,
        status::{Classification, RaceStatus},
    },
};

/// Path parameters selecting a phase.
#[derive(Debug, Deserialize)]
pub struct PhasePath {
    /// Phase identifier (`A` or `B`).
    pub phase: Phase,
}

/// Path parameters selecting a race of a phase.
#[derive(Debug, Deserialize)]
pub struct RacePath {
    pub phase: Phase,
    pub race_key: RaceKey,
}

/// Path parameters selecting a pilot's submission.
#[derive(Debug, Deserialize)]
pub struct SubmissionPath {
    pub phase: Phase,
    pub pilot_id: PilotId,
}

impl Validate for SubmissionPath {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_path_segment(&self.pilot_id) {
            errors.add("pilot_id", e);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Rank submitted by a pilot for the active race.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRankRequest {
    /// Finishing position, `null` to clear it.
    #[validate(range(min = 1))]
    pub rank: Option<u32>,
    /// Race the client believes is active; rejected when stale.
    #[serde(default)]
    pub race_key: Option<RaceKey>,
}

/// Outcome of a submission with the refreshed race status.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    pub phase: Phase,
    pub race_key: RaceKey,
    pub pilot_id: PilotId,
    pub rank: Option<u32>,
    pub status: RaceStatus,
    pub filled: usize,
    pub conflicting_ranks: Vec<i64>,
}

/// One tile of the race board.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RaceSummary {
    pub key: RaceKey,
    pub kind: RaceKind,
    pub finalized: bool,
    pub active: bool,
    pub status: RaceStatus,
    pub filled: usize,
    pub conflicting_ranks: Vec<i64>,
}

impl RaceSummary {
    pub fn new(
        key: RaceKey,
        kind: RaceKind,
        finalized: bool,
        active: bool,
        classification: Classification,
    ) -> Self {
        Self {
            key,
            kind,
            finalized,
            active,
            status: classification.status,
            filled: classification.filled,
            conflicting_ranks: classification.conflicting_ranks,
        }
    }
}

/// Every race of a phase in sequence order.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RaceBoardResponse {
    pub phase: Phase,
    pub grid_size: u32,
    pub active_race_key: Option<RaceKey>,
    pub active_source: PointerSource,
    pub races: Vec<RaceSummary>,
}

/// Effective results and record of one race.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RaceDetailResponse {
    pub phase: Phase,
    pub key: RaceKey,
    pub kind: RaceKind,
    pub grid_size: u32,
    pub finalized: bool,
    pub active: bool,
    pub status: RaceStatus,
    pub filled: usize,
    pub conflicting_ranks: Vec<i64>,
    /// Live submissions for the active race, history merged with the overlay otherwise.
    pub results: BTreeMap<PilotId, i64>,
    /// Pending operator corrections, past races only.
    pub overlay: BTreeMap<PilotId, Option<i64>>,
    pub record: Option<FinalizationRecord>,
}

/// Race currently accepting submissions.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRaceResponse {
    pub phase: Phase,
    /// `null` once every race has been run.
    pub race_key: Option<RaceKey>,
    pub kind: Option<RaceKind>,
    pub source: PointerSource,
}

/// Cumulative points per pilot.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TotalsResponse {
    pub phase: Phase,
    #[schema(value_type = BTreeMap<String, i32>)]
    pub totals: Totals,
}
