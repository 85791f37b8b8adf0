//! DTO definitions used by the admin REST API and documentation layer.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationErrors};

use crate::{
    dto::validation::validate_path_segment,
    state::{
        points::PointsMatrix,
        race::{FinalizationRecord, Phase, PilotId, RaceKey, Totals},
    },
};

/// Path parameters selecting a pilot inside a race.
#[derive(Debug, Deserialize)]
pub struct RacePilotPath {
    pub phase: Phase,
    pub race_key: RaceKey,
    pub pilot_id: PilotId,
}

impl Validate for RacePilotPath {
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

/// Path parameters selecting a bonus award.
#[derive(Debug, Deserialize)]
pub struct AwardPath {
    pub phase: Phase,
    pub award: String,
}

impl Validate for AwardPath {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_path_segment(&self.award) {
            errors.add("award", e);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Query flags of the finalize endpoint.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FinalizeQuery {
    /// Finalize the active race again although its flag is already set
    /// (recovery after a partially applied finalization).
    #[serde(default)]
    pub force: bool,
}

/// Result of a successful finalization.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub phase: Phase,
    pub record: FinalizationRecord,
    /// Whether the race was the active race (submissions reset, pointer moved).
    pub was_active: bool,
    /// Active race after the finalization, `null` once the sequence is exhausted.
    pub next_active: Option<RaceKey>,
    #[schema(value_type = std::collections::BTreeMap<String, i32>)]
    pub totals: Totals,
}

/// Operator correction of a finalized race.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct OverlayRankRequest {
    /// Corrected rank, `null` to remove the pilot from the results.
    #[validate(range(min = 1))]
    pub rank: Option<u32>,
}

/// Doubled-points flag of a pilot in a race.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DoubledRequest {
    pub doubled: bool,
}

/// New holder of a bonus award.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BonusAwardRequest {
    /// Pilot receiving the award, `null` to unset it.
    pub pilot_id: Option<PilotId>,
}

impl Validate for BonusAwardRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Some(ref pilot_id) = self.pilot_id {
            if let Err(e) = validate_path_segment(pilot_id) {
                errors.add("pilot_id", e);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Acknowledgement of an admin write.
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    pub message: String,
}

impl ActionResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Points matrix currently in effect for a phase.
#[derive(Debug, Serialize, ToSchema)]
pub struct MatrixResponse {
    pub phase: Phase,
    pub matrix: PointsMatrix,
}
