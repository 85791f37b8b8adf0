use serde::{Deserialize, Serialize};

/// Value stored for one pilot under submissions and edit overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntity {
    /// Submitted rank, `null` when cleared.
    #[serde(default)]
    pub rank: Option<i64>,
}

/// Value stored under `activePointer/{phase}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivePointerEntity {
    /// Race accepting submissions, `null` once the sequence is exhausted.
    #[serde(default)]
    pub race_key: Option<String>,
}

/// Value stored under `finalized/{phase}/{raceKey}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedFlagEntity {
    #[serde(default)]
    pub finalized: bool,
}

/// Value stored under `bonusAwards/{phase}/{awardName}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BonusAwardEntity {
    /// Pilot holding the award, `null` when unset.
    #[serde(default)]
    pub pilot_id: Option<String>,
}
