use serde::Serialize;
use utoipa::ToSchema;

use crate::state::{
    race::{FinalizationRecord, Phase, RaceKey, Totals},
    status::RaceStatus,
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Plain text event.
    pub fn new(event: Option<String>, data: String) -> Self {
        Self { event, data }
    }

    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// First event of the admin stream carrying the token to send as `X-Admin-Token`.
pub struct AdminHandshake {
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Live status of a race, re-derived after submissions or overlay edits.
pub struct RaceStatusEvent {
    pub phase: Phase,
    pub race_key: RaceKey,
    pub status: RaceStatus,
    pub filled: usize,
    pub conflicting_ranks: Vec<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Emitted once a race has been (re-)finalized.
pub struct RaceFinalizedEvent {
    pub phase: Phase,
    pub record: FinalizationRecord,
    pub was_active: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Emitted after the totals of a phase were recomputed.
pub struct TotalsUpdatedEvent {
    pub phase: Phase,
    #[schema(value_type = std::collections::BTreeMap<String, i32>)]
    pub totals: Totals,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Emitted when the active race of a phase moved.
pub struct ActiveChangedEvent {
    pub phase: Phase,
    /// New active race, `null` once the sequence is exhausted.
    pub race_key: Option<RaceKey>,
}
