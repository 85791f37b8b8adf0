use serde::Serialize;
use tracing::warn;

use crate::{
    dto::sse::{
        ActiveChangedEvent, RaceFinalizedEvent, RaceStatusEvent, ServerEvent, SystemStatus,
        TotalsUpdatedEvent,
    },
    state::{
        SharedState,
        race::{FinalizationRecord, Phase, RaceKey, Totals},
        status::Classification,
    },
};

const EVENT_RACE_STATUS: &str = "race.status";
const EVENT_RACE_FINALIZED: &str = "race.finalized";
const EVENT_TOTALS_UPDATED: &str = "totals.updated";
const EVENT_ACTIVE_CHANGED: &str = "active.changed";
const EVENT_SYSTEM_STATUS: &str = "system.status";

/// Broadcast the freshly derived status of a race.
pub fn broadcast_race_status(
    state: &SharedState,
    phase: Phase,
    race_key: &str,
    classification: &Classification,
) {
    let payload = RaceStatusEvent {
        phase,
        race_key: race_key.to_string(),
        status: classification.status,
        filled: classification.filled,
        conflicting_ranks: classification.conflicting_ranks.clone(),
    };
    send_public_event(state, EVENT_RACE_STATUS, &payload);
    send_admin_event(state, EVENT_RACE_STATUS, &payload);
}

/// Broadcast a (re-)finalized race record.
pub fn broadcast_race_finalized(
    state: &SharedState,
    phase: Phase,
    record: &FinalizationRecord,
    was_active: bool,
) {
    let payload = RaceFinalizedEvent {
        phase,
        record: record.clone(),
        was_active,
    };
    send_public_event(state, EVENT_RACE_FINALIZED, &payload);
    send_admin_event(state, EVENT_RACE_FINALIZED, &payload);
}

/// Broadcast the recomputed totals of a phase.
pub fn broadcast_totals_updated(state: &SharedState, phase: Phase, totals: &Totals) {
    let payload = TotalsUpdatedEvent {
        phase,
        totals: totals.clone(),
    };
    send_public_event(state, EVENT_TOTALS_UPDATED, &payload);
}

/// Broadcast that the active race of a phase moved.
pub fn broadcast_active_changed(state: &SharedState, phase: Phase, race_key: Option<RaceKey>) {
    let payload = ActiveChangedEvent { phase, race_key };
    send_public_event(state, EVENT_ACTIVE_CHANGED, &payload);
    send_admin_event(state, EVENT_ACTIVE_CHANGED, &payload);
}

/// Broadcast the degraded flag on both streams.
pub fn broadcast_system_status(state: &SharedState, degraded: bool) {
    let payload = SystemStatus { degraded };
    send_public_event(state, EVENT_SYSTEM_STATUS, &payload);
    send_admin_event(state, EVENT_SYSTEM_STATUS, &payload);
}

fn send_public_event(state: &SharedState, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.public_sse().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize public SSE payload"),
    }
}

fn send_admin_event(state: &SharedState, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.admin_sse().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize admin SSE payload"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        state::{AppState, status::RaceStatus},
    };

    #[tokio::test]
    async fn race_status_reaches_both_streams() {
        let state = AppState::new(AppConfig::default());
        let mut public = state.public_sse().subscribe();
        let mut admin = state.admin_sse().subscribe();

        let classification = Classification {
            status: RaceStatus::Conflict,
            filled: 3,
            conflicting_ranks: vec![2],
        };
        broadcast_race_status(&state, Phase::A, "4", &classification);

        for receiver in [&mut public, &mut admin] {
            let event = receiver.recv().await.unwrap();
            assert_eq!(event.event.as_deref(), Some(EVENT_RACE_STATUS));
            let data: serde_json::Value = serde_json::from_str(&event.data).unwrap();
            assert_eq!(data["raceKey"], "4");
            assert_eq!(data["status"], "conflict");
            assert_eq!(data["conflictingRanks"], serde_json::json!([2]));
        }
    }

    #[tokio::test]
    async fn totals_are_public_only() {
        let state = AppState::new(AppConfig::default());
        let mut public = state.public_sse().subscribe();
        let mut admin = state.admin_sse().subscribe();

        broadcast_totals_updated(&state, Phase::B, &Totals::from([("p1".to_string(), 40)]));

        let event = public.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some(EVENT_TOTALS_UPDATED));
        assert!(admin.try_recv().is_err());
    }
}
