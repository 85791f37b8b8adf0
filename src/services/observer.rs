//! Reactions to store change notifications, whoever wrote the change.

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::{
    dao::{paths, race::RaceRepository, store::StoreChange},
    error::ServiceError,
    services::{race_service, sse_events, totals_service},
    state::{SharedState, race::Phase},
};

/// Follow the change feed of whichever store is installed, resubscribing when
/// the supervisor swaps or drops it.
pub async fn run(state: SharedState) {
    let mut degraded = state.degraded_watcher();

    loop {
        let Some(store) = state.store().await else {
            if degraded.changed().await.is_err() {
                return;
            }
            continue;
        };

        let mut changes = store.subscribe();
        info!(store = store.name(), "observing store changes");

        loop {
            tokio::select! {
                changed = degraded.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                received = changes.recv() => match received {
                    Ok(change) => handle_change(&state, &change).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "store change feed lagging; refreshing every phase");
                        for phase in Phase::ALL {
                            refresh_phase(&state, phase).await;
                        }
                    }
                    Err(RecvError::Closed) => {
                        if degraded.changed().await.is_err() {
                            return;
                        }
                        break;
                    }
                },
            }
        }
    }
}

/// Mirror degraded mode transitions on both SSE streams.
pub async fn forward_system_status(state: SharedState) {
    let mut degraded = state.degraded_watcher();
    while degraded.changed().await.is_ok() {
        let value = *degraded.borrow_and_update();
        sse_events::broadcast_system_status(&state, value);
    }
}

/// Dispatch one change notification.
pub async fn handle_change(state: &SharedState, change: &StoreChange) {
    let Some((root, phase, rest)) = paths::parse(&change.path) else {
        return;
    };

    let outcome = match root {
        paths::SUBMISSIONS => refresh_active_status(state, phase).await,
        paths::EDIT_OVERLAY => match rest.first() {
            Some(race_key) => refresh_status(state, phase, race_key).await,
            None => refresh_all_statuses(state, phase).await,
        },
        paths::HISTORY | paths::BONUS_AWARDS => refresh_totals(state, phase).await,
        paths::POINTS_MATRIX => {
            state.matrices().invalidate(phase);
            Ok(())
        }
        _ => Ok(()),
    };

    if let Err(err) = outcome {
        warn!(path = %change.path, error = %err, "failed to react to store change");
    }
}

async fn refresh_phase(state: &SharedState, phase: Phase) {
    state.matrices().invalidate(phase);
    if let Err(err) = refresh_all_statuses(state, phase).await {
        warn!(%phase, error = %err, "failed to refresh race statuses");
    }
    if let Err(err) = refresh_totals(state, phase).await {
        warn!(%phase, error = %err, "failed to refresh totals");
    }
}

async fn refresh_active_status(state: &SharedState, phase: Phase) -> Result<(), ServiceError> {
    let repo = state.repository().await?;
    let active = race_service::load_active(&repo, state.phase(phase)).await?;
    match active.key() {
        Some(race_key) => publish_status(state, &repo, phase, race_key).await,
        None => Ok(()),
    }
}

async fn refresh_status(
    state: &SharedState,
    phase: Phase,
    race_key: &str,
) -> Result<(), ServiceError> {
    if !state.phase(phase).sequence.contains(race_key) {
        debug!(%phase, race_key, "change for a race outside the sequence; ignoring it");
        return Ok(());
    }
    let repo = state.repository().await?;
    publish_status(state, &repo, phase, race_key).await
}

async fn refresh_all_statuses(state: &SharedState, phase: Phase) -> Result<(), ServiceError> {
    let repo = state.repository().await?;
    for race in state.phase(phase).sequence.iter() {
        publish_status(state, &repo, phase, &race.key).await?;
    }
    Ok(())
}

async fn publish_status(
    state: &SharedState,
    repo: &RaceRepository,
    phase: Phase,
    race_key: &str,
) -> Result<(), ServiceError> {
    let classification = race_service::race_status(repo, state.phase(phase), race_key).await?;
    sse_events::broadcast_race_status(state, phase, race_key, &classification);
    Ok(())
}

async fn refresh_totals(state: &SharedState, phase: Phase) -> Result<(), ServiceError> {
    let repo = state.repository().await?;
    let totals = totals_service::recompute(&repo, state.phase(phase)).await?;
    sse_events::broadcast_totals_updated(state, phase, &totals);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use serde_json::Value;
    use tokio::time::timeout;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::store::{KvStore, memory::MemoryStore},
        dto::sse::ServerEvent,
        state::{AppState, points::PointsMatrix},
    };

    async fn state() -> SharedState {
        let state = AppState::new(AppConfig::default());
        state.set_store(Arc::new(MemoryStore::new())).await;
        let repo = state.repository().await.unwrap();
        race_service::bootstrap(&repo, state.config()).await;
        state
    }

    fn change(path: &str) -> StoreChange {
        StoreChange {
            path: path.to_string(),
        }
    }

    fn payload(event: &ServerEvent) -> Value {
        serde_json::from_str(&event.data).unwrap()
    }

    #[tokio::test]
    async fn submission_changes_publish_the_active_status() {
        let state = state().await;
        let mut public = state.public_sse().subscribe();
        let repo = state.repository().await.unwrap();
        repo.write_submission(Phase::A, "p1", Some(4)).await.unwrap();

        handle_change(&state, &change("submissions/A/current/p1")).await;

        let event = public.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some("race.status"));
        let data = payload(&event);
        assert_eq!(data["raceKey"], "1");
        assert_eq!(data["status"], "filled");
        assert_eq!(data["filled"], 1);
    }

    #[tokio::test]
    async fn award_changes_recompute_totals() {
        let state = state().await;
        let mut public = state.public_sse().subscribe();
        let repo = state.repository().await.unwrap();
        repo.write_bonus_award(Phase::B, "public_vote", Some("p9".into()))
            .await
            .unwrap();

        handle_change(&state, &change("bonusAwards/B/public_vote")).await;

        let event = public.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some("totals.updated"));
        assert_eq!(payload(&event)["totals"]["p9"], 10);
        assert_eq!(repo.read_totals(Phase::B).await.unwrap().get("p9"), Some(&10));
    }

    #[tokio::test]
    async fn matrix_changes_drop_the_cache() {
        let state = state().await;
        state
            .matrices()
            .insert(Phase::A, PointsMatrix::default_phase_a());

        handle_change(&state, &change("pointsMatrix/A")).await;

        assert!(state.matrices().get(Phase::A).is_none());
    }

    #[tokio::test]
    async fn observer_follows_the_installed_store() {
        let store = MemoryStore::new();
        let state = AppState::new(AppConfig::default());
        let mut public = state.public_sse().subscribe();
        tokio::spawn(run(state.clone()));

        state.set_store(Arc::new(store.clone())).await;
        let repo = state.repository().await.unwrap();
        race_service::bootstrap(&repo, state.config()).await;

        // The observer subscribes asynchronously; keep writing until it reacts.
        let received = timeout(Duration::from_secs(5), async {
            loop {
                store
                    .write("editOverlay/A/1/p1", serde_json::json!({ "rank": 1 }))
                    .await
                    .unwrap();
                match timeout(Duration::from_millis(50), public.recv()).await {
                    Ok(Ok(event)) if event.event.as_deref() == Some("race.status") => {
                        break event;
                    }
                    _ => continue,
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(payload(&received)["raceKey"], "1");
    }
}
