//! Race finalization: snapshot the results of a race, score them, persist the
//! record and move the phase forward.
//!
//! [`finalize`] is the engine. It provides no mutual exclusion; the HTTP entry
//! point [`finalize_race`] adds the per-phase in-flight guard and refuses to
//! finalize the active race twice unless forced.

use std::{collections::BTreeMap, time::SystemTime};

use tracing::{info, warn};

use crate::{
    config::PhaseSettings,
    dao::race::RaceRepository,
    dto::{admin::FinalizeResponse, format_system_time},
    error::{EngineError, ServiceError, WriteStage},
    services::{matrix_service, race_service, sse_events, totals_service},
    state::{
        SharedState,
        points::{MatrixCache, PointsMatrix, PointsOverflow},
        race::{FinalizationRecord, Phase, PilotId, PilotPoints, Race, RaceKey, RankMap, Totals},
        sequence,
        status::classify,
    },
};

/// What a successful finalization wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOutcome {
    pub record: FinalizationRecord,
    /// The race was the active one: submissions were reset and the pointer moved.
    pub was_active: bool,
    /// Active race once the finalization completed.
    pub next_active: Option<RaceKey>,
    pub totals: Totals,
}

/// Finalize `race_key` of the phase described by `settings`.
///
/// Nothing is written unless the source results classify as complete and the
/// points matrix is available. Writes happen in this order: record, flag, then
/// either the submissions reset plus pointer move (active race) or the overlay
/// removal (past race), and finally the totals.
pub async fn finalize(
    repo: &RaceRepository,
    matrices: &MatrixCache,
    settings: &PhaseSettings,
    race_key: &str,
) -> Result<FinalizeOutcome, EngineError> {
    let phase = settings.phase;
    let race = settings
        .sequence
        .get(race_key)
        .cloned()
        .ok_or_else(|| EngineError::UnknownRace {
            phase,
            race_key: race_key.to_string(),
        })?;

    let active = race_service::load_active(repo, settings)
        .await
        .map_err(EngineError::StoreReadFailure)?;
    let was_active = active.is_active(race_key);
    let source = race_service::effective_results(repo, settings, race_key, &active)
        .await
        .map_err(EngineError::StoreReadFailure)?;

    let classification = classify(&source.ranks, settings.grid_size);
    if !classification.is_complete() {
        return Err(EngineError::IncompleteRace {
            phase,
            race_key: race_key.to_string(),
            status: classification.status,
        });
    }

    let matrix = matrix_service::load_matrix(repo, matrices, phase).await?;
    let doubled = repo
        .read_doubled(phase, race_key)
        .await
        .map_err(EngineError::StoreReadFailure)?;

    let record = build_record(
        phase,
        &race,
        settings.grid_size,
        &source.ranks,
        &matrix,
        &doubled,
        format_system_time(SystemTime::now()),
    )?;

    repo.write_record(phase, &record)
        .await
        .map_err(EngineError::write(WriteStage::Record))?;
    repo.write_finalized(phase, race_key, true)
        .await
        .map_err(EngineError::write(WriteStage::Flag))?;

    let next_active = if was_active {
        let next = sequence::advance(&settings.sequence, race_key);
        let pointer = RaceRepository::pointer_write(phase, next.clone())
            .map_err(EngineError::write(WriteStage::ResetAndAdvance))?;
        repo.store()
            .update(vec![RaceRepository::submissions_reset(phase), pointer])
            .await
            .map_err(EngineError::write(WriteStage::ResetAndAdvance))?;
        next
    } else {
        repo.clear_overlay(phase, race_key)
            .await
            .map_err(EngineError::write(WriteStage::ClearOverlay))?;
        active.key().map(str::to_string)
    };

    let totals = totals_service::recompute(repo, settings).await?;

    info!(
        %phase,
        race_key,
        was_active,
        next_active = ?next_active,
        matrix_version = matrix.version,
        "race finalized"
    );

    Ok(FinalizeOutcome {
        record,
        was_active,
        next_active,
        totals,
    })
}

/// Score complete `ranks` of `race` into a record.
fn build_record(
    phase: Phase,
    race: &Race,
    grid_size: u32,
    ranks: &RankMap,
    matrix: &PointsMatrix,
    doubled: &BTreeMap<PilotId, bool>,
    finalized_at: String,
) -> Result<FinalizationRecord, PointsOverflow> {
    let results = ranks
        .iter()
        .filter_map(|(pilot, rank)| {
            let rank = u32::try_from((*rank)?).ok().filter(|rank| *rank > 0)?;
            Some((pilot.clone(), rank))
        })
        .collect::<BTreeMap<_, _>>();

    let points = results
        .iter()
        .map(|(pilot, rank)| {
            let base_points = matrix.resolve(race.kind, *rank);
            let doubled = doubled.get(pilot).copied().unwrap_or(false);
            let final_points = if doubled {
                base_points.checked_mul(2).ok_or_else(|| PointsOverflow {
                    phase,
                    pilot: pilot.clone(),
                })?
            } else {
                base_points
            };
            Ok((
                pilot.clone(),
                PilotPoints {
                    rank: *rank,
                    base_points,
                    doubled,
                    final_points,
                },
            ))
        })
        .collect::<Result<_, PointsOverflow>>()?;

    Ok(FinalizationRecord {
        race_key: race.key.clone(),
        grid_size,
        results,
        points,
        finalized_at: Some(finalized_at),
    })
}

/// Finalize a race on operator request and notify subscribers.
pub async fn finalize_race(
    state: &SharedState,
    phase: Phase,
    race_key: &str,
    force: bool,
) -> Result<FinalizeResponse, ServiceError> {
    let settings = state.phase(phase);
    if !settings.sequence.contains(race_key) {
        return Err(EngineError::UnknownRace {
            phase,
            race_key: race_key.to_string(),
        }
        .into());
    }

    let _guard = state.try_begin_finalize(phase).ok_or_else(|| {
        ServiceError::InvalidState(format!(
            "a finalization of phase {phase} is already in progress"
        ))
    })?;

    let repo = state.repository().await?;
    let active = race_service::load_active(&repo, settings).await?;
    if active.is_active(race_key) && repo.read_finalized(phase, race_key).await? {
        if !force {
            return Err(ServiceError::InvalidState(format!(
                "active race {race_key} is already finalized; retry with force=true to finalize it again"
            )));
        }
        warn!(%phase, race_key, "forcing finalization of an already finalized active race");
    }

    let outcome = finalize(&repo, state.matrices(), settings, race_key).await?;

    sse_events::broadcast_race_finalized(state, phase, &outcome.record, outcome.was_active);
    sse_events::broadcast_totals_updated(state, phase, &outcome.totals);
    if outcome.was_active {
        sse_events::broadcast_active_changed(state, phase, outcome.next_active.clone());
    }

    Ok(FinalizeResponse {
        phase,
        record: outcome.record,
        was_active: outcome.was_active,
        next_active: outcome.next_active,
        totals: outcome.totals,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::store::{KvStore, memory::MemoryStore},
        state::{
            AppState,
            race::{RaceKind, RaceSequence},
            sequence::StoredPointer,
            status::RaceStatus,
        },
    };

    struct Fixture {
        store: MemoryStore,
        repo: RaceRepository,
        matrices: MatrixCache,
        settings: PhaseSettings,
    }

    /// Phase A with a 3-pilot grid and two races, matrix seeded, pointer on "1".
    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let repo = RaceRepository::new(Arc::new(store.clone()));
        let mut settings = PhaseSettings::defaults(Phase::A);
        settings.grid_size = 3;
        settings.sequence = RaceSequence::new(vec![
            Race::new("1", RaceKind::Normal),
            Race::new("2", RaceKind::Normal),
        ])
        .unwrap();
        repo.write_matrix(Phase::A, &PointsMatrix::default_phase_a())
            .await
            .unwrap();
        repo.write_pointer(Phase::A, Some("1".into())).await.unwrap();
        Fixture {
            store,
            repo,
            matrices: MatrixCache::new(),
            settings,
        }
    }

    async fn submit(repo: &RaceRepository, ranks: &[(&str, u32)]) {
        for (pilot, rank) in ranks {
            repo.write_submission(Phase::A, pilot, Some(*rank))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn incomplete_race_writes_nothing() {
        let fx = fixture().await;
        submit(&fx.repo, &[("p1", 1), ("p2", 1), ("p3", 3)]).await;
        let before = fx.store.dump().await;

        let err = finalize(&fx.repo, &fx.matrices, &fx.settings, "1")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::IncompleteRace {
                status: RaceStatus::Conflict,
                ..
            }
        ));
        assert_eq!(fx.store.dump().await, before);
    }

    #[tokio::test]
    async fn unknown_race_is_rejected() {
        let fx = fixture().await;
        let err = finalize(&fx.repo, &fx.matrices, &fx.settings, "survival-final")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownRace { .. }));
    }

    #[tokio::test]
    async fn missing_matrix_aborts_before_writing() {
        let fx = fixture().await;
        fx.store
            .write("pointsMatrix/A", serde_json::Value::Null)
            .await
            .unwrap();
        submit(&fx.repo, &[("p1", 1), ("p2", 2), ("p3", 3)]).await;

        let err = finalize(&fx.repo, &fx.matrices, &fx.settings, "1")
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::MatrixUnavailable { .. }));
        assert!(!fx.repo.read_finalized(Phase::A, "1").await.unwrap());
        assert!(fx.repo.read_record(Phase::A, "1").await.unwrap().is_none());
        assert_eq!(fx.repo.read_submissions(Phase::A).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn active_race_is_recorded_reset_and_advanced() {
        let fx = fixture().await;
        submit(&fx.repo, &[("p1", 1), ("p2", 2), ("p3", 3)]).await;
        fx.repo
            .write_doubled(Phase::A, "1", "p3", true)
            .await
            .unwrap();

        let outcome = finalize(&fx.repo, &fx.matrices, &fx.settings, "1")
            .await
            .unwrap();

        assert!(outcome.was_active);
        assert_eq!(outcome.next_active.as_deref(), Some("2"));
        assert_eq!(outcome.record.points["p1"].final_points, 15);
        assert_eq!(outcome.record.points["p3"].base_points, 10);
        assert_eq!(outcome.record.points["p3"].final_points, 20);
        assert!(outcome.record.finalized_at.is_some());

        assert_eq!(
            fx.repo.read_record(Phase::A, "1").await.unwrap().as_ref(),
            Some(&outcome.record)
        );
        assert!(fx.repo.read_finalized(Phase::A, "1").await.unwrap());
        assert!(fx.repo.read_submissions(Phase::A).await.unwrap().is_empty());
        assert_eq!(
            fx.repo.read_pointer(Phase::A).await.unwrap(),
            StoredPointer::Race("2".into())
        );
        assert_eq!(
            fx.repo.read_totals(Phase::A).await.unwrap(),
            Totals::from([
                ("p1".to_string(), 15),
                ("p2".to_string(), 12),
                ("p3".to_string(), 20),
            ])
        );
    }

    #[tokio::test]
    async fn last_race_exhausts_the_sequence() {
        let fx = fixture().await;
        fx.repo.write_pointer(Phase::A, Some("2".into())).await.unwrap();
        submit(&fx.repo, &[("p1", 3), ("p2", 2), ("p3", 1)]).await;

        let outcome = finalize(&fx.repo, &fx.matrices, &fx.settings, "2")
            .await
            .unwrap();

        assert_eq!(outcome.next_active, None);
        assert_eq!(
            fx.repo.read_pointer(Phase::A).await.unwrap(),
            StoredPointer::Exhausted
        );
        let active = race_service::load_active(&fx.repo, &fx.settings)
            .await
            .unwrap();
        assert_eq!(active.key(), None);
    }

    #[tokio::test]
    async fn refinalization_replaces_the_record_and_clears_the_overlay() {
        let fx = fixture().await;
        submit(&fx.repo, &[("p1", 1), ("p2", 2), ("p3", 3)]).await;
        finalize(&fx.repo, &fx.matrices, &fx.settings, "1")
            .await
            .unwrap();

        fx.repo
            .write_overlay_entry(Phase::A, "1", "p1", Some(2))
            .await
            .unwrap();
        fx.repo
            .write_overlay_entry(Phase::A, "1", "p2", Some(1))
            .await
            .unwrap();

        let outcome = finalize(&fx.repo, &fx.matrices, &fx.settings, "1")
            .await
            .unwrap();

        assert!(!outcome.was_active);
        assert_eq!(outcome.next_active.as_deref(), Some("2"));
        assert_eq!(outcome.record.results["p2"], 1);
        assert_eq!(outcome.record.points["p2"].final_points, 15);
        assert_eq!(outcome.record.points["p1"].final_points, 12);
        assert!(fx.repo.read_overlay(Phase::A, "1").await.unwrap().is_empty());
        assert_eq!(
            fx.repo.read_pointer(Phase::A).await.unwrap(),
            StoredPointer::Race("2".into())
        );
        assert_eq!(outcome.totals.get("p2"), Some(&15));
    }

    #[tokio::test]
    async fn refinalization_drops_pilots_cleared_by_the_overlay() {
        let fx = fixture().await;
        submit(&fx.repo, &[("p1", 1), ("p2", 2), ("p3", 3)]).await;
        finalize(&fx.repo, &fx.matrices, &fx.settings, "1")
            .await
            .unwrap();

        fx.repo
            .write_overlay_entry(Phase::A, "1", "p3", None)
            .await
            .unwrap();
        fx.repo
            .write_overlay_entry(Phase::A, "1", "p4", Some(3))
            .await
            .unwrap();

        let outcome = finalize(&fx.repo, &fx.matrices, &fx.settings, "1")
            .await
            .unwrap();

        let stored = fx.repo.read_record(Phase::A, "1").await.unwrap().unwrap();
        assert_eq!(stored, outcome.record);
        assert!(!stored.results.contains_key("p3"));
        assert!(!stored.points.contains_key("p3"));
        assert_eq!(stored.points["p4"].final_points, 10);

        let expected = Totals::from([
            ("p1".to_string(), 15),
            ("p2".to_string(), 12),
            ("p4".to_string(), 10),
        ]);
        assert_eq!(outcome.totals, expected);
        assert_eq!(fx.repo.read_totals(Phase::A).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn conflicting_overlay_on_a_past_race_writes_nothing() {
        let fx = fixture().await;
        submit(&fx.repo, &[("p1", 1), ("p2", 2), ("p3", 3)]).await;
        let first = finalize(&fx.repo, &fx.matrices, &fx.settings, "1")
            .await
            .unwrap();

        fx.repo
            .write_overlay_entry(Phase::A, "1", "p1", Some(2))
            .await
            .unwrap();
        let before = fx.store.dump().await;

        let err = finalize(&fx.repo, &fx.matrices, &fx.settings, "1")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::IncompleteRace {
                status: RaceStatus::Conflict,
                ..
            }
        ));
        assert_eq!(fx.store.dump().await, before);
        assert_eq!(
            fx.repo.read_overlay(Phase::A, "1").await.unwrap(),
            RankMap::from([("p1".to_string(), Some(2))])
        );
        assert_eq!(
            fx.repo.read_record(Phase::A, "1").await.unwrap(),
            Some(first.record)
        );
        assert!(fx.repo.read_finalized(Phase::A, "1").await.unwrap());
    }

    #[tokio::test]
    async fn overflowing_doubled_points_abort_before_writing() {
        let fx = fixture().await;
        let huge: PointsMatrix = serde_json::from_str(r#"{"ranks":{"1":2147483647}}"#).unwrap();
        fx.repo.write_matrix(Phase::A, &huge).await.unwrap();
        submit(&fx.repo, &[("p1", 1), ("p2", 2), ("p3", 3)]).await;
        fx.repo
            .write_doubled(Phase::A, "1", "p1", true)
            .await
            .unwrap();
        let before = fx.store.dump().await;

        let err = finalize(&fx.repo, &fx.matrices, &fx.settings, "1")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::PointsOverflow(PointsOverflow { phase: Phase::A, ref pilot }) if pilot == "p1"
        ));
        assert_eq!(fx.store.dump().await, before);
    }

    #[tokio::test]
    async fn doubled_flags_apply_on_refinalization_only() {
        let fx = fixture().await;
        submit(&fx.repo, &[("p1", 1), ("p2", 2), ("p3", 3)]).await;
        finalize(&fx.repo, &fx.matrices, &fx.settings, "1")
            .await
            .unwrap();

        fx.repo
            .write_doubled(Phase::A, "1", "p2", true)
            .await
            .unwrap();
        let stored = fx.repo.read_record(Phase::A, "1").await.unwrap().unwrap();
        assert_eq!(stored.points["p2"].final_points, 12);

        let outcome = finalize(&fx.repo, &fx.matrices, &fx.settings, "1")
            .await
            .unwrap();
        assert_eq!(outcome.record.points["p2"].final_points, 24);
    }

    #[tokio::test]
    async fn failed_flag_write_keeps_submissions() {
        let fx = fixture().await;
        submit(&fx.repo, &[("p1", 1), ("p2", 2), ("p3", 3)]).await;
        fx.store.fail_writes_after(1);

        let err = finalize(&fx.repo, &fx.matrices, &fx.settings, "1")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::StoreWriteFailure {
                stage: WriteStage::Flag,
                ..
            }
        ));
        fx.store.heal();
        assert!(fx.repo.read_record(Phase::A, "1").await.unwrap().is_some());
        assert!(!fx.repo.read_finalized(Phase::A, "1").await.unwrap());
        assert_eq!(fx.repo.read_submissions(Phase::A).await.unwrap().len(), 3);

        let outcome = finalize(&fx.repo, &fx.matrices, &fx.settings, "1")
            .await
            .unwrap();
        assert_eq!(outcome.next_active.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn default_phase_a_first_race_end_to_end() {
        let store = MemoryStore::new();
        let repo = RaceRepository::new(Arc::new(store));
        let config = AppConfig::default();
        race_service::bootstrap(&repo, &config).await;
        let settings = config.phase(Phase::A);

        for rank in 1..=12u32 {
            repo.write_submission(Phase::A, &format!("p{rank:02}"), Some(rank))
                .await
                .unwrap();
        }

        let outcome = finalize(&repo, &MatrixCache::new(), settings, "1")
            .await
            .unwrap();

        assert_eq!(outcome.record.points["p01"].final_points, 15);
        assert_eq!(outcome.record.points["p12"].final_points, 1);
        assert_eq!(outcome.totals["p01"], 15);
        assert_eq!(outcome.next_active.as_deref(), Some("2"));
    }

    #[test]
    fn unknown_ranks_score_zero() {
        let race = Race::new("1", RaceKind::Normal);
        let ranks = RankMap::from([("p1".to_string(), Some(1)), ("p2".to_string(), Some(40))]);
        let record = build_record(
            Phase::A,
            &race,
            2,
            &ranks,
            &PointsMatrix::default_phase_a(),
            &BTreeMap::new(),
            "2026-01-01T00:00:00Z".into(),
        )
        .unwrap();
        assert_eq!(record.points["p2"].base_points, 0);
        assert_eq!(record.points["p1"].base_points, 15);
    }

    async fn service_state() -> (SharedState, MemoryStore) {
        let store = MemoryStore::new();
        let state = AppState::new(AppConfig::default());
        state.set_store(Arc::new(store.clone())).await;
        race_service::bootstrap(&state.repository().await.unwrap(), state.config()).await;
        (state, store)
    }

    #[tokio::test]
    async fn concurrent_finalize_of_a_phase_is_rejected() {
        let (state, _store) = service_state().await;
        let _held = state.try_begin_finalize(Phase::A).unwrap();

        let err = finalize_race(&state, Phase::A, "1", false).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn finalized_active_race_needs_force() {
        let (state, store) = service_state().await;
        let repo = state.repository().await.unwrap();
        for rank in 1..=12u32 {
            repo.write_submission(Phase::A, &format!("p{rank}"), Some(rank))
                .await
                .unwrap();
        }

        // Record and flag land, the reset/advance batch does not.
        store.fail_writes_after(2);
        let err = finalize_race(&state, Phase::A, "1", false).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Engine(EngineError::StoreWriteFailure {
                stage: WriteStage::ResetAndAdvance,
                ..
            })
        ));
        store.heal();

        let err = finalize_race(&state, Phase::A, "1", false).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        let response = finalize_race(&state, Phase::A, "1", true).await.unwrap();
        assert!(response.was_active);
        assert_eq!(response.next_active.as_deref(), Some("2"));
    }
}
