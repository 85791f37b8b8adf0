//! Race board reads: active race resolution, effective results, live
//! statuses and store bootstrap.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::{
    config::{AppConfig, PhaseSettings},
    dao::{race::RaceRepository, storage::StorageResult},
    dto::public::{ActiveRaceResponse, RaceBoardResponse, RaceDetailResponse, RaceSummary},
    error::{EngineError, ServiceError},
    services::matrix_service,
    state::{
        SharedState,
        overlay,
        race::{FinalizationRecord, Phase, RaceKey, RankMap},
        sequence::{ActiveResolution, StoredPointer, resolve_active},
        status::{Classification, classify},
    },
};

/// Ranks a race is judged on, with what they were derived from.
#[derive(Debug, Clone, Default)]
pub struct EffectiveResults {
    /// Roster-filtered ranks: live submissions for the active race, history
    /// merged with the overlay for any other race.
    pub ranks: RankMap,
    /// Pending overlay entries (always empty for the active race).
    pub overlay: RankMap,
    pub record: Option<FinalizationRecord>,
}

/// Resolve the active race of a phase together with the finalized flags.
///
/// The pointer is re-read on every call.
pub async fn load_progress(
    repo: &RaceRepository,
    settings: &PhaseSettings,
) -> StorageResult<(ActiveResolution, BTreeMap<RaceKey, bool>)> {
    let stored = repo.read_pointer(settings.phase).await?;
    let finalized = repo.read_finalized_flags(settings.phase).await?;
    let active = resolve_active(settings.phase, &settings.sequence, &stored, &finalized);
    Ok((active, finalized))
}

/// Resolve the active race of a phase.
pub async fn load_active(
    repo: &RaceRepository,
    settings: &PhaseSettings,
) -> StorageResult<ActiveResolution> {
    load_progress(repo, settings).await.map(|(active, _)| active)
}

/// Ranks `race_key` is currently judged on.
pub async fn effective_results(
    repo: &RaceRepository,
    settings: &PhaseSettings,
    race_key: &str,
    active: &ActiveResolution,
) -> StorageResult<EffectiveResults> {
    let phase = settings.phase;
    if active.is_active(race_key) {
        let submissions = repo.read_submissions(phase).await?;
        let record = repo.read_record(phase, race_key).await?;
        return Ok(EffectiveResults {
            ranks: settings.filter_roster(submissions),
            overlay: RankMap::new(),
            record,
        });
    }

    let record = repo.read_record(phase, race_key).await?;
    let overlay = repo.read_overlay(phase, race_key).await?;
    let ranks = settings.filter_roster(overlay::merge(record.as_ref(), &overlay));
    Ok(EffectiveResults {
        ranks,
        overlay,
        record,
    })
}

/// Derive the live status of one race.
pub async fn race_status(
    repo: &RaceRepository,
    settings: &PhaseSettings,
    race_key: &str,
) -> StorageResult<Classification> {
    let active = load_active(repo, settings).await?;
    let results = effective_results(repo, settings, race_key, &active).await?;
    Ok(classify(&results.ranks, settings.grid_size))
}

/// Put the store in a usable shape: default matrices and an initial pointer.
pub async fn bootstrap(repo: &RaceRepository, config: &AppConfig) {
    matrix_service::seed_missing_matrices(repo, config).await;

    for phase in Phase::ALL {
        let settings = config.phase(phase);
        match repo.read_pointer(phase).await {
            Ok(StoredPointer::Missing) => {
                let first = settings.sequence.first().map(|race| race.key.clone());
                match repo.write_pointer(phase, first.clone()).await {
                    Ok(()) => info!(%phase, race_key = ?first, "initialized active pointer"),
                    Err(err) => warn!(%phase, error = %err, "failed to initialize active pointer"),
                }
            }
            Ok(_) => {}
            Err(err) => warn!(%phase, error = %err, "failed to read active pointer"),
        }
    }
}

/// Every race of a phase with its derived status.
pub async fn race_board(state: &SharedState, phase: Phase) -> Result<RaceBoardResponse, ServiceError> {
    let repo = state.repository().await?;
    let settings = state.phase(phase);
    let (active, finalized) = load_progress(&repo, settings).await?;

    let mut races = Vec::with_capacity(settings.sequence.len());
    for race in settings.sequence.iter() {
        let results = effective_results(&repo, settings, &race.key, &active).await?;
        races.push(RaceSummary::new(
            race.key.clone(),
            race.kind,
            finalized.get(&race.key).copied().unwrap_or(false),
            active.is_active(&race.key),
            classify(&results.ranks, settings.grid_size),
        ));
    }

    Ok(RaceBoardResponse {
        phase,
        grid_size: settings.grid_size,
        active_race_key: active.key().map(str::to_string),
        active_source: active.source,
        races,
    })
}

/// Effective results, status and record of one race.
pub async fn race_detail(
    state: &SharedState,
    phase: Phase,
    race_key: &str,
) -> Result<RaceDetailResponse, ServiceError> {
    let settings = state.phase(phase);
    let race = settings
        .sequence
        .get(race_key)
        .ok_or_else(|| EngineError::UnknownRace {
            phase,
            race_key: race_key.to_string(),
        })?;

    let repo = state.repository().await?;
    let active = load_active(&repo, settings).await?;
    let finalized = repo.read_finalized(phase, race_key).await?;
    let results = effective_results(&repo, settings, race_key, &active).await?;
    let classification = classify(&results.ranks, settings.grid_size);

    Ok(RaceDetailResponse {
        phase,
        key: race.key.clone(),
        kind: race.kind,
        grid_size: settings.grid_size,
        finalized,
        active: active.is_active(race_key),
        status: classification.status,
        filled: classification.filled,
        conflicting_ranks: classification.conflicting_ranks,
        results: results
            .ranks
            .into_iter()
            .filter_map(|(pilot, rank)| rank.map(|rank| (pilot, rank)))
            .collect(),
        overlay: results.overlay,
        record: results.record,
    })
}

/// Race currently accepting submissions.
pub async fn active_race(state: &SharedState, phase: Phase) -> Result<ActiveRaceResponse, ServiceError> {
    let repo = state.repository().await?;
    let active = load_active(&repo, state.phase(phase)).await?;
    Ok(ActiveRaceResponse {
        phase,
        race_key: active.key().map(str::to_string),
        kind: active.race.as_ref().map(|race| race.kind),
        source: active.source,
    })
}
