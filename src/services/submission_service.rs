//! Pilot submissions and operator corrections: overlay ranks, doubled flags
//! and bonus awards.

use tracing::{debug, info};

use crate::{
    config::PhaseSettings,
    dto::{
        admin::ActionResponse,
        public::{RaceDetailResponse, SubmissionResponse, SubmitRankRequest, TotalsResponse},
    },
    error::{EngineError, ServiceError},
    services::{race_service, sse_events, totals_service},
    state::{SharedState, race::Phase, status::classify},
};

/// Record a pilot's rank for the active race of `phase`.
pub async fn submit_rank(
    state: &SharedState,
    phase: Phase,
    pilot_id: &str,
    request: SubmitRankRequest,
) -> Result<SubmissionResponse, ServiceError> {
    let settings = state.phase(phase);
    check_pilot(settings, pilot_id)?;
    check_rank(settings, request.rank)?;

    let repo = state.repository().await?;
    let active = race_service::load_active(&repo, settings).await?;
    let Some(race) = active.race.as_ref() else {
        return Err(ServiceError::InvalidState(format!(
            "every race of phase {phase} has been run"
        )));
    };
    if let Some(expected) = request.race_key.as_deref() {
        if expected != race.key {
            return Err(ServiceError::InvalidState(format!(
                "race {expected} no longer accepts submissions; active race is {}",
                race.key
            )));
        }
    }

    repo.write_submission(phase, pilot_id, request.rank).await?;
    debug!(%phase, race_key = %race.key, pilot_id, rank = ?request.rank, "rank submitted");

    let submissions = settings.filter_roster(repo.read_submissions(phase).await?);
    let classification = classify(&submissions, settings.grid_size);

    Ok(SubmissionResponse {
        phase,
        race_key: race.key.clone(),
        pilot_id: pilot_id.to_string(),
        rank: request.rank,
        status: classification.status,
        filled: classification.filled,
        conflicting_ranks: classification.conflicting_ranks,
    })
}

/// Correct one pilot's rank of a finalized race. Takes effect on re-finalization.
pub async fn set_overlay_rank(
    state: &SharedState,
    phase: Phase,
    race_key: &str,
    pilot_id: &str,
    rank: Option<u32>,
) -> Result<RaceDetailResponse, ServiceError> {
    let settings = state.phase(phase);
    check_race(settings, race_key)?;
    check_pilot(settings, pilot_id)?;
    check_rank(settings, rank)?;

    let repo = state.repository().await?;
    if !repo.read_finalized(phase, race_key).await? {
        return Err(ServiceError::InvalidState(format!(
            "race {race_key} of phase {phase} is not finalized; corrections only apply to past races"
        )));
    }

    repo.write_overlay_entry(phase, race_key, pilot_id, rank)
        .await?;
    info!(%phase, race_key, pilot_id, rank = ?rank, "overlay entry written");

    race_service::race_detail(state, phase, race_key).await
}

/// Flag a pilot's points as doubled for a race. Records are only affected by
/// the next (re-)finalization of that race.
pub async fn set_doubled(
    state: &SharedState,
    phase: Phase,
    race_key: &str,
    pilot_id: &str,
    doubled: bool,
) -> Result<ActionResponse, ServiceError> {
    let settings = state.phase(phase);
    check_race(settings, race_key)?;
    check_pilot(settings, pilot_id)?;

    let repo = state.repository().await?;
    repo.write_doubled(phase, race_key, pilot_id, doubled)
        .await?;
    info!(%phase, race_key, pilot_id, doubled, "doubled flag written");

    let finalized = repo.read_finalized(phase, race_key).await?;
    let message = if finalized {
        format!("doubled flag stored; finalize race {race_key} again to apply it")
    } else {
        "doubled flag stored".to_string()
    };
    Ok(ActionResponse::new(message))
}

/// Give a bonus award to a pilot (or unset it) and recompute totals.
pub async fn set_bonus_award(
    state: &SharedState,
    phase: Phase,
    award: &str,
    pilot_id: Option<String>,
) -> Result<TotalsResponse, ServiceError> {
    let settings = state.phase(phase);
    if !settings.award_values.contains_key(award) {
        return Err(ServiceError::InvalidInput(format!(
            "award `{award}` is not configured for phase {phase}"
        )));
    }
    if let Some(ref pilot_id) = pilot_id {
        check_pilot(settings, pilot_id)?;
    }

    let repo = state.repository().await?;
    repo.write_bonus_award(phase, award, pilot_id.clone()).await?;
    info!(%phase, award, pilot_id = ?pilot_id, "bonus award written");

    let totals = totals_service::recompute(&repo, settings).await?;
    sse_events::broadcast_totals_updated(state, phase, &totals);
    Ok(TotalsResponse { phase, totals })
}

fn check_race(settings: &PhaseSettings, race_key: &str) -> Result<(), ServiceError> {
    if settings.sequence.contains(race_key) {
        Ok(())
    } else {
        Err(EngineError::UnknownRace {
            phase: settings.phase,
            race_key: race_key.to_string(),
        }
        .into())
    }
}

fn check_pilot(settings: &PhaseSettings, pilot_id: &str) -> Result<(), ServiceError> {
    if settings.accepts_pilot(pilot_id) {
        Ok(())
    } else {
        Err(ServiceError::InvalidInput(format!(
            "pilot `{pilot_id}` is not on the roster of phase {}",
            settings.phase
        )))
    }
}

fn check_rank(settings: &PhaseSettings, rank: Option<u32>) -> Result<(), ServiceError> {
    match rank {
        Some(rank) if rank == 0 || rank > settings.grid_size => {
            Err(ServiceError::InvalidInput(format!(
                "rank must be between 1 and {} (got {rank})",
                settings.grid_size
            )))
        }
        _ => Ok(()),
    }
}
