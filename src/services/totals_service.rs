use tracing::info;

use crate::{
    config::PhaseSettings,
    dao::race::RaceRepository,
    dto::public::TotalsResponse,
    error::{EngineError, ServiceError, WriteStage},
    services::sse_events,
    state::{SharedState, race::Phase, race::Totals, totals::compute_totals},
};

/// Recompute the totals of a phase from every record and award, then store them.
pub async fn recompute(
    repo: &RaceRepository,
    settings: &PhaseSettings,
) -> Result<Totals, EngineError> {
    let phase = settings.phase;
    let history = repo
        .read_history(phase)
        .await
        .map_err(EngineError::StoreReadFailure)?;
    let awards = repo
        .read_bonus_awards(phase)
        .await
        .map_err(EngineError::StoreReadFailure)?;

    let totals = compute_totals(phase, history.values(), &awards, &settings.award_values)?;
    repo.write_totals(phase, &totals)
        .await
        .map_err(EngineError::write(WriteStage::Totals))?;

    info!(%phase, records = history.len(), pilots = totals.len(), "totals recomputed");
    Ok(totals)
}

/// Recompute totals on demand and notify subscribers.
pub async fn recompute_totals(
    state: &SharedState,
    phase: Phase,
) -> Result<TotalsResponse, ServiceError> {
    let repo = state.repository().await?;
    let totals = recompute(&repo, state.phase(phase)).await?;
    sse_events::broadcast_totals_updated(state, phase, &totals);
    Ok(TotalsResponse { phase, totals })
}

/// Stored totals of a phase.
pub async fn totals(state: &SharedState, phase: Phase) -> Result<TotalsResponse, ServiceError> {
    let repo = state.repository().await?;
    let totals = repo.read_totals(phase).await?;
    Ok(TotalsResponse { phase, totals })
}
