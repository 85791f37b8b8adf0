use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, put},
};
use axum_valid::Valid;

use crate::{
    dto::public::{
        ActiveRaceResponse, PhasePath, RaceBoardResponse, RaceDetailResponse, RacePath,
        SubmissionPath, SubmissionResponse, SubmitRankRequest, TotalsResponse,
    },
    error::AppError,
    services::{race_service, submission_service, totals_service},
    state::SharedState,
};

/// Read views of the race progression plus pilot submissions.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/public/phases/{phase}/races", get(get_race_board))
        .route("/public/phases/{phase}/races/{race_key}", get(get_race_detail))
        .route("/public/phases/{phase}/active", get(get_active_race))
        .route("/public/phases/{phase}/totals", get(get_totals))
        .route(
            "/public/phases/{phase}/submissions/{pilot_id}",
            put(submit_rank),
        )
}

#[utoipa::path(
    get,
    path = "/public/phases/{phase}/races",
    tag = "public",
    params(("phase" = String, Path, description = "Phase identifier (A or B)")),
    responses(
        (status = 200, description = "Every race of the phase with its status", body = RaceBoardResponse),
        (status = 503, description = "Store unavailable")
    )
)]
/// List the races of a phase in order, with their live status.
pub async fn get_race_board(
    State(state): State<SharedState>,
    Path(PhasePath { phase }): Path<PhasePath>,
) -> Result<Json<RaceBoardResponse>, AppError> {
    Ok(Json(race_service::race_board(&state, phase).await?))
}

#[utoipa::path(
    get,
    path = "/public/phases/{phase}/races/{race_key}",
    tag = "public",
    params(
        ("phase" = String, Path, description = "Phase identifier (A or B)"),
        ("race_key" = String, Path, description = "Race key within the phase")
    ),
    responses(
        (status = 200, description = "Effective results and status of the race", body = RaceDetailResponse),
        (status = 404, description = "Race not part of the phase")
    )
)]
/// Return the effective results, pending corrections and record of a race.
pub async fn get_race_detail(
    State(state): State<SharedState>,
    Path(RacePath { phase, race_key }): Path<RacePath>,
) -> Result<Json<RaceDetailResponse>, AppError> {
    Ok(Json(race_service::race_detail(&state, phase, &race_key).await?))
}

#[utoipa::path(
    get,
    path = "/public/phases/{phase}/active",
    tag = "public",
    params(("phase" = String, Path, description = "Phase identifier (A or B)")),
    responses((status = 200, description = "Race accepting submissions", body = ActiveRaceResponse))
)]
/// Return the race currently accepting submissions.
pub async fn get_active_race(
    State(state): State<SharedState>,
    Path(PhasePath { phase }): Path<PhasePath>,
) -> Result<Json<ActiveRaceResponse>, AppError> {
    Ok(Json(race_service::active_race(&state, phase).await?))
}

#[utoipa::path(
    get,
    path = "/public/phases/{phase}/totals",
    tag = "public",
    params(("phase" = String, Path, description = "Phase identifier (A or B)")),
    responses((status = 200, description = "Stored totals of the phase", body = TotalsResponse))
)]
/// Return the stored per-pilot totals of a phase.
pub async fn get_totals(
    State(state): State<SharedState>,
    Path(PhasePath { phase }): Path<PhasePath>,
) -> Result<Json<TotalsResponse>, AppError> {
    Ok(Json(totals_service::totals(&state, phase).await?))
}

#[utoipa::path(
    put,
    path = "/public/phases/{phase}/submissions/{pilot_id}",
    tag = "public",
    params(
        ("phase" = String, Path, description = "Phase identifier (A or B)"),
        ("pilot_id" = String, Path, description = "Pilot submitting their rank")
    ),
    request_body = SubmitRankRequest,
    responses(
        (status = 200, description = "Rank stored", body = SubmissionResponse),
        (status = 400, description = "Rank out of range or pilot not on the roster"),
        (status = 409, description = "No active race, or the client targets a stale race")
    )
)]
/// Store a pilot's rank for the active race.
pub async fn submit_rank(
    State(state): State<SharedState>,
    Valid(Path(SubmissionPath { phase, pilot_id })): Valid<Path<SubmissionPath>>,
    Valid(Json(payload)): Valid<Json<SubmitRankRequest>>,
) -> Result<Json<SubmissionResponse>, AppError> {
    Ok(Json(
        submission_service::submit_rank(&state, phase, &pilot_id, payload).await?,
    ))
}
