use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{post, put},
};
use axum_valid::Valid;

use crate::{
    dto::{
        admin::{
            ActionResponse, AwardPath, BonusAwardRequest, DoubledRequest, FinalizeQuery,
            FinalizeResponse, MatrixResponse, OverlayRankRequest, RacePilotPath,
        },
        public::{PhasePath, RaceDetailResponse, RacePath, TotalsResponse},
    },
    error::AppError,
    services::{finalize_service, matrix_service, submission_service, totals_service},
    state::{SharedState, points::PointsMatrix},
};

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Operator endpoints: finalization, corrections, awards and matrices.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route(
            "/admin/phases/{phase}/races/{race_key}/finalize",
            post(finalize_race),
        )
        .route(
            "/admin/phases/{phase}/races/{race_key}/overlay/{pilot_id}",
            put(set_overlay_rank),
        )
        .route(
            "/admin/phases/{phase}/races/{race_key}/doubled/{pilot_id}",
            put(set_doubled),
        )
        .route("/admin/phases/{phase}/totals/recompute", post(recompute_totals))
        .route("/admin/phases/{phase}/awards/{award}", put(set_bonus_award))
        .route("/admin/phases/{phase}/matrix", put(replace_matrix))
        .route("/admin/phases/{phase}/matrix/reload", post(reload_matrix))
        .route_layer(middleware::from_fn_with_state(state, require_admin_token))
}

/// Finalize a race: write its record, advance the sequence and recompute totals.
#[utoipa::path(
    post,
    path = "/admin/phases/{phase}/races/{race_key}/finalize",
    tag = "admin",
    params(
        ("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream"),
        ("phase" = String, Path, description = "Phase identifier (A or B)"),
        ("race_key" = String, Path, description = "Race to finalize"),
        FinalizeQuery
    ),
    responses(
        (status = 200, description = "Race finalized", body = FinalizeResponse),
        (status = 404, description = "Race not part of the phase"),
        (status = 409, description = "Race incomplete, already finalized or a finalization is running"),
        (status = 503, description = "Points matrix or store unavailable")
    )
)]
pub async fn finalize_race(
    State(state): State<SharedState>,
    Path(RacePath { phase, race_key }): Path<RacePath>,
    Query(query): Query<FinalizeQuery>,
) -> Result<Json<FinalizeResponse>, AppError> {
    Ok(Json(
        finalize_service::finalize_race(&state, phase, &race_key, query.force).await?,
    ))
}

/// Correct a pilot's rank in a finalized race.
#[utoipa::path(
    put,
    path = "/admin/phases/{phase}/races/{race_key}/overlay/{pilot_id}",
    tag = "admin",
    params(
        ("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream"),
        ("phase" = String, Path, description = "Phase identifier (A or B)"),
        ("race_key" = String, Path, description = "Finalized race to correct"),
        ("pilot_id" = String, Path, description = "Pilot whose rank is corrected")
    ),
    request_body = OverlayRankRequest,
    responses(
        (status = 200, description = "Correction stored", body = RaceDetailResponse),
        (status = 409, description = "Race not finalized yet")
    )
)]
pub async fn set_overlay_rank(
    State(state): State<SharedState>,
    Valid(Path(RacePilotPath {
        phase,
        race_key,
        pilot_id,
    })): Valid<Path<RacePilotPath>>,
    Valid(Json(payload)): Valid<Json<OverlayRankRequest>>,
) -> Result<Json<RaceDetailResponse>, AppError> {
    Ok(Json(
        submission_service::set_overlay_rank(&state, phase, &race_key, &pilot_id, payload.rank)
            .await?,
    ))
}

/// Flag a pilot's points in a race as doubled.
#[utoipa::path(
    put,
    path = "/admin/phases/{phase}/races/{race_key}/doubled/{pilot_id}",
    tag = "admin",
    params(
        ("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream"),
        ("phase" = String, Path, description = "Phase identifier (A or B)"),
        ("race_key" = String, Path, description = "Race key"),
        ("pilot_id" = String, Path, description = "Pilot")
    ),
    request_body = DoubledRequest,
    responses((status = 200, description = "Flag stored", body = ActionResponse))
)]
pub async fn set_doubled(
    State(state): State<SharedState>,
    Valid(Path(RacePilotPath {
        phase,
        race_key,
        pilot_id,
    })): Valid<Path<RacePilotPath>>,
    Json(payload): Json<DoubledRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(
        submission_service::set_doubled(&state, phase, &race_key, &pilot_id, payload.doubled)
            .await?,
    ))
}

/// Rebuild the totals of a phase from history and bonus awards.
#[utoipa::path(
    post,
    path = "/admin/phases/{phase}/totals/recompute",
    tag = "admin",
    params(
        ("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream"),
        ("phase" = String, Path, description = "Phase identifier (A or B)")
    ),
    responses((status = 200, description = "Totals recomputed", body = TotalsResponse))
)]
pub async fn recompute_totals(
    State(state): State<SharedState>,
    Path(PhasePath { phase }): Path<PhasePath>,
) -> Result<Json<TotalsResponse>, AppError> {
    Ok(Json(totals_service::recompute_totals(&state, phase).await?))
}

/// Give a bonus award to a pilot, or unset it.
#[utoipa::path(
    put,
    path = "/admin/phases/{phase}/awards/{award}",
    tag = "admin",
    params(
        ("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream"),
        ("phase" = String, Path, description = "Phase identifier (A or B)"),
        ("award" = String, Path, description = "Configured award name")
    ),
    request_body = BonusAwardRequest,
    responses(
        (status = 200, description = "Award stored and totals recomputed", body = TotalsResponse),
        (status = 400, description = "Unknown award or pilot")
    )
)]
pub async fn set_bonus_award(
    State(state): State<SharedState>,
    Valid(Path(AwardPath { phase, award })): Valid<Path<AwardPath>>,
    Valid(Json(payload)): Valid<Json<BonusAwardRequest>>,
) -> Result<Json<TotalsResponse>, AppError> {
    Ok(Json(
        submission_service::set_bonus_award(&state, phase, &award, payload.pilot_id).await?,
    ))
}

/// Replace the points matrix of a phase.
#[utoipa::path(
    put,
    path = "/admin/phases/{phase}/matrix",
    tag = "admin",
    params(
        ("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream"),
        ("phase" = String, Path, description = "Phase identifier (A or B)")
    ),
    request_body = PointsMatrix,
    responses((status = 200, description = "Matrix replaced", body = MatrixResponse))
)]
pub async fn replace_matrix(
    State(state): State<SharedState>,
    Path(PhasePath { phase }): Path<PhasePath>,
    Json(matrix): Json<PointsMatrix>,
) -> Result<Json<MatrixResponse>, AppError> {
    Ok(Json(matrix_service::replace_matrix(&state, phase, matrix).await?))
}

/// Drop the cached matrix and read it again from the store.
#[utoipa::path(
    post,
    path = "/admin/phases/{phase}/matrix/reload",
    tag = "admin",
    params(
        ("X-Admin-Token" = String, Header, description = "Admin token issued by the /sse/admin stream"),
        ("phase" = String, Path, description = "Phase identifier (A or B)")
    ),
    responses(
        (status = 200, description = "Matrix reloaded", body = MatrixResponse),
        (status = 503, description = "No matrix stored for the phase")
    )
)]
pub async fn reload_matrix(
    State(state): State<SharedState>,
    Path(PhasePath { phase }): Path<PhasePath>,
) -> Result<Json<MatrixResponse>, AppError> {
    Ok(Json(matrix_service::reload_matrix(&state, phase).await?))
}

async fn require_admin_token(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .ok_or_else(|| {
            AppError::Unauthorized("missing admin token header `X-Admin-Token`".into())
        })?;

    let expected = state.admin_token().lock().await.clone();

    match expected {
        Some(token) if token == provided => Ok(next.run(req).await),
        Some(_) => Err(AppError::Unauthorized("invalid admin token".into())),
        None => Err(AppError::Unauthorized(
            "admin SSE stream not connected".into(),
        )),
    }
}
