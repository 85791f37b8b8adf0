use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Race Control Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::public_stream,
        crate::routes::sse::admin_stream,
        crate::routes::public::get_race_board,
        crate::routes::public::get_race_detail,
        crate::routes::public::get_active_race,
        crate::routes::public::get_totals,
        crate::routes::public::submit_rank,
        crate::routes::admin::finalize_race,
        crate::routes::admin::set_overlay_rank,
        crate::routes::admin::set_doubled,
        crate::routes::admin::recompute_totals,
        crate::routes::admin::set_bonus_award,
        crate::routes::admin::replace_matrix,
        crate::routes::admin::reload_matrix,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::public::SubmitRankRequest,
            crate::dto::public::SubmissionResponse,
            crate::dto::public::RaceSummary,
            crate::dto::public::RaceBoardResponse,
            crate::dto::public::RaceDetailResponse,
            crate::dto::public::ActiveRaceResponse,
            crate::dto::public::TotalsResponse,
            crate::dto::admin::FinalizeResponse,
            crate::dto::admin::OverlayRankRequest,
            crate::dto::admin::DoubledRequest,
            crate::dto::admin::BonusAwardRequest,
            crate::dto::admin::ActionResponse,
            crate::dto::admin::MatrixResponse,
            crate::dto::sse::AdminHandshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::RaceStatusEvent,
            crate::dto::sse::RaceFinalizedEvent,
            crate::dto::sse::TotalsUpdatedEvent,
            crate::dto::sse::ActiveChangedEvent,
            crate::state::race::Phase,
            crate::state::race::RaceKind,
            crate::state::race::PilotPoints,
            crate::state::race::FinalizationRecord,
            crate::state::points::PointsMatrix,
            crate::state::points::PointsRow,
            crate::state::points::KindPoints,
            crate::state::sequence::PointerSource,
            crate::state::status::RaceStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "public", description = "Race board, submissions and totals"),
        (name = "admin", description = "Finalization, corrections, awards and points matrices"),
    )
)]
pub struct ApiDoc;
