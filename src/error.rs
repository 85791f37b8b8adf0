use std::fmt;

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::{
        points::PointsOverflow,
        race::{Phase, RaceKey},
        status::RaceStatus,
    },
};

/// Write step of a finalization, reported when it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    /// Whole-object write of the finalization record.
    Record,
    /// Finalized flag set to true.
    Flag,
    /// Multi-path update clearing submissions and moving the active pointer.
    ResetAndAdvance,
    /// Edit overlay removal after a re-finalization.
    ClearOverlay,
    /// Totals replacement.
    Totals,
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteStage::Record => "record",
            WriteStage::Flag => "flag",
            WriteStage::ResetAndAdvance => "reset/advance",
            WriteStage::ClearOverlay => "overlay clear",
            WriteStage::Totals => "totals",
        };
        f.write_str(name)
    }
}

/// Failures of the finalization engine and the totals aggregator.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Source results do not classify as complete; nothing was written.
    #[error("race {race_key} of phase {phase} is not complete ({status:?})")]
    IncompleteRace {
        phase: Phase,
        race_key: RaceKey,
        status: RaceStatus,
    },
    /// Race key is not part of the phase sequence.
    #[error("race {race_key} is not part of phase {phase}")]
    UnknownRace { phase: Phase, race_key: RaceKey },
    /// Points matrix missing or unreadable; nothing was written.
    #[error("points matrix of phase {phase} is unavailable")]
    MatrixUnavailable {
        phase: Phase,
        #[source]
        source: Option<StorageError>,
    },
    /// Scoring a record or summing totals left the `i32` range; nothing was written.
    #[error(transparent)]
    PointsOverflow(#[from] PointsOverflow),
    /// A write failed; earlier stages may already be persisted.
    #[error("store write failed at stage {stage}")]
    StoreWriteFailure {
        stage: WriteStage,
        #[source]
        source: StorageError,
    },
    /// A read failed. During finalization this happens before any write, except
    /// for the totals recomputation that closes it.
    #[error("store read failed")]
    StoreReadFailure(#[source] StorageError),
}

impl EngineError {
    pub(crate) fn write(stage: WriteStage) -> impl FnOnce(StorageError) -> Self {
        move |source| EngineError::StoreWriteFailure { stage, source }
    }
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Finalization or totals failure.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let message = error_chain(&err);
        match err {
            EngineError::IncompleteRace { .. } | EngineError::PointsOverflow(_) => {
                AppError::Conflict(message)
            }
            EngineError::UnknownRace { .. } => AppError::NotFound(message),
            EngineError::MatrixUnavailable { .. }
            | EngineError::StoreWriteFailure { .. }
            | EngineError::StoreReadFailure(_) => AppError::ServiceUnavailable(message),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Engine(engine) => engine.into(),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
        }
    }
}

/// Render an error and its sources as `outer: inner: ...`.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: impl Into<AppError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn engine_errors_map_to_http_statuses() {
        assert_eq!(
            status_of(EngineError::IncompleteRace {
                phase: Phase::A,
                race_key: "1".into(),
                status: RaceStatus::Conflict,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(EngineError::UnknownRace {
                phase: Phase::B,
                race_key: "99".into(),
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(EngineError::MatrixUnavailable {
                phase: Phase::A,
                source: None,
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(EngineError::from(PointsOverflow {
                phase: Phase::A,
                pilot: "p1".into(),
            })),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn service_errors_map_to_http_statuses() {
        assert_eq!(status_of(ServiceError::Degraded), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_of(ServiceError::InvalidState("busy".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ServiceError::InvalidInput("rank".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ServiceError::Unauthorized("token".into())),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn write_failures_name_their_stage() {
        let err = EngineError::StoreWriteFailure {
            stage: WriteStage::Flag,
            source: StorageError::unavailable(
                "down".into(),
                std::io::Error::other("connection reset"),
            ),
        };
        assert_eq!(err.to_string(), "store write failed at stage flag");
        assert!(error_chain(&err).contains("connection reset"));
    }
}
