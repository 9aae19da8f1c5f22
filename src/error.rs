use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

use crate::{dao::storage::StorageError, state::error::GameError};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Rejected by the session domain.
    #[error(transparent)]
    Game(#[from] GameError),
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Archival kept failing; live data is kept until a retry succeeds.
    #[error("archival of session `{session_id}` failed after {attempts} attempt(s)")]
    Archive {
        /// Session being archived.
        session_id: uuid::Uuid,
        /// Attempts made before giving up.
        attempts: u32,
        /// Last storage failure.
        #[source]
        source: StorageError,
    },
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl ServiceError {
    /// Short machine readable code used on participant error frames.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Game(GameError::IllegalTransition(_)) => "illegal_transition",
            ServiceError::Game(GameError::DuplicateName(_)) => "duplicate_name",
            ServiceError::Game(GameError::DuplicateSubmission) => "duplicate_submission",
            ServiceError::Game(GameError::LateSubmission) => "late_submission",
            ServiceError::Game(GameError::IneligibleParticipant(_)) => "ineligible_participant",
            ServiceError::Game(GameError::Conflict(_)) => "conflict",
            ServiceError::Game(GameError::NotFound(_)) | ServiceError::NotFound(_) => "not_found",
            ServiceError::InvalidInput(_) => "invalid_input",
            ServiceError::Unavailable(_) | ServiceError::Degraded | ServiceError::Archive { .. } => {
                "unavailable"
            }
        }
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
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

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Game(GameError::NotFound(message)) => AppError::NotFound(message),
            ServiceError::Game(game) => AppError::Conflict(game.to_string()),
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            archive @ ServiceError::Archive { .. } => {
                AppError::ServiceUnavailable(archive.to_string())
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
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

    fn status_of(err: ServiceError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn domain_rejections_map_to_conflict_or_not_found() {
        assert_eq!(
            status_of(GameError::LateSubmission.into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(GameError::IllegalTransition("nope".into()).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(GameError::NotFound("session".into()).into()),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn storage_failures_map_to_unavailable() {
        assert_eq!(status_of(ServiceError::Degraded), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_of(ServiceError::InvalidInput("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ServiceError::Degraded.code(), "unavailable");
        assert_eq!(
            ServiceError::from(GameError::DuplicateSubmission).code(),
            "duplicate_submission"
        );
    }
}
