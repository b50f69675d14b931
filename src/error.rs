use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::quiz::{QuizId, VoteRejection},
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Input rejected before anything was written.
    #[error("invalid input: {0}")]
    Validation(String),
    /// Caller is not allowed to perform the operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource was not found or could not be decoded.
    #[error("not found: {0}")]
    NotFound(String),
    /// Quiz deadline passed or the quiz was ended.
    #[error("quiz {0} is no longer accepting votes")]
    Expired(QuizId),
    /// The identity already has a vote recorded on this quiz.
    #[error("{voter} already voted on quiz {quiz_id}")]
    AlreadyVoted { quiz_id: QuizId, voter: String },
    /// Option index outside the quiz options.
    #[error("option {index} does not exist (quiz has {available} options)")]
    InvalidOption { index: usize, available: usize },
    /// No identity could be obtained from the caller.
    #[error("identity unavailable: {0}")]
    IdentityUnavailable(String),
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Conditional writes kept losing against concurrent writers.
    #[error("gave up writing `{key}` after {attempts} conflicting attempts")]
    Contention { key: String, attempts: usize },
}

impl ServiceError {
    /// Map a refused vote onto the service taxonomy.
    pub fn from_rejection(rejection: VoteRejection, quiz_id: QuizId, voter: &str) -> Self {
        match rejection {
            VoteRejection::Closed => ServiceError::Expired(quiz_id),
            VoteRejection::AlreadyVoted => ServiceError::AlreadyVoted {
                quiz_id,
                voter: voter.to_string(),
            },
            VoteRejection::InvalidOption { index, available } => {
                ServiceError::InvalidOption { index, available }
            }
        }
    }
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
    /// No usable identity was supplied.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Identity is known but not allowed to act.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Resource exists but is closed for good.
    #[error("gone: {0}")]
    Gone(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Validation(_) | ServiceError::InvalidOption { .. } => {
                AppError::BadRequest(message)
            }
            ServiceError::IdentityUnavailable(_) => AppError::Unauthorized(message),
            ServiceError::Unauthorized(_) => AppError::Forbidden(message),
            ServiceError::NotFound(_) => AppError::NotFound(message),
            ServiceError::AlreadyVoted { .. } | ServiceError::Contention { .. } => {
                AppError::Conflict(message)
            }
            ServiceError::Expired(_) => AppError::Gone(message),
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
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
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Gone(_) => StatusCode::GONE,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
