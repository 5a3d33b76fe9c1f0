use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::{repository::RepositoryError, storage::StorageError};

/// ApiError
///
/// The error taxonomy every handler and extractor reports through. Each variant
/// maps to one HTTP status; bodies are always a JSON object carrying `error`
/// (or `errors` for field validation failures).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or missing input fields (422).
    #[error("{0}")]
    Validation(String),

    /// A well-formed request the endpoint cannot serve, e.g. a missing query parameter (400).
    #[error("{0}")]
    BadRequest(String),

    /// Missing, malformed, expired or revoked bearer token (401).
    #[error("Please authenticate.")]
    Unauthenticated,

    /// Unknown email or wrong password (422). Both cases share this variant.
    #[error("invalid email or password")]
    InvalidCredentials,

    /// Authenticated, but not the owner of the target resource (403).
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Duplicate unique value such as an email already in use (400).
    #[error("{0}")]
    Conflict(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("image store error: {0}")]
    Storage(#[from] StorageError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

pub const EMAIL_TAKEN: &str = "email already in use try another one";

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::InvalidCredentials => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::BadRequest(_) | ApiError::Conflict(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Repository(RepositoryError::Conflict) => StatusCode::BAD_REQUEST,
            ApiError::Storage(StorageError::InvalidImage(_)) => StatusCode::BAD_REQUEST,
            ApiError::Repository(_) | ApiError::Storage(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Validation(msg) => json!({ "errors": msg }),
            ApiError::Repository(RepositoryError::Conflict) => json!({ "error": EMAIL_TAKEN }),
            ApiError::Storage(StorageError::InvalidImage(msg)) => json!({ "error": msg }),
            ApiError::Repository(_) | ApiError::Storage(_) | ApiError::Internal(_) => {
                // The raw cause stays in the logs; clients get a generic message.
                tracing::error!(error = %self, "request failed with an internal error");
                json!({ "error": "internal server error" })
            }
            other => json!({ "error": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
