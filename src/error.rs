use axum::{
    Json,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// AppError
///
/// The single error type returned by handlers, the repository and the storage layer.
/// Every variant renders as a JSON body of the form `{"error": "<message>"}`.
///
/// Client errors carry their message verbatim. Server errors (`Database`, `Storage`,
/// `Internal`) log the underlying cause and return a generic message instead, so
/// driver and SDK details never reach the client.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed input fields.
    #[error("{0}")]
    Validation(String),

    /// Bad credentials or no authenticated session.
    #[error("{0}")]
    Auth(String),

    /// Authenticated but not allowed to perform the action.
    #[error("{0}")]
    Forbidden(String),

    /// Unknown resource, or a resource hidden from the caller.
    #[error("{0}")]
    NotFound(String),

    /// Uniqueness violation (e.g. duplicate email).
    #[error("{0}")]
    Conflict(String),

    /// Unparseable body, wrong content type or a broken multipart stream.
    #[error("{0}")]
    BadRequest(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found() -> Self {
        AppError::NotFound("Not found".to_string())
    }

    pub fn forbidden() -> Self {
        AppError::Forbidden("Forbidden".to_string())
    }

    pub fn unauthenticated() -> Self {
        AppError::Auth("Authentication required".to_string())
    }

    pub fn invalid_payload() -> Self {
        AppError::BadRequest("Invalid payload".to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Conflict(_) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(_) | AppError::Storage(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(error = %rejection.body_text(), "rejected json body");
        AppError::BadRequest("Invalid JSON".to_string())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        tracing::debug!(error = %rejection.body_text(), "rejected path parameters");
        AppError::not_found()
    }
}

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        tracing::debug!(error = %rejection.body_text(), "rejected multipart body");
        AppError::invalid_payload()
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        tracing::debug!(error = %err.body_text(), "broken multipart stream");
        AppError::invalid_payload()
    }
}

/// Shorthand used across the repository, storage and handler layers.
pub type AppResult<T> = Result<T, AppError>;
