use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::{models::UnknownVariant, repository::RepositoryError, service::ServiceError};

/// AppError
///
/// The error type returned by handlers. Each variant maps to one HTTP status and a
/// client-safe JSON body `{ "error": true, "code": ..., "message": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A path or query value did not name a known enumeration variant.
    #[error(transparent)]
    UnknownVariant(#[from] UnknownVariant),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BusinessRule(String),

    /// Anything the client cannot act on. The detail is logged, not returned.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::UnknownVariant(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BusinessRule(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::UnknownVariant(_) => "UNRECOGNIZED_VALUE",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BusinessRule(_) => "BUSINESS_RULE",
            AppError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::BusinessRule(message) => AppError::BusinessRule(message),
            ServiceError::NotFound(id) => AppError::NotFound(format!("medico {id} not found")),
            ServiceError::Repository(err) => err.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            AppError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "error": true,
            "code": self.error_code(),
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}
