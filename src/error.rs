use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::embedded::EmbeddedImageError;
use crate::model::ModelError;
use crate::store::StoreError;

/// Request-level failure. Each variant maps onto one HTTP status so clients
/// can branch on the class of failure.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0}")]
    QuotaExceeded(String),
    #[error("{0}")]
    Config(String),
    #[error("{0}")]
    Upstream(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::QuotaExceeded(_) => StatusCode::FORBIDDEN,
            AppError::Config(_) | AppError::Upstream(_) | AppError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<EmbeddedImageError> for AppError {
    fn from(err: EmbeddedImageError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<ModelError> for AppError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::MissingCredential => AppError::Config(err.to_string()),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            AppError::Storage(err) => {
                // Do not leak storage details to clients.
                tracing::error!(error = %err, "storage failure");
                "Internal server error".to_owned()
            }
            AppError::Config(message) => {
                tracing::error!(%message, "configuration error");
                message.clone()
            }
            AppError::Upstream(message) => {
                tracing::warn!(%message, "upstream failure");
                message.clone()
            }
            other => other.to_string(),
        };
        (self.status(), Json(ErrorBody { error: message })).into_response()
    }
}
