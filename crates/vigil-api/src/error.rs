//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use vigil_signing::SigningError;

/// Errors returned by route handlers
#[derive(Debug, Error)]
pub enum ApiError {
    /// Body could not be parsed
    #[error("malformed request body: {0}")]
    BadBody(#[from] serde_json::Error),

    /// Signing flow failed
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// Endpoint is configured off
    #[error("{0} is disabled")]
    Disabled(&'static str),
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl ApiError {
    /// Status code for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadBody(_) => StatusCode::BAD_REQUEST,
            Self::Disabled(_) => StatusCode::NOT_FOUND,
            Self::Signing(err) => match err {
                SigningError::NoSuchKey { .. } => StatusCode::NOT_FOUND,
                SigningError::ProtectionEnforced(_) => StatusCode::PRECONDITION_FAILED,
                err if err.is_client_error() => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {self}");
        }
        let body = ErrorBody {
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Handler result
pub type ApiResult<T> = std::result::Result<T, ApiError>;
