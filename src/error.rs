//! Common error type and alias.
//!
//! Every failure a caller can observe is one of these variants; the
//! [`IntoResponse`] impl is the single place where they become HTTP statuses.
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A required field was absent from the caller's request. The field name
    /// is kept for logs only; callers always see the same message.
    #[error("Missing required parameter")]
    MissingParameter(&'static str),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Workflow template not found: {0}")]
    TemplateNotFound(String),

    #[error("Workflow template is not valid JSON: {0}")]
    TemplateInvalid(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend did not complete within {0:?}")]
    BackendTimeout(Duration),

    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("Backend rejected the request: {0}")]
    BackendRejected(String),

    #[error("Backend execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingParameter(_) | AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::TemplateNotFound(_) => StatusCode::NOT_FOUND,
            AppError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::BackendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::MalformedResponse(_)
            | AppError::BackendRejected(_)
            | AppError::ExecutionFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::TemplateInvalid(_) | AppError::Config(_) | AppError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The JSON body returned to callers: `{"error": "<message>"}`.
    pub fn body(&self) -> serde_json::Value {
        json!({ "error": self.to_string() })
    }

    /// Map a transport error from the HTTP client onto the backend taxonomy.
    pub fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            AppError::BackendTimeout(timeout)
        } else if err.is_decode() {
            AppError::MalformedResponse(err.to_string())
        } else {
            AppError::BackendUnavailable(err.to_string())
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            AppError::MissingParameter(field) => {
                tracing::warn!(field, "Request is missing a required parameter");
            }
            e if status.is_server_error() => tracing::error!(error = %e, "Request failed"),
            e => tracing::warn!(error = %e, "Request rejected"),
        }
        (status, axum::Json(self.body())).into_response()
    }
}
