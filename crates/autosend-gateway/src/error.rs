//! Mapping from domain errors to JSON error responses.

use autosend_core::error::AutoSendError;
use autosend_core::validation::{FieldError, describe};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Error response: `{"ok": false, "error": ...}` with an HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub details: Vec<FieldError>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: Vec::new(),
        }
    }

    /// 400 carrying every failed field.
    pub fn invalid(details: Vec<FieldError>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: describe(&details),
            details,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<AutoSendError> for ApiError {
    fn from(e: AutoSendError) -> Self {
        let status = match &e {
            _ if e.is_lifecycle_conflict() => StatusCode::CONFLICT,
            AutoSendError::Validation(_) => StatusCode::BAD_REQUEST,
            AutoSendError::NotFound(_) => StatusCode::NOT_FOUND,
            AutoSendError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, "{}", self.message);
        }
        let mut body = serde_json::json!({"ok": false, "error": self.message});
        if !self.details.is_empty() {
            body["details"] = serde_json::json!(self.details);
        }
        (self.status, Json(body)).into_response()
    }
}
