//! API error type shared by all handlers.
//!
//! Handlers return `ApiResult<T>`; any error is rendered as a JSON body
//! with an appropriate HTTP status code.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

pub type ApiResult<T> = Result<T, ApiError>;

/// HTTP boundary error with a status code and JSON payload.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: Value,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, body: json!({ "error": message.into() }) }
    }

    /// Error with a custom JSON payload (must contain an "error" field).
    pub fn with_payload(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = self
            .body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        write!(f, "{}: {}", self.status, message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Database error: {}", e);
        Self::internal(format!("Database error: {}", e))
    }
}

impl From<crate::services::lookup::LookupError> for ApiError {
    fn from(e: crate::services::lookup::LookupError) -> Self {
        use crate::services::lookup::LookupError;
        match &e {
            LookupError::ExtractionNotComplete { .. }
            | LookupError::TemplateNotFound(_)
            | LookupError::ContextWindowExceeded { .. }
            | LookupError::InvalidTemplate(_)
            | LookupError::DefaultProfile(_) => Self::bad_request(e.to_string()),
            LookupError::ProjectNotFound(_) => Self::not_found(e.to_string()),
            _ => Self::internal(e.to_string()),
        }
    }
}
