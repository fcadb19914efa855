//! HTTP error responses for the web adapter.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::domain::error::QuantdeskError;

#[derive(Debug)]
pub struct WebError {
    pub status: StatusCode,
    pub message: String,
}

impl WebError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn missing_fields() -> Self {
        Self::bad_request("Missing required fields")
    }
}

pub fn status_from_error(err: &QuantdeskError) -> StatusCode {
    match err {
        QuantdeskError::NotFound { .. } => StatusCode::NOT_FOUND,
        QuantdeskError::Validation { .. }
        | QuantdeskError::UnsupportedStrategy { .. }
        | QuantdeskError::InvalidParameters { .. }
        | QuantdeskError::WebhookSignature { .. } => StatusCode::BAD_REQUEST,
        QuantdeskError::Conflict { .. } => StatusCode::CONFLICT,
        QuantdeskError::LimitReached { .. } => StatusCode::FORBIDDEN,
        QuantdeskError::NoData { .. } | QuantdeskError::InsufficientData { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        QuantdeskError::Payment { .. }
        | QuantdeskError::ConfigParse { .. }
        | QuantdeskError::ConfigMissing { .. }
        | QuantdeskError::ConfigInvalid { .. }
        | QuantdeskError::Database { .. }
        | QuantdeskError::DatabaseQuery { .. }
        | QuantdeskError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<QuantdeskError> for WebError {
    fn from(err: QuantdeskError) -> Self {
        let status = status_from_error(&err);
        if status.is_server_error() {
            // Server-side detail stays in the log.
            tracing::error!(error = %err, "request failed");
            return Self::internal("Internal server error");
        }
        Self::new(status, err.to_string())
    }
}

impl From<JsonRejection> for WebError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(error = %rejection, "rejected request body");
        Self::missing_fields()
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
