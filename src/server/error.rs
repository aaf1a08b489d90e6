//! JSON error responses
//!
//! `/process-image/` reports failures as `{"detail": ...}` and `/upload` as
//! `{"error": ...}`, so an [`ApiError`] carries the key it is rendered under.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Map, Value};

/// Error rendered as a single-field JSON object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    /// JSON key the message is stored under
    pub key: &'static str,
    pub message: String,
}

impl ApiError {
    /// `{"detail": message}`
    pub fn detail<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            key: "detail",
            message: message.into(),
        }
    }

    /// `{"error": message}`
    pub fn error<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            key: "error",
            message: message.into(),
        }
    }

    /// 500 for any failure while removing a mosaic
    pub fn processing_failure<E: std::fmt::Display>(error: E) -> Self {
        Self::detail(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("An unexpected error occurred during image processing: {error}"),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), "{}", self.message);
        } else {
            tracing::warn!(status = self.status.as_u16(), "{}", self.message);
        }

        let mut body = Map::new();
        body.insert(self.key.to_string(), Value::String(self.message));
        (self.status, Json(Value::Object(body))).into_response()
    }
}
