//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`opsdec_core::Error`] so that route
//! handlers can return `Result<T, AppError>` directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
pub struct AppError {
    inner: opsdec_core::Error,
    request_id: Option<String>,
}

impl AppError {
    pub fn new(inner: opsdec_core::Error) -> Self {
        Self {
            inner,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: String) -> Self {
        self.request_id = Some(id);
        self
    }
}

impl From<opsdec_core::Error> for AppError {
    fn from(e: opsdec_core::Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            // Internal detail is logged with the correlation id, never
            // sent to the client.
            tracing::error!(
                status = %status,
                error = %self.inner,
                request_id = self.request_id.as_deref().unwrap_or("-"),
                "Server error in API handler"
            );
        }

        let code = match &self.inner {
            opsdec_core::Error::NotFound { .. } => "not_found",
            opsdec_core::Error::Unauthorized(_) => "unauthorized",
            opsdec_core::Error::Forbidden(_) => "forbidden",
            opsdec_core::Error::Validation(_) => "validation_error",
            opsdec_core::Error::Conflict(_) => "conflict",
            opsdec_core::Error::Database { .. } => "database_error",
            opsdec_core::Error::Io { .. } => "io_error",
            opsdec_core::Error::Upstream { .. } => "upstream_error",
            opsdec_core::Error::Crypto(_) => "internal_error",
            opsdec_core::Error::Internal(_) => "internal_error",
        };

        let message = if status.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.inner.to_string()
        };

        let body = json!({
            "error": message,
            "code": code,
            "request_id": self.request_id,
        });

        (status, axum::Json(body)).into_response()
    }
}
