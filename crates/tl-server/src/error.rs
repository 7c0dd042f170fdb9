//! Error-to-HTTP response conversion.
//!
//! Route handlers return `Result<T, AppError>`; any [`tl_core::Error`]
//! converts with `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
pub struct AppError {
    inner: tl_core::Error,
}

impl AppError {
    pub fn new(inner: tl_core::Error) -> Self {
        Self { inner }
    }
}

impl From<tl_core::Error> for AppError {
    fn from(e: tl_core::Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                "Server error in API handler"
            );
        }

        let code = match &self.inner {
            tl_core::Error::NotFound { .. } => "not_found",
            tl_core::Error::Validation(_) => "validation_error",
            tl_core::Error::Conflict(_) => "conflict",
            tl_core::Error::Io { .. } => "io_error",
            tl_core::Error::Tool { .. } => "tool_error",
            tl_core::Error::Schedule { .. } => "schedule_error",
            tl_core::Error::Cancelled => "cancelled",
            tl_core::Error::Internal(_) => "internal_error",
        };

        let body = json!({
            "error": self.inner.to_string(),
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
