//! Error-to-HTTP response conversion.

use crate::error::TvCacheError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Lets handlers return `Result<_, ApiError>` and use `?` on service calls.
pub struct ApiError(pub TvCacheError);

impl From<TvCacheError> for ApiError {
    fn from(e: TvCacheError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.0, "Server error in API handler");
        }

        let body = json!({
            "message": self.0.to_string(),
            "code": self.0.code(),
        });

        (status, Json(body)).into_response()
    }
}
