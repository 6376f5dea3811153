// Copyright 2025 TraceForge Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! HTTP-facing error mapping. The core's [`traceforge_core::Error`] carries
//! the domain taxonomy; this just picks a status code for each variant
//! (401, 404, 413, 500).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use traceforge_core::Error as CoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(msg) => ApiError::NotFound(msg),
            CoreError::InvalidInput(msg) => ApiError::BadRequest(msg),
            CoreError::PermissionDenied(msg) => ApiError::Unauthorized(msg),
            CoreError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg.clone()),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[tokio::test]
    async fn core_not_found_maps_to_404() {
        assert_eq!(status_of(CoreError::not_found("trace").into()).await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn core_invalid_input_maps_to_400() {
        assert_eq!(status_of(CoreError::invalid("bad field").into()).await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn core_permission_denied_maps_to_401() {
        assert_eq!(
            status_of(CoreError::PermissionDenied("cross-tenant".to_string()).into()).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn internal_errors_hide_the_message_from_the_body() {
        let response = ApiError::Internal("leaked db password".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("leaked db password"));
    }
}
