// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mapping from core errors to HTTP responses.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use seastate_core::CoreError;
use tracing::error;

/// Error body returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// A [`CoreError`] on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CoreError::Validation { .. } | CoreError::UnknownDiagnosticType { .. } => {
                StatusCode::BAD_REQUEST
            }
            CoreError::UnsupportedService { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            CoreError::Transport { .. }
            | CoreError::Format { .. }
            | CoreError::CatalogParse { .. } => StatusCode::BAD_GATEWAY,
            CoreError::Cancelled { .. } => StatusCode::CONFLICT,
            CoreError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(CoreError::validation("body", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(CoreError::validation("query", rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self(CoreError::validation("path", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.0.error_code(), error = %self.0, "Request failed");
        }
        let body = ErrorBody {
            code: self.0.error_code(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CoreError::validation("x", "bad"), StatusCode::BAD_REQUEST),
            (CoreError::not_found("job", "j1"), StatusCode::NOT_FOUND),
            (
                CoreError::Transport {
                    url: "http://x".to_string(),
                    details: "timeout".to_string(),
                    retryable: true,
                },
                StatusCode::BAD_GATEWAY,
            ),
            (CoreError::catalog_parse("bad xml"), StatusCode::BAD_GATEWAY),
            (
                CoreError::UnsupportedService {
                    dataset: "a.nc".to_string(),
                    service: "streaming".to_string(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                CoreError::Unavailable {
                    reason: "queue full".to_string(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                CoreError::Database {
                    operation: "insert".to_string(),
                    details: "locked".to_string(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
