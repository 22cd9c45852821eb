// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Route handlers, grouped by resource.

pub mod datasets;
pub mod diagnostics;
pub mod error;
pub mod reports;
pub mod thredds;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use serde_json::json;
use tracing::warn;

use crate::AppState;

pub use error::{ApiError, ApiResult, ErrorBody};

/// Routes mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .merge(diagnostics::routes())
        .merge(thredds::routes())
        .merge(datasets::routes())
        .merge(reports::routes())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.job_store.health_check().await {
        Ok(true) => (StatusCode::OK, Json(json!({"status": "healthy"}))),
        Ok(false) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unhealthy"})),
        ),
        Err(e) => {
            warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unhealthy", "error": e.to_string()})),
            )
        }
    }
}
