// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dataset registry endpoints. Pure retrieval and bookkeeping; resolving a
//! dataset's content happens only inside jobs.

use axum::Router;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use serde::{Deserialize, Serialize};
use seastate_core::CoreError;
use seastate_core::model::{DatasetRecord, NewDataset};
use tracing::info;

use super::error::ApiResult;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/datasets", get(list_datasets).post(create_dataset))
        .route(
            "/datasets/{dataset_id}",
            get(get_dataset).delete(deactivate_dataset),
        )
}

#[derive(Debug, Deserialize)]
pub struct ListDatasetsQuery {
    /// Include deactivated datasets when false.
    #[serde(default = "default_active_only")]
    pub active_only: bool,
}

fn default_active_only() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct DatasetList {
    pub datasets: Vec<DatasetRecord>,
}

async fn list_datasets(
    State(state): State<AppState>,
    query: Result<Query<ListDatasetsQuery>, QueryRejection>,
) -> ApiResult<Json<DatasetList>> {
    let Query(query) = query?;
    let datasets = state.registry.list_datasets(query.active_only).await?;
    Ok(Json(DatasetList { datasets }))
}

async fn get_dataset(
    State(state): State<AppState>,
    Path(dataset_id): Path<i64>,
) -> ApiResult<Json<DatasetRecord>> {
    let dataset = state
        .registry
        .get_dataset(dataset_id)
        .await?
        .ok_or_else(|| CoreError::not_found("dataset", dataset_id.to_string()))?;
    Ok(Json(dataset))
}

async fn create_dataset(
    State(state): State<AppState>,
    payload: Result<Json<NewDataset>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<DatasetRecord>)> {
    let Json(dataset) = payload?;
    dataset.validate()?;
    let record = state.registry.insert_dataset(&dataset).await?;
    info!(dataset_id = record.id, format = %record.file_format, "Dataset registered");
    Ok((StatusCode::CREATED, Json(record)))
}

async fn deactivate_dataset(
    State(state): State<AppState>,
    Path(dataset_id): Path<i64>,
) -> ApiResult<StatusCode> {
    if !state.registry.deactivate_dataset(dataset_id).await? {
        return Err(CoreError::not_found("dataset", dataset_id.to_string()).into());
    }
    info!(dataset_id = dataset_id, "Dataset deactivated");
    Ok(StatusCode::NO_CONTENT)
}
