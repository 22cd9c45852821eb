// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Diagnostic job submission, polling and cancellation.

use std::fmt;

use axum::Router;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use seastate_core::model::JobFilter;
use seastate_core::{CoreError, DiagnosticJob, JobStatus, diagnostics};

use super::error::ApiResult;
use crate::AppState;

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 500;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/diagnostics/jobs", get(list_jobs).post(submit_job))
        .route("/diagnostics/jobs/{job_id}", get(get_job))
        .route("/diagnostics/jobs/{job_id}/cancel", post(cancel_job))
        .route("/diagnostics/{kind}", post(submit_shortcut))
}

/// A dataset id as sent by clients: a registered id or a reference string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DatasetIdInput {
    Registered(i64),
    Reference(String),
}

impl fmt::Display for DatasetIdInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered(id) => write!(f, "{}", id),
            Self::Reference(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    #[serde(alias = "diagnostic_type")]
    pub diagnostic_type: String,
    #[serde(alias = "dataset_id")]
    pub dataset_id: DatasetIdInput,
    #[serde(default)]
    pub parameters: Value,
}

/// Body of the per-diagnostic routes; the type comes from the path.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortcutRequest {
    #[serde(alias = "dataset_id")]
    pub dataset_id: DatasetIdInput,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListJobsQuery {
    pub status: Option<String>,
    #[serde(alias = "diagnostic_type")]
    pub diagnostic_type: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct JobList {
    pub jobs: Vec<DiagnosticJob>,
}

async fn submit(
    state: &AppState,
    diagnostic_type: &str,
    dataset_id: &DatasetIdInput,
    parameters: Value,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let job_id = state
        .scheduler
        .submit(diagnostic_type, &dataset_id.to_string(), parameters)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id,
            status: JobStatus::Pending,
        }),
    ))
}

async fn submit_job(
    State(state): State<AppState>,
    payload: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let Json(request) = payload?;
    submit(
        &state,
        &request.diagnostic_type,
        &request.dataset_id,
        request.parameters,
    )
    .await
}

/// `POST /diagnostics/{kind}` where `kind` is a route name such as
/// `thermocline`, `sound-speed`, `eddy` or `internal-wave`.
async fn submit_shortcut(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    payload: Result<Json<ShortcutRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let diagnostic = diagnostics::lookup(&kind)
        .map_err(|_| CoreError::not_found("diagnostic", kind.as_str()))?;
    let Json(request) = payload?;
    submit(
        &state,
        diagnostic.as_str(),
        &request.dataset_id,
        request.parameters,
    )
    .await
}

async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<DiagnosticJob>> {
    Ok(Json(state.scheduler.get_status(&job_id).await?))
}

async fn list_jobs(
    State(state): State<AppState>,
    query: Result<Query<ListJobsQuery>, QueryRejection>,
) -> ApiResult<Json<JobList>> {
    let Query(query) = query?;
    let filter = JobFilter {
        status: query
            .status
            .as_deref()
            .map(str::parse::<JobStatus>)
            .transpose()?,
        diagnostic_type: query
            .diagnostic_type
            .as_deref()
            .map(diagnostics::lookup)
            .transpose()?,
    };
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let jobs = state
        .scheduler
        .list_jobs(&filter, Some(limit), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(JobList { jobs }))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<DiagnosticJob>> {
    Ok(Json(state.scheduler.cancel(&job_id).await?))
}
