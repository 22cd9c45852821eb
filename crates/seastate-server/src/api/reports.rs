// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Report to job associations. Reports themselves are rendered elsewhere;
//! this only records which finished jobs a report draws on.

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use serde::{Deserialize, Serialize};
use seastate_core::DiagnosticJob;

use super::error::ApiResult;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/reports/{report_id}/diagnostics",
        get(report_jobs).post(link_jobs),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkJobsRequest {
    #[serde(alias = "job_ids")]
    pub job_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportJobs {
    pub report_id: i64,
    pub jobs: Vec<DiagnosticJob>,
}

async fn link_jobs(
    State(state): State<AppState>,
    Path(report_id): Path<i64>,
    payload: Result<Json<LinkJobsRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ReportJobs>)> {
    let Json(request) = payload?;
    state
        .job_store
        .link_report_jobs(report_id, &request.job_ids)
        .await?;
    let jobs = load_jobs(&state, &request.job_ids).await?;
    Ok((StatusCode::CREATED, Json(ReportJobs { report_id, jobs })))
}

async fn report_jobs(
    State(state): State<AppState>,
    Path(report_id): Path<i64>,
) -> ApiResult<Json<ReportJobs>> {
    let ids = state.job_store.report_jobs(report_id).await?;
    let jobs = load_jobs(&state, &ids).await?;
    Ok(Json(ReportJobs { report_id, jobs }))
}

async fn load_jobs(state: &AppState, ids: &[String]) -> ApiResult<Vec<DiagnosticJob>> {
    let mut jobs = Vec::with_capacity(ids.len());
    for id in ids {
        jobs.push(state.scheduler.get_status(id).await?);
    }
    Ok(jobs)
}
