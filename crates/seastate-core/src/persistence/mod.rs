// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for seastate-core.
//!
//! [`JobStore`] holds diagnostic jobs and the report associations that refer
//! to them; [`Registry`] holds dataset and THREDDS server records. Datasets
//! point at servers by id only.

pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::encoder::AnalysisResult;
use crate::error::CoreError;
use crate::model::{
    DatasetRecord, DiagnosticJob, JobFilter, NewDataset, NewJob, NewThreddsServer,
    ThreddsServerRecord,
};

/// Durable record of diagnostic jobs.
///
/// Status transitions are conditional on the current status and return
/// whether they applied, so a job's status never moves backwards even when
/// two writers race.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job in `pending`.
    async fn create_job(&self, job: &NewJob) -> Result<(), CoreError>;

    async fn get_job(&self, job_id: &str) -> Result<Option<DiagnosticJob>, CoreError>;

    /// Newest first. `limit = None` returns every match.
    async fn list_jobs(
        &self,
        filter: &JobFilter,
        limit: Option<u32>,
        offset: u32,
    ) -> Result<Vec<DiagnosticJob>, CoreError>;

    /// `pending -> running`.
    async fn mark_running(&self, job_id: &str, started_at: DateTime<Utc>)
    -> Result<bool, CoreError>;

    /// `running -> completed`, storing the encoded result.
    async fn complete_job(
        &self,
        job_id: &str,
        result: &AnalysisResult,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    /// `running -> failed`, storing the error description.
    async fn fail_job(
        &self,
        job_id: &str,
        message: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    /// `pending | running -> cancelled`.
    async fn cancel_job(&self, job_id: &str, at: DateTime<Utc>) -> Result<bool, CoreError>;

    /// Associate terminal jobs with a report. A report's job set is written
    /// once; linking an already-linked report fails.
    async fn link_report_jobs(&self, report_id: i64, job_ids: &[String]) -> Result<(), CoreError>;

    /// Job ids linked to a report, in link order.
    async fn report_jobs(&self, report_id: i64) -> Result<Vec<String>, CoreError>;

    async fn health_check(&self) -> Result<bool, CoreError>;
}

/// Dataset and THREDDS server records.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn insert_server(&self, server: &NewThreddsServer)
    -> Result<ThreddsServerRecord, CoreError>;

    async fn get_server(&self, id: i64) -> Result<Option<ThreddsServerRecord>, CoreError>;

    async fn list_servers(&self) -> Result<Vec<ThreddsServerRecord>, CoreError>;

    /// Remove a server. Fails with a validation error while active datasets
    /// still reference it; returns false if it did not exist.
    async fn delete_server(&self, id: i64) -> Result<bool, CoreError>;

    async fn insert_dataset(&self, dataset: &NewDataset) -> Result<DatasetRecord, CoreError>;

    async fn get_dataset(&self, id: i64) -> Result<Option<DatasetRecord>, CoreError>;

    async fn list_datasets(&self, active_only: bool) -> Result<Vec<DatasetRecord>, CoreError>;

    /// Soft-delete; the record stays readable but no longer resolves.
    async fn deactivate_dataset(&self, id: i64) -> Result<bool, CoreError>;
}

pub(crate) fn report_already_linked(report_id: i64) -> CoreError {
    CoreError::validation(
        "report_id",
        format!("report {} already has linked diagnostics", report_id),
    )
}

pub(crate) fn no_jobs_to_link() -> CoreError {
    CoreError::validation("job_ids", "at least one job is required")
}

pub(crate) fn job_not_terminal(job_id: &str) -> CoreError {
    CoreError::validation(
        "job_ids",
        format!("job '{}' has not finished", job_id),
    )
}

pub(crate) fn server_in_use(id: i64, count: usize) -> CoreError {
    CoreError::validation(
        "server_id",
        format!("server {} is referenced by {} active dataset(s)", id, count),
    )
}
