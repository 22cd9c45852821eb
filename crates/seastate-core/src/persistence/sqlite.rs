// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::encoder::AnalysisResult;
use crate::error::CoreError;
use crate::migrations::SQLITE as MIGRATOR;
use crate::model::{
    DatasetRecord, DiagnosticJob, JobFilter, NewDataset, NewJob, NewThreddsServer,
    ThreddsServerRecord,
};

use super::{
    JobStore, Registry, job_not_terminal, no_jobs_to_link, report_already_linked, server_in_use,
};

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `url` (e.g. `sqlite:seastate.db?mode=rwc`) and run migrations.
    ///
    /// In-memory databases are private to one connection, so the pool is
    /// limited to a single connection for them.
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = options
            .connect(url)
            .await
            .map_err(|e| CoreError::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to {}: {}", url, e),
            })?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file if missing, then
    /// runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::Database {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        Self::connect(&format!("sqlite:{}?mode=rwc", path.to_string_lossy())).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ============================================================================
// Row mapping
// ============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    job_id: String,
    diagnostic_type: String,
    dataset_id: String,
    parameters: String,
    status: String,
    result: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for DiagnosticJob {
    type Error = CoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(DiagnosticJob {
            diagnostic_type: row.diagnostic_type.parse()?,
            status: row.status.parse()?,
            parameters: serde_json::from_str(&row.parameters)?,
            result: row
                .result
                .as_deref()
                .map(serde_json::from_str::<AnalysisResult>)
                .transpose()?,
            job_id: row.job_id,
            dataset_id: row.dataset_id,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ServerRow {
    id: i64,
    name: String,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    description: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<ServerRow> for ThreddsServerRecord {
    fn from(row: ServerRow) -> Self {
        ThreddsServerRecord {
            id: row.id,
            name: row.name,
            base_url: row.base_url,
            username: row.username,
            password: row.password,
            description: row.description,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DatasetRow {
    id: i64,
    name: String,
    description: Option<String>,
    file_path: String,
    file_format: String,
    thredds_server_id: Option<i64>,
    thredds_url_path: Option<String>,
    variables: Option<String>,
    dimensions: Option<String>,
    spatial_coverage: Option<String>,
    temporal_coverage: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

fn parse_json<T: serde::de::DeserializeOwned>(raw: Option<&str>) -> Result<Option<T>, CoreError> {
    raw.map(serde_json::from_str).transpose().map_err(CoreError::from)
}

fn to_json<T: serde::Serialize>(value: Option<&T>) -> Result<Option<String>, CoreError> {
    value.map(serde_json::to_string).transpose().map_err(CoreError::from)
}

impl TryFrom<DatasetRow> for DatasetRecord {
    type Error = CoreError;

    fn try_from(row: DatasetRow) -> Result<Self, Self::Error> {
        Ok(DatasetRecord {
            variables: parse_json(row.variables.as_deref())?,
            dimensions: parse_json(row.dimensions.as_deref())?,
            spatial_coverage: parse_json(row.spatial_coverage.as_deref())?,
            temporal_coverage: parse_json(row.temporal_coverage.as_deref())?,
            id: row.id,
            name: row.name,
            description: row.description,
            file_path: row.file_path,
            file_format: row.file_format,
            thredds_server_id: row.thredds_server_id,
            thredds_url_path: row.thredds_url_path,
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

const JOB_COLUMNS: &str = "job_id, diagnostic_type, dataset_id, parameters, status, result, \
                           error_message, created_at, started_at, completed_at";

// ============================================================================
// Job store
// ============================================================================

#[async_trait::async_trait]
impl JobStore for SqlitePersistence {
    async fn create_job(&self, job: &NewJob) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO diagnostic_jobs
                (job_id, diagnostic_type, dataset_id, parameters, status, created_at)
            VALUES (?, ?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(&job.job_id)
        .bind(job.diagnostic_type.as_str())
        .bind(&job.dataset_id)
        .bind(serde_json::to_string(&job.parameters)?)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<DiagnosticJob>, CoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM diagnostic_jobs WHERE job_id = ?",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DiagnosticJob::try_from).transpose()
    }

    async fn list_jobs(
        &self,
        filter: &JobFilter,
        limit: Option<u32>,
        offset: u32,
    ) -> Result<Vec<DiagnosticJob>, CoreError> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM diagnostic_jobs WHERE 1 = 1", JOB_COLUMNS));
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(kind) = filter.diagnostic_type {
            query.push(" AND diagnostic_type = ").push_bind(kind.as_str());
        }
        // SQLite treats a negative LIMIT as unbounded.
        query
            .push(" ORDER BY rowid DESC LIMIT ")
            .push_bind(limit.map(i64::from).unwrap_or(-1))
            .push(" OFFSET ")
            .push_bind(i64::from(offset));

        let rows = query
            .build_query_as::<JobRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(DiagnosticJob::try_from).collect()
    }

    async fn mark_running(
        &self,
        job_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE diagnostic_jobs
            SET status = 'running', started_at = ?
            WHERE job_id = ? AND status = 'pending'
            "#,
        )
        .bind(started_at)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete_job(
        &self,
        job_id: &str,
        result: &AnalysisResult,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let payload = serde_json::to_string(result)?;
        let result = sqlx::query(
            r#"
            UPDATE diagnostic_jobs
            SET status = 'completed', result = ?, completed_at = ?
            WHERE job_id = ? AND status = 'running'
            "#,
        )
        .bind(payload)
        .bind(completed_at)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail_job(
        &self,
        job_id: &str,
        message: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE diagnostic_jobs
            SET status = 'failed', error_message = ?, completed_at = ?
            WHERE job_id = ? AND status = 'running'
            "#,
        )
        .bind(message)
        .bind(completed_at)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn cancel_job(&self, job_id: &str, at: DateTime<Utc>) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE diagnostic_jobs
            SET status = 'cancelled', completed_at = ?
            WHERE job_id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(at)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn link_report_jobs(&self, report_id: i64, job_ids: &[String]) -> Result<(), CoreError> {
        if job_ids.is_empty() {
            return Err(no_jobs_to_link());
        }
        let mut tx = self.pool.begin().await?;

        let (existing,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM report_diagnostics WHERE report_id = ?")
                .bind(report_id)
                .fetch_one(&mut *tx)
                .await?;
        if existing > 0 {
            return Err(report_already_linked(report_id));
        }

        for (position, job_id) in job_ids.iter().enumerate() {
            let status: Option<(String,)> =
                sqlx::query_as("SELECT status FROM diagnostic_jobs WHERE job_id = ?")
                    .bind(job_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            let Some((status,)) = status else {
                return Err(CoreError::not_found("job", job_id.as_str()));
            };
            let status: crate::model::JobStatus = status.parse()?;
            if !status.is_terminal() {
                return Err(job_not_terminal(job_id));
            }

            sqlx::query(
                "INSERT INTO report_diagnostics (report_id, job_id, position) VALUES (?, ?, ?)",
            )
            .bind(report_id)
            .bind(job_id)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn report_jobs(&self, report_id: i64) -> Result<Vec<String>, CoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT job_id FROM report_diagnostics WHERE report_id = ? ORDER BY position",
        )
        .bind(report_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn health_check(&self) -> Result<bool, CoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}

// ============================================================================
// Registry
// ============================================================================

const SERVER_COLUMNS: &str =
    "id, name, base_url, username, password, description, is_active, created_at";

const DATASET_COLUMNS: &str = "id, name, description, file_path, file_format, thredds_server_id, \
                               thredds_url_path, variables, dimensions, spatial_coverage, \
                               temporal_coverage, is_active, created_at";

#[async_trait::async_trait]
impl Registry for SqlitePersistence {
    async fn insert_server(
        &self,
        server: &NewThreddsServer,
    ) -> Result<ThreddsServerRecord, CoreError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO thredds_servers
                (name, base_url, username, password, description, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(&server.name)
        .bind(&server.base_url)
        .bind(&server.username)
        .bind(&server.password)
        .bind(&server.description)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(ThreddsServerRecord {
            id: result.last_insert_rowid(),
            name: server.name.clone(),
            base_url: server.base_url.clone(),
            username: server.username.clone(),
            password: server.password.clone(),
            description: server.description.clone(),
            is_active: true,
            created_at,
        })
    }

    async fn get_server(&self, id: i64) -> Result<Option<ThreddsServerRecord>, CoreError> {
        let row = sqlx::query_as::<_, ServerRow>(&format!(
            "SELECT {} FROM thredds_servers WHERE id = ?",
            SERVER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ThreddsServerRecord::from))
    }

    async fn list_servers(&self) -> Result<Vec<ThreddsServerRecord>, CoreError> {
        let rows = sqlx::query_as::<_, ServerRow>(&format!(
            "SELECT {} FROM thredds_servers ORDER BY id",
            SERVER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ThreddsServerRecord::from).collect())
    }

    async fn delete_server(&self, id: i64) -> Result<bool, CoreError> {
        let (in_use,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM datasets WHERE thredds_server_id = ? AND is_active = 1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        if in_use > 0 {
            return Err(server_in_use(id, in_use as usize));
        }

        // Inactive datasets keep their rows; detach them from the server.
        sqlx::query("UPDATE datasets SET thredds_server_id = NULL WHERE thredds_server_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let result = sqlx::query("DELETE FROM thredds_servers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_dataset(&self, dataset: &NewDataset) -> Result<DatasetRecord, CoreError> {
        if let Some(server_id) = dataset.thredds_server_id
            && self.get_server(server_id).await?.is_none()
        {
            return Err(CoreError::not_found("server", server_id.to_string()));
        }

        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO datasets
                (name, description, file_path, file_format, thredds_server_id, thredds_url_path,
                 variables, dimensions, spatial_coverage, temporal_coverage, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(&dataset.name)
        .bind(&dataset.description)
        .bind(&dataset.file_path)
        .bind(dataset.file_format.to_ascii_lowercase())
        .bind(dataset.thredds_server_id)
        .bind(&dataset.thredds_url_path)
        .bind(to_json(dataset.variables.as_ref())?)
        .bind(to_json(dataset.dimensions.as_ref())?)
        .bind(to_json(dataset.spatial_coverage.as_ref())?)
        .bind(to_json(dataset.temporal_coverage.as_ref())?)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(DatasetRecord {
            id: result.last_insert_rowid(),
            name: dataset.name.clone(),
            description: dataset.description.clone(),
            file_path: dataset.file_path.clone(),
            file_format: dataset.file_format.to_ascii_lowercase(),
            thredds_server_id: dataset.thredds_server_id,
            thredds_url_path: dataset.thredds_url_path.clone(),
            variables: dataset.variables.clone(),
            dimensions: dataset.dimensions.clone(),
            spatial_coverage: dataset.spatial_coverage,
            temporal_coverage: dataset.temporal_coverage,
            is_active: true,
            created_at,
        })
    }

    async fn get_dataset(&self, id: i64) -> Result<Option<DatasetRecord>, CoreError> {
        let row = sqlx::query_as::<_, DatasetRow>(&format!(
            "SELECT {} FROM datasets WHERE id = ?",
            DATASET_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DatasetRecord::try_from).transpose()
    }

    async fn list_datasets(&self, active_only: bool) -> Result<Vec<DatasetRecord>, CoreError> {
        let sql = if active_only {
            format!("SELECT {} FROM datasets WHERE is_active = 1 ORDER BY id", DATASET_COLUMNS)
        } else {
            format!("SELECT {} FROM datasets ORDER BY id", DATASET_COLUMNS)
        };
        let rows = sqlx::query_as::<_, DatasetRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(DatasetRecord::try_from).collect()
    }

    async fn deactivate_dataset(&self, id: i64) -> Result<bool, CoreError> {
        let result = sqlx::query("UPDATE datasets SET is_active = 0 WHERE id = ? AND is_active = 1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{FeatureSummary, ProfileSummary};
    use crate::model::{DiagnosticType, JobStatus};
    use serde_json::json;
    use uuid::Uuid;

    /// Create an in-memory SQLite pool for testing.
    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");

        MIGRATOR.run(&pool).await.expect("Failed to run migrations");

        pool
    }

    fn new_job(kind: DiagnosticType) -> NewJob {
        NewJob {
            job_id: Uuid::new_v4().to_string(),
            diagnostic_type: kind,
            dataset_id: "local:ctd.json".to_string(),
            parameters: json!({"gradient_threshold": 0.05}),
            created_at: Utc::now(),
        }
    }

    fn sample_result() -> AnalysisResult {
        AnalysisResult::Profile(ProfileSummary {
            diagnostic: DiagnosticType::Thermocline,
            points: vec![],
            sample_count: 0,
            decimated: false,
            layer: None,
            boundary_depths: vec![],
            sound_channel_axis_depth: None,
        })
    }

    #[tokio::test]
    async fn test_create_and_get_job() {
        let store = SqlitePersistence::new(test_pool().await);
        let job = new_job(DiagnosticType::Thermocline);
        store.create_job(&job).await.unwrap();

        let fetched = store.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(fetched.diagnostic_type, DiagnosticType::Thermocline);
        assert_eq!(fetched.parameters, job.parameters);
        assert!(fetched.started_at.is_none());
        assert!(fetched.result.is_none());
    }

    #[tokio::test]
    async fn test_get_job_not_found() {
        let store = SqlitePersistence::new(test_pool().await);
        assert!(store.get_job("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transitions_are_conditional() {
        let store = SqlitePersistence::new(test_pool().await);
        let job = new_job(DiagnosticType::Thermocline);
        store.create_job(&job).await.unwrap();

        // Cannot complete a pending job
        assert!(!store
            .complete_job(&job.job_id, &sample_result(), Utc::now())
            .await
            .unwrap());

        assert!(store.mark_running(&job.job_id, Utc::now()).await.unwrap());
        assert!(!store.mark_running(&job.job_id, Utc::now()).await.unwrap());

        assert!(store
            .complete_job(&job.job_id, &sample_result(), Utc::now())
            .await
            .unwrap());

        // Terminal: nothing else applies
        assert!(!store.fail_job(&job.job_id, "late", Utc::now()).await.unwrap());
        assert!(!store.cancel_job(&job.job_id, Utc::now()).await.unwrap());

        let done = store.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result, Some(sample_result()));
        assert!(done.completed_at.is_some());
        assert!(done.error_message.is_none());
    }

    #[tokio::test]
    async fn test_fail_and_cancel() {
        let store = SqlitePersistence::new(test_pool().await);

        let failed = new_job(DiagnosticType::OceanFront);
        store.create_job(&failed).await.unwrap();
        store.mark_running(&failed.job_id, Utc::now()).await.unwrap();
        assert!(store
            .fail_job(&failed.job_id, "Dataset '9' not found", Utc::now())
            .await
            .unwrap());
        let job = store.get_job(&failed.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("Dataset '9' not found"));

        let cancelled = new_job(DiagnosticType::OceanFront);
        store.create_job(&cancelled).await.unwrap();
        assert!(store.cancel_job(&cancelled.job_id, Utc::now()).await.unwrap());
        assert!(!store.mark_running(&cancelled.job_id, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_jobs_filters_and_pages() {
        let store = SqlitePersistence::new(test_pool().await);
        let mut ids = Vec::new();
        for kind in [
            DiagnosticType::Thermocline,
            DiagnosticType::MesoscaleEddy,
            DiagnosticType::Thermocline,
        ] {
            let job = new_job(kind);
            store.create_job(&job).await.unwrap();
            ids.push(job.job_id);
        }
        store.mark_running(&ids[0], Utc::now()).await.unwrap();

        let all = store.list_jobs(&JobFilter::default(), None, 0).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].job_id, ids[2], "newest first");

        let thermo = store
            .list_jobs(
                &JobFilter {
                    diagnostic_type: Some(DiagnosticType::Thermocline),
                    ..Default::default()
                },
                None,
                0,
            )
            .await
            .unwrap();
        assert_eq!(thermo.len(), 2);

        let running = store
            .list_jobs(
                &JobFilter {
                    status: Some(JobStatus::Running),
                    ..Default::default()
                },
                None,
                0,
            )
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].job_id, ids[0]);

        let page = store.list_jobs(&JobFilter::default(), Some(1), 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].job_id, ids[1]);
    }

    #[tokio::test]
    async fn test_report_links_require_terminal_jobs_and_are_immutable() {
        let store = SqlitePersistence::new(test_pool().await);
        let job = new_job(DiagnosticType::MesoscaleEddy);
        store.create_job(&job).await.unwrap();

        let err = store
            .link_report_jobs(1, std::slice::from_ref(&job.job_id))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        store.mark_running(&job.job_id, Utc::now()).await.unwrap();
        let result = AnalysisResult::Features(FeatureSummary {
            diagnostic: DiagnosticType::MesoscaleEddy,
            features: vec![],
            total_detected: 0,
            truncated: false,
        });
        store.complete_job(&job.job_id, &result, Utc::now()).await.unwrap();

        store
            .link_report_jobs(1, std::slice::from_ref(&job.job_id))
            .await
            .unwrap();
        assert_eq!(store.report_jobs(1).await.unwrap(), vec![job.job_id.clone()]);

        let err = store.link_report_jobs(1, &[]).await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let err = store
            .link_report_jobs(2, &["missing".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
        assert!(store.report_jobs(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_and_dataset_registry() {
        let store = SqlitePersistence::new(test_pool().await);
        let server = store
            .insert_server(&NewThreddsServer {
                name: "ncei".to_string(),
                base_url: "https://www.ncei.noaa.gov/thredds".to_string(),
                username: Some("u".to_string()),
                password: Some("p".to_string()),
                description: None,
            })
            .await
            .unwrap();

        let fetched = store.get_server(server.id).await.unwrap().unwrap();
        assert_eq!(fetched.password.as_deref(), Some("p"));

        let dataset = store
            .insert_dataset(&NewDataset {
                name: "woa".to_string(),
                description: Some("World Ocean Atlas".to_string()),
                file_path: "ocean/woa.nc".to_string(),
                file_format: "OPeNDAP".to_string(),
                thredds_server_id: Some(server.id),
                thredds_url_path: Some("ocean/woa.nc".to_string()),
                variables: Some(json!(["temperature"])),
                dimensions: None,
                spatial_coverage: None,
                temporal_coverage: None,
            })
            .await
            .unwrap();
        assert_eq!(dataset.file_format, "opendap");

        let err = store.delete_server(server.id).await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        assert!(store.deactivate_dataset(dataset.id).await.unwrap());
        assert_eq!(store.list_datasets(true).await.unwrap().len(), 0);
        assert_eq!(store.list_datasets(false).await.unwrap().len(), 1);

        assert!(store.delete_server(server.id).await.unwrap());
        assert!(store.get_server(server.id).await.unwrap().is_none());
        let orphan = store.get_dataset(dataset.id).await.unwrap().unwrap();
        assert_eq!(orphan.thredds_server_id, None);
        assert_eq!(orphan.variables, Some(json!(["temperature"])));
    }

    #[tokio::test]
    async fn test_insert_dataset_unknown_server() {
        let store = SqlitePersistence::new(test_pool().await);
        let err = store
            .insert_dataset(&NewDataset {
                name: "x".to_string(),
                description: None,
                file_path: "x.nc".to_string(),
                file_format: "opendap".to_string(),
                thredds_server_id: Some(77),
                thredds_url_path: None,
                variables: None,
                dimensions: None,
                spatial_coverage: None,
                temporal_coverage: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_health_check() {
        let store = SqlitePersistence::new(test_pool().await);
        assert!(store.health_check().await.unwrap());
    }
}
