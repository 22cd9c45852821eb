// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process persistence for embedding and tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::encoder::AnalysisResult;
use crate::error::CoreError;
use crate::model::{
    DatasetRecord, DiagnosticJob, JobFilter, JobStatus, NewDataset, NewJob, NewThreddsServer,
    ThreddsServerRecord,
};

use super::{
    JobStore, Registry, job_not_terminal, no_jobs_to_link, report_already_linked, server_in_use,
};

#[derive(Default)]
struct Jobs {
    by_id: HashMap<String, DiagnosticJob>,
    /// Insertion order, for newest-first listing.
    order: Vec<String>,
    reports: HashMap<i64, Vec<String>>,
}

#[derive(Default)]
struct Records {
    servers: BTreeMap<i64, ThreddsServerRecord>,
    datasets: BTreeMap<i64, DatasetRecord>,
    next_server_id: i64,
    next_dataset_id: i64,
}

/// Maps behind `tokio::sync::RwLock`. Each write takes the lock once, so
/// readers never see a half-applied transition.
#[derive(Default)]
pub struct MemoryPersistence {
    jobs: RwLock<Jobs>,
    records: RwLock<Records>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

fn transition(
    jobs: &mut Jobs,
    job_id: &str,
    from: &[JobStatus],
    apply: impl FnOnce(&mut DiagnosticJob),
) -> bool {
    match jobs.by_id.get_mut(job_id) {
        Some(job) if from.contains(&job.status) => {
            apply(job);
            true
        }
        _ => false,
    }
}

#[async_trait]
impl JobStore for MemoryPersistence {
    async fn create_job(&self, job: &NewJob) -> Result<(), CoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.by_id.contains_key(&job.job_id) {
            return Err(CoreError::Database {
                operation: "create_job".to_string(),
                details: format!("duplicate job id '{}'", job.job_id),
            });
        }
        jobs.by_id.insert(
            job.job_id.clone(),
            DiagnosticJob {
                job_id: job.job_id.clone(),
                diagnostic_type: job.diagnostic_type,
                dataset_id: job.dataset_id.clone(),
                parameters: job.parameters.clone(),
                status: JobStatus::Pending,
                result: None,
                error_message: None,
                created_at: job.created_at,
                started_at: None,
                completed_at: None,
            },
        );
        jobs.order.push(job.job_id.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<DiagnosticJob>, CoreError> {
        Ok(self.jobs.read().await.by_id.get(job_id).cloned())
    }

    async fn list_jobs(
        &self,
        filter: &JobFilter,
        limit: Option<u32>,
        offset: u32,
    ) -> Result<Vec<DiagnosticJob>, CoreError> {
        let jobs = self.jobs.read().await;
        let matches = jobs
            .order
            .iter()
            .rev()
            .filter_map(|id| jobs.by_id.get(id))
            .filter(|j| filter.status.is_none_or(|s| j.status == s))
            .filter(|j| filter.diagnostic_type.is_none_or(|k| j.diagnostic_type == k))
            .skip(offset as usize)
            .take(limit.map(|l| l as usize).unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(matches)
    }

    async fn mark_running(
        &self,
        job_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let mut jobs = self.jobs.write().await;
        Ok(transition(&mut jobs, job_id, &[JobStatus::Pending], |job| {
            job.status = JobStatus::Running;
            job.started_at = Some(started_at);
        }))
    }

    async fn complete_job(
        &self,
        job_id: &str,
        result: &AnalysisResult,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let mut jobs = self.jobs.write().await;
        Ok(transition(&mut jobs, job_id, &[JobStatus::Running], |job| {
            job.status = JobStatus::Completed;
            job.result = Some(result.clone());
            job.completed_at = Some(completed_at);
        }))
    }

    async fn fail_job(
        &self,
        job_id: &str,
        message: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let mut jobs = self.jobs.write().await;
        Ok(transition(&mut jobs, job_id, &[JobStatus::Running], |job| {
            job.status = JobStatus::Failed;
            job.error_message = Some(message.to_string());
            job.completed_at = Some(completed_at);
        }))
    }

    async fn cancel_job(&self, job_id: &str, at: DateTime<Utc>) -> Result<bool, CoreError> {
        let mut jobs = self.jobs.write().await;
        Ok(transition(
            &mut jobs,
            job_id,
            &[JobStatus::Pending, JobStatus::Running],
            |job| {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(at);
            },
        ))
    }

    async fn link_report_jobs(&self, report_id: i64, job_ids: &[String]) -> Result<(), CoreError> {
        if job_ids.is_empty() {
            return Err(no_jobs_to_link());
        }
        let mut jobs = self.jobs.write().await;
        if jobs.reports.contains_key(&report_id) {
            return Err(report_already_linked(report_id));
        }
        for job_id in job_ids {
            let job = jobs
                .by_id
                .get(job_id)
                .ok_or_else(|| CoreError::not_found("job", job_id.as_str()))?;
            if !job.status.is_terminal() {
                return Err(job_not_terminal(job_id));
            }
        }
        jobs.reports.insert(report_id, job_ids.to_vec());
        Ok(())
    }

    async fn report_jobs(&self, report_id: i64) -> Result<Vec<String>, CoreError> {
        Ok(self
            .jobs
            .read()
            .await
            .reports
            .get(&report_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn health_check(&self) -> Result<bool, CoreError> {
        Ok(true)
    }
}

#[async_trait]
impl Registry for MemoryPersistence {
    async fn insert_server(
        &self,
        server: &NewThreddsServer,
    ) -> Result<ThreddsServerRecord, CoreError> {
        let mut records = self.records.write().await;
        records.next_server_id += 1;
        let record = ThreddsServerRecord {
            id: records.next_server_id,
            name: server.name.clone(),
            base_url: server.base_url.clone(),
            username: server.username.clone(),
            password: server.password.clone(),
            description: server.description.clone(),
            is_active: true,
            created_at: Utc::now(),
        };
        records.servers.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_server(&self, id: i64) -> Result<Option<ThreddsServerRecord>, CoreError> {
        Ok(self.records.read().await.servers.get(&id).cloned())
    }

    async fn list_servers(&self) -> Result<Vec<ThreddsServerRecord>, CoreError> {
        Ok(self.records.read().await.servers.values().cloned().collect())
    }

    async fn delete_server(&self, id: i64) -> Result<bool, CoreError> {
        let mut records = self.records.write().await;
        let in_use = records
            .datasets
            .values()
            .filter(|d| d.is_active && d.thredds_server_id == Some(id))
            .count();
        if in_use > 0 {
            return Err(server_in_use(id, in_use));
        }
        for dataset in records.datasets.values_mut() {
            if dataset.thredds_server_id == Some(id) {
                dataset.thredds_server_id = None;
            }
        }
        Ok(records.servers.remove(&id).is_some())
    }

    async fn insert_dataset(&self, dataset: &NewDataset) -> Result<DatasetRecord, CoreError> {
        let mut records = self.records.write().await;
        if let Some(server_id) = dataset.thredds_server_id
            && !records.servers.contains_key(&server_id)
        {
            return Err(CoreError::not_found("server", server_id.to_string()));
        }
        records.next_dataset_id += 1;
        let record = DatasetRecord {
            id: records.next_dataset_id,
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
            created_at: Utc::now(),
        };
        records.datasets.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_dataset(&self, id: i64) -> Result<Option<DatasetRecord>, CoreError> {
        Ok(self.records.read().await.datasets.get(&id).cloned())
    }

    async fn list_datasets(&self, active_only: bool) -> Result<Vec<DatasetRecord>, CoreError> {
        Ok(self
            .records
            .read()
            .await
            .datasets
            .values()
            .filter(|d| !active_only || d.is_active)
            .cloned()
            .collect())
    }

    async fn deactivate_dataset(&self, id: i64) -> Result<bool, CoreError> {
        let mut records = self.records.write().await;
        match records.datasets.get_mut(&id) {
            Some(d) if d.is_active => {
                d.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DiagnosticType;
    use serde_json::json;

    fn new_job(id: &str) -> NewJob {
        NewJob {
            job_id: id.to_string(),
            diagnostic_type: DiagnosticType::InternalWave,
            dataset_id: "1".to_string(),
            parameters: json!({}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_status_never_moves_backwards() {
        let store = MemoryPersistence::new();
        store.create_job(&new_job("a")).await.unwrap();

        assert!(store.mark_running("a", Utc::now()).await.unwrap());
        assert!(store.fail_job("a", "boom", Utc::now()).await.unwrap());
        assert!(!store.mark_running("a", Utc::now()).await.unwrap());
        assert!(!store.cancel_job("a", Utc::now()).await.unwrap());

        let job = store.get_job("a").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_duplicate_job_rejected() {
        let store = MemoryPersistence::new();
        store.create_job(&new_job("a")).await.unwrap();
        assert!(store.create_job(&new_job("a")).await.is_err());
    }

    #[tokio::test]
    async fn test_list_jobs_newest_first_with_paging() {
        let store = MemoryPersistence::new();
        for id in ["a", "b", "c"] {
            store.create_job(&new_job(id)).await.unwrap();
        }
        let ids: Vec<String> = store
            .list_jobs(&JobFilter::default(), Some(2), 1)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.job_id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_report_links() {
        let store = MemoryPersistence::new();
        store.create_job(&new_job("a")).await.unwrap();
        store.cancel_job("a", Utc::now()).await.unwrap();

        store.link_report_jobs(5, &["a".to_string()]).await.unwrap();
        assert_eq!(store.report_jobs(5).await.unwrap(), vec!["a"]);
        assert!(store.link_report_jobs(5, &["a".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_server_in_use() {
        let store = MemoryPersistence::new();
        let server = store
            .insert_server(&NewThreddsServer {
                name: "s".to_string(),
                base_url: "http://s".to_string(),
                username: None,
                password: None,
                description: None,
            })
            .await
            .unwrap();
        let dataset = store
            .insert_dataset(&NewDataset {
                name: "d".to_string(),
                description: None,
                file_path: "d.nc".to_string(),
                file_format: "opendap".to_string(),
                thredds_server_id: Some(server.id),
                thredds_url_path: None,
                variables: None,
                dimensions: None,
                spatial_coverage: None,
                temporal_coverage: None,
            })
            .await
            .unwrap();

        assert!(store.delete_server(server.id).await.is_err());
        store.deactivate_dataset(dataset.id).await.unwrap();
        assert!(store.delete_server(server.id).await.unwrap());
        assert!(!store.delete_server(server.id).await.unwrap());
    }
}
