// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for seastate-core integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use seastate_core::catalog::CatalogClients;
use seastate_core::config::WorkerPoolConfig;
use seastate_core::dataset::{DatasetAccess, FetchPolicy};
use seastate_core::encoder::EncoderLimits;
use seastate_core::persistence::{JobStore, MemoryPersistence, Registry};
use seastate_core::{DiagnosticJob, JobScheduler};

/// CTD cast with a sharp temperature drop between 10 and 30 m.
pub const CTD_PROFILE: &str = r#"{
    "dimensions": {"depth": 6},
    "variables": {
        "depth": {"dimensions": ["depth"], "data": [0, 10, 20, 30, 40, 50], "units": "m"},
        "temperature": {"dimensions": ["depth"], "data": [20.0, 20.0, 14.0, 8.0, 8.0, 8.0]},
        "salinity": {"dimensions": ["depth"], "data": [35.0, 35.0, 35.2, 35.4, 35.4, 35.4]}
    },
    "spatial_coverage": {"min_lat": 42.0, "max_lat": 42.0, "min_lon": -30.0, "max_lon": -30.0}
}"#;

/// Write `contents` to `name` under `dir`.
pub fn write_dataset(dir: &Path, name: &str, contents: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create dataset directory");
    }
    std::fs::write(path, contents).expect("write dataset");
}

pub fn dataset_access(registry: Arc<dyn Registry>, data_dir: &Path) -> DatasetAccess {
    DatasetAccess::new(
        registry,
        Arc::new(CatalogClients::new(Duration::from_secs(5))),
        data_dir,
        FetchPolicy::default(),
    )
}

/// Scheduler over in-memory persistence rooted at `data_dir`.
pub fn memory_scheduler(data_dir: &Path, max_concurrent_jobs: usize) -> JobScheduler {
    let persistence = Arc::new(MemoryPersistence::new());
    scheduler_with(persistence.clone(), persistence, data_dir, max_concurrent_jobs)
}

pub fn scheduler_with(
    store: Arc<dyn JobStore>,
    registry: Arc<dyn Registry>,
    data_dir: &Path,
    max_concurrent_jobs: usize,
) -> JobScheduler {
    JobScheduler::start(
        store,
        dataset_access(registry, data_dir),
        WorkerPoolConfig {
            max_concurrent_jobs,
            queue_capacity: 16,
        },
        EncoderLimits::default(),
    )
}

/// Poll until the job is terminal, recording every status seen.
pub async fn wait_for_terminal(
    scheduler: &JobScheduler,
    job_id: &str,
) -> (DiagnosticJob, Vec<seastate_core::JobStatus>) {
    let mut seen = Vec::new();
    for _ in 0..500 {
        let job = scheduler.get_status(job_id).await.expect("job exists");
        if seen.last() != Some(&job.status) {
            seen.push(job.status);
        }
        if job.status.is_terminal() {
            return (job, seen);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not finish, statuses seen: {:?}", job_id, seen);
}
