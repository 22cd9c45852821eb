// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end job lifecycle tests: submit, poll, cancel, recover.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use seastate_core::encoder::AnalysisResult;
use seastate_core::model::{JobFilter, NewJob, NewThreddsServer};
use seastate_core::persistence::{JobStore, MemoryPersistence, Registry, SqlitePersistence};
use seastate_core::scheduler::{INTERRUPTED_MESSAGE, RecoveryReport};
use seastate_core::{DiagnosticType, JobStatus};
use serde_json::json;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;

fn assert_monotonic(seen: &[JobStatus]) {
    for pair in seen.windows(2) {
        assert!(
            pair[0].rank() < pair[1].rank(),
            "status moved backwards: {:?}",
            seen
        );
    }
}

#[tokio::test]
async fn test_local_thermocline_job_completes() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), "ctd/station1.json", CTD_PROFILE);
    let scheduler = memory_scheduler(dir.path(), 2);

    let job_id = scheduler
        .submit(
            "thermocline",
            "local:ctd/station1.json",
            json!({"gradient_threshold": 0.1}),
        )
        .await
        .unwrap();

    let submitted = scheduler.get_status(&job_id).await.unwrap();
    assert_eq!(submitted.diagnostic_type, DiagnosticType::Thermocline);
    assert_eq!(submitted.dataset_id, "local:ctd/station1.json");

    let (job, seen) = wait_for_terminal(&scheduler, &job_id).await;
    assert_monotonic(&seen);
    assert_eq!(job.status, JobStatus::Completed, "error: {:?}", job.error_message);
    assert!(job.error_message.is_none());
    assert!(job.started_at.is_some());
    assert!(job.completed_at >= job.started_at);

    let Some(AnalysisResult::Profile(summary)) = job.result else {
        panic!("expected a profile result");
    };
    assert_eq!(summary.points.len(), 6);
    let layer = summary.layer.unwrap();
    assert!(layer.top_depth >= 10.0 && layer.bottom_depth <= 30.0);
    assert_eq!(summary.boundary_depths, vec![layer.core_depth]);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_failed_job_records_message() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), "broken.json", "{\"dimensions\": ");
    let scheduler = memory_scheduler(dir.path(), 1);

    let missing = scheduler
        .submit("halocline", "local:missing.json", json!({"gradient_threshold": 0.01}))
        .await
        .unwrap();
    let broken = scheduler
        .submit("halocline", "local:broken.json", json!({"gradient_threshold": 0.01}))
        .await
        .unwrap();

    for (job_id, code_hint) in [(missing, "not found"), (broken, "broken.json")] {
        let (job, seen) = wait_for_terminal(&scheduler, &job_id).await;
        assert_monotonic(&seen);
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result.is_none());
        let message = job.error_message.unwrap();
        assert!(!message.is_empty());
        assert!(message.contains(code_hint), "message: {}", message);
    }

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_identical_jobs_give_identical_results() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), "ctd.json", CTD_PROFILE);
    let scheduler = memory_scheduler(dir.path(), 2);

    let params = json!({"gradient_threshold": 0.05});
    let first = scheduler
        .submit("sound_speed", "local:ctd.json", params.clone())
        .await
        .unwrap();
    let second = scheduler
        .submit("sound_speed", "local:ctd.json", params)
        .await
        .unwrap();
    assert_ne!(first, second);

    let (a, _) = wait_for_terminal(&scheduler, &first).await;
    let (b, _) = wait_for_terminal(&scheduler, &second).await;
    assert_eq!(a.status, JobStatus::Completed, "error: {:?}", a.error_message);
    assert_eq!(a.result, b.result);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_many_jobs_with_small_pool() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), "ctd.json", CTD_PROFILE);
    let scheduler = memory_scheduler(dir.path(), 2);

    let mut ids = Vec::new();
    for threshold in [0.05, 0.1, 0.2, 0.4, 0.8] {
        ids.push(
            scheduler
                .submit("thermocline", "local:ctd.json", json!({"gradient_threshold": threshold}))
                .await
                .unwrap(),
        );
    }
    for id in &ids {
        let (job, _) = wait_for_terminal(&scheduler, id).await;
        assert_eq!(job.status, JobStatus::Completed);
    }

    let completed = scheduler
        .list_jobs(
            &JobFilter {
                status: Some(JobStatus::Completed),
                ..Default::default()
            },
            None,
            0,
        )
        .await
        .unwrap();
    assert_eq!(completed.len(), ids.len());

    let page = scheduler
        .list_jobs(&JobFilter::default(), Some(2), 1)
        .await
        .unwrap();
    assert_eq!(page.len(), 2);

    scheduler.shutdown().await;
}

/// Catalog that answers slowly enough for a job to be cancelled mid-flight.
async fn slow_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;
    server
}

async fn wait_for_status(
    scheduler: &seastate_core::JobScheduler,
    job_id: &str,
    status: JobStatus,
) {
    for _ in 0..300 {
        if scheduler.get_status(job_id).await.unwrap().status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never reached {}", job_id, status);
}

#[tokio::test]
async fn test_running_jobs_never_exceed_pool_size() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let persistence = Arc::new(MemoryPersistence::new());
    let server_id = persistence
        .insert_server(&NewThreddsServer {
            name: "slow".to_string(),
            base_url: format!("{}/thredds", server.uri()),
            username: None,
            password: None,
            description: None,
        })
        .await
        .unwrap()
        .id;
    let scheduler = scheduler_with(persistence.clone(), persistence, dir.path(), 2);

    let dataset = format!("catalog:{}/ocean/ctd.nc", server_id);
    let mut ids = Vec::new();
    for _ in 0..6 {
        ids.push(
            scheduler
                .submit("thermocline", &dataset, json!({"gradient_threshold": 0.1}))
                .await
                .unwrap(),
        );
    }

    let running = JobFilter {
        status: Some(JobStatus::Running),
        ..Default::default()
    };
    let mut peak = 0;
    for _ in 0..500 {
        let now_running = scheduler.list_jobs(&running, None, 0).await.unwrap().len();
        assert!(now_running <= 2, "{} jobs running with a pool of 2", now_running);
        peak = peak.max(now_running);

        let jobs = scheduler
            .list_jobs(&JobFilter::default(), None, 0)
            .await
            .unwrap();
        if jobs.iter().all(|j| j.status.is_terminal()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(peak, 2);

    for id in &ids {
        let job = scheduler.get_status(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_cancel_running_and_pending_jobs() {
    let server = slow_server().await;
    let dir = tempfile::tempdir().unwrap();
    let persistence = Arc::new(MemoryPersistence::new());
    let server_id = persistence
        .insert_server(&NewThreddsServer {
            name: "slow".to_string(),
            base_url: format!("{}/thredds", server.uri()),
            username: None,
            password: None,
            description: None,
        })
        .await
        .unwrap()
        .id;
    let scheduler = scheduler_with(persistence.clone(), persistence, dir.path(), 1);

    let dataset = format!("catalog:{}/ocean/ctd.nc", server_id);
    let params = json!({"gradient_threshold": 0.1});
    let running = scheduler
        .submit("thermocline", &dataset, params.clone())
        .await
        .unwrap();
    wait_for_status(&scheduler, &running, JobStatus::Running).await;

    // The only worker is busy, so this one stays queued.
    let queued = scheduler
        .submit("thermocline", &dataset, params)
        .await
        .unwrap();
    let cancelled = scheduler.cancel(&queued).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.started_at.is_none());

    let cancelled = scheduler.cancel(&running).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let err = scheduler.cancel(&running).await.unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");

    // Neither job moves on after cancellation.
    tokio::time::sleep(Duration::from_millis(100)).await;
    for id in [&running, &queued] {
        let job = scheduler.get_status(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.result.is_none());
    }

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_recovery_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), "ctd.json", CTD_PROFILE);
    let persistence = Arc::new(SqlitePersistence::connect("sqlite::memory:").await.unwrap());

    let job = |id: &str, parameters: serde_json::Value| NewJob {
        job_id: id.to_string(),
        diagnostic_type: DiagnosticType::Thermocline,
        dataset_id: "local:ctd.json".to_string(),
        parameters,
        created_at: Utc::now(),
    };
    // Left behind by a previous process.
    persistence
        .create_job(&job("was-running", json!({"gradient_threshold": 0.1})))
        .await
        .unwrap();
    assert!(persistence.mark_running("was-running", Utc::now()).await.unwrap());
    persistence
        .create_job(&job("was-pending", json!({"gradient_threshold": 0.1})))
        .await
        .unwrap();
    persistence
        .create_job(&job("stale-params", json!({"threshold": 0.1})))
        .await
        .unwrap();

    let scheduler = scheduler_with(persistence.clone(), persistence.clone(), dir.path(), 1);
    let report = scheduler.recover().await.unwrap();
    assert_eq!(
        report,
        RecoveryReport {
            requeued: 1,
            interrupted: 1,
        }
    );

    let interrupted = scheduler.get_status("was-running").await.unwrap();
    assert_eq!(interrupted.status, JobStatus::Failed);
    assert_eq!(interrupted.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));

    let stale = scheduler.get_status("stale-params").await.unwrap();
    assert_eq!(stale.status, JobStatus::Failed);
    assert!(stale.error_message.is_some_and(|m| !m.is_empty()));

    let (resumed, _) = wait_for_terminal(&scheduler, "was-pending").await;
    assert_eq!(resumed.status, JobStatus::Completed);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_queue_full_is_unavailable() {
    let server = slow_server().await;
    let dir = tempfile::tempdir().unwrap();
    let persistence = Arc::new(MemoryPersistence::new());
    let server_id = persistence
        .insert_server(&NewThreddsServer {
            name: "slow".to_string(),
            base_url: server.uri(),
            username: None,
            password: None,
            description: None,
        })
        .await
        .unwrap()
        .id;
    let scheduler = seastate_core::JobScheduler::start(
        persistence.clone(),
        dataset_access(persistence.clone(), dir.path()),
        seastate_core::config::WorkerPoolConfig {
            max_concurrent_jobs: 1,
            queue_capacity: 1,
        },
        Default::default(),
    );

    let dataset = format!("catalog:{}/a.nc", server_id);
    let params = json!({"gradient_threshold": 0.1});
    let first = scheduler
        .submit("thermocline", &dataset, params.clone())
        .await
        .unwrap();
    wait_for_status(&scheduler, &first, JobStatus::Running).await;

    // One job running and one queued fills a queue of capacity 1.
    let second = scheduler
        .submit("thermocline", &dataset, params.clone())
        .await
        .unwrap();
    let err = scheduler
        .submit("thermocline", &dataset, params)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "UNAVAILABLE");

    let all = scheduler
        .list_jobs(&JobFilter::default(), None, 0)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    scheduler.cancel(&second).await.unwrap();
    scheduler.cancel(&first).await.unwrap();
    scheduler.shutdown().await;
}
