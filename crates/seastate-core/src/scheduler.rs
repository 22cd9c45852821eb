// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job scheduler and executor.
//!
//! Submissions are validated, written to the [`JobStore`] as `pending`, and
//! pushed onto a bounded queue. A dispatcher task pulls from the queue and
//! runs each job on its own task, at most `max_concurrent_jobs` at a time.
//!
//! ```text
//! submit ──► JobStore (pending) ──► queue ──► dispatcher ──► worker
//!                                                              │
//!             running ◄── mark_running ◄───────────────────────┤
//!             resolve ─► open ─► diagnostic ─► encode          │
//!             completed | failed | cancelled ◄─────────────────┘
//! ```
//!
//! A worker writes `running` before doing anything else, and every terminal
//! write is conditional on the job still being `running`, so pollers observe
//! a monotonic status sequence. Failures are recorded on the job, never
//! propagated to the dispatcher; jobs are not retried.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerPoolConfig;
use crate::dataset::{DatasetAccess, DatasetRef};
use crate::diagnostics::{self, ParameterSet};
use crate::encoder::{self, AnalysisResult, EncoderLimits};
use crate::error::{CoreError, Result};
use crate::model::{DiagnosticJob, DiagnosticType, JobFilter, JobStatus, NewJob};
use crate::persistence::JobStore;

/// Error message recorded on jobs found `running` at startup.
pub const INTERRUPTED_MESSAGE: &str = "interrupted by shutdown";

struct QueuedJob {
    job_id: String,
    kind: DiagnosticType,
    dataset: DatasetRef,
    params: ParameterSet,
    token: CancellationToken,
}

type TokenMap = Arc<Mutex<HashMap<String, CancellationToken>>>;

struct WorkerContext {
    store: Arc<dyn JobStore>,
    access: DatasetAccess,
    limits: EncoderLimits,
    tokens: TokenMap,
}

/// Outcome of [`JobScheduler::recover`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Pending jobs put back on the queue.
    pub requeued: usize,
    /// Jobs that were running when the previous process stopped.
    pub interrupted: usize,
}

pub struct JobScheduler {
    store: Arc<dyn JobStore>,
    sender: mpsc::Sender<QueuedJob>,
    tokens: TokenMap,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Spawn the dispatcher and return a scheduler ready for submissions.
    pub fn start(
        store: Arc<dyn JobStore>,
        access: DatasetAccess,
        workers: WorkerPoolConfig,
        limits: EncoderLimits,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(workers.queue_capacity.max(1));
        let tokens: TokenMap = Arc::default();
        let shutdown = CancellationToken::new();
        let ctx = Arc::new(WorkerContext {
            store: store.clone(),
            access,
            limits,
            tokens: tokens.clone(),
        });
        let dispatcher = tokio::spawn(dispatch(
            receiver,
            ctx,
            workers.max_concurrent_jobs.max(1),
            shutdown.clone(),
        ));
        info!(
            max_concurrent_jobs = workers.max_concurrent_jobs,
            queue_capacity = workers.queue_capacity,
            "Job scheduler started"
        );
        Self {
            store,
            sender,
            tokens,
            shutdown,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Validate and enqueue a job, returning its id.
    ///
    /// Every check runs before the job record is written: an unknown
    /// diagnostic, invalid parameters, a malformed dataset reference, or a
    /// full queue all fail without creating anything.
    pub async fn submit(
        &self,
        diagnostic_type: &str,
        dataset_id: &str,
        parameters: Value,
    ) -> Result<String> {
        let kind = diagnostics::lookup(diagnostic_type)
            .map_err(|e| CoreError::validation("diagnosticType", e.to_string()))?;
        let params = ParameterSet::parse(kind, &parameters)?;
        let dataset: DatasetRef = dataset_id.parse()?;

        if self.shutdown.is_cancelled() {
            return Err(unavailable("scheduler is shutting down"));
        }
        let slot = self.sender.try_reserve().map_err(|e| match e {
            TrySendError::Full(()) => {
                debug!("Submission queue full");
                unavailable("submission queue is full")
            }
            TrySendError::Closed(()) => unavailable("scheduler is shutting down"),
        })?;

        let job_id = Uuid::new_v4().to_string();
        self.store
            .create_job(&NewJob {
                job_id: job_id.clone(),
                diagnostic_type: kind,
                dataset_id: dataset.to_string(),
                parameters,
                created_at: Utc::now(),
            })
            .await?;

        let token = CancellationToken::new();
        self.tokens
            .lock()
            .await
            .insert(job_id.clone(), token.clone());
        slot.send(QueuedJob {
            job_id: job_id.clone(),
            kind,
            dataset,
            params,
            token,
        });

        info!(job_id = %job_id, diagnostic = %kind, dataset = dataset_id, "Job submitted");
        Ok(job_id)
    }

    /// Current state of a job.
    pub async fn get_status(&self, job_id: &str) -> Result<DiagnosticJob> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| CoreError::not_found("job", job_id))
    }

    pub async fn list_jobs(
        &self,
        filter: &JobFilter,
        limit: Option<u32>,
        offset: u32,
    ) -> Result<Vec<DiagnosticJob>> {
        self.store.list_jobs(filter, limit, offset).await
    }

    /// Move a pending or running job to `cancelled`.
    ///
    /// A running job's worker stops at its next suspension point. Finished
    /// jobs cannot be cancelled.
    pub async fn cancel(&self, job_id: &str) -> Result<DiagnosticJob> {
        let job = self.get_status(job_id).await?;
        if job.status.is_terminal() {
            return Err(already_finished(job_id, job.status));
        }

        if self.store.cancel_job(job_id, Utc::now()).await? {
            if let Some(token) = self.tokens.lock().await.get(job_id) {
                token.cancel();
            }
            info!(job_id = %job_id, "Job cancelled");
        }

        let job = self.get_status(job_id).await?;
        if job.status != JobStatus::Cancelled {
            return Err(already_finished(job_id, job.status));
        }
        Ok(job)
    }

    /// Reconcile jobs left behind by a previous process.
    ///
    /// `running` jobs are marked failed; `pending` jobs are queued again,
    /// oldest first.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        let running = JobFilter {
            status: Some(JobStatus::Running),
            ..Default::default()
        };
        for job in self.store.list_jobs(&running, None, 0).await? {
            if self
                .store
                .fail_job(&job.job_id, INTERRUPTED_MESSAGE, Utc::now())
                .await?
            {
                warn!(job_id = %job.job_id, "Marked interrupted job as failed");
                report.interrupted += 1;
            }
        }

        let pending = JobFilter {
            status: Some(JobStatus::Pending),
            ..Default::default()
        };
        let mut jobs = self.store.list_jobs(&pending, None, 0).await?;
        jobs.reverse();
        for job in jobs {
            if self.requeue(&job).await? {
                report.requeued += 1;
            }
        }

        if report != RecoveryReport::default() {
            info!(
                requeued = report.requeued,
                interrupted = report.interrupted,
                "Recovered jobs from previous run"
            );
        }
        Ok(report)
    }

    async fn requeue(&self, job: &DiagnosticJob) -> Result<bool> {
        let parsed = ParameterSet::parse(job.diagnostic_type, &job.parameters).and_then(|params| {
            let dataset: DatasetRef = job.dataset_id.parse()?;
            Ok((params, dataset))
        });
        let (params, dataset) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                // Stored before a parameter schema change; it can never run.
                let now = Utc::now();
                if self.store.mark_running(&job.job_id, now).await? {
                    self.store
                        .fail_job(&job.job_id, &e.to_string(), now)
                        .await?;
                }
                warn!(job_id = %job.job_id, error = %e, "Pending job no longer valid");
                return Ok(false);
            }
        };

        let token = CancellationToken::new();
        self.tokens
            .lock()
            .await
            .insert(job.job_id.clone(), token.clone());
        self.sender
            .send(QueuedJob {
                job_id: job.job_id.clone(),
                kind: job.diagnostic_type,
                dataset,
                params,
                token,
            })
            .await
            .map_err(|_| unavailable("scheduler is shutting down"))?;
        Ok(true)
    }

    /// Stop taking jobs from the queue and wait for running jobs to finish.
    ///
    /// Jobs still queued stay `pending` and are picked up by
    /// [`recover`](Self::recover) on the next start.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.dispatcher.lock().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Job dispatcher task failed");
            }
        }
        info!("Job scheduler stopped");
    }
}

fn unavailable(reason: &str) -> CoreError {
    CoreError::Unavailable {
        reason: reason.to_string(),
    }
}

fn already_finished(job_id: &str, status: JobStatus) -> CoreError {
    CoreError::validation("jobId", format!("job '{}' is already {}", job_id, status))
}

async fn dispatch(
    mut receiver: mpsc::Receiver<QueuedJob>,
    ctx: Arc<WorkerContext>,
    max_concurrent: usize,
    shutdown: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let mut workers = JoinSet::new();

    loop {
        if semaphore.available_permits() == 0 {
            debug!(max_concurrent = max_concurrent, "Worker pool saturated");
        }
        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = receiver.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        while let Some(finished) = workers.try_join_next() {
            log_worker_exit(finished);
        }

        let ctx = ctx.clone();
        workers.spawn(async move {
            let _permit = permit;
            run_job(&ctx, job).await;
        });
    }

    receiver.close();
    if !workers.is_empty() {
        info!(in_flight = workers.len(), "Waiting for running jobs");
    }
    while let Some(finished) = workers.join_next().await {
        log_worker_exit(finished);
    }
}

fn log_worker_exit(result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "Worker task ended abnormally");
    }
}

async fn run_job(ctx: &WorkerContext, job: QueuedJob) {
    let QueuedJob {
        job_id,
        kind,
        dataset,
        params,
        token,
    } = job;

    match ctx.store.mark_running(&job_id, Utc::now()).await {
        Ok(true) => {}
        Ok(false) => {
            debug!(job_id = %job_id, "Job no longer pending, skipping");
            ctx.tokens.lock().await.remove(&job_id);
            return;
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Failed to mark job running");
            ctx.tokens.lock().await.remove(&job_id);
            return;
        }
    }
    info!(job_id = %job_id, diagnostic = %kind, dataset = %dataset, "Job started");

    let work = AssertUnwindSafe(execute(ctx, kind, &dataset, &params)).catch_unwind();
    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => Err(CoreError::Cancelled { job_id: job_id.clone() }),
        result = work => result.unwrap_or_else(|panic| Err(CoreError::Internal {
            details: panic_message(panic),
        })),
    };

    let now = Utc::now();
    let recorded = match &outcome {
        Ok(result) => ctx.store.complete_job(&job_id, result, now).await,
        Err(CoreError::Cancelled { .. }) => ctx.store.cancel_job(&job_id, now).await,
        Err(e) => ctx.store.fail_job(&job_id, &e.to_string(), now).await,
    };

    match (&outcome, recorded) {
        (Ok(_), Ok(true)) => info!(job_id = %job_id, diagnostic = %kind, "Job completed"),
        (Err(CoreError::Cancelled { .. }), _) => {
            info!(job_id = %job_id, "Job stopped after cancellation")
        }
        (Err(e), Ok(true)) => {
            warn!(job_id = %job_id, diagnostic = %kind, error = %e, "Job failed")
        }
        (_, Ok(false)) => {
            debug!(job_id = %job_id, "Job reached a terminal state elsewhere")
        }
        (_, Err(e)) => error!(job_id = %job_id, error = %e, "Failed to record job outcome"),
    }

    ctx.tokens.lock().await.remove(&job_id);
}

async fn execute(
    ctx: &WorkerContext,
    kind: DiagnosticType,
    dataset: &DatasetRef,
    params: &ParameterSet,
) -> Result<AnalysisResult> {
    let view = ctx.access.load(dataset).await?;
    let raw = diagnostics::execute(kind, &view, params).await?;
    encoder::encode(kind, raw, &ctx.limits)
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("analysis panicked: {}", message)
}
