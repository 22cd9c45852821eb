// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for seastate-core.
//!
//! [`SeastateRuntime`] owns the process-wide pieces of the pipeline (catalog
//! clients, dataset access, the job scheduler) with an explicit start and
//! shutdown instead of global state.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use seastate_core::persistence::SqlitePersistence;
//! use seastate_core::runtime::SeastateRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let persistence = Arc::new(SqlitePersistence::from_path("seastate.db").await?);
//!
//!     let runtime = SeastateRuntime::builder()
//!         .persistence(persistence)
//!         .data_dir("/srv/data")
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let job_id = runtime
//!         .scheduler()
//!         .submit("thermocline", "local:ctd/a.json", serde_json::json!({"gradient_threshold": 0.05}))
//!         .await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::catalog::CatalogClients;
use crate::config::{Config, WorkerPoolConfig};
use crate::dataset::{DatasetAccess, FetchPolicy};
use crate::encoder::EncoderLimits;
use crate::persistence::{JobStore, Registry};
use crate::scheduler::JobScheduler;

/// Builder for creating a [`SeastateRuntime`].
pub struct SeastateRuntimeBuilder {
    job_store: Option<Arc<dyn JobStore>>,
    registry: Option<Arc<dyn Registry>>,
    data_dir: PathBuf,
    http_timeout: Duration,
    workers: WorkerPoolConfig,
    fetch: FetchPolicy,
    limits: EncoderLimits,
}

impl std::fmt::Debug for SeastateRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeastateRuntimeBuilder")
            .field("job_store", &self.job_store.as_ref().map(|_| "..."))
            .field("registry", &self.registry.as_ref().map(|_| "..."))
            .field("data_dir", &self.data_dir)
            .field("workers", &self.workers)
            .finish()
    }
}

impl Default for SeastateRuntimeBuilder {
    fn default() -> Self {
        Self {
            job_store: None,
            registry: None,
            data_dir: PathBuf::from(".data"),
            http_timeout: Duration::from_secs(30),
            workers: WorkerPoolConfig::default(),
            fetch: FetchPolicy::default(),
            limits: EncoderLimits::default(),
        }
    }
}

impl SeastateRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use one backend for both jobs and registries.
    pub fn persistence<P>(self, persistence: Arc<P>) -> Self
    where
        P: JobStore + Registry + 'static,
    {
        self.job_store(persistence.clone()).registry(persistence)
    }

    pub fn job_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.job_store = Some(store);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Take every pipeline setting from `config`.
    pub fn config(self, config: &Config) -> Self {
        self.data_dir(config.data_dir.clone())
            .http_timeout(config.http_timeout)
            .workers(config.workers)
            .fetch_policy(config.fetch)
            .limits(config.limits)
    }

    /// Root for `local:` dataset paths.
    ///
    /// Default: `.data`
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Timeout for catalog and OPeNDAP requests.
    ///
    /// Default: 30 seconds
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn workers(mut self, workers: WorkerPoolConfig) -> Self {
        self.workers = workers;
        self
    }

    pub fn fetch_policy(mut self, fetch: FetchPolicy) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn limits(mut self, limits: EncoderLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if persistence is missing.
    pub fn build(self) -> Result<SeastateRuntimeConfig> {
        let job_store = self
            .job_store
            .ok_or_else(|| anyhow::anyhow!("job store is required"))?;
        let registry = self
            .registry
            .ok_or_else(|| anyhow::anyhow!("registry is required"))?;
        if self.workers.max_concurrent_jobs == 0 {
            anyhow::bail!("max_concurrent_jobs must be at least 1");
        }

        Ok(SeastateRuntimeConfig {
            job_store,
            registry,
            data_dir: self.data_dir,
            http_timeout: self.http_timeout,
            workers: self.workers,
            fetch: self.fetch,
            limits: self.limits,
        })
    }
}

/// Configuration for a [`SeastateRuntime`].
pub struct SeastateRuntimeConfig {
    job_store: Arc<dyn JobStore>,
    registry: Arc<dyn Registry>,
    data_dir: PathBuf,
    http_timeout: Duration,
    workers: WorkerPoolConfig,
    fetch: FetchPolicy,
    limits: EncoderLimits,
}

impl std::fmt::Debug for SeastateRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeastateRuntimeConfig")
            .field("persistence", &"...")
            .field("data_dir", &self.data_dir)
            .field("workers", &self.workers)
            .finish()
    }
}

impl SeastateRuntimeConfig {
    /// Start the scheduler and reconcile jobs left by a previous process.
    pub async fn start(self) -> Result<SeastateRuntime> {
        let catalogs = Arc::new(CatalogClients::new(self.http_timeout));
        let access = DatasetAccess::new(
            self.registry.clone(),
            catalogs.clone(),
            self.data_dir.clone(),
            self.fetch,
        );
        let scheduler = Arc::new(JobScheduler::start(
            self.job_store.clone(),
            access.clone(),
            self.workers,
            self.limits,
        ));

        if let Err(e) = scheduler.recover().await {
            warn!(error = %e, "Failed to recover jobs from previous run");
        }

        info!(
            data_dir = %self.data_dir.display(),
            max_concurrent_jobs = self.workers.max_concurrent_jobs,
            "SeastateRuntime started"
        );

        Ok(SeastateRuntime {
            job_store: self.job_store,
            registry: self.registry,
            catalogs,
            access,
            scheduler,
        })
    }
}

/// A running pipeline that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct SeastateRuntime {
    job_store: Arc<dyn JobStore>,
    registry: Arc<dyn Registry>,
    catalogs: Arc<CatalogClients>,
    access: DatasetAccess,
    scheduler: Arc<JobScheduler>,
}

impl SeastateRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> SeastateRuntimeBuilder {
        SeastateRuntimeBuilder::new()
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    pub fn job_store(&self) -> &Arc<dyn JobStore> {
        &self.job_store
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// Per-server THREDDS clients shared with dataset access.
    pub fn catalogs(&self) -> &Arc<CatalogClients> {
        &self.catalogs
    }

    pub fn access(&self) -> &DatasetAccess {
        &self.access
    }

    /// Stop accepting work and wait for running jobs to finish.
    pub async fn shutdown(self) -> Result<()> {
        info!("SeastateRuntime shutting down...");
        self.scheduler.shutdown().await;
        info!("SeastateRuntime shutdown complete");
        Ok(())
    }
}
