// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Seastate Server - HTTP boundary for the diagnostic job pipeline
//!
//! Thin axum layer over [`seastate_core`]: every handler translates a request
//! into one core call and maps [`seastate_core::CoreError`] onto an HTTP
//! status with a `{code, message}` body.
//!
//! All routes live under `/api/v1`:
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | GET | `/health` | Job store reachability |
//! | POST | `/diagnostics/jobs` | Submit any diagnostic |
//! | POST | `/diagnostics/{kind}` | Submit one diagnostic by route name |
//! | GET | `/diagnostics/jobs` | List jobs |
//! | GET | `/diagnostics/jobs/{id}` | Poll a job |
//! | POST | `/diagnostics/jobs/{id}/cancel` | Cancel a job |
//! | GET, POST | `/thredds/servers` | THREDDS server registry |
//! | GET, DELETE | `/thredds/servers/{id}` | One server |
//! | GET | `/thredds/catalog` | Browse a server's catalog |
//! | GET, POST | `/datasets` | Dataset registry |
//! | GET, DELETE | `/datasets/{id}` | One dataset |
//! | GET, POST | `/reports/{id}/diagnostics` | Report job links |

pub mod api;

use std::sync::Arc;

use axum::Router;
use seastate_core::catalog::CatalogClients;
use seastate_core::persistence::{JobStore, Registry};
use seastate_core::{JobScheduler, SeastateRuntime};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<JobScheduler>,
    pub job_store: Arc<dyn JobStore>,
    pub registry: Arc<dyn Registry>,
    pub catalogs: Arc<CatalogClients>,
}

impl AppState {
    pub fn from_runtime(runtime: &SeastateRuntime) -> Self {
        Self {
            scheduler: runtime.scheduler().clone(),
            job_store: runtime.job_store().clone(),
            registry: runtime.registry().clone(),
            catalogs: runtime.catalogs().clone(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("persistence", &"...")
            .field("catalogs", &self.catalogs)
            .finish()
    }
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/v1", api::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
