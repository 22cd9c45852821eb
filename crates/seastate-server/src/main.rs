// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Seastate Server - Diagnostic Job API
//!
//! An HTTP server responsible for:
//! - Diagnostic job submission, polling and cancellation
//! - THREDDS server registry and catalog browsing
//! - Dataset registry
//! - Report to job associations

use std::sync::Arc;

use tracing::{info, warn};

use seastate_core::config::Config;
use seastate_core::persistence::SqlitePersistence;
use seastate_core::runtime::SeastateRuntime;
use seastate_server::{AppState, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seastate_core=info,seastate_server=info,tower_http=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        data_dir = %config.data_dir.display(),
        max_concurrent_jobs = config.workers.max_concurrent_jobs,
        "Starting Seastate Server"
    );

    let persistence = Arc::new(SqlitePersistence::connect(&config.database_url).await?);
    info!("Connected to database");

    let runtime = SeastateRuntime::builder()
        .persistence(persistence)
        .config(&config)
        .build()?
        .start()
        .await?;

    let app = router(AppState::from_runtime(&runtime));
    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "HTTP server ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Running jobs finish; queued jobs stay pending for the next start.
    runtime.shutdown().await?;

    info!("Seastate Server shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
