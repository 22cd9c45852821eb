// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! THREDDS server registry and catalog browsing.

use axum::Router;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use serde::{Deserialize, Serialize};
use seastate_core::CoreError;
use seastate_core::catalog::CatalogNode;
use seastate_core::model::{NewThreddsServer, ThreddsServerRecord};
use tracing::info;

use super::error::ApiResult;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/thredds/servers", get(list_servers).post(create_server))
        .route(
            "/thredds/servers/{server_id}",
            get(get_server).delete(delete_server),
        )
        .route("/thredds/catalog", get(get_catalog))
}

#[derive(Debug, Serialize)]
pub struct ServerList {
    pub servers: Vec<ThreddsServerRecord>,
}

#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    pub server_id: i64,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub server_id: i64,
    pub path: String,
    pub catalog: CatalogNode,
}

async fn list_servers(State(state): State<AppState>) -> ApiResult<Json<ServerList>> {
    let servers = state.registry.list_servers().await?;
    Ok(Json(ServerList { servers }))
}

async fn create_server(
    State(state): State<AppState>,
    payload: Result<Json<NewThreddsServer>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ThreddsServerRecord>)> {
    let Json(server) = payload?;
    server.validate()?;
    let record = state.registry.insert_server(&server).await?;
    info!(server_id = record.id, base_url = %record.base_url, "THREDDS server registered");
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_server(
    State(state): State<AppState>,
    Path(server_id): Path<i64>,
) -> ApiResult<Json<ThreddsServerRecord>> {
    let server = state
        .registry
        .get_server(server_id)
        .await?
        .ok_or_else(|| CoreError::not_found("server", server_id.to_string()))?;
    Ok(Json(server))
}

async fn delete_server(
    State(state): State<AppState>,
    Path(server_id): Path<i64>,
) -> ApiResult<StatusCode> {
    if !state.registry.delete_server(server_id).await? {
        return Err(CoreError::not_found("server", server_id.to_string()).into());
    }
    state.catalogs.invalidate(server_id).await;
    info!(server_id = server_id, "THREDDS server removed");
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /thredds/catalog?server_id=&path=`; an empty path is the server's
/// top-level catalog.
async fn get_catalog(
    State(state): State<AppState>,
    query: Result<Query<CatalogQuery>, QueryRejection>,
) -> ApiResult<Json<CatalogResponse>> {
    let Query(query) = query?;
    let server = state
        .registry
        .get_server(query.server_id)
        .await?
        .filter(|s| s.is_active)
        .ok_or_else(|| CoreError::not_found("server", query.server_id.to_string()))?;
    let client = state.catalogs.for_server(&server).await?;
    let catalog = client.get_catalog(&query.path).await?;
    Ok(Json(CatalogResponse {
        server_id: server.id,
        path: query.path,
        catalog,
    }))
}
