// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};
use url::Url;

use super::{
    ArrayView, DatasetRef, FetchPolicy, GridSource, LocalGridSource, OpendapSource,
    check_relative_path,
};
use crate::catalog::{CatalogClients, HttpFetcher, ServiceKind, resolve_access_url};
use crate::error::{CoreError, Result};
use crate::model::{DatasetHandle, DatasetLocation, DatasetRecord, FileFormat, ThreddsServerRecord};
use crate::persistence::Registry;

/// Resolves dataset references against the registry, the data directory and
/// registered THREDDS servers.
#[derive(Clone)]
pub struct DatasetAccess {
    registry: Arc<dyn Registry>,
    catalogs: Arc<CatalogClients>,
    data_dir: PathBuf,
    fetch: FetchPolicy,
}

impl DatasetAccess {
    pub fn new(
        registry: Arc<dyn Registry>,
        catalogs: Arc<CatalogClients>,
        data_dir: impl Into<PathBuf>,
        fetch: FetchPolicy,
    ) -> Self {
        Self {
            registry,
            catalogs,
            data_dir: data_dir.into(),
            fetch,
        }
    }

    pub fn catalogs(&self) -> &Arc<CatalogClients> {
        &self.catalogs
    }

    /// Build the handle for `reference`.
    ///
    /// Unknown ids, paths and catalog entries fail with `NotFound`.
    pub async fn resolve(&self, reference: &DatasetRef) -> Result<DatasetHandle> {
        Ok(self.resolve_with_source(reference).await?.0)
    }

    /// Resolve and open in one step. The grid source that described the
    /// dataset also serves its reads, so a local file is parsed once and a
    /// remote DAS is fetched once.
    pub async fn load(&self, reference: &DatasetRef) -> Result<ArrayView> {
        let (handle, source) = self.resolve_with_source(reference).await?;
        Ok(ArrayView::new(handle, source))
    }

    async fn resolve_with_source(
        &self,
        reference: &DatasetRef,
    ) -> Result<(DatasetHandle, Arc<dyn GridSource>)> {
        let (format, location, record) = match reference {
            DatasetRef::Registered(id) => {
                let record = self
                    .registry
                    .get_dataset(*id)
                    .await?
                    .filter(|r| r.is_active)
                    .ok_or_else(|| CoreError::not_found("dataset", id.to_string()))?;
                let format: FileFormat = record.file_format.parse()?;
                let location = self.record_location(format, &record).await?;
                (format, location, Some(record))
            }
            DatasetRef::LocalPath(path) => (FileFormat::Json, self.local_location(path)?, None),
            DatasetRef::Catalog {
                server_id,
                url_path,
            } => (
                FileFormat::Opendap,
                self.catalog_location(*server_id, url_path).await?,
                None,
            ),
        };

        let source = self.source_for(&location).await?;
        let meta = source.describe().await?;

        let handle = DatasetHandle {
            id: reference.to_string(),
            format,
            location,
            dimensions: meta.dimensions,
            variables: meta.variables,
            spatial: record
                .as_ref()
                .and_then(|r| r.spatial_coverage)
                .or(meta.spatial),
            temporal: record
                .as_ref()
                .and_then(|r| r.temporal_coverage)
                .or(meta.temporal),
        };
        info!(
            dataset = %reference,
            format = handle.format.as_str(),
            variables = handle.variables.len(),
            "Dataset resolved"
        );
        Ok((handle, source))
    }

    /// Attach a grid source to `handle`. Does not fetch array data.
    pub async fn open(&self, handle: &DatasetHandle) -> Result<ArrayView> {
        let source = self.source_for(&handle.location).await?;
        Ok(ArrayView::new(handle.clone(), source))
    }

    async fn record_location(
        &self,
        format: FileFormat,
        record: &DatasetRecord,
    ) -> Result<DatasetLocation> {
        match format {
            FileFormat::Json => self.local_location(&record.file_path),
            FileFormat::Opendap => {
                let server_id = record.thredds_server_id.ok_or_else(|| {
                    CoreError::format(
                        record.name.as_str(),
                        "remote dataset has no THREDDS server",
                    )
                })?;
                let url_path = record
                    .thredds_url_path
                    .as_deref()
                    .unwrap_or(&record.file_path);
                self.catalog_location(server_id, url_path).await
            }
        }
    }

    fn local_location(&self, path: &str) -> Result<DatasetLocation> {
        check_relative_path(path)?;
        Ok(DatasetLocation::Local {
            path: self.data_dir.join(path),
        })
    }

    async fn server(&self, server_id: i64) -> Result<ThreddsServerRecord> {
        self.registry
            .get_server(server_id)
            .await?
            .filter(|s| s.is_active)
            .ok_or_else(|| CoreError::not_found("server", server_id.to_string()))
    }

    async fn catalog_location(&self, server_id: i64, url_path: &str) -> Result<DatasetLocation> {
        let server = self.server(server_id).await?;
        let client = self.catalogs.for_server(&server).await?;
        let node = self
            .fetch
            .run("catalog", || client.resolve_dataset(url_path))
            .await?;
        let url = resolve_access_url(&node, ServiceKind::Streaming)?;
        debug!(server_id = server_id, url = %url, "Resolved catalog dataset");
        Ok(DatasetLocation::Remote {
            url: url.to_string(),
            server_id: Some(server_id),
        })
    }

    async fn source_for(&self, location: &DatasetLocation) -> Result<Arc<dyn GridSource>> {
        match location {
            DatasetLocation::Local { path } => Ok(Arc::new(LocalGridSource::new(path.clone()))),
            DatasetLocation::Remote { url, server_id } => {
                let url = Url::parse(url).map_err(|e| CoreError::format(url.as_str(), e.to_string()))?;
                let fetcher = match server_id {
                    Some(id) => {
                        let server = self.server(*id).await?;
                        self.catalogs.for_server(&server).await?.fetcher().clone()
                    }
                    None => HttpFetcher::new(None, self.catalogs.timeout())?,
                };
                Ok(Arc::new(OpendapSource::new(url, fetcher, self.fetch)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewDataset;
    use crate::persistence::MemoryPersistence;
    use std::time::Duration;

    fn access(dir: &std::path::Path, registry: Arc<MemoryPersistence>) -> DatasetAccess {
        DatasetAccess::new(
            registry,
            Arc::new(CatalogClients::new(Duration::from_secs(5))),
            dir,
            FetchPolicy::default(),
        )
    }

    const PROFILE: &str = r#"{
        "dimensions": {"depth": 3},
        "variables": {
            "depth": {"dimensions": ["depth"], "data": [0, 50, 100]},
            "temperature": {"dimensions": ["depth"], "data": [20, 15, 5]}
        }
    }"#;

    #[tokio::test]
    async fn test_resolve_registered_local_dataset() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ctd.json"), PROFILE).unwrap();
        let registry = Arc::new(MemoryPersistence::new());
        let record = registry
            .insert_dataset(&NewDataset {
                name: "ctd".to_string(),
                description: None,
                file_path: "ctd.json".to_string(),
                file_format: "json".to_string(),
                thredds_server_id: None,
                thredds_url_path: None,
                variables: None,
                dimensions: None,
                spatial_coverage: Some(crate::model::SpatialBounds {
                    min_lat: 1.0,
                    max_lat: 2.0,
                    min_lon: 3.0,
                    max_lon: 4.0,
                }),
                temporal_coverage: None,
            })
            .await
            .unwrap();

        let access = access(dir.path(), registry);
        let handle = access
            .resolve(&DatasetRef::Registered(record.id))
            .await
            .unwrap();
        assert_eq!(handle.id, record.id.to_string());
        assert_eq!(handle.dimensions.get("depth"), Some(&3));
        assert_eq!(handle.spatial.unwrap().max_lon, 4.0);

        let view = access.open(&handle).await.unwrap();
        let t = view.read_all("temperature").await.unwrap();
        assert_eq!(t.len(), 3);
    }

    #[tokio::test]
    async fn test_load_parses_local_file_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ctd.json"), PROFILE).unwrap();
        let access = access(dir.path(), Arc::new(MemoryPersistence::new()));
        let reference = DatasetRef::LocalPath("ctd.json".to_string());

        let view = access.load(&reference).await.unwrap();
        std::fs::remove_file(dir.path().join("ctd.json")).unwrap();
        let t = view.read_all("temperature").await.unwrap();
        assert_eq!(t.iter().copied().collect::<Vec<_>>(), vec![20.0, 15.0, 5.0]);
    }

    #[tokio::test]
    async fn test_unknown_references_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let access = access(dir.path(), Arc::new(MemoryPersistence::new()));

        for reference in [
            DatasetRef::Registered(404),
            DatasetRef::LocalPath("missing.json".to_string()),
            DatasetRef::Catalog {
                server_id: 9,
                url_path: "a.nc".to_string(),
            },
        ] {
            let err = access.resolve(&reference).await.unwrap_err();
            assert_eq!(err.error_code(), "NOT_FOUND", "reference: {}", reference);
        }
    }

    #[tokio::test]
    async fn test_local_path_escape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let access = access(dir.path(), Arc::new(MemoryPersistence::new()));
        let err = access
            .resolve(&DatasetRef::LocalPath("../etc/passwd".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }
}
