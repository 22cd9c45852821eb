// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP side of the catalog client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::{Origin, Url};

use super::{CatalogNode, parse_catalog};
use crate::error::{CoreError, Result};
use crate::model::ThreddsServerRecord;

/// Basic-auth credentials for one server.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// GET-with-credentials shared by catalog and OPeNDAP requests.
///
/// Credentials are bound to one origin and only sent to it.
#[derive(Debug, Clone)]
pub(crate) struct HttpFetcher {
    http: reqwest::Client,
    credentials: Option<(Credentials, Origin)>,
}

impl HttpFetcher {
    pub(crate) fn new(credentials: Option<(Credentials, Origin)>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Internal {
                details: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { http, credentials })
    }

    /// Fetch `url` as text. 404 maps to `NotFound` for `entity`.
    pub(crate) async fn get_text(&self, url: &Url, entity: &'static str) -> Result<String> {
        let mut request = self.http.get(url.clone());
        match &self.credentials {
            Some((creds, origin)) if *origin == url.origin() => {
                request = request.basic_auth(&creds.username, Some(&creds.password));
            }
            Some(_) => debug!(url = %url, "Foreign origin, sending request without credentials"),
            None => {}
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CoreError::not_found(entity, url.as_str()));
        }
        if !status.is_success() {
            return Err(CoreError::Transport {
                url: url.to_string(),
                details: format!("server responded with {}", status),
                retryable: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
            });
        }
        Ok(response.text().await?)
    }
}

/// Client for one THREDDS server.
#[derive(Debug, Clone)]
pub struct ThreddsClient {
    base_url: Url,
    fetcher: HttpFetcher,
}

impl ThreddsClient {
    /// `base_url` is the THREDDS root, e.g. `https://host/thredds`.
    /// Without credentials every request is anonymous.
    pub fn new(base_url: &str, credentials: Option<Credentials>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| CoreError::validation("base_url", e.to_string()))?;
        let credentials = credentials.map(|c| (c, base_url.origin()));
        Ok(Self {
            base_url,
            fetcher: HttpFetcher::new(credentials, timeout)?,
        })
    }

    /// Build a client from a registered server record.
    pub fn for_server(server: &ThreddsServerRecord, timeout: Duration) -> Result<Self> {
        let credentials = match (&server.username, &server.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        Self::new(&server.base_url, credentials, timeout)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn fetcher(&self) -> &HttpFetcher {
        &self.fetcher
    }

    /// URL of the catalog document for `path`.
    ///
    /// An empty path is the server's top-level catalog; a path ending in
    /// `.xml` names a catalog file directly; an absolute URL (as found in a
    /// `catalogRef`) is used unchanged if it is on this server's origin.
    pub fn catalog_url(&self, path: &str) -> Result<Url> {
        if path.starts_with("http://") || path.starts_with("https://") {
            let url =
                Url::parse(path).map_err(|e| CoreError::validation("path", e.to_string()))?;
            if url.origin() != self.base_url.origin() {
                return Err(CoreError::validation(
                    "path",
                    format!("catalog URL is not on {}", self.base_url.origin().ascii_serialization()),
                ));
            }
            return Ok(url);
        }
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_matches('/');
        if path.split('/').any(|segment| segment == "..") {
            return Err(CoreError::validation("path", "must not contain '..'"));
        }
        let url = if path.is_empty() {
            format!("{}/catalog/catalog.xml", base)
        } else if path.ends_with(".xml") {
            format!("{}/catalog/{}", base, path)
        } else {
            format!("{}/catalog/{}/catalog.xml", base, path)
        };
        Url::parse(&url).map_err(|e| CoreError::validation("path", e.to_string()))
    }

    /// Fetch and parse the catalog at `path`.
    pub async fn get_catalog(&self, path: &str) -> Result<CatalogNode> {
        let url = self.catalog_url(path)?;
        debug!(url = %url, "Fetching catalog");
        let body = self.fetcher.get_text(&url, "catalog").await?;
        let node = parse_catalog(&body, &url)?;
        info!(url = %url, datasets = node.datasets().len(), "Catalog fetched");
        Ok(node)
    }

    /// Find the dataset leaf for `url_path`.
    ///
    /// Starts at the catalog of the path's directory, which is where a
    /// `datasetScan` lists it, and walks up to the top-level catalog for
    /// datasets declared statically higher up.
    pub async fn resolve_dataset(&self, url_path: &str) -> Result<CatalogNode> {
        let url_path = url_path.trim_start_matches('/');
        let mut dir = parent_dir(url_path);
        loop {
            match self.get_catalog(dir).await {
                Ok(catalog) => {
                    if let Some(node) = catalog.find_dataset(url_path) {
                        return Ok(node.clone());
                    }
                }
                Err(CoreError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
            if dir.is_empty() {
                return Err(CoreError::not_found("dataset", url_path));
            }
            dir = parent_dir(dir);
        }
    }
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// One [`ThreddsClient`] per registered server id.
///
/// Entries are rebuilt when a server's base URL changes and dropped by
/// [`CatalogClients::invalidate`] when the server is removed.
#[derive(Debug)]
pub struct CatalogClients {
    timeout: Duration,
    clients: RwLock<HashMap<i64, Arc<ThreddsClient>>>,
}

impl CatalogClients {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn for_server(&self, server: &ThreddsServerRecord) -> Result<Arc<ThreddsClient>> {
        if let Some(client) = self.clients.read().await.get(&server.id)
            && client.base_url().as_str().trim_end_matches('/')
                == server.base_url.trim_end_matches('/')
        {
            return Ok(client.clone());
        }

        let client = Arc::new(ThreddsClient::for_server(server, self.timeout)?);
        self.clients.write().await.insert(server.id, client.clone());
        debug!(server_id = server.id, "Catalog client created");
        Ok(client)
    }

    pub async fn invalidate(&self, server_id: i64) {
        self.clients.write().await.remove(&server_id);
    }
}
