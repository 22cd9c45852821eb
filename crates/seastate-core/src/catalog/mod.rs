// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! THREDDS catalog client.
//!
//! A catalog is fetched per request and parsed into a [`CatalogNode`] tree.
//! Dataset leaves carry the service endpoints advertised by the server; each
//! endpoint holds a URL template with a `{path}` placeholder that
//! [`resolve_access_url`] fills with the dataset's `urlPath`.
//!
//! ```text
//! catalog.xml ──parse──► CatalogNode (collection)
//!                          ├── CatalogNode (dataset, services: [streaming, ...])
//!                          └── CatalogNode (collection, catalog_ref: href)
//! ```

mod client;
mod parser;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CoreError, Result};

pub use client::{CatalogClients, Credentials, ThreddsClient};
pub(crate) use client::HttpFetcher;
pub use parser::parse_catalog;

/// Whether a node groups other nodes or describes a single dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Collection,
    Dataset,
}

/// Access protocol a dataset can be reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// NetCDF Subset Service (`ncss`).
    SubsetQuery,
    /// Plain HTTP file download (`fileServer`).
    BulkDownload,
    /// OPeNDAP (`dodsC`).
    Streaming,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubsetQuery => "subset_query",
            Self::BulkDownload => "bulk_download",
            Self::Streaming => "streaming",
        }
    }

    /// Map a THREDDS `serviceType` attribute. Unknown types yield `None`.
    pub fn from_service_type(service_type: &str) -> Option<Self> {
        match service_type.to_ascii_lowercase().as_str() {
            "opendap" => Some(Self::Streaming),
            "httpserver" => Some(Self::BulkDownload),
            "netcdfsubset" => Some(Self::SubsetQuery),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "subset_query" | "ncss" => Ok(Self::SubsetQuery),
            "bulk_download" | "http" => Ok(Self::BulkDownload),
            "streaming" | "opendap" => Ok(Self::Streaming),
            other => Err(CoreError::validation(
                "service",
                format!("unknown service kind '{}'", other),
            )),
        }
    }
}

/// A service advertised for a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub kind: ServiceKind,
    /// The `name` attribute of the `<service>` element.
    pub name: String,
    /// Absolute URL with a `{path}` placeholder.
    pub url_template: String,
}

/// A node of a parsed catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub kind: NodeKind,
    /// Dataset path relative to the service bases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_path: Option<String>,
    /// Absolute href of an unexpanded `<catalogRef>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CatalogNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceEndpoint>,
}

impl CatalogNode {
    pub fn is_dataset(&self) -> bool {
        self.kind == NodeKind::Dataset
    }

    /// Endpoint of the given kind, if advertised.
    pub fn service(&self, kind: ServiceKind) -> Option<&ServiceEndpoint> {
        self.services.iter().find(|s| s.kind == kind)
    }

    /// Depth-first search for the dataset leaf with this `urlPath`.
    pub fn find_dataset(&self, url_path: &str) -> Option<&CatalogNode> {
        let wanted = url_path.trim_start_matches('/');
        if self.is_dataset() && self.url_path.as_deref() == Some(wanted) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_dataset(wanted))
    }

    /// All dataset leaves, in document order.
    pub fn datasets(&self) -> Vec<&CatalogNode> {
        let mut out = Vec::new();
        self.collect_datasets(&mut out);
        out
    }

    fn collect_datasets<'a>(&'a self, out: &mut Vec<&'a CatalogNode>) {
        if self.is_dataset() {
            out.push(self);
        }
        for child in &self.children {
            child.collect_datasets(out);
        }
    }
}

/// Build the access URL for `node` through the service of `kind`.
///
/// Deterministic: the same node and kind always give the same URL.
pub fn resolve_access_url(node: &CatalogNode, kind: ServiceKind) -> Result<Url> {
    if !node.is_dataset() {
        return Err(CoreError::validation(
            "node",
            format!("'{}' is a collection, not a dataset", node.name),
        ));
    }
    let path = node.url_path.as_deref().unwrap_or_default();
    let endpoint = node
        .service(kind)
        .ok_or_else(|| CoreError::UnsupportedService {
            dataset: if path.is_empty() { node.name.clone() } else { path.to_string() },
            service: kind.to_string(),
        })?;
    let url = endpoint.url_template.replace("{path}", path);
    Url::parse(&url).map_err(|e| CoreError::catalog_parse(format!("bad access URL '{}': {}", url, e)))
}
