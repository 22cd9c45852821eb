// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! THREDDS InvCatalog 1.0 parsing.

use std::collections::HashMap;

use roxmltree::{Document, Node};
use url::Url;

use super::{CatalogNode, NodeKind, ServiceEndpoint, ServiceKind};
use crate::error::{CoreError, Result};

const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

/// Parse a catalog document fetched from `catalog_url`.
///
/// Relative service bases and `catalogRef` hrefs are resolved against
/// `catalog_url`. The returned root is always a collection.
pub fn parse_catalog(xml: &str, catalog_url: &Url) -> Result<CatalogNode> {
    let doc = Document::parse(xml).map_err(|e| CoreError::catalog_parse(e.to_string()))?;
    let root = doc.root_element();
    if root.tag_name().name() != "catalog" {
        return Err(CoreError::catalog_parse(format!(
            "expected <catalog> root, found <{}>",
            root.tag_name().name()
        )));
    }

    let mut services = ServiceTable::default();
    for service in elements(root, "service") {
        services.register(service, catalog_url)?;
    }

    // A catalog with a single service lets datasets omit serviceName.
    let default_service = match services.top_level.as_slice() {
        [only] => Some(only.clone()),
        _ => None,
    };

    let ctx = Context {
        services: &services,
        catalog_url,
    };
    let children = build_children(root, default_service.as_deref(), &ctx)?;

    Ok(CatalogNode {
        name: root.attribute("name").unwrap_or_default().to_string(),
        id: None,
        kind: NodeKind::Collection,
        url_path: None,
        catalog_ref: None,
        children,
        services: Vec::new(),
    })
}

#[derive(Default)]
struct ServiceTable {
    by_name: HashMap<String, Vec<ServiceEndpoint>>,
    top_level: Vec<String>,
}

impl ServiceTable {
    fn register(&mut self, node: Node<'_, '_>, catalog_url: &Url) -> Result<()> {
        let name = self.register_nested(node, catalog_url)?;
        self.top_level.push(name);
        Ok(())
    }

    /// Register `node` and any nested services; returns the node's name.
    fn register_nested(&mut self, node: Node<'_, '_>, catalog_url: &Url) -> Result<String> {
        let name = node
            .attribute("name")
            .ok_or_else(|| CoreError::catalog_parse("<service> without a name"))?
            .to_string();
        let service_type = node.attribute("serviceType").ok_or_else(|| {
            CoreError::catalog_parse(format!("service '{}' has no serviceType", name))
        })?;

        let endpoints = if service_type.eq_ignore_ascii_case("compound") {
            let mut endpoints = Vec::new();
            for nested in elements(node, "service") {
                let nested_name = self.register_nested(nested, catalog_url)?;
                if let Some(nested_endpoints) = self.by_name.get(&nested_name) {
                    endpoints.extend(nested_endpoints.iter().cloned());
                }
            }
            endpoints
        } else {
            match ServiceKind::from_service_type(service_type) {
                Some(kind) => {
                    let base = node.attribute("base").ok_or_else(|| {
                        CoreError::catalog_parse(format!("service '{}' has no base", name))
                    })?;
                    vec![ServiceEndpoint {
                        kind,
                        name: name.clone(),
                        url_template: format!("{}{{path}}", resolve_base(catalog_url, base)?),
                    }]
                }
                None => Vec::new(),
            }
        };

        self.by_name.insert(name.clone(), endpoints);
        Ok(name)
    }

    fn lookup(&self, name: &str) -> Result<Vec<ServiceEndpoint>> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::catalog_parse(format!("unknown serviceName '{}'", name)))
    }
}

/// Resolve a service base against the catalog URL, with a trailing slash.
fn resolve_base(catalog_url: &Url, base: &str) -> Result<String> {
    let resolved = catalog_url
        .join(base)
        .map_err(|e| CoreError::catalog_parse(format!("bad service base '{}': {}", base, e)))?;
    let mut s = resolved.to_string();
    if !s.ends_with('/') {
        s.push('/');
    }
    Ok(s)
}

struct Context<'a> {
    services: &'a ServiceTable,
    catalog_url: &'a Url,
}

fn elements<'a, 'input>(
    node: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(move |c| c.is_element() && c.tag_name().name() == name)
}

fn build_children(
    parent: Node<'_, '_>,
    inherited: Option<&str>,
    ctx: &Context<'_>,
) -> Result<Vec<CatalogNode>> {
    let mut children = Vec::new();
    for child in parent.children().filter(|c| c.is_element()) {
        match child.tag_name().name() {
            "dataset" => children.push(build_dataset(child, inherited, ctx)?),
            "catalogRef" => children.push(build_catalog_ref(child, ctx)?),
            _ => {}
        }
    }
    Ok(children)
}

fn build_dataset(
    node: Node<'_, '_>,
    inherited: Option<&str>,
    ctx: &Context<'_>,
) -> Result<CatalogNode> {
    let name = node
        .attribute("name")
        .ok_or_else(|| CoreError::catalog_parse("<dataset> without a name"))?
        .to_string();

    let (local_service, inheritable_service) = service_names(node);
    let passed_down = inheritable_service.or(inherited);
    let effective = local_service.or(passed_down);

    let children = build_children(node, passed_down, ctx)?;
    let url_path = node
        .attribute("urlPath")
        .map(|p| p.trim_start_matches('/').to_string());

    let kind = if children.is_empty() && url_path.is_some() {
        NodeKind::Dataset
    } else {
        NodeKind::Collection
    };

    let services = match (kind, effective) {
        (NodeKind::Dataset, Some(service)) => ctx.services.lookup(service)?,
        _ => Vec::new(),
    };

    Ok(CatalogNode {
        name,
        id: node.attribute("ID").map(str::to_string),
        kind,
        url_path,
        catalog_ref: None,
        children,
        services,
    })
}

/// Returns the service name that applies to this dataset only and the one
/// its descendants inherit.
fn service_names<'a>(node: Node<'a, '_>) -> (Option<&'a str>, Option<&'a str>) {
    let mut local = node.attribute("serviceName");
    let mut inheritable = None;

    for child in node.children().filter(|c| c.is_element()) {
        match child.tag_name().name() {
            "serviceName" => {
                if local.is_none() {
                    local = child.text().map(str::trim);
                }
            }
            "metadata" => {
                let name = elements(child, "serviceName")
                    .next()
                    .and_then(|n| n.text())
                    .map(str::trim);
                if child.attribute("inherited") == Some("true") {
                    inheritable = inheritable.or(name);
                } else if local.is_none() {
                    local = name;
                }
            }
            _ => {}
        }
    }
    (local, inheritable)
}

fn build_catalog_ref(node: Node<'_, '_>, ctx: &Context<'_>) -> Result<CatalogNode> {
    let href = node
        .attribute((XLINK_NS, "href"))
        .or_else(|| node.attribute("href"))
        .ok_or_else(|| CoreError::catalog_parse("<catalogRef> without xlink:href"))?;
    let resolved = ctx
        .catalog_url
        .join(href)
        .map_err(|e| CoreError::catalog_parse(format!("bad catalogRef '{}': {}", href, e)))?;
    let name = node
        .attribute((XLINK_NS, "title"))
        .or_else(|| node.attribute("name"))
        .filter(|n| !n.is_empty())
        .unwrap_or(href);

    Ok(CatalogNode {
        name: name.to_string(),
        id: node.attribute("ID").map(str::to_string),
        kind: NodeKind::Collection,
        url_path: None,
        catalog_ref: Some(resolved.to_string()),
        children: Vec::new(),
        services: Vec::new(),
    })
}
