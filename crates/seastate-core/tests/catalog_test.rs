// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Catalog client tests against a mock THREDDS server.

use std::time::Duration;

use seastate_core::catalog::{
    CatalogClients, Credentials, NodeKind, ServiceKind, ThreddsClient, resolve_access_url,
};
use seastate_core::model::ThreddsServerRecord;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOP_CATALOG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<catalog xmlns="http://www.unidata.ucar.edu/namespaces/thredds/InvCatalog/v1.0"
         xmlns:xlink="http://www.w3.org/1999/xlink" name="Ocean Data">
  <service name="odap" serviceType="OpenDAP" base="/thredds/dodsC/"/>
  <service name="files" serviceType="HTTPServer" base="/thredds/fileServer/"/>
  <dataset name="Models" ID="models">
    <dataset name="woa.nc" ID="models/woa.nc" urlPath="models/woa.nc" serviceName="odap"/>
    <dataset name="hycom.nc" ID="models/hycom.nc" urlPath="models/hycom.nc" serviceName="files"/>
  </dataset>
  <catalogRef xlink:href="ocean/catalog.xml" xlink:title="Ocean" name=""/>
</catalog>"#;

const OCEAN_CATALOG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<catalog xmlns="http://www.unidata.ucar.edu/namespaces/thredds/InvCatalog/v1.0" name="Ocean">
  <service name="odap" serviceType="OpenDAP" base="/thredds/dodsC/"/>
  <dataset name="ctd.nc" urlPath="ocean/ctd.nc"/>
</catalog>"#;

async fn mount_catalog(server: &MockServer, at: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

fn client(server: &MockServer) -> ThreddsClient {
    ThreddsClient::new(
        &format!("{}/thredds", server.uri()),
        None,
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn test_nested_catalog_resolves_access_urls() {
    let server = MockServer::start().await;
    mount_catalog(&server, "/thredds/catalog/catalog.xml", TOP_CATALOG).await;

    let root = client(&server).get_catalog("").await.unwrap();
    assert_eq!(root.name, "Ocean Data");
    assert_eq!(root.kind, NodeKind::Collection);

    let leaves = root.datasets();
    assert_eq!(leaves.len(), 2);
    assert!(leaves.iter().all(|d| d.services.len() == 1));

    let woa = root.find_dataset("models/woa.nc").unwrap();
    let url = resolve_access_url(woa, ServiceKind::Streaming).unwrap();
    assert_eq!(
        url.as_str(),
        format!("{}/thredds/dodsC/models/woa.nc", server.uri())
    );
    // Same node, same URL.
    assert_eq!(resolve_access_url(woa, ServiceKind::Streaming).unwrap(), url);

    let hycom = root.find_dataset("models/hycom.nc").unwrap();
    let err = resolve_access_url(hycom, ServiceKind::Streaming).unwrap_err();
    assert_eq!(err.error_code(), "UNSUPPORTED_SERVICE");
    let download = resolve_access_url(hycom, ServiceKind::BulkDownload).unwrap();
    assert!(download.as_str().ends_with("/thredds/fileServer/models/hycom.nc"));

    let reference = root.children.last().unwrap();
    assert_eq!(
        reference.catalog_ref.as_deref(),
        Some(format!("{}/thredds/catalog/ocean/catalog.xml", server.uri()).as_str())
    );
}

#[tokio::test]
async fn test_catalog_ref_can_be_followed() {
    let server = MockServer::start().await;
    mount_catalog(&server, "/thredds/catalog/catalog.xml", TOP_CATALOG).await;
    mount_catalog(&server, "/thredds/catalog/ocean/catalog.xml", OCEAN_CATALOG).await;

    let client = client(&server);
    let root = client.get_catalog("").await.unwrap();
    let href = root.children.last().unwrap().catalog_ref.clone().unwrap();

    let ocean = client.get_catalog(&href).await.unwrap();
    assert_eq!(ocean.name, "Ocean");
    assert!(ocean.find_dataset("ocean/ctd.nc").is_some());

    let leaf = client.resolve_dataset("ocean/ctd.nc").await.unwrap();
    assert_eq!(leaf.url_path.as_deref(), Some("ocean/ctd.nc"));
}

#[tokio::test]
async fn test_statically_declared_dataset_found_in_parent_catalog() {
    let server = MockServer::start().await;
    mount_catalog(&server, "/thredds/catalog/catalog.xml", TOP_CATALOG).await;
    // No datasetScan: the per-directory catalog does not exist.
    Mock::given(method("GET"))
        .and(path("/thredds/catalog/models/catalog.xml"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let leaf = client(&server).resolve_dataset("models/woa.nc").await.unwrap();
    assert_eq!(leaf.name, "woa.nc");
    assert_eq!(
        resolve_access_url(&leaf, ServiceKind::Streaming).unwrap().as_str(),
        format!("{}/thredds/dodsC/models/woa.nc", server.uri())
    );

    let err = client(&server)
        .resolve_dataset("models/absent.nc")
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_credentials_sent_as_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/thredds/catalog/ocean/catalog.xml"))
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(ResponseTemplate::new(200).set_body_string(OCEAN_CATALOG))
        .expect(1)
        .mount(&server)
        .await;

    let client = ThreddsClient::new(
        &format!("{}/thredds/", server.uri()),
        Some(Credentials {
            username: "user".to_string(),
            password: "pass".to_string(),
        }),
        Duration::from_secs(5),
    )
    .unwrap();
    let catalog = client.get_catalog("ocean").await.unwrap();
    assert_eq!(catalog.datasets().len(), 1);
}

#[tokio::test]
async fn test_credentials_never_leave_the_server_origin() {
    let server = MockServer::start().await;
    let elsewhere = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(OCEAN_CATALOG))
        .expect(0)
        .mount(&elsewhere)
        .await;

    let client = ThreddsClient::new(
        &format!("{}/thredds", server.uri()),
        Some(Credentials {
            username: "user".to_string(),
            password: "pass".to_string(),
        }),
        Duration::from_secs(5),
    )
    .unwrap();
    let err = client
        .get_catalog(&format!("{}/x/catalog.xml", elsewhere.uri()))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_missing_catalog_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client(&server).get_catalog("nowhere").await.unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");

    let err = client(&server)
        .resolve_dataset("nowhere/x.nc")
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_server_errors_are_retryable_transport_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client(&server).get_catalog("").await.unwrap_err();
    assert_eq!(err.error_code(), "TRANSPORT_ERROR");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_html_login_page_is_parse_error() {
    let server = MockServer::start().await;
    mount_catalog(
        &server,
        "/thredds/catalog/catalog.xml",
        "<html><body>Please log in</body></html>",
    )
    .await;

    let err = client(&server).get_catalog("").await.unwrap_err();
    assert_eq!(err.error_code(), "CATALOG_PARSE_ERROR");
}

#[tokio::test]
async fn test_clients_rebuilt_when_base_url_changes() {
    let clients = CatalogClients::new(Duration::from_secs(5));
    let mut record = ThreddsServerRecord {
        id: 1,
        name: "primary".to_string(),
        base_url: "http://a.example.org/thredds".to_string(),
        username: None,
        password: None,
        description: None,
        is_active: true,
        created_at: chrono::Utc::now(),
    };

    let first = clients.for_server(&record).await.unwrap();
    let again = clients.for_server(&record).await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &again));

    record.base_url = "http://b.example.org/thredds".to_string();
    let moved = clients.for_server(&record).await.unwrap();
    assert_eq!(moved.base_url().host_str(), Some("b.example.org"));

    clients.invalidate(1).await;
    let fresh = clients.for_server(&record).await.unwrap();
    assert!(!std::sync::Arc::ptr_eq(&moved, &fresh));
}
