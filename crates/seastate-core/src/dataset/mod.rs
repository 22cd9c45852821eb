// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dataset access layer.
//!
//! [`DatasetAccess::resolve`] turns a [`DatasetRef`] into a read-only
//! [`DatasetHandle`]; [`DatasetAccess::open`] pairs the handle with a
//! [`GridSource`] in an [`ArrayView`] that fetches bounded slices on demand.

mod access;
mod local;
mod memory;
mod opendap;
mod view;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::ops::Range;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use ndarray::ArrayD;
use tracing::warn;

use crate::error::{CoreError, Result};
use crate::model::{SpatialBounds, TemporalBounds, VariableInfo};

pub use access::DatasetAccess;
pub use local::LocalGridSource;
pub use memory::MemoryGridSource;
pub use opendap::OpendapSource;
pub use view::ArrayView;

/// How a submission names its dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetRef {
    /// Id of a registered dataset record (`"42"`).
    Registered(i64),
    /// Path under the data directory (`"local:ctd/station1.json"`).
    LocalPath(String),
    /// Dataset reached through a registered THREDDS server
    /// (`"catalog:3/ocean/models/woa.nc"`).
    Catalog { server_id: i64, url_path: String },
}

impl FromStr for DatasetRef {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CoreError::validation("datasetId", "must not be empty"));
        }
        if let Ok(id) = s.parse::<i64>() {
            return Ok(Self::Registered(id));
        }
        if let Some(path) = s.strip_prefix("local:") {
            if path.is_empty() {
                return Err(CoreError::validation("datasetId", "local path is empty"));
            }
            return Ok(Self::LocalPath(path.to_string()));
        }
        if let Some(rest) = s.strip_prefix("catalog:") {
            let (server, url_path) = rest.split_once('/').ok_or_else(|| {
                CoreError::validation(
                    "datasetId",
                    "catalog references look like 'catalog:<server_id>/<url_path>'",
                )
            })?;
            let server_id = server.parse::<i64>().map_err(|_| {
                CoreError::validation("datasetId", format!("invalid server id '{}'", server))
            })?;
            let url_path = url_path.trim_start_matches('/');
            if url_path.is_empty() {
                return Err(CoreError::validation("datasetId", "catalog path is empty"));
            }
            return Ok(Self::Catalog {
                server_id,
                url_path: url_path.to_string(),
            });
        }
        Err(CoreError::validation(
            "datasetId",
            format!("unrecognized dataset reference '{}'", s),
        ))
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered(id) => write!(f, "{}", id),
            Self::LocalPath(path) => write!(f, "local:{}", path),
            Self::Catalog {
                server_id,
                url_path,
            } => write!(f, "catalog:{}/{}", server_id, url_path),
        }
    }
}

/// Structure advertised by a grid source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridMetadata {
    pub dimensions: BTreeMap<String, usize>,
    pub variables: BTreeMap<String, VariableInfo>,
    pub spatial: Option<SpatialBounds>,
    pub temporal: Option<TemporalBounds>,
}

/// Backend that can describe a gridded dataset and read hyperslabs of it.
#[async_trait]
pub trait GridSource: Send + Sync {
    /// Dimensions and variables of the dataset.
    async fn describe(&self) -> Result<GridMetadata>;

    /// Read `variable` restricted to one half-open range per dimension.
    /// Missing values come back as NaN.
    async fn read(&self, variable: &str, ranges: &[Range<usize>]) -> Result<ArrayD<f64>>;
}

/// Retry policy for remote fetches.
///
/// Only transport errors the remote side marked retryable are retried.
/// `NotFound` and format errors fail immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            retry_delay: Duration::ZERO,
        }
    }
}

impl FetchPolicy {
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e @ CoreError::Transport { retryable: true, .. })
                    if attempt < self.max_attempts =>
                {
                    warn!(
                        what = what,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Fetch failed, retrying"
                    );
                    attempt += 1;
                    if !self.retry_delay.is_zero() {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
                other => return other,
            }
        }
    }
}

/// Reject absolute paths and parent-directory components.
pub(crate) fn check_relative_path(path: &str) -> Result<()> {
    let p = std::path::Path::new(path);
    if p.is_absolute() {
        return Err(CoreError::validation("datasetId", "local paths must be relative"));
    }
    if p.components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(CoreError::validation("datasetId", "local paths must not contain '..'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_dataset_ref_parsing() {
        assert_eq!("42".parse::<DatasetRef>().unwrap(), DatasetRef::Registered(42));
        assert_eq!(
            "local:ctd/a.json".parse::<DatasetRef>().unwrap(),
            DatasetRef::LocalPath("ctd/a.json".to_string())
        );
        assert_eq!(
            "catalog:3/ocean/woa.nc".parse::<DatasetRef>().unwrap(),
            DatasetRef::Catalog {
                server_id: 3,
                url_path: "ocean/woa.nc".to_string()
            }
        );

        for bad in ["", "local:", "catalog:x/a.nc", "catalog:3", "catalog:3/", "ftp://x"] {
            let err = bad.parse::<DatasetRef>().unwrap_err();
            assert_eq!(err.error_code(), "VALIDATION_ERROR", "input: {:?}", bad);
        }
    }

    #[test]
    fn test_dataset_ref_display_round_trip() {
        for s in ["7", "local:a/b.json", "catalog:1/x/y.nc"] {
            assert_eq!(s.parse::<DatasetRef>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_check_relative_path() {
        assert!(check_relative_path("ctd/a.json").is_ok());
        assert!(check_relative_path("/etc/passwd").is_err());
        assert!(check_relative_path("ctd/../../a.json").is_err());
    }

    #[tokio::test]
    async fn test_fetch_policy_retries_only_retryable_transport() {
        let policy = FetchPolicy {
            max_attempts: 3,
            retry_delay: Duration::ZERO,
        };

        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u32> = policy
            .run("test", move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(CoreError::Transport {
                        url: "http://x".to_string(),
                        details: "503".to_string(),
                        retryable: true,
                    })
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);

        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = policy
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::not_found("dataset", "x"))
            })
            .await;
        assert_eq!(result.unwrap_err().error_code(), "NOT_FOUND");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_policy_default_is_single_attempt() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = FetchPolicy::default()
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::Transport {
                    url: "http://x".to_string(),
                    details: "timeout".to_string(),
                    retryable: true,
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
