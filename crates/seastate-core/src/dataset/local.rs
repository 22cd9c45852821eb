// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Local JSON grid documents.
//!
//! ```json
//! {
//!   "dimensions": { "depth": 4 },
//!   "variables": {
//!     "depth":       { "dimensions": ["depth"], "data": [0, 10, 20, 30] },
//!     "temperature": { "dimensions": ["depth"], "data": [20.1, null, 12.0, -999],
//!                      "fill_value": -999 }
//!   },
//!   "spatial_coverage": { "min_lat": 10, "max_lat": 11, "min_lon": -30, "max_lon": -29 }
//! }
//! ```
//!
//! Data is row-major. `null` and `fill_value` entries read back as NaN.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{GridMetadata, GridSource, MemoryGridSource};
use crate::error::{CoreError, Result};
use crate::model::{SpatialBounds, TemporalBounds};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GridDocument {
    dimensions: BTreeMap<String, usize>,
    variables: BTreeMap<String, VariableDocument>,
    #[serde(default)]
    spatial_coverage: Option<SpatialBounds>,
    #[serde(default)]
    temporal_coverage: Option<TemporalBounds>,
}

// Variables may carry extra attributes (units, long_name); they are ignored.
#[derive(Debug, Deserialize)]
struct VariableDocument {
    dimensions: Vec<String>,
    data: Vec<Option<f64>>,
    #[serde(default)]
    fill_value: Option<f64>,
}

/// JSON grid file, parsed on first use.
#[derive(Debug)]
pub struct LocalGridSource {
    path: PathBuf,
    grid: OnceCell<MemoryGridSource>,
}

impl LocalGridSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            grid: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn grid(&self) -> Result<&MemoryGridSource> {
        self.grid
            .get_or_try_init(|| async {
                let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        CoreError::not_found("dataset", self.path.display().to_string())
                    } else {
                        CoreError::Transport {
                            url: self.path.display().to_string(),
                            details: e.to_string(),
                            retryable: false,
                        }
                    }
                })?;
                let name = self.path.display().to_string();
                let grid = tokio::task::spawn_blocking(move || parse_document(&name, &bytes))
                    .await
                    .map_err(|e| CoreError::Internal {
                        details: format!("grid parse task failed: {}", e),
                    })??;
                debug!(path = %self.path.display(), variables = grid.metadata().variables.len(), "Loaded local grid");
                Ok(grid)
            })
            .await
    }
}

#[async_trait]
impl GridSource for LocalGridSource {
    async fn describe(&self) -> Result<GridMetadata> {
        Ok(self.grid().await?.metadata().clone())
    }

    async fn read(&self, variable: &str, ranges: &[Range<usize>]) -> Result<ArrayD<f64>> {
        self.grid().await?.slice(variable, ranges)
    }
}

/// Parse a grid document into an in-memory grid.
pub(crate) fn parse_document(name: &str, bytes: &[u8]) -> Result<MemoryGridSource> {
    let doc: GridDocument =
        serde_json::from_slice(bytes).map_err(|e| CoreError::format(name, e.to_string()))?;

    if doc.variables.is_empty() {
        return Err(CoreError::format(name, "document declares no variables"));
    }

    let mut grid = MemoryGridSource::new();
    for (var_name, var) in doc.variables {
        let mut shape = Vec::with_capacity(var.dimensions.len());
        for dim in &var.dimensions {
            let len = doc.dimensions.get(dim).ok_or_else(|| {
                CoreError::format(
                    name,
                    format!("variable '{}' uses undeclared dimension '{}'", var_name, dim),
                )
            })?;
            shape.push(*len);
        }
        let expected: usize = shape.iter().product();
        if var.data.len() != expected {
            return Err(CoreError::format(
                name,
                format!(
                    "variable '{}' has {} values, shape {:?} needs {}",
                    var_name,
                    var.data.len(),
                    shape,
                    expected
                ),
            ));
        }

        let fill = var.fill_value;
        let values: Vec<f64> = var
            .data
            .into_iter()
            .map(|v| match v {
                Some(x) if Some(x) != fill => x,
                _ => f64::NAN,
            })
            .collect();
        let array = ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|e| CoreError::format(name, e.to_string()))?;
        let dims: Vec<&str> = var.dimensions.iter().map(String::as_str).collect();
        grid = grid
            .with_variable(&var_name, &dims, array)
            .map_err(|e| CoreError::format(name, e.to_string()))?;
    }

    if let Some(bounds) = doc.spatial_coverage {
        grid = grid.with_spatial(bounds);
    }
    if let Some(bounds) = doc.temporal_coverage {
        grid = grid.with_temporal(bounds);
    }
    Ok(grid)
}
