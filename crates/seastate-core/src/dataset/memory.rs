// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Grid held fully in memory. Backs local JSON documents once parsed.

use std::collections::HashMap;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use ndarray::{ArrayD, Slice};

use super::{ArrayView, GridMetadata, GridSource};
use crate::error::{CoreError, Result};
use crate::model::{
    DatasetHandle, DatasetLocation, FileFormat, SpatialBounds, TemporalBounds, VariableInfo,
};

#[derive(Debug, Clone, Default)]
pub struct MemoryGridSource {
    metadata: GridMetadata,
    arrays: HashMap<String, ArrayD<f64>>,
}

impl MemoryGridSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable laid out along `dimensions`.
    ///
    /// Dimension sizes must agree with any variable added earlier.
    pub fn with_variable(
        mut self,
        name: &str,
        dimensions: &[&str],
        data: ArrayD<f64>,
    ) -> Result<Self> {
        if data.ndim() != dimensions.len() {
            return Err(CoreError::format(
                name,
                format!(
                    "{} dimension names for a {}-d array",
                    dimensions.len(),
                    data.ndim()
                ),
            ));
        }
        for (dim, &len) in dimensions.iter().zip(data.shape()) {
            match self.metadata.dimensions.get(*dim) {
                Some(&existing) if existing != len => {
                    return Err(CoreError::format(
                        name,
                        format!("dimension '{}' has size {} but {} elsewhere", dim, len, existing),
                    ));
                }
                _ => {
                    self.metadata.dimensions.insert(dim.to_string(), len);
                }
            }
        }
        self.metadata.variables.insert(
            name.to_string(),
            VariableInfo {
                dtype: "float64".to_string(),
                dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
                shape: data.shape().to_vec(),
            },
        );
        self.arrays.insert(name.to_string(), data);
        Ok(self)
    }

    pub fn with_spatial(mut self, bounds: SpatialBounds) -> Self {
        self.metadata.spatial = Some(bounds);
        self
    }

    pub fn with_temporal(mut self, bounds: TemporalBounds) -> Self {
        self.metadata.temporal = Some(bounds);
        self
    }

    pub fn metadata(&self) -> &GridMetadata {
        &self.metadata
    }

    /// Wrap the grid in a view with a handle named `id`.
    pub fn into_view(self, id: &str) -> ArrayView {
        let handle = DatasetHandle {
            id: id.to_string(),
            format: FileFormat::Json,
            location: DatasetLocation::Local {
                path: PathBuf::from(id),
            },
            dimensions: self.metadata.dimensions.clone(),
            variables: self.metadata.variables.clone(),
            spatial: self.metadata.spatial,
            temporal: self.metadata.temporal,
        };
        ArrayView::new(handle, Arc::new(self))
    }

    pub(crate) fn slice(&self, variable: &str, ranges: &[Range<usize>]) -> Result<ArrayD<f64>> {
        let array = self
            .arrays
            .get(variable)
            .ok_or_else(|| CoreError::validation("variable", format!("unknown variable '{}'", variable)))?;
        if ranges.len() != array.ndim() {
            return Err(CoreError::validation(
                "ranges",
                format!("{} ranges for {}-d variable '{}'", ranges.len(), array.ndim(), variable),
            ));
        }
        for (range, &len) in ranges.iter().zip(array.shape()) {
            if range.start > range.end || range.end > len {
                return Err(CoreError::validation(
                    "ranges",
                    format!("{:?} out of bounds for axis of length {}", range, len),
                ));
            }
        }
        Ok(array
            .slice_each_axis(|axis| Slice::from(ranges[axis.axis.index()].clone()))
            .to_owned())
    }
}

#[async_trait]
impl GridSource for MemoryGridSource {
    async fn describe(&self) -> Result<GridMetadata> {
        Ok(self.metadata.clone())
    }

    async fn read(&self, variable: &str, ranges: &[Range<usize>]) -> Result<ArrayD<f64>> {
        self.slice(variable, ranges)
    }
}
