// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use ndarray::{ArrayD, Axis};

use super::GridSource;
use crate::error::{CoreError, Result};
use crate::model::{DatasetHandle, VariableInfo};

/// Read-only, lazily fetched view of a resolved dataset.
///
/// Nothing is loaded until a slice is requested. Every request is checked
/// against the handle's variable metadata before reaching the source.
#[derive(Clone)]
pub struct ArrayView {
    handle: Arc<DatasetHandle>,
    source: Arc<dyn GridSource>,
}

impl fmt::Debug for ArrayView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayView")
            .field("dataset", &self.handle.id)
            .finish_non_exhaustive()
    }
}

impl ArrayView {
    pub fn new(handle: DatasetHandle, source: Arc<dyn GridSource>) -> Self {
        Self {
            handle: Arc::new(handle),
            source,
        }
    }

    pub fn handle(&self) -> &DatasetHandle {
        &self.handle
    }

    pub fn variable(&self, name: &str) -> Result<&VariableInfo> {
        self.handle.variables.get(name).ok_or_else(|| {
            CoreError::validation(
                "variable",
                format!("dataset '{}' has no variable '{}'", self.handle.id, name),
            )
        })
    }

    /// Read one half-open range per dimension of `variable`.
    pub async fn read(&self, variable: &str, ranges: &[Range<usize>]) -> Result<ArrayD<f64>> {
        let info = self.variable(variable)?;
        if ranges.len() != info.shape.len() {
            return Err(CoreError::validation(
                "ranges",
                format!(
                    "'{}' has {} dimensions, got {} ranges",
                    variable,
                    info.shape.len(),
                    ranges.len()
                ),
            ));
        }
        for ((range, &len), dim) in ranges.iter().zip(&info.shape).zip(&info.dimensions) {
            if range.start > range.end || range.end > len {
                return Err(CoreError::validation(
                    "ranges",
                    format!(
                        "{}..{} out of bounds for dimension '{}' of length {}",
                        range.start, range.end, dim, len
                    ),
                ));
            }
        }
        self.source.read(variable, ranges).await
    }

    /// Read the whole variable.
    pub async fn read_all(&self, variable: &str) -> Result<ArrayD<f64>> {
        let ranges: Vec<Range<usize>> = self.variable(variable)?.shape.iter().map(|&n| 0..n).collect();
        self.read(variable, &ranges).await
    }

    /// Read `variable` keeping the dimensions in `keep` whole and pinning
    /// every other dimension to an index from `fixed` (default 0).
    ///
    /// The result has only the kept dimensions, in the variable's order.
    pub async fn read_slab(
        &self,
        variable: &str,
        keep: &[&str],
        fixed: &BTreeMap<String, usize>,
    ) -> Result<ArrayD<f64>> {
        let info = self.variable(variable)?.clone();
        for name in keep {
            if !info.dimensions.iter().any(|d| d == name) {
                return Err(CoreError::validation(
                    "variable",
                    format!("'{}' does not span dimension '{}'", variable, name),
                ));
            }
        }

        let mut ranges = Vec::with_capacity(info.dimensions.len());
        for (dim, &len) in info.dimensions.iter().zip(&info.shape) {
            if keep.contains(&dim.as_str()) {
                ranges.push(0..len);
                continue;
            }
            let index = fixed.get(dim).copied().unwrap_or(0);
            if index >= len {
                return Err(CoreError::validation(
                    "selection",
                    format!("index {} out of range for dimension '{}' of length {}", index, dim, len),
                ));
            }
            ranges.push(index..index + 1);
        }

        let mut array = self.read(variable, &ranges).await?;
        for axis in (0..info.dimensions.len()).rev() {
            if !keep.contains(&info.dimensions[axis].as_str()) {
                array = array.index_axis_move(Axis(axis), 0);
            }
        }
        Ok(array)
    }

    /// Single dimension of a 1-D coordinate variable.
    pub fn coordinate_dimension(&self, variable: &str) -> Result<&str> {
        let info = self.variable(variable)?;
        match info.dimensions.as_slice() {
            [dim] => Ok(dim.as_str()),
            _ => Err(CoreError::validation(
                "variable",
                format!("coordinate '{}' must be one-dimensional", variable),
            )),
        }
    }
}
