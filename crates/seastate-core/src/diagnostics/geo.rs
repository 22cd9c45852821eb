// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Horizontal grids on a sphere.

use std::collections::BTreeMap;

use ndarray::{Array2, Ix2};

use crate::dataset::ArrayView;
use crate::error::{CoreError, Result};

pub(crate) const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres.
pub(crate) fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dp = p2 - p1;
    let dl = (lon2 - lon1).to_radians();
    let a = (dp / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dl / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

/// A 2-D field indexed `[lat, lon]` with its coordinate vectors.
#[derive(Debug, Clone)]
pub(crate) struct HorizontalField {
    pub lats: Vec<f64>,
    pub lons: Vec<f64>,
    pub values: Array2<f64>,
}

impl HorizontalField {
    pub fn new(lats: Vec<f64>, lons: Vec<f64>, values: Array2<f64>) -> Result<Self> {
        if values.dim() != (lats.len(), lons.len()) {
            return Err(CoreError::format(
                "field",
                format!(
                    "field is {:?} but coordinates are {}x{}",
                    values.dim(),
                    lats.len(),
                    lons.len()
                ),
            ));
        }
        if lats.iter().chain(&lons).any(|c| !c.is_finite()) {
            return Err(CoreError::format("field", "coordinates contain missing values"));
        }
        Ok(Self { lats, lons, values })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// North-south extent of one cell around row `i`, in km.
    pub fn dy_km(&self, i: usize) -> f64 {
        let (lo, hi) = neighbours(i, self.lats.len());
        if lo == hi {
            return 0.0;
        }
        (self.lats[hi] - self.lats[lo]).abs().to_radians() * EARTH_RADIUS_KM / (hi - lo) as f64
    }

    /// East-west extent of one cell around column `j` at row `i`, in km.
    pub fn dx_km(&self, i: usize, j: usize) -> f64 {
        let (lo, hi) = neighbours(j, self.lons.len());
        if lo == hi {
            return 0.0;
        }
        (self.lons[hi] - self.lons[lo]).abs().to_radians()
            * EARTH_RADIUS_KM
            * self.lats[i].to_radians().cos()
            / (hi - lo) as f64
    }

    pub fn cell_area_km2(&self, i: usize, j: usize) -> f64 {
        self.dy_km(i) * self.dx_km(i, j)
    }

    /// Horizontal gradient magnitude per km using central differences,
    /// one-sided at the edges. NaN where a needed neighbour is missing.
    pub fn gradient_magnitude(&self) -> Array2<f64> {
        let (ny, nx) = self.shape();
        Array2::from_shape_fn((ny, nx), |(i, j)| {
            let (ilo, ihi) = neighbours(i, ny);
            let (jlo, jhi) = neighbours(j, nx);
            let dvdy = derivative(
                self.values[[ihi, j]] - self.values[[ilo, j]],
                haversine_km(self.lats[ilo], self.lons[j], self.lats[ihi], self.lons[j]),
            );
            let dvdx = derivative(
                self.values[[i, jhi]] - self.values[[i, jlo]],
                haversine_km(self.lats[i], self.lons[jlo], self.lats[i], self.lons[jhi]),
            );
            (dvdy * dvdy + dvdx * dvdx).sqrt()
        })
    }
}

fn neighbours(i: usize, n: usize) -> (usize, usize) {
    (i.saturating_sub(1), (i + 1).min(n.saturating_sub(1)))
}

fn derivative(dv: f64, dist_km: f64) -> f64 {
    if dist_km > 0.0 { dv / dist_km } else { 0.0 }
}

/// Load `variable` as a `[lat, lon]` field, pinning every other dimension
/// to its index in `fixed`.
pub(crate) async fn load_horizontal(
    view: &ArrayView,
    variable: &str,
    lat_variable: &str,
    lon_variable: &str,
    fixed: &BTreeMap<String, usize>,
) -> Result<HorizontalField> {
    let lat_dim = view.coordinate_dimension(lat_variable)?.to_string();
    let lon_dim = view.coordinate_dimension(lon_variable)?.to_string();
    let lat_first = {
        let dims = &view.variable(variable)?.dimensions;
        let pos = |d: &str| dims.iter().position(|x| x == d);
        pos(&lat_dim) < pos(&lon_dim)
    };

    let lats: Vec<f64> = view.read_all(lat_variable).await?.iter().copied().collect();
    let lons: Vec<f64> = view.read_all(lon_variable).await?.iter().copied().collect();
    let slab = view
        .read_slab(variable, &[lat_dim.as_str(), lon_dim.as_str()], fixed)
        .await?
        .into_dimensionality::<Ix2>()
        .map_err(|e| CoreError::format(variable, e.to_string()))?;
    let values = if lat_first { slab } else { slab.reversed_axes() };
    HorizontalField::new(lats, lons, values.as_standard_layout().to_owned())
}
