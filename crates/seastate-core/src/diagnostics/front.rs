// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Horizontal gradient front detection.

use std::collections::VecDeque;

use ndarray::Array2;

use super::geo::{EARTH_RADIUS_KM, HorizontalField, haversine_km, load_horizontal};
use super::params::FrontParams;
use crate::dataset::ArrayView;
use crate::encoder::RawFront;
use crate::error::Result;

pub(crate) struct FrontInput {
    field: HorizontalField,
    params: FrontParams,
}

pub(crate) async fn load_input(view: &ArrayView, params: &FrontParams) -> Result<FrontInput> {
    let field = load_horizontal(
        view,
        &params.variable,
        &params.lat_variable,
        &params.lon_variable,
        &params.fixed_indices(),
    )
    .await?;
    Ok(FrontInput {
        field,
        params: params.clone(),
    })
}

pub(crate) fn detect(input: FrontInput) -> Vec<RawFront> {
    let FrontInput { field, params } = input;
    let gradient = field.gradient_magnitude();
    let segments = segments(&gradient, params.gradient_threshold);

    let mut groups = DisjointSet::new(segments.len());
    if params.min_separation_km > 0.0 {
        let extents: Vec<Extent> = segments.iter().map(|cells| Extent::of(&field, cells)).collect();
        for a in 0..segments.len() {
            for b in a + 1..segments.len() {
                if groups.find(a) != groups.find(b)
                    && extents[a].min_distance_km(&extents[b]) < params.min_separation_km
                    && closer_than(&field, &segments[a], &segments[b], params.min_separation_km)
                {
                    groups.union(a, b);
                }
            }
        }
    }

    let mut merged: Vec<Vec<(usize, usize)>> = vec![Vec::new(); segments.len()];
    for (index, cells) in segments.into_iter().enumerate() {
        merged[groups.find(index)].extend(cells);
    }

    merged
        .into_iter()
        .filter(|cells| !cells.is_empty() && cells.len() >= params.min_cells)
        .map(|cells| summarize(&field, &gradient, &cells))
        .collect()
}

/// 8-connected components of cells at or above `threshold`, seeded in
/// row-major order.
fn segments(gradient: &Array2<f64>, threshold: f64) -> Vec<Vec<(usize, usize)>> {
    let (ny, nx) = gradient.dim();
    let above = |i: usize, j: usize| gradient[[i, j]].is_finite() && gradient[[i, j]] >= threshold;
    let mut seen = Array2::from_elem((ny, nx), false);
    let mut out = Vec::new();

    for i in 0..ny {
        for j in 0..nx {
            if seen[[i, j]] || !above(i, j) {
                continue;
            }
            seen[[i, j]] = true;
            let mut cells = Vec::new();
            let mut queue = VecDeque::from([(i, j)]);
            while let Some((ci, cj)) = queue.pop_front() {
                cells.push((ci, cj));
                for ni in ci.saturating_sub(1)..=(ci + 1).min(ny - 1) {
                    for nj in cj.saturating_sub(1)..=(cj + 1).min(nx - 1) {
                        if !seen[[ni, nj]] && above(ni, nj) {
                            seen[[ni, nj]] = true;
                            queue.push_back((ni, nj));
                        }
                    }
                }
            }
            out.push(cells);
        }
    }
    out
}

/// Lat/lon bounding box of a segment.
#[derive(Debug, Clone, Copy)]
struct Extent {
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
}

impl Extent {
    fn of(field: &HorizontalField, cells: &[(usize, usize)]) -> Self {
        let mut extent = Self {
            min_lat: f64::MAX,
            max_lat: f64::MIN,
            min_lon: f64::MAX,
            max_lon: f64::MIN,
        };
        for &(i, j) in cells {
            let (lat, lon) = (field.lats[i], field.lons[j]);
            extent.min_lat = extent.min_lat.min(lat);
            extent.max_lat = extent.max_lat.max(lat);
            extent.min_lon = extent.min_lon.min(lon);
            extent.max_lon = extent.max_lon.max(lon);
        }
        extent
    }

    /// Lower bound on the great-circle distance between any point of `self`
    /// and any point of `other`.
    ///
    /// From the haversine formula, `hav(d/R) >= hav(dlat)` and
    /// `hav(d/R) >= cos^2(L) hav(dlon)` where `L` is the largest absolute
    /// latitude of either box.
    fn min_distance_km(&self, other: &Extent) -> f64 {
        let lat_gap = (other.min_lat - self.max_lat).max(self.min_lat - other.max_lat).max(0.0);

        let lon_gap = (other.min_lon - self.max_lon).max(self.min_lon - other.max_lon).max(0.0);
        let span = self.max_lon.max(other.max_lon) - self.min_lon.min(other.min_lon);
        let lon_gap = lon_gap.min((360.0 - span).max(0.0)).min(180.0);

        let max_abs_lat = [self.min_lat, self.max_lat, other.min_lat, other.max_lat]
            .into_iter()
            .fold(0.0_f64, |acc, lat| acc.max(lat.abs()))
            .min(90.0);
        let cos_lat = max_abs_lat.to_radians().cos();

        let by_lat = lat_gap.to_radians() * EARTH_RADIUS_KM;
        let by_lon =
            2.0 * EARTH_RADIUS_KM * (cos_lat * (lon_gap.to_radians() / 2.0).sin()).clamp(0.0, 1.0).asin();
        by_lat.max(by_lon)
    }
}

fn closer_than(
    field: &HorizontalField,
    a: &[(usize, usize)],
    b: &[(usize, usize)],
    limit_km: f64,
) -> bool {
    a.iter().any(|&(ai, aj)| {
        b.iter().any(|&(bi, bj)| {
            haversine_km(field.lats[ai], field.lons[aj], field.lats[bi], field.lons[bj]) < limit_km
        })
    })
}

fn summarize(field: &HorizontalField, gradient: &Array2<f64>, cells: &[(usize, usize)]) -> RawFront {
    let mut weight = 0.0;
    let mut lat = 0.0;
    let mut lon = 0.0;
    let mut max_gradient = f64::MIN;
    let (mut min_lat, mut max_lat) = (f64::MAX, f64::MIN);
    let (mut min_lon, mut max_lon) = (f64::MAX, f64::MIN);

    for &(i, j) in cells {
        let g = gradient[[i, j]];
        let (la, lo) = (field.lats[i], field.lons[j]);
        weight += g;
        lat += g * la;
        lon += g * lo;
        max_gradient = max_gradient.max(g);
        min_lat = min_lat.min(la);
        max_lat = max_lat.max(la);
        min_lon = min_lon.min(lo);
        max_lon = max_lon.max(lo);
    }

    RawFront {
        centroid_lat: lat / weight,
        centroid_lon: lon / weight,
        length_km: haversine_km(min_lat, min_lon, max_lat, max_lon),
        mean_gradient: weight / cells.len() as f64,
        max_gradient,
        cell_count: cells.len(),
    }
}

/// Union-find over segment indices. The smaller index is always the root,
/// so merged groups keep the position of their first segment.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[child] = root;
    }
}
