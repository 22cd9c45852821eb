// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Closed-contour eddy detection.
//!
//! Every strict interior extremum seeds a region that is grown level by
//! level (`peak - k * contour_interval`) over 4-connected cells. A level is a
//! closed contour while its region stays off the grid edge, away from
//! missing cells, and free of any other extremum. The outermost closed
//! contour within `max_radius_km` defines the eddy; nested contours around
//! several extrema therefore never merge and the innermost extremum owns
//! its contours.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::f64::consts::PI;

use ndarray::Array2;

use super::geo::{HorizontalField, load_horizontal};
use super::params::{EddyField, EddyParams};
use crate::dataset::ArrayView;
use crate::encoder::{RawEddy, Rotation};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Polarity {
    High,
    Low,
}

impl Polarity {
    fn sign(self) -> f64 {
        match self {
            Self::High => 1.0,
            Self::Low => -1.0,
        }
    }
}

/// Frontier cell ordered by oriented value, then position.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    w: f64,
    i: usize,
    j: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.w
            .total_cmp(&other.w)
            .then_with(|| other.i.cmp(&self.i))
            .then_with(|| other.j.cmp(&self.j))
    }
}

pub(crate) struct EddyInput {
    field: HorizontalField,
    params: EddyParams,
}

pub(crate) async fn load_input(view: &ArrayView, params: &EddyParams) -> Result<EddyInput> {
    let field = load_horizontal(
        view,
        &params.variable,
        &params.lat_variable,
        &params.lon_variable,
        &params.fixed_indices(),
    )
    .await?;
    Ok(EddyInput {
        field,
        params: params.clone(),
    })
}

pub(crate) fn detect(input: EddyInput) -> Vec<RawEddy> {
    let EddyInput { field, params } = input;
    let extrema = find_extrema(&field.values);
    let mut mask = Array2::from_elem(field.shape(), false);
    for &(i, j, _) in &extrema {
        mask[[i, j]] = true;
    }
    extrema
        .into_iter()
        .filter_map(|(i, j, polarity)| grow(&field, &mask, (i, j), polarity, &params))
        .collect()
}

/// Strict interior extrema in row-major order.
fn find_extrema(values: &Array2<f64>) -> Vec<(usize, usize, Polarity)> {
    let (ny, nx) = values.dim();
    let mut out = Vec::new();
    for i in 1..ny.saturating_sub(1) {
        for j in 1..nx.saturating_sub(1) {
            let v = values[[i, j]];
            if !v.is_finite() {
                continue;
            }
            let mut higher = true;
            let mut lower = true;
            for (di, dj) in NEIGHBOURS_8 {
                let n = values[[(i as isize + di) as usize, (j as isize + dj) as usize]];
                if !n.is_finite() {
                    higher = false;
                    lower = false;
                    break;
                }
                higher &= v > n;
                lower &= v < n;
            }
            if higher {
                out.push((i, j, Polarity::High));
            } else if lower {
                out.push((i, j, Polarity::Low));
            }
        }
    }
    out
}

const NEIGHBOURS_8: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

const NEIGHBOURS_4: [(isize, isize); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

fn grow(
    field: &HorizontalField,
    extrema: &Array2<bool>,
    peak: (usize, usize),
    polarity: Polarity,
    params: &EddyParams,
) -> Option<RawEddy> {
    let (ny, nx) = field.shape();
    let oriented = |i: usize, j: usize| polarity.sign() * field.values[[i, j]];
    let top = oriented(peak.0, peak.1);

    let mut queued = Array2::from_elem((ny, nx), false);
    let mut heap = BinaryHeap::new();
    let mut area = field.cell_area_km2(peak.0, peak.1);
    queued[[peak.0, peak.1]] = true;
    let mut open = enqueue(field, &mut queued, &mut heap, peak, oriented);

    let mut closed: Option<(f64, f64)> = None;
    let mut k = 1.0_f64;
    while !open {
        let level = top - k * params.contour_interval;
        while let Some(&c) = heap.peek() {
            if c.w < level {
                break;
            }
            heap.pop();
            if c.i == 0 || c.j == 0 || c.i + 1 == ny || c.j + 1 == nx || extrema[[c.i, c.j]] {
                open = true;
                break;
            }
            area += field.cell_area_km2(c.i, c.j);
            if enqueue(field, &mut queued, &mut heap, (c.i, c.j), oriented) {
                open = true;
                break;
            }
        }
        if open || (area / PI).sqrt() > params.max_radius_km {
            break;
        }
        closed = Some((level, area));

        match heap.peek() {
            // Skip levels that cannot add a cell.
            Some(next) => {
                k = (k + 1.0).max(((top - next.w) / params.contour_interval).ceil());
            }
            None => break,
        }
    }

    let (level, area) = closed?;
    let amplitude = top - level;
    let radius_km = (area / PI).sqrt();
    if amplitude < params.min_amplitude || radius_km < params.min_radius_km {
        return None;
    }

    let lat = field.lats[peak.0];
    let rotation = match params.field {
        EddyField::Ssh => match polarity {
            Polarity::High => Rotation::Anticyclonic,
            Polarity::Low => Rotation::Cyclonic,
        },
        EddyField::Vorticity => {
            let positive = polarity == Polarity::High;
            if positive == (lat >= 0.0) {
                Rotation::Cyclonic
            } else {
                Rotation::Anticyclonic
            }
        }
    };

    Some(RawEddy {
        center_lat: lat,
        center_lon: field.lons[peak.1],
        amplitude,
        radius_km,
        area_km2: area,
        rotation,
    })
}

/// Queue the 4-neighbours of `cell`. Returns true if one of them is missing.
fn enqueue(
    field: &HorizontalField,
    queued: &mut Array2<bool>,
    heap: &mut BinaryHeap<Candidate>,
    cell: (usize, usize),
    oriented: impl Fn(usize, usize) -> f64,
) -> bool {
    let (ny, nx) = field.shape();
    for (di, dj) in NEIGHBOURS_4 {
        let (i, j) = (cell.0 as isize + di, cell.1 as isize + dj);
        if i < 0 || j < 0 || i as usize >= ny || j as usize >= nx {
            continue;
        }
        let (i, j) = (i as usize, j as usize);
        if queued[[i, j]] {
            continue;
        }
        let w = oriented(i, j);
        if !w.is_finite() {
            return true;
        }
        queued[[i, j]] = true;
        heap.push(Candidate { w, i, j });
    }
    false
}
