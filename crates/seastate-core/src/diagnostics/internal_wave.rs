// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Band-limited variance statistics of time series.

use ndarray::{Axis, Ix2};

use super::params::InternalWaveParams;
use crate::dataset::ArrayView;
use crate::encoder::{GeoPoint, RawWaveStat};
use crate::error::{CoreError, Result};

pub(crate) struct WaveInput {
    times: Vec<f64>,
    /// One series per analysed depth level.
    series: Vec<(Option<f64>, Vec<f64>)>,
    location: Option<GeoPoint>,
    min_period: f64,
    max_period: f64,
}

pub(crate) async fn load_input(view: &ArrayView, params: &InternalWaveParams) -> Result<WaveInput> {
    let time_dim = view.coordinate_dimension(&params.time_variable)?.to_string();
    let times: Vec<f64> = view
        .read_all(&params.time_variable)
        .await?
        .iter()
        .copied()
        .collect();
    let location = view.handle().spatial.map(|b| {
        let (lat, lon) = b.center();
        GeoPoint { lat, lon }
    });

    let series = match &params.depth_variable {
        None => {
            let slab = view
                .read_slab(&params.variable, &[time_dim.as_str()], &params.selection)
                .await?;
            vec![(None, slab.iter().copied().collect())]
        }
        Some(depth_variable) => {
            let depth_dim = view.coordinate_dimension(depth_variable)?.to_string();
            let depths: Vec<f64> = view.read_all(depth_variable).await?.iter().copied().collect();
            let time_axis = view
                .variable(&params.variable)?
                .dimensions
                .iter()
                .filter(|d| **d == time_dim || **d == depth_dim)
                .position(|d| *d == time_dim)
                .unwrap_or(0);
            let slab = view
                .read_slab(
                    &params.variable,
                    &[time_dim.as_str(), depth_dim.as_str()],
                    &params.selection,
                )
                .await?
                .into_dimensionality::<Ix2>()
                .map_err(|e| CoreError::format(params.variable.as_str(), e.to_string()))?;
            let depth_axis = Axis(1 - time_axis);

            let indices: Vec<usize> = match &params.depth_indices {
                Some(indices) => indices.clone(),
                None => (0..depths.len()).collect(),
            };
            let mut series = Vec::with_capacity(indices.len());
            for index in indices {
                if index >= slab.len_of(depth_axis) || index >= depths.len() {
                    return Err(CoreError::validation(
                        "depth_indices",
                        format!("index {} out of range for '{}'", index, depth_variable),
                    ));
                }
                let column = slab.index_axis(depth_axis, index);
                series.push((Some(depths[index]), column.iter().copied().collect()));
            }
            series
        }
    };

    Ok(WaveInput {
        times,
        series,
        location,
        min_period: params.min_period,
        max_period: params.max_period,
    })
}

pub(crate) fn analyse(input: WaveInput) -> Result<Vec<RawWaveStat>> {
    let n = input.times.len();
    if n < 4 {
        return Err(CoreError::validation(
            "time_variable",
            format!("need at least 4 samples, got {}", n),
        ));
    }
    let dt = (input.times[n - 1] - input.times[0]) / (n - 1) as f64;
    if !(dt.is_finite() && dt > 0.0) {
        return Err(CoreError::format(
            "time",
            "time coordinate must be finite and increasing",
        ));
    }

    let band: Vec<(usize, f64)> = (1..=n / 2)
        .map(|k| (k, n as f64 * dt / k as f64))
        .filter(|(_, period)| *period >= input.min_period && *period <= input.max_period)
        .collect();
    if band.is_empty() {
        return Err(CoreError::validation(
            "min_period",
            format!(
                "no resolvable periods between {} and {} (sampling {} x {})",
                input.min_period, input.max_period, n, dt
            ),
        ));
    }

    let mut stats = Vec::with_capacity(input.series.len());
    for (depth, values) in input.series {
        if values.len() != n {
            return Err(CoreError::format(
                "time series",
                format!("{} samples for {} time steps", values.len(), n),
            ));
        }
        let Some(anomaly) = anomaly(&values) else {
            continue;
        };
        let total_variance = anomaly.iter().map(|x| x * x).sum::<f64>() / n as f64;

        let mut band_energy = 0.0;
        let mut dominant = (band[0].1, f64::MIN);
        for &(k, period) in &band {
            let energy = one_sided_variance(&anomaly, k);
            band_energy += energy;
            if energy > dominant.1 {
                dominant = (period, energy);
            }
        }

        stats.push(RawWaveStat {
            depth,
            location: input.location,
            dominant_period: dominant.0,
            band_energy,
            band_variance_fraction: if total_variance > 0.0 {
                (band_energy / total_variance).min(1.0)
            } else {
                0.0
            },
            total_variance,
        });
    }
    Ok(stats)
}

/// Demeaned series with missing samples set to the mean. `None` when every
/// sample is missing.
fn anomaly(values: &[f64]) -> Option<Vec<f64>> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    Some(
        values
            .iter()
            .map(|v| if v.is_finite() { v - mean } else { 0.0 })
            .collect(),
    )
}

/// Variance carried by frequency bin `k` of a one-sided spectrum.
fn one_sided_variance(x: &[f64], k: usize) -> f64 {
    let n = x.len();
    let omega = 2.0 * std::f64::consts::PI * k as f64 / n as f64;
    let (re, im) = x.iter().enumerate().fold((0.0, 0.0), |(re, im), (t, v)| {
        let phase = omega * t as f64;
        (re + v * phase.cos(), im - v * phase.sin())
    });
    let power = (re * re + im * im) / (n * n) as f64;
    if 2 * k == n { power } else { 2.0 * power }
}
