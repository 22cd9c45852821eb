// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Vertical profile diagnostics: gradient layers and sound speed.
//!
//! A pycnocline over a dataset without a density variable runs on in-situ
//! density from the UNESCO EOS-80 equation of state, with pressure from
//! depth per Saunders (1981) at the dataset's central latitude.

use std::collections::BTreeMap;

use crate::dataset::ArrayView;
use crate::encoder::{GradientLayer, RawProfile};
use crate::error::{CoreError, Result};

use super::params::{ProfileParams, SoundSpeedParams};
use crate::model::DiagnosticType;

/// Depth-ordered samples. Values may be NaN; depths are always finite.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Profile {
    pub depths: Vec<f64>,
    pub values: Vec<f64>,
}

impl Profile {
    /// Pair depths with values, dropping samples without a depth and sorting
    /// by depth. Missing values stay in place as NaN.
    pub fn new(depths: &[f64], values: &[f64]) -> Result<Self> {
        if depths.len() != values.len() {
            return Err(CoreError::format(
                "profile",
                format!("{} depths for {} values", depths.len(), values.len()),
            ));
        }
        let mut samples: Vec<(f64, f64)> = depths
            .iter()
            .zip(values)
            .filter(|(d, _)| d.is_finite())
            .map(|(d, v)| (*d, *v))
            .collect();
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(Self {
            depths: samples.iter().map(|s| s.0).collect(),
            values: samples.iter().map(|s| s.1).collect(),
        })
    }
}

struct Segment {
    top: f64,
    bottom: f64,
    gradient: f64,
}

/// Strongest run of consecutive segments whose gradient magnitude reaches
/// `threshold`. Segments join valid neighbours, so a missing sample widens a
/// segment instead of shifting depths. Ties go to the shallower run.
pub(crate) fn strongest_layer(profile: &Profile, threshold: f64) -> Option<GradientLayer> {
    let valid: Vec<(f64, f64)> = profile
        .depths
        .iter()
        .zip(&profile.values)
        .filter(|(_, v)| v.is_finite())
        .map(|(d, v)| (*d, *v))
        .collect();

    let segments: Vec<Segment> = valid
        .windows(2)
        .filter(|w| w[1].0 > w[0].0)
        .map(|w| Segment {
            top: w[0].0,
            bottom: w[1].0,
            gradient: (w[1].1 - w[0].1) / (w[1].0 - w[0].0),
        })
        .collect();

    let mut best: Option<GradientLayer> = None;
    let mut run: Option<GradientLayer> = None;
    for seg in segments.iter().map(Some).chain(std::iter::once(None)) {
        match seg {
            Some(s) if s.gradient.abs() >= threshold => {
                let layer = run.get_or_insert(GradientLayer {
                    top_depth: s.top,
                    bottom_depth: s.bottom,
                    core_depth: (s.top + s.bottom) / 2.0,
                    peak_gradient: s.gradient,
                });
                layer.bottom_depth = s.bottom;
                if s.gradient.abs() > layer.peak_gradient.abs() {
                    layer.core_depth = (s.top + s.bottom) / 2.0;
                    layer.peak_gradient = s.gradient;
                }
            }
            _ => {
                if let Some(done) = run.take()
                    && best.is_none_or(|b| done.peak_gradient.abs() > b.peak_gradient.abs())
                {
                    best = Some(done);
                }
            }
        }
    }
    best
}

/// Sound speed in m/s from Mackenzie (1981).
///
/// `t` in °C, `s` in PSU, `d` in metres.
pub(crate) fn mackenzie(t: f64, s: f64, d: f64) -> f64 {
    1448.96 + 4.591 * t - 5.304e-2 * t * t + 2.374e-4 * t * t * t + 1.340 * (s - 35.0)
        + 1.630e-2 * d
        + 1.675e-7 * d * d
        - 1.025e-2 * t * (s - 35.0)
        - 7.139e-13 * t * d * d * d
}

/// Latitude used for pressure when a dataset has no spatial coverage.
const DEFAULT_LATITUDE: f64 = 45.0;

/// Pressure in dbar at depth `z` metres and latitude `lat` (Saunders 1981).
pub(crate) fn pressure_dbar(z: f64, lat: f64) -> f64 {
    let sin = lat.to_radians().sin();
    let c1 = 5.92e-3 + 5.25e-3 * sin * sin;
    ((1.0 - c1) - ((1.0 - c1).powi(2) - 8.84e-6 * z).sqrt()) / 4.42e-6
}

/// In-situ density in kg/m³ from UNESCO EOS-80.
///
/// `t` in °C, `s` in PSU, `p` in dbar.
pub(crate) fn eos80_density(t: f64, s: f64, p: f64) -> f64 {
    let p = p / 10.0;
    let s15 = s * s.sqrt();

    let rho_w = 999.842594 + 6.793952e-2 * t - 9.095290e-3 * t.powi(2) + 1.001685e-4 * t.powi(3)
        - 1.120083e-6 * t.powi(4)
        + 6.536332e-9 * t.powi(5);
    let rho_0 = rho_w
        + s * (0.824493 - 4.0899e-3 * t + 7.6438e-5 * t.powi(2) - 8.2467e-7 * t.powi(3)
            + 5.3875e-9 * t.powi(4))
        + s15 * (-5.72466e-3 + 1.0227e-4 * t - 1.6546e-6 * t.powi(2))
        + 4.8314e-4 * s * s;
    if p == 0.0 {
        return rho_0;
    }

    let k_w = 19652.21 + 148.4206 * t - 2.327105 * t.powi(2) + 1.360477e-2 * t.powi(3)
        - 5.155288e-5 * t.powi(4);
    let a_w = 3.239908 + 1.43713e-3 * t + 1.16092e-4 * t.powi(2) - 5.77905e-7 * t.powi(3);
    let b_w = 8.50935e-5 - 6.12293e-6 * t + 5.2787e-8 * t.powi(2);

    let k_0 = k_w
        + s * (54.6746 - 0.603459 * t + 1.09987e-2 * t.powi(2) - 6.1670e-5 * t.powi(3))
        + s15 * (7.944e-2 + 1.6483e-2 * t - 5.3009e-4 * t.powi(2));
    let a = a_w + s * (2.2838e-3 - 1.0981e-5 * t - 1.6078e-6 * t.powi(2)) + 1.91075e-4 * s15;
    let b = b_w + s * (-9.9348e-7 + 2.0816e-8 * t + 9.1697e-10 * t.powi(2));
    let k = k_0 + a * p + b * p * p;

    rho_0 / (1.0 - p / k)
}

/// Depth of the minimum valid value.
pub(crate) fn minimum_depth(profile: &Profile) -> Option<f64> {
    profile
        .depths
        .iter()
        .zip(&profile.values)
        .filter(|(_, v)| v.is_finite())
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(d, _)| *d)
}

async fn load_series(
    view: &ArrayView,
    variable: &str,
    depth_variable: &str,
    selection: &BTreeMap<String, usize>,
) -> Result<Vec<f64>> {
    let depth_dim = view.coordinate_dimension(depth_variable)?.to_string();
    let slab = view.read_slab(variable, &[depth_dim.as_str()], selection).await?;
    Ok(slab.iter().copied().collect())
}

async fn load_depths(view: &ArrayView, depth_variable: &str) -> Result<Vec<f64>> {
    Ok(view.read_all(depth_variable).await?.iter().copied().collect())
}

pub(crate) struct GradientInput {
    pub profile: Profile,
    pub threshold: f64,
}

pub(crate) async fn load_gradient_input(
    view: &ArrayView,
    kind: DiagnosticType,
    params: &ProfileParams,
) -> Result<GradientInput> {
    let variable = params.variable_for(kind);
    let depths = load_depths(view, &params.depth_variable).await?;
    let values = if kind == DiagnosticType::Pycnocline
        && params.variable.is_none()
        && !view.handle().variables.contains_key(variable)
    {
        derived_density(view, params, &depths).await?
    } else {
        load_series(view, variable, &params.depth_variable, &params.selection).await?
    };
    Ok(GradientInput {
        profile: Profile::new(&depths, &values)?,
        threshold: params.gradient_threshold,
    })
}

async fn derived_density(
    view: &ArrayView,
    params: &ProfileParams,
    depths: &[f64],
) -> Result<Vec<f64>> {
    let temperature =
        load_series(view, "temperature", &params.depth_variable, &params.selection).await?;
    let salinity = load_series(view, "salinity", &params.depth_variable, &params.selection).await?;
    if temperature.len() != depths.len() || salinity.len() != depths.len() {
        return Err(CoreError::format(
            "profile",
            "temperature, salinity and depth lengths differ",
        ));
    }
    let lat = view
        .handle()
        .spatial
        .map(|b| (b.min_lat + b.max_lat) / 2.0)
        .unwrap_or(DEFAULT_LATITUDE);
    Ok(temperature
        .iter()
        .zip(&salinity)
        .zip(depths)
        .map(|((t, s), d)| {
            if t.is_finite() && s.is_finite() && d.is_finite() {
                eos80_density(*t, *s, pressure_dbar(*d, lat))
            } else {
                f64::NAN
            }
        })
        .collect())
}

pub(crate) fn analyse_gradient(input: GradientInput) -> RawProfile {
    let layer = strongest_layer(&input.profile, input.threshold);
    RawProfile {
        depths: input.profile.depths,
        values: input.profile.values,
        layer,
        sound_channel_axis_depth: None,
    }
}

pub(crate) struct SoundSpeedInput {
    depths: Vec<f64>,
    temperature: Vec<f64>,
    salinity: Vec<f64>,
    threshold: f64,
}

pub(crate) async fn load_sound_speed_input(
    view: &ArrayView,
    params: &SoundSpeedParams,
) -> Result<SoundSpeedInput> {
    let depths = load_depths(view, &params.depth_variable).await?;
    let temperature = load_series(
        view,
        &params.temperature_variable,
        &params.depth_variable,
        &params.selection,
    )
    .await?;
    let salinity = load_series(
        view,
        &params.salinity_variable,
        &params.depth_variable,
        &params.selection,
    )
    .await?;
    if temperature.len() != depths.len() || salinity.len() != depths.len() {
        return Err(CoreError::format(
            "profile",
            "temperature, salinity and depth lengths differ",
        ));
    }
    Ok(SoundSpeedInput {
        depths,
        temperature,
        salinity,
        threshold: params.gradient_threshold,
    })
}

pub(crate) fn analyse_sound_speed(input: SoundSpeedInput) -> Result<RawProfile> {
    let speeds: Vec<f64> = input
        .temperature
        .iter()
        .zip(&input.salinity)
        .zip(&input.depths)
        .map(|((t, s), d)| {
            if t.is_finite() && s.is_finite() {
                mackenzie(*t, *s, *d)
            } else {
                f64::NAN
            }
        })
        .collect();
    let profile = Profile::new(&input.depths, &speeds)?;
    Ok(RawProfile {
        layer: strongest_layer(&profile, input.threshold),
        sound_channel_axis_depth: minimum_depth(&profile),
        depths: profile.depths,
        values: profile.values,
    })
}
