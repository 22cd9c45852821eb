// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Result encoder.
//!
//! Turns raw analysis output into a bounded [`AnalysisResult`]. Profiles are
//! decimated to at most [`EncoderLimits::max_profile_points`] samples, feature
//! lists are ranked by strength and cut to [`EncoderLimits::max_features`].
//! Derived scalars (layer depths, gradients, feature attributes) are always
//! kept exactly. Output whose variant does not match the diagnostic type is
//! rejected with [`CoreError::Encoding`].

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::model::DiagnosticType;

/// Size bounds applied to every encoded result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderLimits {
    pub max_profile_points: usize,
    pub max_features: usize,
    /// Cap on the serialized JSON size. `None` disables the check.
    pub max_result_bytes: Option<usize>,
}

impl Default for EncoderLimits {
    fn default() -> Self {
        Self {
            max_profile_points: 512,
            max_features: 256,
            max_result_bytes: None,
        }
    }
}

// ============================================================================
// Raw analysis output
// ============================================================================

/// Output of a diagnostic function before encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    Profile(RawProfile),
    Eddies(Vec<RawEddy>),
    Fronts(Vec<RawFront>),
    InternalWaves(Vec<RawWaveStat>),
}

impl RawOutput {
    fn variant_name(&self) -> &'static str {
        match self {
            Self::Profile(_) => "profile",
            Self::Eddies(_) => "eddies",
            Self::Fronts(_) => "fronts",
            Self::InternalWaves(_) => "internal_waves",
        }
    }
}

/// A full vertical profile plus what was derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawProfile {
    pub depths: Vec<f64>,
    /// Same length as `depths`; NaN marks a missing sample.
    pub values: Vec<f64>,
    pub layer: Option<GradientLayer>,
    pub sound_channel_axis_depth: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawEddy {
    pub center_lat: f64,
    pub center_lon: f64,
    pub amplitude: f64,
    pub radius_km: f64,
    pub area_km2: f64,
    pub rotation: Rotation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawFront {
    pub centroid_lat: f64,
    pub centroid_lon: f64,
    pub length_km: f64,
    pub mean_gradient: f64,
    pub max_gradient: f64,
    pub cell_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawWaveStat {
    pub depth: Option<f64>,
    pub location: Option<GeoPoint>,
    pub dominant_period: f64,
    pub band_energy: f64,
    pub band_variance_fraction: f64,
    pub total_variance: f64,
}

// ============================================================================
// Encoded result
// ============================================================================

/// Diagnostic-specific result payload stored on a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisResult {
    Profile(ProfileSummary),
    Features(FeatureSummary),
}

impl AnalysisResult {
    pub fn diagnostic(&self) -> DiagnosticType {
        match self {
            Self::Profile(p) => p.diagnostic,
            Self::Features(f) => f.diagnostic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfilePoint {
    pub depth: f64,
    pub value: f64,
}

/// Depth range of the strongest vertical gradient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientLayer {
    pub top_depth: f64,
    pub bottom_depth: f64,
    /// Midpoint of the steepest segment within the layer.
    pub core_depth: f64,
    /// Signed gradient (value units per depth unit) at the core.
    pub peak_gradient: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub diagnostic: DiagnosticType,
    /// Valid samples ordered by depth, possibly decimated.
    pub points: Vec<ProfilePoint>,
    /// Number of valid samples before decimation.
    pub sample_count: usize,
    pub decimated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<GradientLayer>,
    /// Layer boundary depths; empty when no gradient exceeds the threshold.
    pub boundary_depths: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound_channel_axis_depth: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    Cyclonic,
    Anticyclonic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureAttributes {
    Eddy {
        rotation: Rotation,
        amplitude: f64,
        core_radius_km: f64,
        area_km2: f64,
    },
    Front {
        mean_gradient: f64,
        max_gradient: f64,
        cell_count: usize,
    },
    InternalWave {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        depth: Option<f64>,
        dominant_period: f64,
        band_energy: f64,
        band_variance_fraction: f64,
        total_variance: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    /// Characteristic size: eddy diameter, front length, zero for point series.
    pub extent_km: f64,
    pub attributes: FeatureAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    pub diagnostic: DiagnosticType,
    /// Strongest first.
    pub features: Vec<Feature>,
    pub total_detected: usize,
    pub truncated: bool,
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode raw output for `kind` under `limits`.
pub fn encode(kind: DiagnosticType, raw: RawOutput, limits: &EncoderLimits) -> Result<AnalysisResult> {
    let result = match (kind, raw) {
        (k, RawOutput::Profile(profile)) if k.is_profile() => {
            AnalysisResult::Profile(encode_profile(k, profile, limits.max_profile_points)?)
        }
        (DiagnosticType::MesoscaleEddy, RawOutput::Eddies(eddies)) => {
            let features = eddies
                .into_iter()
                .map(|e| eddy_feature(kind, e))
                .collect::<Result<Vec<_>>>()?;
            AnalysisResult::Features(rank_features(kind, features, limits.max_features))
        }
        (DiagnosticType::OceanFront, RawOutput::Fronts(fronts)) => {
            let features = fronts
                .into_iter()
                .map(|f| front_feature(kind, f))
                .collect::<Result<Vec<_>>>()?;
            AnalysisResult::Features(rank_features(kind, features, limits.max_features))
        }
        (DiagnosticType::InternalWave, RawOutput::InternalWaves(stats)) => {
            let features = stats
                .into_iter()
                .map(|s| wave_feature(kind, s))
                .collect::<Result<Vec<_>>>()?;
            AnalysisResult::Features(rank_features(kind, features, limits.max_features))
        }
        (k, other) => {
            return Err(encoding(
                k,
                format!("expected {} output, got {}", expected_variant(k), other.variant_name()),
            ));
        }
    };

    match limits.max_result_bytes {
        Some(cap) => shrink_to_fit(kind, result, cap),
        None => Ok(result),
    }
}

fn expected_variant(kind: DiagnosticType) -> &'static str {
    match kind {
        DiagnosticType::MesoscaleEddy => "eddies",
        DiagnosticType::OceanFront => "fronts",
        DiagnosticType::InternalWave => "internal_waves",
        _ => "profile",
    }
}

fn encoding(kind: DiagnosticType, details: impl Into<String>) -> CoreError {
    CoreError::Encoding {
        diagnostic: kind.to_string(),
        details: details.into(),
    }
}

fn finite(kind: DiagnosticType, name: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(encoding(kind, format!("{} is not finite", name)))
    }
}

fn encode_profile(kind: DiagnosticType, raw: RawProfile, max_points: usize) -> Result<ProfileSummary> {
    if raw.depths.len() != raw.values.len() {
        return Err(encoding(
            kind,
            format!(
                "{} depths but {} values",
                raw.depths.len(),
                raw.values.len()
            ),
        ));
    }

    let mut points = Vec::with_capacity(raw.depths.len());
    for (depth, value) in raw.depths.iter().zip(&raw.values) {
        let depth = finite(kind, "depth", *depth)?;
        if value.is_finite() {
            points.push(ProfilePoint { depth, value: *value });
        }
    }

    if let Some(layer) = &raw.layer {
        finite(kind, "layer.top_depth", layer.top_depth)?;
        finite(kind, "layer.bottom_depth", layer.bottom_depth)?;
        finite(kind, "layer.core_depth", layer.core_depth)?;
        finite(kind, "layer.peak_gradient", layer.peak_gradient)?;
    }
    if let Some(axis) = raw.sound_channel_axis_depth {
        finite(kind, "sound_channel_axis_depth", axis)?;
    }

    let sample_count = points.len();
    let points = decimate(points, max_points);

    Ok(ProfileSummary {
        diagnostic: kind,
        decimated: points.len() < sample_count,
        points,
        sample_count,
        boundary_depths: raw.layer.iter().map(|l| l.core_depth).collect(),
        layer: raw.layer,
        sound_channel_axis_depth: raw.sound_channel_axis_depth,
    })
}

/// Keep `max` evenly spaced points, always including both ends.
fn decimate<T: Copy>(points: Vec<T>, max: usize) -> Vec<T> {
    let n = points.len();
    if n <= max || max < 2 {
        return points;
    }
    (0..max)
        .map(|i| points[i * (n - 1) / (max - 1)])
        .collect()
}

fn eddy_feature(kind: DiagnosticType, e: RawEddy) -> Result<Feature> {
    Ok(Feature {
        location: Some(GeoPoint {
            lat: finite(kind, "center_lat", e.center_lat)?,
            lon: finite(kind, "center_lon", e.center_lon)?,
        }),
        extent_km: 2.0 * finite(kind, "radius_km", e.radius_km)?,
        attributes: FeatureAttributes::Eddy {
            rotation: e.rotation,
            amplitude: finite(kind, "amplitude", e.amplitude)?,
            core_radius_km: e.radius_km,
            area_km2: finite(kind, "area_km2", e.area_km2)?,
        },
    })
}

fn front_feature(kind: DiagnosticType, f: RawFront) -> Result<Feature> {
    Ok(Feature {
        location: Some(GeoPoint {
            lat: finite(kind, "centroid_lat", f.centroid_lat)?,
            lon: finite(kind, "centroid_lon", f.centroid_lon)?,
        }),
        extent_km: finite(kind, "length_km", f.length_km)?,
        attributes: FeatureAttributes::Front {
            mean_gradient: finite(kind, "mean_gradient", f.mean_gradient)?,
            max_gradient: finite(kind, "max_gradient", f.max_gradient)?,
            cell_count: f.cell_count,
        },
    })
}

fn wave_feature(kind: DiagnosticType, s: RawWaveStat) -> Result<Feature> {
    if let Some(depth) = s.depth {
        finite(kind, "depth", depth)?;
    }
    if let Some(point) = &s.location {
        finite(kind, "location.lat", point.lat)?;
        finite(kind, "location.lon", point.lon)?;
    }
    Ok(Feature {
        location: s.location,
        extent_km: 0.0,
        attributes: FeatureAttributes::InternalWave {
            depth: s.depth,
            dominant_period: finite(kind, "dominant_period", s.dominant_period)?,
            band_energy: finite(kind, "band_energy", s.band_energy)?,
            band_variance_fraction: finite(
                kind,
                "band_variance_fraction",
                s.band_variance_fraction,
            )?,
            total_variance: finite(kind, "total_variance", s.total_variance)?,
        },
    })
}

fn strength(feature: &Feature) -> f64 {
    match &feature.attributes {
        FeatureAttributes::Eddy { amplitude, .. } => amplitude.abs(),
        FeatureAttributes::Front { max_gradient, .. } => *max_gradient,
        FeatureAttributes::InternalWave { band_energy, .. } => *band_energy,
    }
}

fn rank_features(kind: DiagnosticType, mut features: Vec<Feature>, max: usize) -> FeatureSummary {
    let total_detected = features.len();
    // Stable sort: equal strengths keep detection order.
    features.sort_by(|a, b| strength(b).total_cmp(&strength(a)));
    features.truncate(max);
    FeatureSummary {
        diagnostic: kind,
        truncated: features.len() < total_detected,
        features,
        total_detected,
    }
}

fn serialized_len(result: &AnalysisResult) -> Result<usize> {
    serde_json::to_vec(result)
        .map(|bytes| bytes.len())
        .map_err(|e| encoding(result.diagnostic(), e.to_string()))
}

/// Halve the variable-length part of the result until it fits `cap` bytes.
fn shrink_to_fit(kind: DiagnosticType, mut result: AnalysisResult, cap: usize) -> Result<AnalysisResult> {
    loop {
        let len = serialized_len(&result)?;
        if len <= cap {
            return Ok(result);
        }
        match &mut result {
            AnalysisResult::Profile(p) if p.points.len() > 2 => {
                let target = (p.points.len() / 2).max(2);
                p.points = decimate(std::mem::take(&mut p.points), target);
                p.decimated = true;
            }
            AnalysisResult::Features(f) if !f.features.is_empty() => {
                let target = f.features.len() / 2;
                f.features.truncate(target);
                f.truncated = true;
            }
            _ => {
                return Err(encoding(
                    kind,
                    format!("summary needs {} bytes, cap is {}", len, cap),
                ));
            }
        }
    }
}
