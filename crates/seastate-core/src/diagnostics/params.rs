// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed parameter sets, one per diagnostic family.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::model::DiagnosticType;

/// Name of the dimension `time_index` pins in horizontal-field diagnostics.
pub const TIME_DIMENSION: &str = "time";

fn default_depth() -> String {
    "depth".to_string()
}

fn default_lat() -> String {
    "lat".to_string()
}

fn default_lon() -> String {
    "lon".to_string()
}

fn default_time() -> String {
    "time".to_string()
}

fn default_temperature() -> String {
    "temperature".to_string()
}

fn default_salinity() -> String {
    "salinity".to_string()
}

fn default_min_cells() -> usize {
    1
}

/// Thermocline, halocline and pycnocline parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileParams {
    /// Profile variable. Defaults to `temperature`, `salinity` or `density`
    /// depending on the diagnostic.
    #[serde(default)]
    pub variable: Option<String>,
    #[serde(default = "default_depth")]
    pub depth_variable: String,
    /// Minimum absolute vertical gradient (units per depth unit).
    pub gradient_threshold: f64,
    /// Index for every dimension other than depth. Unlisted dimensions use 0.
    #[serde(default)]
    pub selection: BTreeMap<String, usize>,
}

impl ProfileParams {
    pub fn variable_for(&self, kind: DiagnosticType) -> &str {
        match (&self.variable, kind) {
            (Some(v), _) => v,
            (None, DiagnosticType::Halocline) => "salinity",
            (None, DiagnosticType::Pycnocline) => "density",
            (None, _) => "temperature",
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(v) = &self.variable {
            non_empty("variable", v)?;
        }
        non_empty("depth_variable", &self.depth_variable)?;
        positive("gradient_threshold", self.gradient_threshold)
    }
}

/// Sound speed profile parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SoundSpeedParams {
    #[serde(default = "default_temperature")]
    pub temperature_variable: String,
    #[serde(default = "default_salinity")]
    pub salinity_variable: String,
    #[serde(default = "default_depth")]
    pub depth_variable: String,
    /// Minimum absolute sound speed gradient (m/s per m).
    pub gradient_threshold: f64,
    #[serde(default)]
    pub selection: BTreeMap<String, usize>,
}

impl SoundSpeedParams {
    fn validate(&self) -> Result<()> {
        non_empty("temperature_variable", &self.temperature_variable)?;
        non_empty("salinity_variable", &self.salinity_variable)?;
        non_empty("depth_variable", &self.depth_variable)?;
        positive("gradient_threshold", self.gradient_threshold)
    }
}

/// What an eddy field represents; decides how rotation is read off it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EddyField {
    /// Sea-surface height: highs are anticyclonic.
    #[default]
    Ssh,
    /// Relative vorticity: cyclonic where it shares the sign of the latitude.
    Vorticity,
}

/// Mesoscale eddy detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EddyParams {
    pub variable: String,
    #[serde(default)]
    pub field: EddyField,
    #[serde(default = "default_lat")]
    pub lat_variable: String,
    #[serde(default = "default_lon")]
    pub lon_variable: String,
    #[serde(default)]
    pub time_index: usize,
    #[serde(default)]
    pub selection: BTreeMap<String, usize>,
    /// Step between successive contour levels, in field units.
    pub contour_interval: f64,
    /// Minimum peak-to-outermost-contour amplitude.
    pub min_amplitude: f64,
    pub min_radius_km: f64,
    pub max_radius_km: f64,
}

impl EddyParams {
    fn validate(&self) -> Result<()> {
        non_empty("variable", &self.variable)?;
        non_empty("lat_variable", &self.lat_variable)?;
        non_empty("lon_variable", &self.lon_variable)?;
        positive("contour_interval", self.contour_interval)?;
        non_negative("min_amplitude", self.min_amplitude)?;
        non_negative("min_radius_km", self.min_radius_km)?;
        positive("max_radius_km", self.max_radius_km)?;
        if self.max_radius_km <= self.min_radius_km {
            return Err(CoreError::validation(
                "max_radius_km",
                "must be greater than min_radius_km",
            ));
        }
        Ok(())
    }

    pub(crate) fn fixed_indices(&self) -> BTreeMap<String, usize> {
        with_time_index(&self.selection, self.time_index)
    }
}

/// Ocean front detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrontParams {
    pub variable: String,
    #[serde(default = "default_lat")]
    pub lat_variable: String,
    #[serde(default = "default_lon")]
    pub lon_variable: String,
    #[serde(default)]
    pub time_index: usize,
    #[serde(default)]
    pub selection: BTreeMap<String, usize>,
    /// Minimum horizontal gradient magnitude, in field units per km.
    pub gradient_threshold: f64,
    /// Segments closer than this are merged into one front.
    #[serde(default)]
    pub min_separation_km: f64,
    /// Segments with fewer cells are dropped.
    #[serde(default = "default_min_cells")]
    pub min_cells: usize,
}

impl FrontParams {
    fn validate(&self) -> Result<()> {
        non_empty("variable", &self.variable)?;
        non_empty("lat_variable", &self.lat_variable)?;
        non_empty("lon_variable", &self.lon_variable)?;
        positive("gradient_threshold", self.gradient_threshold)?;
        non_negative("min_separation_km", self.min_separation_km)?;
        if self.min_cells == 0 {
            return Err(CoreError::validation("min_cells", "must be at least 1"));
        }
        Ok(())
    }

    pub(crate) fn fixed_indices(&self) -> BTreeMap<String, usize> {
        with_time_index(&self.selection, self.time_index)
    }
}

/// Internal wave band statistics parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InternalWaveParams {
    pub variable: String,
    #[serde(default = "default_time")]
    pub time_variable: String,
    /// Analyse one series per depth level when set.
    #[serde(default)]
    pub depth_variable: Option<String>,
    /// Depth levels to analyse; all levels when absent.
    #[serde(default)]
    pub depth_indices: Option<Vec<usize>>,
    #[serde(default)]
    pub selection: BTreeMap<String, usize>,
    /// Band limits in the units of the time coordinate.
    pub min_period: f64,
    pub max_period: f64,
}

impl InternalWaveParams {
    fn validate(&self) -> Result<()> {
        non_empty("variable", &self.variable)?;
        non_empty("time_variable", &self.time_variable)?;
        positive("min_period", self.min_period)?;
        positive("max_period", self.max_period)?;
        if self.max_period <= self.min_period {
            return Err(CoreError::validation(
                "max_period",
                "must be greater than min_period",
            ));
        }
        if self.depth_indices.is_some() && self.depth_variable.is_none() {
            return Err(CoreError::validation(
                "depth_indices",
                "requires depth_variable",
            ));
        }
        if matches!(&self.depth_indices, Some(indices) if indices.is_empty()) {
            return Err(CoreError::validation("depth_indices", "must not be empty"));
        }
        Ok(())
    }
}

/// Validated parameters for one diagnostic run.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterSet {
    Profile(ProfileParams),
    SoundSpeed(SoundSpeedParams),
    Eddy(EddyParams),
    Front(FrontParams),
    InternalWave(InternalWaveParams),
}

impl ParameterSet {
    /// Deserialize and validate `value` against the schema of `kind`.
    ///
    /// `null` is treated as an empty object. Unknown fields are rejected.
    pub fn parse(kind: DiagnosticType, value: &Value) -> Result<Self> {
        let value = match value {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        let set = match kind {
            DiagnosticType::Thermocline | DiagnosticType::Halocline | DiagnosticType::Pycnocline => {
                Self::Profile(from_value(value)?)
            }
            DiagnosticType::SoundSpeed => Self::SoundSpeed(from_value(value)?),
            DiagnosticType::MesoscaleEddy => Self::Eddy(from_value(value)?),
            DiagnosticType::OceanFront => Self::Front(from_value(value)?),
            DiagnosticType::InternalWave => Self::InternalWave(from_value(value)?),
        };
        set.validate()?;
        Ok(set)
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Profile(p) => p.validate(),
            Self::SoundSpeed(p) => p.validate(),
            Self::Eddy(p) => p.validate(),
            Self::Front(p) => p.validate(),
            Self::InternalWave(p) => p.validate(),
        }
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| CoreError::validation("parameters", e.to_string()))
}

fn with_time_index(selection: &BTreeMap<String, usize>, time_index: usize) -> BTreeMap<String, usize> {
    let mut fixed = selection.clone();
    fixed.entry(TIME_DIMENSION.to_string()).or_insert(time_index);
    fixed
}

fn non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CoreError::validation(field, "must not be empty"));
    }
    Ok(())
}

fn positive(field: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(CoreError::validation(field, "must be a positive number"));
    }
    Ok(())
}

fn non_negative(field: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value >= 0.0) {
        return Err(CoreError::validation(field, "must be zero or positive"));
    }
    Ok(())
}
