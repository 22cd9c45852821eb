// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Diagnostic registry.
//!
//! The set of diagnostics is closed: each [`DiagnosticType`] maps to exactly
//! one analysis. An analysis loads what it needs through the [`ArrayView`]
//! (async, bounded slices), then runs its numeric core on the blocking pool
//! so no executor thread is held during CPU-bound work. Analyses only read
//! from the view and are deterministic for identical input.
//!
//! | Diagnostic | Parameters | Output |
//! |------------|------------|--------|
//! | thermocline, halocline, pycnocline | [`ProfileParams`] | profile |
//! | sound_speed | [`SoundSpeedParams`] | profile |
//! | mesoscale_eddy | [`EddyParams`] | eddies |
//! | ocean_front | [`FrontParams`] | fronts |
//! | internal_wave | [`InternalWaveParams`] | internal waves |

mod eddy;
mod front;
mod geo;
mod internal_wave;
mod params;
mod profile;

use tracing::debug;

use crate::dataset::ArrayView;
use crate::encoder::RawOutput;
use crate::error::{CoreError, Result};
use crate::model::DiagnosticType;

pub use params::{
    EddyField, EddyParams, FrontParams, InternalWaveParams, ParameterSet, ProfileParams,
    SoundSpeedParams, TIME_DIMENSION,
};

/// Look a diagnostic up by name.
///
/// Fails with [`CoreError::UnknownDiagnosticType`] outside the fixed set.
pub fn lookup(name: &str) -> Result<DiagnosticType> {
    name.parse()
}

/// Run the analysis bound to `kind` over `view`.
pub async fn execute(
    kind: DiagnosticType,
    view: &ArrayView,
    params: &ParameterSet,
) -> Result<RawOutput> {
    debug!(diagnostic = %kind, dataset = %view.handle().id, "Running diagnostic");
    match (kind, params) {
        (
            DiagnosticType::Thermocline | DiagnosticType::Halocline | DiagnosticType::Pycnocline,
            ParameterSet::Profile(p),
        ) => {
            let input = profile::load_gradient_input(view, kind, p).await?;
            let raw = blocking(move || profile::analyse_gradient(input)).await?;
            Ok(RawOutput::Profile(raw))
        }
        (DiagnosticType::SoundSpeed, ParameterSet::SoundSpeed(p)) => {
            let input = profile::load_sound_speed_input(view, p).await?;
            let raw = blocking(move || profile::analyse_sound_speed(input)).await??;
            Ok(RawOutput::Profile(raw))
        }
        (DiagnosticType::MesoscaleEddy, ParameterSet::Eddy(p)) => {
            let input = eddy::load_input(view, p).await?;
            Ok(RawOutput::Eddies(blocking(move || eddy::detect(input)).await?))
        }
        (DiagnosticType::OceanFront, ParameterSet::Front(p)) => {
            let input = front::load_input(view, p).await?;
            Ok(RawOutput::Fronts(blocking(move || front::detect(input)).await?))
        }
        (DiagnosticType::InternalWave, ParameterSet::InternalWave(p)) => {
            let input = internal_wave::load_input(view, p).await?;
            Ok(RawOutput::InternalWaves(
                blocking(move || internal_wave::analyse(input)).await??,
            ))
        }
        (kind, _) => Err(CoreError::validation(
            "parameters",
            format!("parameter set does not belong to '{}'", kind),
        )),
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CoreError::Internal {
            details: format!("analysis task failed: {}", e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::MemoryGridSource;
    use crate::encoder::{AnalysisResult, EncoderLimits, encode};
    use crate::model::SpatialBounds;
    use ndarray::{Array, IxDyn};
    use serde_json::json;

    fn ctd_view() -> ArrayView {
        let depths = Array::from_shape_vec(
            IxDyn(&[6]),
            vec![0.0, 10.0, 20.0, 30.0, 40.0, 50.0],
        )
        .unwrap();
        // Two stations, one column each.
        let temperature = Array::from_shape_vec(
            IxDyn(&[2, 6]),
            vec![
                20.0, 20.0, 14.0, 8.0, 8.0, 8.0, //
                15.0, 15.0, 15.0, 15.0, 15.0, 15.0,
            ],
        )
        .unwrap();
        let salinity = Array::from_elem(IxDyn(&[2, 6]), 35.0);
        MemoryGridSource::new()
            .with_variable("depth", &["depth"], depths)
            .unwrap()
            .with_variable("temperature", &["station", "depth"], temperature)
            .unwrap()
            .with_variable("salinity", &["station", "depth"], salinity)
            .unwrap()
            .into_view("ctd")
    }

    #[test]
    fn test_lookup_rejects_unknown_names() {
        assert_eq!(lookup("front").unwrap(), DiagnosticType::OceanFront);
        assert_eq!(
            lookup("tsunami").unwrap_err().error_code(),
            "UNKNOWN_DIAGNOSTIC_TYPE"
        );
    }

    #[tokio::test]
    async fn test_thermocline_end_to_end() {
        let view = ctd_view();
        let params = ParameterSet::parse(
            DiagnosticType::Thermocline,
            &json!({"gradient_threshold": 0.1}),
        )
        .unwrap();
        let raw = execute(DiagnosticType::Thermocline, &view, &params)
            .await
            .unwrap();
        let result = encode(DiagnosticType::Thermocline, raw, &EncoderLimits::default()).unwrap();
        let AnalysisResult::Profile(summary) = result else {
            panic!("expected a profile result");
        };
        assert_eq!(summary.boundary_depths.len(), 1);
        let boundary = summary.boundary_depths[0];
        assert!((10.0..=30.0).contains(&boundary));
        assert_eq!(summary.points.len(), 6);
    }

    #[tokio::test]
    async fn test_uniform_station_has_no_boundary() {
        let view = ctd_view();
        let params = ParameterSet::parse(
            DiagnosticType::Thermocline,
            &json!({"gradient_threshold": 0.1, "selection": {"station": 1}}),
        )
        .unwrap();
        let raw = execute(DiagnosticType::Thermocline, &view, &params)
            .await
            .unwrap();
        let AnalysisResult::Profile(summary) =
            encode(DiagnosticType::Thermocline, raw, &EncoderLimits::default()).unwrap()
        else {
            panic!("expected a profile result");
        };
        assert!(summary.boundary_depths.is_empty());
        assert!(summary.layer.is_none());
    }

    #[tokio::test]
    async fn test_sound_speed_reports_channel_axis() {
        let view = ctd_view();
        let params = ParameterSet::parse(
            DiagnosticType::SoundSpeed,
            &json!({"gradient_threshold": 0.5}),
        )
        .unwrap();
        let RawOutput::Profile(raw) = execute(DiagnosticType::SoundSpeed, &view, &params)
            .await
            .unwrap()
        else {
            panic!("expected a profile");
        };
        // Coldest water at 30 m; speed rises again with pressure below it.
        assert_eq!(raw.sound_channel_axis_depth, Some(30.0));
    }

    #[tokio::test]
    async fn test_internal_wave_uses_dataset_centre() {
        let n = 64;
        let time = Array::from_shape_fn(IxDyn(&[n]), |ix| ix[0] as f64);
        let series = Array::from_shape_fn(IxDyn(&[n]), |ix| {
            (2.0 * std::f64::consts::PI * ix[0] as f64 / 8.0).sin()
        });
        let view = MemoryGridSource::new()
            .with_variable("time", &["time"], time)
            .unwrap()
            .with_variable("temp", &["time"], series)
            .unwrap()
            .with_spatial(SpatialBounds {
                min_lat: 10.0,
                max_lat: 20.0,
                min_lon: 30.0,
                max_lon: 40.0,
            })
            .into_view("mooring");
        let params = ParameterSet::parse(
            DiagnosticType::InternalWave,
            &json!({"variable": "temp", "min_period": 4.0, "max_period": 16.0}),
        )
        .unwrap();
        let RawOutput::InternalWaves(stats) = execute(DiagnosticType::InternalWave, &view, &params)
            .await
            .unwrap()
        else {
            panic!("expected wave statistics");
        };
        assert_eq!(stats.len(), 1);
        assert!((stats[0].dominant_period - 8.0).abs() < 1e-9);
        let location = stats[0].location.unwrap();
        assert_eq!((location.lat, location.lon), (15.0, 35.0));
    }

    #[tokio::test]
    async fn test_mismatched_parameter_set_rejected() {
        let view = ctd_view();
        let params = ParameterSet::parse(
            DiagnosticType::Thermocline,
            &json!({"gradient_threshold": 0.1}),
        )
        .unwrap();
        let err = execute(DiagnosticType::SoundSpeed, &view, &params)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_pycnocline_derives_density_from_temperature_and_salinity() {
        let view = ctd_view();
        let params = ParameterSet::parse(
            DiagnosticType::Pycnocline,
            &json!({"gradient_threshold": 0.05}),
        )
        .unwrap();
        let RawOutput::Profile(raw) = execute(DiagnosticType::Pycnocline, &view, &params)
            .await
            .unwrap()
        else {
            panic!("expected a profile");
        };
        assert_eq!(raw.values.len(), 6);
        assert!(raw.values.iter().all(|rho| (1020.0..1030.0).contains(rho)));
        // Cooling at constant salinity makes the water denser with depth.
        assert!(raw.values[5] > raw.values[0]);
        let layer = raw.layer.expect("density step below the mixed layer");
        assert!((10.0..=30.0).contains(&layer.core_depth));
        assert!(layer.peak_gradient > 0.0);
    }

    #[tokio::test]
    async fn test_unknown_variable_is_validation_error() {
        let view = ctd_view();
        let params = ParameterSet::parse(
            DiagnosticType::Pycnocline,
            &json!({"gradient_threshold": 0.1, "variable": "density"}),
        )
        .unwrap();
        let err = execute(DiagnosticType::Pycnocline, &view, &params)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }
}
