// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain types shared across the pipeline: diagnostic jobs, dataset handles,
//! and the persisted dataset / THREDDS server records.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::encoder::AnalysisResult;
use crate::error::CoreError;

// ============================================================================
// Diagnostic types and job status
// ============================================================================

/// The closed set of diagnostics the registry knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticType {
    /// Depth of maximum vertical temperature gradient.
    Thermocline,
    /// Depth of maximum vertical salinity gradient.
    Halocline,
    /// Depth of maximum vertical density gradient.
    Pycnocline,
    /// Sound speed profile from temperature and salinity.
    SoundSpeed,
    /// Closed-contour eddy detection on a horizontal field.
    MesoscaleEddy,
    /// Horizontal gradient front detection.
    OceanFront,
    /// Band-limited variance statistics on time series.
    InternalWave,
}

impl DiagnosticType {
    /// Every supported diagnostic.
    pub const ALL: [DiagnosticType; 7] = [
        Self::Thermocline,
        Self::Halocline,
        Self::Pycnocline,
        Self::SoundSpeed,
        Self::MesoscaleEddy,
        Self::OceanFront,
        Self::InternalWave,
    ];

    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thermocline => "thermocline",
            Self::Halocline => "halocline",
            Self::Pycnocline => "pycnocline",
            Self::SoundSpeed => "sound_speed",
            Self::MesoscaleEddy => "mesoscale_eddy",
            Self::OceanFront => "ocean_front",
            Self::InternalWave => "internal_wave",
        }
    }

    /// Whether this diagnostic produces a vertical profile result.
    pub fn is_profile(&self) -> bool {
        matches!(
            self,
            Self::Thermocline | Self::Halocline | Self::Pycnocline | Self::SoundSpeed
        )
    }
}

impl fmt::Display for DiagnosticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiagnosticType {
    type Err = CoreError;

    /// Accepts canonical names, kebab-case, and the short route names
    /// (`eddy`, `front`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "thermocline" => Ok(Self::Thermocline),
            "halocline" => Ok(Self::Halocline),
            "pycnocline" => Ok(Self::Pycnocline),
            "sound_speed" => Ok(Self::SoundSpeed),
            "mesoscale_eddy" | "eddy" => Ok(Self::MesoscaleEddy),
            "ocean_front" | "front" => Ok(Self::OceanFront),
            "internal_wave" => Ok(Self::InternalWave),
            _ => Err(CoreError::UnknownDiagnosticType {
                name: s.to_string(),
            }),
        }
    }
}

/// Job lifecycle status.
///
/// ```text
/// pending ──► running ──► completed
///    │           ├──────► failed
///    └───────────┴──────► cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created and queued, not yet picked up by a worker.
    Pending,
    /// A worker is resolving the dataset or running the analysis.
    Running,
    /// Finished with an encoded result.
    Completed,
    /// Finished with an error description.
    Failed,
    /// Stopped by an explicit cancel request.
    Cancelled,
}

impl JobStatus {
    /// Status string as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Position in the lifecycle; observed ranks never decrease for a job.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed | Self::Cancelled => 2,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(CoreError::validation(
                "status",
                format!("unknown job status '{}'", other),
            )),
        }
    }
}

// ============================================================================
// Diagnostic jobs
// ============================================================================

/// A diagnostic job as seen by pollers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticJob {
    /// Unique job identifier (UUID v4).
    pub job_id: String,
    /// Which analysis to run.
    pub diagnostic_type: DiagnosticType,
    /// Dataset reference as submitted (see [`crate::dataset::DatasetRef`]).
    pub dataset_id: String,
    /// Validated parameter set, stored as submitted.
    pub parameters: serde_json::Value,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Encoded result, present only when completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    /// Error description, present only when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When a worker picked the job up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields needed to create a job record in `pending`.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: String,
    pub diagnostic_type: DiagnosticType,
    pub dataset_id: String,
    pub parameters: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Filter options for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Only jobs in this status.
    pub status: Option<JobStatus>,
    /// Only jobs of this diagnostic type.
    pub diagnostic_type: Option<DiagnosticType>,
}

// ============================================================================
// Datasets
// ============================================================================

/// Storage format of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// JSON grid document on local storage.
    Json,
    /// Remote dataset served over OPeNDAP (DAP2).
    Opendap,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Opendap => "opendap",
        }
    }
}

impl FromStr for FileFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "opendap" | "dods" | "dap2" => Ok(Self::Opendap),
            other => Err(CoreError::format(
                other,
                "supported formats are 'json' and 'opendap'",
            )),
        }
    }
}

/// Where the bytes of a dataset live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatasetLocation {
    /// File under the configured data directory.
    Local { path: PathBuf },
    /// OPeNDAP endpoint resolved from a catalog.
    Remote {
        url: String,
        /// THREDDS server whose credentials apply.
        server_id: Option<i64>,
    },
}

/// Metadata for one variable in a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableInfo {
    /// Element type as advertised by the source (e.g. `float64`).
    pub dtype: String,
    /// Dimension names, outermost first.
    pub dimensions: Vec<String>,
    /// Size along each dimension.
    pub shape: Vec<usize>,
}

/// Latitude/longitude bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpatialBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl SpatialBounds {
    /// Centre of the box.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }
}

/// Time coverage of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalBounds {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Read-only description of a resolved dataset.
///
/// Built once per analysis by the dataset access layer and never mutated by
/// diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetHandle {
    /// Stable identifier (registered id, local path, or catalog URL path).
    pub id: String,
    pub format: FileFormat,
    pub location: DatasetLocation,
    /// Dimension name to size.
    pub dimensions: BTreeMap<String, usize>,
    /// Variable name to metadata.
    pub variables: BTreeMap<String, VariableInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spatial: Option<SpatialBounds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporal: Option<TemporalBounds>,
}

// ============================================================================
// Registry records
// ============================================================================

/// A configured THREDDS server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreddsServerRecord {
    pub id: i64,
    pub name: String,
    pub base_url: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Request to register a THREDDS server.
#[derive(Debug, Clone, Deserialize)]
pub struct NewThreddsServer {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewThreddsServer {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::validation("name", "must not be empty"));
        }
        let url = url::Url::parse(&self.base_url)
            .map_err(|e| CoreError::validation("base_url", e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CoreError::validation(
                "base_url",
                "must be an http or https URL",
            ));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(CoreError::validation(
                "username",
                "username and password must be supplied together",
            ));
        }
        Ok(())
    }
}

/// A registered dataset. References its THREDDS server by id only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetRecord {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Local path relative to the data directory, or the catalog URL path.
    pub file_path: String,
    pub file_format: String,
    pub thredds_server_id: Option<i64>,
    pub thredds_url_path: Option<String>,
    pub variables: Option<serde_json::Value>,
    pub dimensions: Option<serde_json::Value>,
    pub spatial_coverage: Option<SpatialBounds>,
    pub temporal_coverage: Option<TemporalBounds>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Request to register a dataset.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDataset {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub file_path: String,
    pub file_format: String,
    #[serde(default)]
    pub thredds_server_id: Option<i64>,
    #[serde(default)]
    pub thredds_url_path: Option<String>,
    #[serde(default)]
    pub variables: Option<serde_json::Value>,
    #[serde(default)]
    pub dimensions: Option<serde_json::Value>,
    #[serde(default)]
    pub spatial_coverage: Option<SpatialBounds>,
    #[serde(default)]
    pub temporal_coverage: Option<TemporalBounds>,
}

impl NewDataset {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::validation("name", "must not be empty"));
        }
        if self.file_path.trim().is_empty() {
            return Err(CoreError::validation("file_path", "must not be empty"));
        }
        let format: FileFormat = self
            .file_format
            .parse()
            .map_err(|e: CoreError| CoreError::validation("file_format", e.to_string()))?;
        if format == FileFormat::Opendap && self.thredds_server_id.is_none() {
            return Err(CoreError::validation(
                "thredds_server_id",
                "remote datasets must reference a THREDDS server",
            ));
        }
        if let Some(bounds) = &self.spatial_coverage
            && (bounds.min_lat > bounds.max_lat || bounds.min_lon > bounds.max_lon)
        {
            return Err(CoreError::validation(
                "spatial_coverage",
                "minimum exceeds maximum",
            ));
        }
        if let Some(bounds) = &self.temporal_coverage
            && bounds.start > bounds.end
        {
            return Err(CoreError::validation(
                "temporal_coverage",
                "start is after end",
            ));
        }
        Ok(())
    }
}
