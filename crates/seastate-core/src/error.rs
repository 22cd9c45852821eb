// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for seastate-core.
//!
//! Provides a unified error type with stable machine-readable codes that the
//! HTTP layer maps onto responses and the executor records on failed jobs.

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while submitting, executing, or polling diagnostic jobs.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum CoreError {
    /// Input validation failed. Surfaced synchronously; no job is created.
    Validation {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// A job, dataset, server, or catalog entry does not exist.
    NotFound {
        /// Kind of entity that was looked up (job, dataset, server, catalog).
        entity: &'static str,
        /// The identifier that did not resolve.
        id: String,
    },

    /// A remote fetch failed at the network or server level.
    Transport {
        /// The URL being fetched.
        url: String,
        /// Error details.
        details: String,
        /// Whether the caller may reasonably try again.
        retryable: bool,
    },

    /// A file or stream could not be parsed as a supported gridded format.
    Format {
        /// Where the data came from (path or URL).
        source_name: String,
        /// Parse failure details.
        details: String,
    },

    /// A THREDDS catalog document is malformed.
    CatalogParse {
        /// Parse failure details.
        details: String,
    },

    /// The requested diagnostic type is not part of the fixed set.
    UnknownDiagnosticType {
        /// The name that was requested.
        name: String,
    },

    /// The dataset does not advertise the requested access service.
    UnsupportedService {
        /// Dataset name or URL path.
        dataset: String,
        /// The service kind that was requested.
        service: String,
    },

    /// Raw analysis output did not match the expected result schema.
    Encoding {
        /// The diagnostic whose output was being encoded.
        diagnostic: String,
        /// What was wrong with the output.
        details: String,
    },

    /// Execution was stopped by an explicit cancel request.
    Cancelled {
        /// The cancelled job ID.
        job_id: String,
    },

    /// The scheduler cannot accept work (queue full or shut down).
    Unavailable {
        /// Reason the scheduler refused the submission.
        reason: String,
    },

    /// Database operation failed.
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// An analysis task panicked or was aborted.
    Internal {
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Shorthand for a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a lookup failure.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Shorthand for a format error.
    pub fn format(source_name: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Format {
            source_name: source_name.into(),
            details: details.into(),
        }
    }

    /// Shorthand for a catalog parse error.
    pub fn catalog_parse(details: impl Into<String>) -> Self {
        Self::CatalogParse {
            details: details.into(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Transport { .. } => "TRANSPORT_ERROR",
            Self::Format { .. } => "FORMAT_ERROR",
            Self::CatalogParse { .. } => "CATALOG_PARSE_ERROR",
            Self::UnknownDiagnosticType { .. } => "UNKNOWN_DIAGNOSTIC_TYPE",
            Self::UnsupportedService { .. } => "UNSUPPORTED_SERVICE",
            Self::Encoding { .. } => "ENCODING_ERROR",
            Self::Cancelled { .. } => "CANCELLED",
            Self::Unavailable { .. } => "UNAVAILABLE",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying the same request could succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::Unavailable { .. } => true,
            _ => false,
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::NotFound { entity, id } => {
                write!(f, "{} '{}' not found", capitalize(entity), id)
            }
            Self::Transport { url, details, .. } => {
                write!(f, "Transport error fetching '{}': {}", url, details)
            }
            Self::Format {
                source_name,
                details,
            } => {
                write!(
                    f,
                    "Unsupported or malformed data in '{}': {}",
                    source_name, details
                )
            }
            Self::CatalogParse { details } => {
                write!(f, "Malformed catalog: {}", details)
            }
            Self::UnknownDiagnosticType { name } => {
                write!(f, "Unknown diagnostic type '{}'", name)
            }
            Self::UnsupportedService { dataset, service } => {
                write!(
                    f,
                    "Service '{}' is not advertised for dataset '{}'",
                    service, dataset
                )
            }
            Self::Encoding {
                diagnostic,
                details,
            } => {
                write!(
                    f,
                    "Failed to encode {} result: {}",
                    diagnostic, details
                )
            }
            Self::Cancelled { job_id } => write!(f, "Job '{}' was cancelled", job_id),
            Self::Unavailable { reason } => write!(f, "Scheduler unavailable: {}", reason),
            Self::Database { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
            Self::Internal { details } => write!(f, "Internal error: {}", details),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for CoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        CoreError::Database {
            operation: "migrate".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Database {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        let retryable = err.is_timeout()
            || err.is_connect()
            || err.status().is_some_and(|s| s.is_server_error());
        CoreError::Transport {
            url: err
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "<unknown>".to_string()),
            details: err.to_string(),
            retryable,
        }
    }
}
