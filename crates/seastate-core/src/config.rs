// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::dataset::FetchPolicy;
use crate::encoder::EncoderLimits;

/// Worker pool sizing for the job scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Maximum number of jobs executing at once.
    pub max_concurrent_jobs: usize,
    /// Capacity of the submission queue; submissions beyond it are refused.
    pub queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            queue_capacity: 256,
        }
    }
}

/// Seastate configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL for jobs and registries
    pub database_url: String,
    /// HTTP server address
    pub http_addr: SocketAddr,
    /// Root directory for local dataset paths
    pub data_dir: PathBuf,
    /// Timeout for catalog and data requests
    pub http_timeout: Duration,
    /// Worker pool sizing
    pub workers: WorkerPoolConfig,
    /// Retry policy for remote dataset fetches
    pub fetch: FetchPolicy,
    /// Result payload bounds
    pub limits: EncoderLimits,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `SEASTATE_DATABASE_URL`: SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `SEASTATE_HTTP_PORT`: HTTP server port (default: 8080)
    /// - `SEASTATE_DATA_DIR`: local dataset root (default: .data)
    /// - `SEASTATE_HTTP_TIMEOUT_MS`: remote request timeout (default: 30000)
    /// - `SEASTATE_MAX_CONCURRENT_JOBS`: worker pool size (default: 4)
    /// - `SEASTATE_QUEUE_CAPACITY`: submission queue capacity (default: 256)
    /// - `SEASTATE_MAX_PROFILE_POINTS`: profile decimation bound (default: 512)
    /// - `SEASTATE_MAX_FEATURES`: feature list bound (default: 256)
    ///
    /// Optional (unset means disabled):
    /// - `SEASTATE_FETCH_MAX_ATTEMPTS`: attempts per remote fetch
    /// - `SEASTATE_FETCH_RETRY_DELAY_MS`: delay between fetch attempts
    /// - `SEASTATE_MAX_RESULT_BYTES`: serialized result size cap
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("SEASTATE_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("SEASTATE_DATABASE_URL"))?;

        let http_port: u16 = parse_or("SEASTATE_HTTP_PORT", 8080, "must be a valid port number")?;

        let data_dir = std::env::var("SEASTATE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".data"));

        let http_timeout_ms: u64 =
            parse_or("SEASTATE_HTTP_TIMEOUT_MS", 30_000, "must be milliseconds")?;

        let max_concurrent_jobs: usize = parse_or(
            "SEASTATE_MAX_CONCURRENT_JOBS",
            4,
            "must be a positive integer",
        )?;
        if max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid(
                "SEASTATE_MAX_CONCURRENT_JOBS",
                "must be a positive integer",
            ));
        }

        let queue_capacity: usize =
            parse_or("SEASTATE_QUEUE_CAPACITY", 256, "must be a positive integer")?;
        if queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "SEASTATE_QUEUE_CAPACITY",
                "must be a positive integer",
            ));
        }

        let max_profile_points: usize = parse_or(
            "SEASTATE_MAX_PROFILE_POINTS",
            EncoderLimits::default().max_profile_points,
            "must be a positive integer",
        )?;
        if max_profile_points < 2 {
            return Err(ConfigError::Invalid(
                "SEASTATE_MAX_PROFILE_POINTS",
                "must be at least 2",
            ));
        }

        let max_features: usize = parse_or(
            "SEASTATE_MAX_FEATURES",
            EncoderLimits::default().max_features,
            "must be a positive integer",
        )?;

        let max_result_bytes: Option<usize> =
            parse_optional("SEASTATE_MAX_RESULT_BYTES", "must be a byte count")?;

        let max_attempts: Option<u32> =
            parse_optional("SEASTATE_FETCH_MAX_ATTEMPTS", "must be a positive integer")?;
        if max_attempts == Some(0) {
            return Err(ConfigError::Invalid(
                "SEASTATE_FETCH_MAX_ATTEMPTS",
                "must be a positive integer",
            ));
        }
        let retry_delay_ms: Option<u64> =
            parse_optional("SEASTATE_FETCH_RETRY_DELAY_MS", "must be milliseconds")?;

        Ok(Self {
            database_url,
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            data_dir,
            http_timeout: Duration::from_millis(http_timeout_ms),
            workers: WorkerPoolConfig {
                max_concurrent_jobs,
                queue_capacity,
            },
            fetch: FetchPolicy {
                max_attempts: max_attempts.unwrap_or(1),
                retry_delay: Duration::from_millis(retry_delay_ms.unwrap_or(0)),
            },
            limits: EncoderLimits {
                max_profile_points,
                max_features,
                max_result_bytes,
            },
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    default: T,
    hint: &'static str,
) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value.parse().map_err(|_| ConfigError::Invalid(key, hint)),
        Err(_) => Ok(default),
    }
}

fn parse_optional<T: std::str::FromStr>(
    key: &'static str,
    hint: &'static str,
) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key, hint)),
        Err(_) => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        "SEASTATE_DATABASE_URL",
        "SEASTATE_HTTP_PORT",
        "SEASTATE_DATA_DIR",
        "SEASTATE_HTTP_TIMEOUT_MS",
        "SEASTATE_MAX_CONCURRENT_JOBS",
        "SEASTATE_QUEUE_CAPACITY",
        "SEASTATE_MAX_PROFILE_POINTS",
        "SEASTATE_MAX_FEATURES",
        "SEASTATE_MAX_RESULT_BYTES",
        "SEASTATE_FETCH_MAX_ATTEMPTS",
        "SEASTATE_FETCH_RETRY_DELAY_MS",
    ];

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        /// Start from a clean slate for every variable this module reads.
        fn clean() -> Self {
            let mut guard = Self::new();
            for key in ALL_VARS {
                guard.remove(key);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("SEASTATE_DATABASE_URL", "sqlite:seastate.db");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "sqlite:seastate.db");
        assert_eq!(config.http_addr.port(), 8080);
        assert_eq!(config.data_dir, PathBuf::from(".data"));
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.workers, WorkerPoolConfig::default());
        assert_eq!(config.fetch.max_attempts, 1);
        assert_eq!(config.fetch.retry_delay, Duration::ZERO);
        assert_eq!(config.limits.max_result_bytes, None);
    }

    #[test]
    fn test_config_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("SEASTATE_DATABASE_URL", "sqlite:/var/lib/seastate.db");
        guard.set("SEASTATE_HTTP_PORT", "9090");
        guard.set("SEASTATE_DATA_DIR", "/srv/grids");
        guard.set("SEASTATE_HTTP_TIMEOUT_MS", "5000");
        guard.set("SEASTATE_MAX_CONCURRENT_JOBS", "16");
        guard.set("SEASTATE_QUEUE_CAPACITY", "32");
        guard.set("SEASTATE_MAX_PROFILE_POINTS", "100");
        guard.set("SEASTATE_MAX_FEATURES", "10");
        guard.set("SEASTATE_MAX_RESULT_BYTES", "65536");
        guard.set("SEASTATE_FETCH_MAX_ATTEMPTS", "3");
        guard.set("SEASTATE_FETCH_RETRY_DELAY_MS", "250");

        let config = Config::from_env().unwrap();

        assert_eq!(config.http_addr.port(), 9090);
        assert_eq!(config.data_dir, PathBuf::from("/srv/grids"));
        assert_eq!(config.http_timeout, Duration::from_millis(5000));
        assert_eq!(config.workers.max_concurrent_jobs, 16);
        assert_eq!(config.workers.queue_capacity, 32);
        assert_eq!(config.limits.max_profile_points, 100);
        assert_eq!(config.limits.max_features, 10);
        assert_eq!(config.limits.max_result_bytes, Some(65536));
        assert_eq!(config.fetch.max_attempts, 3);
        assert_eq!(config.fetch.retry_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::clean();

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SEASTATE_DATABASE_URL")));
        assert!(err.to_string().contains("SEASTATE_DATABASE_URL"));
    }

    #[test]
    fn test_config_invalid_port() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("SEASTATE_DATABASE_URL", "sqlite::memory:");
        guard.set("SEASTATE_HTTP_PORT", "99999");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("SEASTATE_HTTP_PORT", _)));
    }

    #[test]
    fn test_config_zero_workers_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("SEASTATE_DATABASE_URL", "sqlite::memory:");
        guard.set("SEASTATE_MAX_CONCURRENT_JOBS", "0");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("SEASTATE_MAX_CONCURRENT_JOBS", _)
        ));
    }

    #[test]
    fn test_config_zero_fetch_attempts_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("SEASTATE_DATABASE_URL", "sqlite::memory:");
        guard.set("SEASTATE_FETCH_MAX_ATTEMPTS", "0");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("SEASTATE_FETCH_MAX_ATTEMPTS", _)
        ));
    }

    #[test]
    fn test_config_error_display() {
        let missing = ConfigError::Missing("MY_VAR");
        assert_eq!(
            missing.to_string(),
            "missing required environment variable: MY_VAR"
        );

        let invalid = ConfigError::Invalid("MY_VAR", "must be a number");
        assert_eq!(
            invalid.to_string(),
            "invalid value for MY_VAR: must be a number"
        );
    }
}
