//! Job configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `CURATOR__*` environment variables, then CLI overrides applied by the
//! caller. Every business threshold used by the pipeline lives here so the
//! policy can be tuned and tested in one place.

use crate::error::{ProcessingError, Result};
use crate::utils::constants::{
    DEFAULT_CLOCK_SKEW_SECS, DEFAULT_LEASE_TTL_SECS, DEFAULT_ROW_GROUP_SIZE, RUN_LOCK_FILE,
};
use crate::utils::RetryPolicy;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "CURATOR";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub raw_root: PathBuf,
    pub curated_root: PathBuf,
    pub max_workers: usize,
    pub compression: String,
    pub row_group_size: usize,
    pub retry: RetryPolicy,
    pub lease: LeaseConfig,
    pub validation: ValidationPolicy,
    pub quality: QualityPolicy,
    pub params: JobParameters,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            raw_root: PathBuf::from("data/raw"),
            curated_root: PathBuf::from("data/curated"),
            max_workers: num_cpus::get(),
            compression: "snappy".to_string(),
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
            retry: RetryPolicy::default(),
            lease: LeaseConfig::default(),
            validation: ValidationPolicy::default(),
            quality: QualityPolicy::default(),
            params: JobParameters::default(),
        }
    }
}

impl JobConfig {
    /// Load configuration from an optional file plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ProcessingError::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: JobConfig = settings.try_deserialize()?;
        config.check()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot honour
    pub fn check(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(ProcessingError::Config(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.validation.max_rejection_fraction) {
            return Err(ProcessingError::Config(format!(
                "validation.max_rejection_fraction must be within [0, 1], got {}",
                self.validation.max_rejection_fraction
            )));
        }
        self.quality.check()
    }

    pub fn lock_path(&self) -> PathBuf {
        self.curated_root.join(&self.lease.lock_file)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub ttl_secs: u64,
    pub lock_file: String,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_LEASE_TTL_SECS,
            lock_file: RUN_LOCK_FILE.to_string(),
        }
    }
}

impl LeaseConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Record-level acceptance policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    /// Rejected share of a stream above which the run is marked
    /// `FailedValidationThreshold`.
    pub max_rejection_fraction: f64,
    /// Still write the valid subset when the threshold is breached.
    pub write_on_threshold_breach: bool,
    pub clock_skew_secs: i64,
    pub allow_unknown_fields: bool,
    /// Extra days of raw ingestion read on each side of a target partition.
    pub partition_lookback_days: i64,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            max_rejection_fraction: 0.10,
            write_on_threshold_breach: true,
            clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
            allow_unknown_fields: false,
            partition_lookback_days: 1,
        }
    }
}

impl ValidationPolicy {
    pub fn clock_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.clock_skew_secs)
    }
}

/// Thresholds behind the sensor `quality_score`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct QualityPolicy {
    pub battery_pass_min: f64,
    pub battery_warn_min: f64,
    pub aqi_warn_above: f64,
    pub aqi_fail_above: f64,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            battery_pass_min: 50.0,
            battery_warn_min: 20.0,
            aqi_warn_above: 100.0,
            aqi_fail_above: 150.0,
        }
    }
}

impl QualityPolicy {
    fn check(&self) -> Result<()> {
        if self.battery_warn_min > self.battery_pass_min {
            return Err(ProcessingError::Config(
                "quality.battery_warn_min must not exceed quality.battery_pass_min".to_string(),
            ));
        }
        if self.aqi_warn_above > self.aqi_fail_above {
            return Err(ProcessingError::Config(
                "quality.aqi_warn_above must not exceed quality.aqi_fail_above".to_string(),
            ));
        }
        Ok(())
    }
}

/// Invocation parameters handed through to the storage and catalog
/// collaborators untouched.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct JobParameters {
    pub bucket: Option<String>,
    pub environment: Option<String>,
    pub database: Option<String>,
    pub kms_key_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_consistent() {
        let config = JobConfig::default();
        assert!(config.check().is_ok());
        assert_eq!(config.compression, "snappy");
        assert!(config.validation.write_on_threshold_breach);
        assert!(config.lock_path().ends_with(RUN_LOCK_FILE));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
raw_root = "/srv/raw"
max_workers = 2

[validation]
max_rejection_fraction = 0.25

[quality]
battery_pass_min = 60.0

[params]
environment = "dev"
database = "telemetry"
"#
        )
        .unwrap();

        let config = JobConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.raw_root, PathBuf::from("/srv/raw"));
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.validation.max_rejection_fraction, 0.25);
        assert_eq!(config.validation.clock_skew_secs, DEFAULT_CLOCK_SKEW_SECS);
        assert_eq!(config.quality.battery_pass_min, 60.0);
        assert_eq!(config.quality.battery_warn_min, 20.0);
        assert_eq!(config.params.environment.as_deref(), Some("dev"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = JobConfig::load(Some(Path::new("/nonexistent/curator.toml"))).unwrap_err();
        assert!(matches!(err, ProcessingError::Config(_)));
    }

    #[test]
    fn test_inverted_quality_thresholds_rejected() {
        let config = JobConfig {
            quality: QualityPolicy {
                battery_pass_min: 10.0,
                battery_warn_min: 40.0,
                ..QualityPolicy::default()
            },
            ..JobConfig::default()
        };
        assert!(config.check().is_err());
    }

    #[test]
    fn test_rejection_fraction_bounds() {
        let mut config = JobConfig::default();
        config.validation.max_rejection_fraction = 1.5;
        assert!(config.check().is_err());
    }
}
