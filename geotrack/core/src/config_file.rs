//! File and Environment Configuration
//!
//! Loads tracking and delivery settings from a TOML file, then layers
//! environment variables and explicit (CLI) overrides on top.
//!
//! Priority: CLI > Env > File > Default.
//!
//! # File format
//!
//! ```toml
//! [tracking]
//! upload_url = "https://collector.example/ingest"
//! failure_url = "https://collector.example/failed"
//! sampling_interval_seconds = 60
//! minimum_displacement_meters = 10
//!
//! [headers]
//! Authorization = "Bearer abc"
//!
//! [delivery]
//! workers = 4
//! connect_timeout_secs = 15
//! read_timeout_secs = 10
//! ```
//!
//! # Environment Variables
//!
//! - `GEOTRACK_UPLOAD_URL`, `GEOTRACK_FAILURE_URL`
//! - `GEOTRACK_INTERVAL`: sampling interval in seconds
//! - `GEOTRACK_DISPLACEMENT`: minimum displacement in meters
//! - `GEOTRACK_HEADERS`: `Name=value` pairs separated by commas
//! - `GEOTRACK_DELIVERY_WORKERS`, `GEOTRACK_CONNECT_TIMEOUT`, `GEOTRACK_READ_TIMEOUT`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{
    TrackingConfig, DEFAULT_MINIMUM_DISPLACEMENT_METERS, DEFAULT_SAMPLING_INTERVAL_SECS,
};
use crate::delivery::PipelineConfig;
use crate::error::ConfigError;

/// Errors loading configuration
#[derive(Debug, Error)]
pub enum FileConfigError {
    /// The file could not be read
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: toml::de::Error,
    },

    /// No upload URL in any layer
    #[error("no upload URL configured (set [tracking].upload_url, GEOTRACK_UPLOAD_URL or --upload-url)")]
    MissingUploadUrl,

    /// Values present but invalid
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

/// Which layer supplied the effective configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Built-in defaults only
    Default,
    /// A config file
    File,
    /// Environment variables
    Env,
    /// Command-line arguments
    Cli,
}

/// `[tracking]` section
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSection {
    /// Upload endpoint
    pub upload_url: Option<String>,
    /// Failure endpoint
    pub failure_url: Option<String>,
    /// Sampling interval in seconds
    pub sampling_interval_seconds: Option<i64>,
    /// Minimum displacement in meters
    pub minimum_displacement_meters: Option<i64>,
}

/// `[delivery]` section
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySection {
    /// Concurrent deliveries
    pub workers: Option<usize>,
    /// Connect timeout in seconds
    pub connect_timeout_secs: Option<u64>,
    /// Read timeout in seconds
    pub read_timeout_secs: Option<u64>,
}

/// Raw TOML file contents
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeotrackToml {
    /// Tracking settings
    pub tracking: TrackingSection,
    /// Extra upload headers
    pub headers: BTreeMap<String, String>,
    /// Delivery settings
    pub delivery: DeliverySection,
}

/// Values set by one override layer (env or CLI)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigOverrides {
    /// Upload endpoint
    pub upload_url: Option<String>,
    /// Failure endpoint
    pub failure_url: Option<String>,
    /// Sampling interval in seconds
    pub sampling_interval_seconds: Option<i64>,
    /// Minimum displacement in meters
    pub minimum_displacement_meters: Option<i64>,
    /// Extra headers (added to, or replacing, lower layers)
    pub headers: Vec<(String, String)>,
    /// Concurrent deliveries
    pub workers: Option<usize>,
    /// Connect timeout in seconds
    pub connect_timeout_secs: Option<u64>,
    /// Read timeout in seconds
    pub read_timeout_secs: Option<u64>,
}

impl ConfigOverrides {
    /// Read overrides from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Read overrides from `(name, value)` pairs shaped like environment variables
    #[must_use]
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut overrides = Self::default();
        for (key, value) in vars {
            let value = value.as_ref().trim();
            match key.as_ref() {
                "GEOTRACK_UPLOAD_URL" => overrides.upload_url = Some(value.to_string()),
                "GEOTRACK_FAILURE_URL" => overrides.failure_url = Some(value.to_string()),
                "GEOTRACK_INTERVAL" => overrides.sampling_interval_seconds = value.parse().ok(),
                "GEOTRACK_DISPLACEMENT" => {
                    overrides.minimum_displacement_meters = value.parse().ok();
                }
                "GEOTRACK_HEADERS" => overrides.headers = parse_header_list(value),
                "GEOTRACK_DELIVERY_WORKERS" => overrides.workers = value.parse().ok(),
                "GEOTRACK_CONNECT_TIMEOUT" => overrides.connect_timeout_secs = value.parse().ok(),
                "GEOTRACK_READ_TIMEOUT" => overrides.read_timeout_secs = value.parse().ok(),
                _ => {}
            }
        }
        overrides
    }

    /// Whether this layer sets anything
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Parse `Name=value,Other=value` into pairs; malformed entries are skipped
#[must_use]
pub fn parse_header_list(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(parse_header_pair)
        .collect()
}

/// Parse one `Name=value` pair
#[must_use]
pub fn parse_header_pair(raw: &str) -> Option<(String, String)> {
    let (name, value) = raw.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

/// Effective configuration after all layers
#[derive(Clone, Debug, PartialEq)]
pub struct GeotrackFileConfig {
    /// Upload endpoint
    pub upload_url: Option<String>,
    /// Failure endpoint
    pub failure_url: Option<String>,
    /// Extra headers
    pub headers: BTreeMap<String, String>,
    /// Sampling interval in seconds
    pub sampling_interval_seconds: i64,
    /// Minimum displacement in meters
    pub minimum_displacement_meters: i64,
    /// Delivery tuning
    pub pipeline: PipelineConfig,
    source: ConfigSource,
}

impl Default for GeotrackFileConfig {
    fn default() -> Self {
        Self {
            upload_url: None,
            failure_url: None,
            headers: BTreeMap::new(),
            sampling_interval_seconds: DEFAULT_SAMPLING_INTERVAL_SECS as i64,
            minimum_displacement_meters: DEFAULT_MINIMUM_DISPLACEMENT_METERS as i64,
            pipeline: PipelineConfig::default(),
            source: ConfigSource::Default,
        }
    }
}

impl GeotrackFileConfig {
    /// Highest layer that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Validated tracking configuration
    ///
    /// # Errors
    ///
    /// [`FileConfigError::MissingUploadUrl`] if no layer set an endpoint,
    /// [`FileConfigError::Invalid`] if validation fails.
    pub fn tracking_config(&self) -> Result<TrackingConfig, FileConfigError> {
        let upload_url = self
            .upload_url
            .as_deref()
            .ok_or(FileConfigError::MissingUploadUrl)?;

        let mut builder = TrackingConfig::builder(upload_url)
            .headers(self.headers.clone())
            .sampling_interval_seconds(self.sampling_interval_seconds)
            .minimum_displacement_meters(self.minimum_displacement_meters);
        if let Some(url) = &self.failure_url {
            builder = builder.failure_endpoint(url.clone());
        }

        Ok(builder.build()?)
    }

    /// Delivery pipeline settings
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        self.pipeline.clone()
    }

    fn apply_file(&mut self, file: GeotrackToml) {
        let GeotrackToml {
            tracking,
            headers,
            delivery,
        } = file;

        self.apply(
            ConfigOverrides {
                upload_url: tracking.upload_url,
                failure_url: tracking.failure_url,
                sampling_interval_seconds: tracking.sampling_interval_seconds,
                minimum_displacement_meters: tracking.minimum_displacement_meters,
                headers: headers.into_iter().collect(),
                workers: delivery.workers,
                connect_timeout_secs: delivery.connect_timeout_secs,
                read_timeout_secs: delivery.read_timeout_secs,
            },
            ConfigSource::File,
        );
        // A file counts as a source even if every section was empty
        self.source = self.source.max(ConfigSource::File);
    }

    fn apply(&mut self, overrides: ConfigOverrides, source: ConfigSource) {
        if overrides.is_empty() {
            return;
        }

        if let Some(url) = overrides.upload_url {
            self.upload_url = Some(url);
        }
        if let Some(url) = overrides.failure_url {
            self.failure_url = Some(url);
        }
        if let Some(interval) = overrides.sampling_interval_seconds {
            self.sampling_interval_seconds = interval;
        }
        if let Some(displacement) = overrides.minimum_displacement_meters {
            self.minimum_displacement_meters = displacement;
        }
        self.headers.extend(overrides.headers);
        if let Some(workers) = overrides.workers {
            self.pipeline.workers = workers;
        }
        if let Some(secs) = overrides.connect_timeout_secs {
            self.pipeline.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = overrides.read_timeout_secs {
            self.pipeline.read_timeout = Duration::from_secs(secs);
        }

        self.source = self.source.max(source);
    }
}

/// Default config file location (`$XDG_CONFIG_HOME/geotrack/config.toml`)
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("geotrack").join("config.toml"))
}

/// Parse a TOML config file
///
/// # Errors
///
/// Returns [`FileConfigError`] if the file cannot be read or parsed.
pub fn read_config_file(path: &Path) -> Result<GeotrackToml, FileConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| FileConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| FileConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load file + process environment
///
/// With `None`, the default path is tried and silently skipped if absent. An
/// explicit path must exist.
///
/// # Errors
///
/// Returns [`FileConfigError`] if the file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<GeotrackFileConfig, FileConfigError> {
    load_config_layers(path, ConfigOverrides::from_env(), ConfigOverrides::default())
}

/// Load file, environment and CLI layers
///
/// # Errors
///
/// Returns [`FileConfigError`] if the file cannot be read or parsed.
pub fn load_config_layers(
    path: Option<PathBuf>,
    env: ConfigOverrides,
    cli: ConfigOverrides,
) -> Result<GeotrackFileConfig, FileConfigError> {
    let mut config = GeotrackFileConfig::default();

    match path {
        Some(path) => {
            tracing::debug!(path = ?path, "Loading config file");
            config.apply_file(read_config_file(&path)?);
        }
        None => {
            if let Some(path) = default_config_path().filter(|p| p.exists()) {
                tracing::debug!(path = ?path, "Loading default config file");
                config.apply_file(read_config_file(&path)?);
            }
        }
    }

    config.apply(env, ConfigSource::Env);
    config.apply(cli, ConfigSource::Cli);

    tracing::debug!(source = ?config.source(), "Configuration loaded");
    Ok(config)
}
