//! Tracking Configuration
//!
//! The immutable value object describing where fixes are delivered, how often
//! they are sampled, and which extra headers go with every upload.
//!
//! A [`TrackingConfig`] can only be obtained through validated construction,
//! so everything downstream (controller, pipeline) can rely on a parsed
//! absolute endpoint, a positive interval and well-formed headers.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default sampling interval (5 minutes)
pub const DEFAULT_SAMPLING_INTERVAL_SECS: u64 = 5 * 60;

/// Default minimum displacement between fixes
pub const DEFAULT_MINIMUM_DISPLACEMENT_METERS: u64 = 0;

/// Accuracy/power trade-off requested from the platform's fix provider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplingPriority {
    /// Most precise fixes available (GPS)
    HighAccuracy,
    /// Block-level precision
    BalancedPower,
    /// City-level precision
    LowPower,
    /// Only fixes requested by other applications
    Passive,
}

/// Fix-request parameters handed to the sampling source and settings check
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Desired period between fixes
    pub interval: Duration,
    /// Fastest period the source may deliver fixes at
    pub fastest_interval: Duration,
    /// Movement below this delta produces no fix
    pub smallest_displacement_meters: u64,
    /// Requested accuracy priority
    pub priority: SamplingPriority,
}

/// Immutable per-session tracking configuration
#[derive(Clone, Debug, PartialEq)]
pub struct TrackingConfig {
    upload_endpoint: Url,
    failure_endpoint: Option<Url>,
    headers: BTreeMap<String, String>,
    header_map: HeaderMap,
    sampling_interval_seconds: u64,
    minimum_displacement_meters: u64,
}

impl TrackingConfig {
    /// Start building a configuration for the given upload endpoint
    pub fn builder(upload_endpoint: impl Into<String>) -> TrackingConfigBuilder {
        TrackingConfigBuilder::new(upload_endpoint)
    }

    /// Destination for fix batches
    #[must_use]
    pub fn upload_endpoint(&self) -> &Url {
        &self.upload_endpoint
    }

    /// Alternate destination for failed deliveries (carried, not used by the pipeline)
    #[must_use]
    pub fn failure_endpoint(&self) -> Option<&Url> {
        self.failure_endpoint.as_ref()
    }

    /// Extra headers as configured
    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Extra headers, pre-validated for the HTTP client
    #[must_use]
    pub fn header_map(&self) -> &HeaderMap {
        &self.header_map
    }

    /// Desired fix period in seconds
    #[must_use]
    pub fn sampling_interval_seconds(&self) -> u64 {
        self.sampling_interval_seconds
    }

    /// Minimum movement between fixes in meters
    #[must_use]
    pub fn minimum_displacement_meters(&self) -> u64 {
        self.minimum_displacement_meters
    }

    /// Map to the platform's fix-request parameters
    ///
    /// Interval and fastest interval are both the sampling interval, and the
    /// priority is always [`SamplingPriority::HighAccuracy`].
    #[must_use]
    pub fn to_sampling_params(&self) -> SamplingParams {
        let interval = Duration::from_secs(self.sampling_interval_seconds);
        SamplingParams {
            interval,
            fastest_interval: interval,
            smallest_displacement_meters: self.minimum_displacement_meters,
            priority: SamplingPriority::HighAccuracy,
        }
    }
}

/// Builder for [`TrackingConfig`]
#[derive(Clone, Debug)]
pub struct TrackingConfigBuilder {
    upload_endpoint: String,
    failure_endpoint: Option<String>,
    headers: BTreeMap<String, String>,
    sampling_interval_seconds: i64,
    minimum_displacement_meters: i64,
}

impl TrackingConfigBuilder {
    fn new(upload_endpoint: impl Into<String>) -> Self {
        Self {
            upload_endpoint: upload_endpoint.into(),
            failure_endpoint: None,
            headers: BTreeMap::new(),
            sampling_interval_seconds: DEFAULT_SAMPLING_INTERVAL_SECS as i64,
            minimum_displacement_meters: DEFAULT_MINIMUM_DISPLACEMENT_METERS as i64,
        }
    }

    /// Set the failure endpoint
    #[must_use]
    pub fn failure_endpoint(mut self, url: impl Into<String>) -> Self {
        self.failure_endpoint = Some(url.into());
        self
    }

    /// Add one header (a later value for the same name wins)
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add several headers
    #[must_use]
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set the sampling interval in seconds (must be > 0)
    #[must_use]
    pub fn sampling_interval_seconds(mut self, seconds: i64) -> Self {
        self.sampling_interval_seconds = seconds;
        self
    }

    /// Set the minimum displacement in meters (must be >= 0)
    #[must_use]
    pub fn minimum_displacement_meters(mut self, meters: i64) -> Self {
        self.minimum_displacement_meters = meters;
        self
    }

    /// Validate and produce the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an empty or malformed endpoint, a
    /// non-positive interval, a negative displacement, or a header that
    /// cannot be sent over HTTP.
    pub fn build(self) -> Result<TrackingConfig, ConfigError> {
        let upload_endpoint = parse_endpoint(&self.upload_endpoint)?;
        let failure_endpoint = self
            .failure_endpoint
            .as_deref()
            .map(parse_endpoint)
            .transpose()?;

        let sampling_interval_seconds = u64::try_from(self.sampling_interval_seconds)
            .ok()
            .filter(|s| *s > 0)
            .ok_or(ConfigError::NonPositiveInterval(self.sampling_interval_seconds))?;
        let minimum_displacement_meters = u64::try_from(self.minimum_displacement_meters)
            .map_err(|_| ConfigError::NegativeDisplacement(self.minimum_displacement_meters))?;

        let mut header_map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ConfigError::InvalidHeaderName(name.clone()))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| ConfigError::InvalidHeaderValue(name.clone()))?;
            header_map.insert(header_name, header_value);
        }

        Ok(TrackingConfig {
            upload_endpoint,
            failure_endpoint,
            headers: self.headers,
            header_map,
            sampling_interval_seconds,
            minimum_displacement_meters,
        })
    }
}

/// Parse an absolute http(s) endpoint
fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyEndpoint);
    }

    let url = Url::parse(trimmed).map_err(|e| ConfigError::InvalidEndpoint {
        url: trimmed.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ConfigError::UnsupportedScheme {
                url: trimmed.to_string(),
                scheme: other.to_string(),
            })
        }
    }

    if !url.has_host() {
        return Err(ConfigError::InvalidEndpoint {
            url: trimmed.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(url)
}
