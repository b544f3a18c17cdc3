//! Command Surface
//!
//! The start/stop boundary exposed to the host application. Hosts either pass
//! a ready [`TrackingConfig`] or the loosely-typed [`StartRequest`] their
//! bridge layer receives (e.g. a JSON object from a UI runtime).

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::config::{
    TrackingConfig, DEFAULT_MINIMUM_DISPLACEMENT_METERS, DEFAULT_SAMPLING_INTERVAL_SECS,
};
use crate::controller::ControllerHandle;
use crate::error::{ConfigError, StartError};
use crate::session::{SessionSnapshot, StartOutcome, TrackingState};

fn default_interval() -> i64 {
    DEFAULT_SAMPLING_INTERVAL_SECS as i64
}

fn default_displacement() -> i64 {
    DEFAULT_MINIMUM_DISPLACEMENT_METERS as i64
}

/// Start parameters as received from a host bridge
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    /// Destination URL for batches
    pub upload_url: String,
    /// Optional failure destination
    #[serde(default)]
    pub failure_url: Option<String>,
    /// Extra headers; non-string values are stringified, nulls skipped
    #[serde(default)]
    pub headers: serde_json::Map<String, serde_json::Value>,
    /// Sampling interval in seconds
    #[serde(default = "default_interval")]
    pub updates_interval_seconds: i64,
    /// Minimum displacement in meters
    #[serde(default = "default_displacement")]
    pub distance_filter: i64,
}

impl StartRequest {
    /// Create a request with defaults for everything but the endpoint
    pub fn new(upload_url: impl Into<String>) -> Self {
        Self {
            upload_url: upload_url.into(),
            failure_url: None,
            headers: serde_json::Map::new(),
            updates_interval_seconds: default_interval(),
            distance_filter: default_displacement(),
        }
    }

    /// Validate into a [`TrackingConfig`]
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any field is invalid.
    pub fn into_config(self) -> Result<TrackingConfig, ConfigError> {
        let headers = self
            .headers
            .into_iter()
            .filter_map(|(name, value)| header_value_string(value).map(|v| (name, v)));

        let mut builder = TrackingConfig::builder(self.upload_url)
            .headers(headers)
            .sampling_interval_seconds(self.updates_interval_seconds)
            .minimum_displacement_meters(self.distance_filter);

        if let Some(url) = self.failure_url {
            builder = builder.failure_endpoint(url);
        }

        builder.build()
    }
}

/// Stringify a JSON header value; `null` means "no header"
fn header_value_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Host-facing start/stop operations
#[derive(Clone, Debug)]
pub struct TrackingCommands {
    handle: ControllerHandle,
}

impl TrackingCommands {
    /// Wrap a controller handle
    #[must_use]
    pub fn new(handle: ControllerHandle) -> Self {
        Self { handle }
    }

    /// Start tracking with a validated config
    ///
    /// Resolves exactly once: when tracking begins, when a precondition
    /// fails, or immediately if tracking is already active
    /// ([`StartOutcome::AlreadyTracking`], existing config untouched).
    ///
    /// # Errors
    ///
    /// See [`StartError`].
    pub async fn start_tracking(&self, config: TrackingConfig) -> Result<StartOutcome, StartError> {
        self.handle.start(config).await
    }

    /// Start tracking from bridge parameters
    ///
    /// Invalid parameters are rejected before any state transition.
    ///
    /// # Errors
    ///
    /// [`StartError::ConfigInvalid`] for bad parameters, otherwise as
    /// [`TrackingCommands::start_tracking`].
    pub async fn start_tracking_request(
        &self,
        request: StartRequest,
    ) -> Result<StartOutcome, StartError> {
        let config = request.into_config()?;
        self.start_tracking(config).await
    }

    /// Stop tracking; always succeeds and is idempotent
    pub async fn stop_tracking(&self) {
        self.handle.stop().await;
    }

    /// Current tracking state
    #[must_use]
    pub fn state(&self) -> TrackingState {
        self.handle.state()
    }

    /// Watch tracking state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TrackingState> {
        self.handle.subscribe()
    }

    /// Current state and config
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        self.handle.snapshot().await
    }
}
