//! Error Types
//!
//! Errors surfaced by the tracking core. Lifecycle errors resolve a pending
//! start request exactly once; delivery errors never leave the pipeline
//! except as log events and delivery reports.

use thiserror::Error;

/// Invalid tracking configuration, rejected before any state transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Upload endpoint was empty
    #[error("upload endpoint must not be empty")]
    EmptyEndpoint,

    /// Endpoint could not be parsed as an absolute URL
    #[error("invalid endpoint {url:?}: {reason}")]
    InvalidEndpoint {
        /// The rejected value
        url: String,
        /// Parser message
        reason: String,
    },

    /// Endpoint is not an http(s) URL
    #[error("endpoint {url:?} uses unsupported scheme {scheme:?}")]
    UnsupportedScheme {
        /// The rejected value
        url: String,
        /// The scheme found
        scheme: String,
    },

    /// Sampling interval was zero or negative
    #[error("sampling interval must be positive, got {0}")]
    NonPositiveInterval(i64),

    /// Minimum displacement was negative
    #[error("minimum displacement must not be negative, got {0}")]
    NegativeDisplacement(i64),

    /// Header name is not a valid HTTP token
    #[error("invalid header name {0:?}")]
    InvalidHeaderName(String),

    /// Header value contains characters not allowed in HTTP headers
    #[error("invalid value for header {0:?}")]
    InvalidHeaderValue(String),
}

/// Why a start request did not reach `Tracking`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    /// The supplied configuration was rejected
    #[error("invalid configuration: {0}")]
    ConfigInvalid(#[from] ConfigError),

    /// Location services are off and could not be turned on
    #[error("location service is disabled")]
    LocationServiceUnavailable,

    /// A requested location permission was not granted
    #[error("location permission denied")]
    PermissionDenied,

    /// Another start request is still resolving its preconditions
    #[error("a start request is already in progress")]
    StartInProgress,

    /// The pending start was abandoned by a stop or shutdown
    #[error("start request cancelled")]
    Cancelled,

    /// The host refused to run the foreground service or sampling source
    #[error("host rejected tracking: {0}")]
    HostRejected(String),

    /// The controller task is no longer running
    #[error("tracking controller is not running")]
    ControllerUnavailable,
}

/// Failure reported by a platform collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct PlatformError(pub String);

impl PlatformError {
    /// Create a platform error from any message
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failure delivering a single batch
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The batch could not be encoded
    #[error("failed to encode batch: {0}")]
    Serialization(String),

    /// Connection, timeout or protocol failure
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// The HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

impl DeliveryError {
    /// Whether this failure was a connect or read timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts_to_start_error() {
        let err: StartError = ConfigError::NonPositiveInterval(0).into();
        assert_eq!(
            err,
            StartError::ConfigInvalid(ConfigError::NonPositiveInterval(0))
        );
        assert!(err.to_string().contains("positive"));
    }

    #[test]
    fn test_serialization_error_is_not_timeout() {
        let err = DeliveryError::Serialization("bad time".to_string());
        assert!(!err.is_timeout());
    }
}
