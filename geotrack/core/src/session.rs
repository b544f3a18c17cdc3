//! Tracking Session
//!
//! The mutable state owned by the lifecycle controller: where the state
//! machine currently is, the active configuration, and the start request
//! still waiting for its preconditions.
//!
//! # Exactly-once completion
//!
//! A pending start is held as a [`PendingStart`] whose `complete` consumes
//! it, so the reply channel of a start request can only ever be answered
//! once. Resetting the session hands the pending request back to the caller
//! instead of silently dropping it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::config::TrackingConfig;
use crate::error::StartError;

/// Correlates an in-flight start request with its asynchronous callbacks
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    /// Create a request ID from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique request ID
    pub fn generate() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::time::{SystemTime, UNIX_EPOCH};

        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let count = COUNTER.fetch_add(1, Ordering::SeqCst);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        Self(format!("start_{timestamp}_{count}"))
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tracking lifecycle states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingState {
    /// Not tracking, nothing pending
    Idle,
    /// Waiting for the location-settings check
    CheckingLocationSettings,
    /// Waiting for the user to resolve unsatisfied location settings
    ResolvingLocationSettings,
    /// Evaluating existing location permission
    CheckingPermission,
    /// Waiting for the user's answer to the permission prompt
    RequestingPermission,
    /// Sampling source attached, batches flowing to delivery
    Tracking,
}

impl TrackingState {
    /// Human-readable description
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::CheckingLocationSettings => "Checking location settings...",
            Self::ResolvingLocationSettings => "Waiting for location settings...",
            Self::CheckingPermission => "Checking permission...",
            Self::RequestingPermission => "Waiting for permission...",
            Self::Tracking => "Tracking",
        }
    }

    /// Whether a start request is between `Idle` and `Tracking`
    #[must_use]
    pub fn is_starting(&self) -> bool {
        !matches!(self, Self::Idle | Self::Tracking)
    }
}

/// Successful result of a start request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartOutcome {
    /// Preconditions passed and sampling began
    Started,
    /// A session was already tracking; nothing changed
    AlreadyTracking,
}

/// Reply channel of a start request
pub(crate) type StartReply = oneshot::Sender<Result<StartOutcome, StartError>>;

/// A start request waiting on its preconditions
#[derive(Debug)]
pub struct PendingStart {
    request_id: RequestId,
    reply: StartReply,
}

impl PendingStart {
    pub(crate) fn new(request_id: RequestId, reply: StartReply) -> Self {
        Self { request_id, reply }
    }

    /// The request's correlation ID
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Answer the caller; consumes the request
    pub fn complete(self, result: Result<StartOutcome, StartError>) {
        if self.reply.send(result).is_err() {
            tracing::debug!(request_id = %self.request_id, "Start caller went away before completion");
        }
    }
}

/// Point-in-time view of a session
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    /// Current state
    pub state: TrackingState,
    /// Active configuration, if a start was accepted
    pub config: Option<Arc<TrackingConfig>>,
    /// ID of the start request still pending, if any
    pub pending_request: Option<RequestId>,
}

/// The controller-owned tracking session
#[derive(Debug)]
pub struct TrackingSession {
    state: TrackingState,
    config: Option<Arc<TrackingConfig>>,
    pending: Option<PendingStart>,
}

impl Default for TrackingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingSession {
    /// Create an idle session
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: TrackingState::Idle,
            config: None,
            pending: None,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> TrackingState {
        self.state
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> Option<&Arc<TrackingConfig>> {
        self.config.as_ref()
    }

    /// ID of the pending start request
    #[must_use]
    pub fn pending_request_id(&self) -> Option<&RequestId> {
        self.pending.as_ref().map(PendingStart::request_id)
    }

    /// Whether `request_id` is the pending start request
    #[must_use]
    pub fn is_pending(&self, request_id: &RequestId) -> bool {
        self.pending_request_id() == Some(request_id)
    }

    /// Accept a start request: store config and pending reply, begin the settings check
    pub(crate) fn begin(&mut self, config: Arc<TrackingConfig>, reply: StartReply) -> RequestId {
        let request_id = RequestId::generate();
        self.state = TrackingState::CheckingLocationSettings;
        self.config = Some(config);
        self.pending = Some(PendingStart::new(request_id.clone(), reply));
        request_id
    }

    pub(crate) fn set_state(&mut self, state: TrackingState) {
        self.state = state;
    }

    /// Remove the pending start so it can be completed
    pub(crate) fn take_pending(&mut self) -> Option<PendingStart> {
        self.pending.take()
    }

    /// Back to `Idle` with config cleared; returns any start still pending
    pub(crate) fn reset(&mut self) -> Option<PendingStart> {
        self.state = TrackingState::Idle;
        self.config = None;
        self.pending.take()
    }

    /// Copy out the observable parts
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            config: self.config.clone(),
            pending_request: self.pending_request_id().cloned(),
        }
    }
}
