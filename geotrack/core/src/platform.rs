//! Platform Collaborators
//!
//! Trait definitions for everything the core consumes from the host platform:
//! the location-settings service, the permission subsystem, the sampling
//! source, and the foreground-service lifetime. The core never talks to OS
//! APIs directly; a host (mobile bridge, desktop daemon, test harness)
//! implements these traits.
//!
//! Asynchronous, user-mediated answers (settings resolution, permission
//! prompts) come back through one-shot responders, or directly through
//! [`ControllerHandle`] keyed by [`RequestId`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SamplingParams;
use crate::controller::{ControllerHandle, WeakControllerHandle};
use crate::error::PlatformError;
use crate::fix::PositionFix;
use crate::session::RequestId;

/// Location permission kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PermissionKind {
    /// Precise location
    FineLocation,
    /// Approximate location
    CoarseLocation,
}

/// Permissions requested when none is granted yet
pub const FOREGROUND_LOCATION_PERMISSIONS: [PermissionKind; 2] =
    [PermissionKind::FineLocation, PermissionKind::CoarseLocation];

/// Opaque token identifying a platform resolution flow
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionHandle(pub String);

/// Result of a location-settings check
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SettingsOutcome {
    /// Location services can deliver the requested fixes
    Satisfied,
    /// Not satisfied, but a system dialog can fix it
    Resolvable(ResolutionHandle),
    /// Not satisfied and nothing the user can do from here
    Unsatisfied {
        /// Platform explanation
        reason: String,
    },
}

/// Answers one settings-resolution flow
#[derive(Clone, Debug)]
pub struct ResolutionResponder {
    request_id: RequestId,
    handle: ControllerHandle,
}

impl ResolutionResponder {
    pub(crate) fn new(request_id: RequestId, handle: ControllerHandle) -> Self {
        Self { request_id, handle }
    }

    /// Request this resolution belongs to
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Report the user's choice
    pub fn resolve(self, accepted: bool) {
        self.handle.resolution_finished(self.request_id, accepted);
    }
}

/// Answers one permission prompt
#[derive(Clone, Debug)]
pub struct PermissionResponder {
    request_id: RequestId,
    handle: ControllerHandle,
}

impl PermissionResponder {
    pub(crate) fn new(request_id: RequestId, handle: ControllerHandle) -> Self {
        Self { request_id, handle }
    }

    /// Request this prompt belongs to
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Report which kinds were granted
    pub fn respond(self, granted: Vec<PermissionKind>) {
        self.handle.permission_result(self.request_id, granted);
    }
}

/// Receives fix batches from the sampling source
///
/// Holding a sink does not keep the controller alive.
#[derive(Clone, Debug)]
pub struct FixBatchSink {
    handle: WeakControllerHandle,
}

impl FixBatchSink {
    pub(crate) fn new(handle: WeakControllerHandle) -> Self {
        Self { handle }
    }

    /// Hand over fixes in sampling order; empty batches are ignored
    pub fn deliver(&self, fixes: Vec<PositionFix>) {
        match self.handle.upgrade() {
            Some(handle) => handle.fix_batch(fixes),
            None => tracing::debug!(fixes = fixes.len(), "Controller gone; batch dropped"),
        }
    }
}

/// Location-settings subsystem
#[async_trait]
pub trait LocationSettings: Send + Sync {
    /// Check whether location services satisfy the requested parameters
    async fn check_settings(&self, params: &SamplingParams) -> SettingsOutcome;

    /// Present the resolution flow for an unsatisfied check
    ///
    /// The outcome is reported later through `responder`. An `Err` means the
    /// flow could not be shown at all.
    fn start_resolution(
        &self,
        resolution: ResolutionHandle,
        responder: ResolutionResponder,
    ) -> Result<(), PlatformError>;
}

/// Permission subsystem
pub trait PermissionGate: Send + Sync {
    /// Whether `kind` is currently granted
    fn has_permission(&self, kind: PermissionKind) -> bool;

    /// Ask the user for `kinds` (rationale or system prompt is the host's choice)
    ///
    /// The grant result is reported later through `responder`. An `Err`
    /// means the prompt could not be shown.
    fn request_permissions(
        &self,
        kinds: &[PermissionKind],
        responder: PermissionResponder,
    ) -> Result<(), PlatformError>;
}

/// Platform stream of position fixes
pub trait SamplingSource: Send + Sync {
    /// Begin delivering fixes to `sink` with the given parameters
    fn attach(&self, params: &SamplingParams, sink: FixBatchSink) -> Result<(), PlatformError>;

    /// Stop delivering fixes
    fn detach(&self);
}

/// Persistent notification shown while sampling in the background
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForegroundNotice {
    /// Notification channel identifier
    pub channel_id: String,
    /// Notification identifier
    pub notification_id: u32,
    /// Notification title
    pub title: String,
    /// Notification body
    pub message: String,
}

impl Default for ForegroundNotice {
    fn default() -> Self {
        Self {
            channel_id: "location_service_channel".to_string(),
            notification_id: 3862,
            title: "Location tracking".to_string(),
            message: "Your location is being shared".to_string(),
        }
    }
}

/// Host process lifetime
pub trait ForegroundHost: Send + Sync {
    /// Enter foreground-service mode with a persistent notification
    fn start_foreground(&self, notice: &ForegroundNotice) -> Result<(), PlatformError>;

    /// Leave foreground-service mode
    fn stop_foreground(&self);
}

/// The set of platform collaborators a controller needs
#[derive(Clone)]
pub struct Collaborators {
    /// Location-settings service
    pub settings: Arc<dyn LocationSettings>,
    /// Permission subsystem
    pub permissions: Arc<dyn PermissionGate>,
    /// Sampling source
    pub source: Arc<dyn SamplingSource>,
    /// Host process lifetime
    pub host: Arc<dyn ForegroundHost>,
}
