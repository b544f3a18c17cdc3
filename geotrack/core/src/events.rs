//! Controller Events
//!
//! Everything that can change tracking state arrives at the controller as a
//! [`TrackerEvent`] on a single queue: commands from the host application and
//! callbacks from platform collaborators alike. The controller handles them
//! one at a time, so no two transitions ever interleave.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::config::TrackingConfig;
use crate::fix::PositionFix;
use crate::platform::{PermissionKind, SettingsOutcome};
use crate::session::{RequestId, SessionSnapshot, StartReply};

/// Events processed by the lifecycle controller
#[derive(Debug)]
pub(crate) enum TrackerEvent {
    // ============================================
    // Commands
    // ============================================
    /// Host asked to start tracking
    Start {
        /// Validated configuration for the new session
        config: Arc<TrackingConfig>,
        /// Answered exactly once
        reply: StartReply,
    },

    /// Host asked to stop tracking
    Stop {
        /// Acknowledged once the session is idle
        reply: oneshot::Sender<()>,
    },

    /// Host asked for the current session view
    Snapshot {
        /// Receives the snapshot
        reply: oneshot::Sender<SessionSnapshot>,
    },

    /// Process is going away: stop and end the controller task
    Shutdown {
        /// Acknowledged after teardown
        reply: oneshot::Sender<()>,
    },

    // ============================================
    // Collaborator callbacks
    // ============================================
    /// Location-settings check finished
    SettingsChecked {
        /// Start request the check belongs to
        request_id: RequestId,
        /// What the settings service reported
        outcome: SettingsOutcome,
    },

    /// User finished the settings-resolution flow
    ResolutionFinished {
        /// Start request the flow belongs to
        request_id: RequestId,
        /// Whether the user turned location services on
        accepted: bool,
    },

    /// User answered the permission prompt
    PermissionResult {
        /// Start request the prompt belongs to
        request_id: RequestId,
        /// Kinds the user granted
        granted: Vec<PermissionKind>,
    },

    /// Sampling source produced fixes
    FixBatch {
        /// Fixes in sampling order
        fixes: Vec<PositionFix>,
    },
}

impl TrackerEvent {
    /// Short name for logging
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Stop { .. } => "stop",
            Self::Snapshot { .. } => "snapshot",
            Self::Shutdown { .. } => "shutdown",
            Self::SettingsChecked { .. } => "settings_checked",
            Self::ResolutionFinished { .. } => "resolution_finished",
            Self::PermissionResult { .. } => "permission_result",
            Self::FixBatch { .. } => "fix_batch",
        }
    }
}
