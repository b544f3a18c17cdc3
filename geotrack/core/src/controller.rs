//! Lifecycle Controller - The Tracking State Machine
//!
//! The controller decides when position sampling may begin. A start request
//! walks a strictly sequential chain of preconditions, each of which may wait
//! on the platform or the user:
//!
//! ```text
//!  Idle ──start──► CheckingLocationSettings ──satisfied──► CheckingPermission ──granted──► Tracking
//!                        │                                      │
//!                   resolvable                              not granted
//!                        ▼                                      ▼
//!              ResolvingLocationSettings ──accepted──►  RequestingPermission ──all granted──► Tracking
//!                        │                                      │
//!                     declined                              any denied
//!                        ▼                                      ▼
//!                      Idle (LocationServiceUnavailable)      Idle (PermissionDenied)
//! ```
//!
//! # Design
//!
//! The controller is a single task that owns the [`TrackingSession`] and
//! consumes [`TrackerEvent`]s from one queue. Commands from the host and
//! callbacks from collaborators are all posted to that queue through a
//! [`ControllerHandle`], so state transitions are serialized without locks.
//! Fix batches are handed to a [`BatchSink`] and never waited on.

use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::TrackingConfig;
use crate::delivery::BatchSink;
use crate::error::StartError;
use crate::events::TrackerEvent;
use crate::fix::{FixBatch, PositionFix};
use crate::platform::{
    Collaborators, FixBatchSink, ForegroundNotice, PermissionKind, PermissionResponder,
    ResolutionResponder, SettingsOutcome, FOREGROUND_LOCATION_PERMISSIONS,
};
use crate::session::{RequestId, SessionSnapshot, StartOutcome, TrackingSession, TrackingState};

/// Cloneable entry point into a running controller
///
/// Collaborators use it to report asynchronous outcomes; the command surface
/// uses it to start and stop tracking.
#[derive(Clone, Debug)]
pub struct ControllerHandle {
    events: mpsc::UnboundedSender<TrackerEvent>,
    state: watch::Receiver<TrackingState>,
}

impl ControllerHandle {
    /// Current state as last published by the controller
    #[must_use]
    pub fn state(&self) -> TrackingState {
        *self.state.borrow()
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TrackingState> {
        self.state.clone()
    }

    /// Whether the controller task is still accepting events
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.events.is_closed()
    }

    /// Report the outcome of a settings-resolution flow
    pub fn resolution_finished(&self, request_id: RequestId, accepted: bool) {
        self.post(TrackerEvent::ResolutionFinished {
            request_id,
            accepted,
        });
    }

    /// Report which permissions the user granted
    pub fn permission_result(&self, request_id: RequestId, granted: Vec<PermissionKind>) {
        self.post(TrackerEvent::PermissionResult {
            request_id,
            granted,
        });
    }

    /// Hand a batch of fixes to the controller
    pub fn fix_batch(&self, fixes: Vec<PositionFix>) {
        self.post(TrackerEvent::FixBatch { fixes });
    }

    /// Request a start; resolves once preconditions settle
    pub(crate) async fn start(
        &self,
        config: TrackingConfig,
    ) -> Result<StartOutcome, StartError> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(TrackerEvent::Start {
                config: Arc::new(config),
                reply,
            })
            .map_err(|_| StartError::ControllerUnavailable)?;
        rx.await.map_err(|_| StartError::ControllerUnavailable)?
    }

    /// Request a stop; resolves once the session is idle
    pub(crate) async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        if self.events.send(TrackerEvent::Stop { reply }).is_err() {
            tracing::debug!("Controller not running; nothing to stop");
            return;
        }
        let _ = rx.await;
    }

    /// Current session view, or `None` if the controller is gone
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.events.send(TrackerEvent::Snapshot { reply }).ok()?;
        rx.await.ok()
    }

    /// Stop tracking and end the controller task
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.events.send(TrackerEvent::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    fn post(&self, event: TrackerEvent) {
        let name = event.name();
        if self.events.send(event).is_err() {
            tracing::warn!(event = name, "Controller not running; event dropped");
        }
    }

    pub(crate) fn downgrade(&self) -> WeakControllerHandle {
        WeakControllerHandle {
            events: self.events.downgrade(),
            state: self.state.clone(),
        }
    }
}

/// Handle that does not keep the controller alive
///
/// Once every [`ControllerHandle`] is dropped the controller stops tracking
/// and ends, even if collaborators still hold weak handles.
#[derive(Clone, Debug)]
pub(crate) struct WeakControllerHandle {
    events: mpsc::WeakUnboundedSender<TrackerEvent>,
    state: watch::Receiver<TrackingState>,
}

impl WeakControllerHandle {
    pub(crate) fn upgrade(&self) -> Option<ControllerHandle> {
        self.events.upgrade().map(|events| ControllerHandle {
            events,
            state: self.state.clone(),
        })
    }
}

/// The tracking lifecycle state machine
pub struct LifecycleController {
    /// Exclusively owned session
    session: TrackingSession,
    /// Platform collaborators
    collaborators: Collaborators,
    /// Where fix batches go
    sink: Arc<dyn BatchSink>,
    /// Notification shown while tracking
    notice: ForegroundNotice,
    /// Handle given to collaborators
    handle: WeakControllerHandle,
    /// Incoming events
    events_rx: mpsc::UnboundedReceiver<TrackerEvent>,
    /// Published state
    state_tx: watch::Sender<TrackingState>,
}

impl LifecycleController {
    /// Create a controller and the handle that drives it
    pub fn new(
        collaborators: Collaborators,
        sink: Arc<dyn BatchSink>,
    ) -> (Self, ControllerHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(TrackingState::Idle);

        let handle = ControllerHandle {
            events: events_tx,
            state: state_rx,
        };

        let controller = Self {
            session: TrackingSession::new(),
            collaborators,
            sink,
            notice: ForegroundNotice::default(),
            handle: handle.downgrade(),
            events_rx,
            state_tx,
        };

        (controller, handle)
    }

    /// Use a custom foreground notification
    #[must_use]
    pub fn with_notice(mut self, notice: ForegroundNotice) -> Self {
        self.notice = notice;
        self
    }

    /// Create a controller and run it on the current tokio runtime
    pub fn spawn(
        collaborators: Collaborators,
        sink: Arc<dyn BatchSink>,
    ) -> (ControllerHandle, JoinHandle<()>) {
        let (controller, handle) = Self::new(collaborators, sink);
        let task = tokio::spawn(controller.run());
        (handle, task)
    }

    /// Process events until shutdown
    pub async fn run(mut self) {
        tracing::info!("Tracking controller started");

        loop {
            let Some(event) = self.events_rx.recv().await else {
                tracing::info!("All controller handles dropped");
                if self.session.state() != TrackingState::Idle {
                    self.on_stop();
                }
                break;
            };

            tracing::trace!(event = event.name(), state = ?self.session.state(), "Handling event");
            if self.handle_event(event).is_break() {
                break;
            }
        }

        tracing::info!("Tracking controller stopped");
    }

    fn handle_event(&mut self, event: TrackerEvent) -> ControlFlow<()> {
        match event {
            TrackerEvent::Start { config, reply } => self.on_start(config, reply),

            TrackerEvent::Stop { reply } => {
                self.on_stop();
                let _ = reply.send(());
            }

            TrackerEvent::Snapshot { reply } => {
                let _ = reply.send(self.session.snapshot());
            }

            TrackerEvent::Shutdown { reply } => {
                if self.session.state() != TrackingState::Idle {
                    self.on_stop();
                }
                let _ = reply.send(());
                return ControlFlow::Break(());
            }

            TrackerEvent::SettingsChecked {
                request_id,
                outcome,
            } => self.on_settings_checked(&request_id, outcome),

            TrackerEvent::ResolutionFinished {
                request_id,
                accepted,
            } => self.on_resolution_finished(&request_id, accepted),

            TrackerEvent::PermissionResult {
                request_id,
                granted,
            } => self.on_permission_result(&request_id, &granted),

            TrackerEvent::FixBatch { fixes } => self.on_fix_batch(fixes),
        }

        ControlFlow::Continue(())
    }

    // ============================================
    // Commands
    // ============================================

    fn on_start(
        &mut self,
        config: Arc<TrackingConfig>,
        reply: oneshot::Sender<Result<StartOutcome, StartError>>,
    ) {
        match self.session.state() {
            TrackingState::Tracking => {
                tracing::warn!("Already tracking.");
                let _ = reply.send(Ok(StartOutcome::AlreadyTracking));
            }
            TrackingState::Idle => {
                let params = config.to_sampling_params();
                tracing::info!(
                    endpoint = %config.upload_endpoint(),
                    interval_secs = config.sampling_interval_seconds(),
                    displacement_m = config.minimum_displacement_meters(),
                    "Start requested"
                );
                let request_id = self.session.begin(config, reply);
                self.publish();

                let Some(handle) = self.handle.upgrade() else {
                    self.fail(StartError::ControllerUnavailable);
                    return;
                };
                let settings = Arc::clone(&self.collaborators.settings);
                tokio::spawn(async move {
                    let outcome = settings.check_settings(&params).await;
                    handle.post(TrackerEvent::SettingsChecked {
                        request_id,
                        outcome,
                    });
                });
            }
            state => {
                tracing::warn!(state = ?state, "Start requested while another start is pending");
                let _ = reply.send(Err(StartError::StartInProgress));
            }
        }
    }

    fn on_stop(&mut self) {
        match self.session.state() {
            TrackingState::Idle => {
                tracing::warn!("Already not tracking.");
            }
            TrackingState::Tracking => {
                self.collaborators.source.detach();
                self.collaborators.host.stop_foreground();

                let stats = self.sink.stats();
                tracing::info!(
                    submitted = stats.submitted,
                    delivered = stats.delivered,
                    failed = stats.failed,
                    in_flight = stats.pending(),
                    "Tracking stopped"
                );

                if let Some(pending) = self.session.reset() {
                    pending.complete(Err(StartError::Cancelled));
                }
                self.publish();
            }
            state => {
                tracing::info!(state = ?state, "Stop requested during start; cancelling");
                self.fail(StartError::Cancelled);
            }
        }
    }

    // ============================================
    // Precondition chain
    // ============================================

    fn on_settings_checked(&mut self, request_id: &RequestId, outcome: SettingsOutcome) {
        if !self.expects(request_id, TrackingState::CheckingLocationSettings, "settings check") {
            return;
        }

        match outcome {
            SettingsOutcome::Satisfied => {
                tracing::debug!(request_id = %request_id, "Location settings satisfied");
                self.check_permission();
            }
            SettingsOutcome::Resolvable(resolution) => {
                tracing::info!(request_id = %request_id, "Location settings need user resolution");
                self.transition(TrackingState::ResolvingLocationSettings);

                let Some(handle) = self.handle.upgrade() else {
                    self.fail(StartError::ControllerUnavailable);
                    return;
                };
                let responder = ResolutionResponder::new(request_id.clone(), handle);
                if let Err(e) = self
                    .collaborators
                    .settings
                    .start_resolution(resolution, responder)
                {
                    tracing::warn!(error = %e, "Could not present location settings resolution");
                    self.fail(StartError::LocationServiceUnavailable);
                }
            }
            SettingsOutcome::Unsatisfied { reason } => {
                tracing::warn!(reason = %reason, "Location settings unsatisfied");
                self.fail(StartError::LocationServiceUnavailable);
            }
        }
    }

    fn on_resolution_finished(&mut self, request_id: &RequestId, accepted: bool) {
        if !self.expects(request_id, TrackingState::ResolvingLocationSettings, "settings resolution") {
            return;
        }

        if accepted {
            tracing::info!(request_id = %request_id, "Location settings resolved");
            self.check_permission();
        } else {
            self.fail(StartError::LocationServiceUnavailable);
        }
    }

    fn check_permission(&mut self) {
        self.transition(TrackingState::CheckingPermission);

        let permissions = &self.collaborators.permissions;
        let granted = permissions.has_permission(PermissionKind::FineLocation)
            || permissions.has_permission(PermissionKind::CoarseLocation);

        if granted {
            self.enter_tracking();
            return;
        }

        let Some(request_id) = self.session.pending_request_id().cloned() else {
            tracing::error!("Permission check without a pending start");
            self.fail(StartError::Cancelled);
            return;
        };

        let Some(handle) = self.handle.upgrade() else {
            self.fail(StartError::ControllerUnavailable);
            return;
        };

        self.transition(TrackingState::RequestingPermission);
        let responder = PermissionResponder::new(request_id, handle);
        if let Err(e) = self
            .collaborators
            .permissions
            .request_permissions(&FOREGROUND_LOCATION_PERMISSIONS, responder)
        {
            tracing::warn!(error = %e, "Could not request location permission");
            self.fail(StartError::PermissionDenied);
        }
    }

    fn on_permission_result(&mut self, request_id: &RequestId, granted: &[PermissionKind]) {
        if !self.expects(request_id, TrackingState::RequestingPermission, "permission result") {
            return;
        }

        let all_granted = FOREGROUND_LOCATION_PERMISSIONS
            .iter()
            .all(|kind| granted.contains(kind));

        if all_granted {
            self.enter_tracking();
        } else {
            tracing::info!(request_id = %request_id, granted = ?granted, "Location permission denied");
            self.fail(StartError::PermissionDenied);
        }
    }

    fn enter_tracking(&mut self) {
        let Some(config) = self.session.config().cloned() else {
            tracing::warn!("Config is missing. Do not start tracking.");
            self.fail(StartError::Cancelled);
            return;
        };

        if let Err(e) = self.collaborators.host.start_foreground(&self.notice) {
            tracing::error!(error = %e, "Unable to start foreground service");
            self.fail(StartError::HostRejected(e.to_string()));
            return;
        }

        let sink = FixBatchSink::new(self.handle.clone());
        if let Err(e) = self
            .collaborators
            .source
            .attach(&config.to_sampling_params(), sink)
        {
            tracing::error!(error = %e, "Unable to attach sampling source");
            self.collaborators.host.stop_foreground();
            self.fail(StartError::HostRejected(e.to_string()));
            return;
        }

        self.transition(TrackingState::Tracking);
        tracing::info!(endpoint = %config.upload_endpoint(), "Tracking started");

        if let Some(pending) = self.session.take_pending() {
            pending.complete(Ok(StartOutcome::Started));
        }
    }

    // ============================================
    // Sampling
    // ============================================

    fn on_fix_batch(&mut self, fixes: Vec<PositionFix>) {
        if self.session.state() != TrackingState::Tracking {
            tracing::debug!(fixes = fixes.len(), state = ?self.session.state(), "Not tracking; dropping fixes");
            return;
        }

        let Some(batch) = FixBatch::new(fixes) else {
            tracing::trace!("Ignoring empty fix batch");
            return;
        };

        let Some(config) = self.session.config() else {
            tracing::warn!(fixes = batch.len(), "Tracking without config; dropping fixes");
            return;
        };

        let fix_count = batch.len();
        let batch_id = self.sink.submit(batch, Arc::clone(config));
        tracing::debug!(batch_id = %batch_id, fixes = fix_count, "Dispatched fix batch");
    }

    // ============================================
    // Helpers
    // ============================================

    /// Whether a callback belongs to the pending request in the expected state
    fn expects(&self, request_id: &RequestId, state: TrackingState, what: &str) -> bool {
        if !self.session.is_pending(request_id) {
            tracing::warn!(request_id = %request_id, callback = what, "Ignoring callback for unknown request");
            return false;
        }
        if self.session.state() != state {
            tracing::warn!(
                request_id = %request_id,
                callback = what,
                state = ?self.session.state(),
                "Ignoring callback in unexpected state"
            );
            return false;
        }
        true
    }

    fn transition(&mut self, state: TrackingState) {
        tracing::debug!(from = ?self.session.state(), to = ?state, "State transition");
        self.session.set_state(state);
        self.publish();
    }

    /// Reset to idle and fail the pending start
    fn fail(&mut self, error: StartError) {
        tracing::warn!(error = %error, state = ?self.session.state(), "Start failed");
        let pending = self.session.reset();
        self.publish();
        if let Some(pending) = pending {
            pending.complete(Err(error));
        }
    }

    fn publish(&self) {
        let state = self.session.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}
