//! Desktop Collaborators
//!
//! A desktop has no location-settings dialog, no runtime permission prompt and
//! no foreground-service notification. These stand-ins answer immediately
//! from command-line switches and log what a mobile host would show.

use async_trait::async_trait;
use tracing::info;

use geotrack_core::{
    ForegroundHost, ForegroundNotice, LocationSettings, PermissionGate, PermissionKind,
    PermissionResponder, PlatformError, ResolutionHandle, ResolutionResponder, SamplingParams,
    SettingsOutcome,
};

/// Location settings fixed at startup
#[derive(Debug, Clone, Copy)]
pub struct DesktopSettings {
    enabled: bool,
}

impl DesktopSettings {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

#[async_trait]
impl LocationSettings for DesktopSettings {
    async fn check_settings(&self, params: &SamplingParams) -> SettingsOutcome {
        if self.enabled {
            info!(
                interval_secs = params.interval.as_secs(),
                displacement_m = params.smallest_displacement_meters,
                "Location settings satisfied"
            );
            SettingsOutcome::Satisfied
        } else {
            SettingsOutcome::Unsatisfied {
                reason: "location services disabled on this host".to_string(),
            }
        }
    }

    fn start_resolution(
        &self,
        _resolution: ResolutionHandle,
        _responder: ResolutionResponder,
    ) -> Result<(), PlatformError> {
        Err(PlatformError::new("no settings dialog on a desktop host"))
    }
}

/// Permissions fixed at startup; prompts are answered on the spot
#[derive(Debug, Clone, Copy)]
pub struct DesktopPermissions {
    granted: bool,
}

impl DesktopPermissions {
    pub fn new(granted: bool) -> Self {
        Self { granted }
    }
}

impl PermissionGate for DesktopPermissions {
    fn has_permission(&self, _kind: PermissionKind) -> bool {
        self.granted
    }

    fn request_permissions(
        &self,
        kinds: &[PermissionKind],
        responder: PermissionResponder,
    ) -> Result<(), PlatformError> {
        info!(kinds = ?kinds, granted = self.granted, "Answering location permission prompt");
        let granted = if self.granted {
            kinds.to_vec()
        } else {
            Vec::new()
        };
        responder.respond(granted);
        Ok(())
    }
}

/// Logs the notice a mobile host would pin while tracking
#[derive(Debug, Default, Clone, Copy)]
pub struct LogForegroundHost;

impl ForegroundHost for LogForegroundHost {
    fn start_foreground(&self, notice: &ForegroundNotice) -> Result<(), PlatformError> {
        info!(
            channel = %notice.channel_id,
            id = notice.notification_id,
            title = %notice.title,
            "{}",
            notice.message
        );
        Ok(())
    }

    fn stop_foreground(&self) {
        info!("Foreground notice removed");
    }
}
