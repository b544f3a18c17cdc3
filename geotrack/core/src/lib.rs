//! Geotrack Core - Location Tracking Lifecycle and Fix Delivery
//!
//! This crate decides when a device may sample its position and ships the
//! sampled fixes to an HTTP collector. It never touches OS location APIs
//! itself: the host (mobile bridge, desktop daemon, test harness) plugs in
//! through the collaborator traits in [`platform`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Host Application                         │
//! │     start_tracking(config) / stop_tracking()   (TrackingCommands)│
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ TrackerEvent
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                       GEOTRACK CORE                              │
//! │  ┌────────────────────────────┴───────────────────────────────┐  │
//! │  │                  LifecycleController                        │  │
//! │  │   TrackingSession: Idle → CheckingLocationSettings → ...   │  │
//! │  │                              ... → Tracking                 │  │
//! │  └───┬──────────────┬──────────────┬──────────────┬───────────┘  │
//! │      │              │              │              │ FixBatch     │
//! │  ┌───┴─────┐  ┌─────┴──────┐  ┌────┴─────┐  ┌─────┴──────────┐   │
//! │  │Location │  │ Permission │  │ Sampling │  │ DeliveryPipeline│  │
//! │  │Settings │  │   Gate     │  │  Source  │  │ (HTTP, N workers)│ │
//! │  └─────────┘  └────────────┘  └──────────┘  └────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`TrackingConfig`]: Validated endpoint, headers and sampling parameters
//! - [`LifecycleController`]: The precondition state machine
//! - [`TrackingCommands`]: Start/stop surface for the host
//! - [`DeliveryPipeline`]: Concurrent HTTP upload of [`FixBatch`]es
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use geotrack_core::{
//!     Collaborators, DeliveryPipeline, LifecycleController, PipelineConfig,
//!     TrackingCommands, TrackingConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let collaborators = Collaborators { /* host implementations */ };
//!     let pipeline = DeliveryPipeline::new(&PipelineConfig::default())?;
//!
//!     let (handle, _task) = LifecycleController::spawn(collaborators, Arc::new(pipeline));
//!     let commands = TrackingCommands::new(handle);
//!
//!     let config = TrackingConfig::builder("https://collector.example/ingest")
//!         .header("Authorization", "Bearer token")
//!         .sampling_interval_seconds(60)
//!         .build()?;
//!
//!     commands.start_tracking(config).await?;
//!     // ... fixes flow to the collector ...
//!     commands.stop_tracking().await;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`config`]: Tracking configuration and its validation
//! - [`config_file`]: TOML file, environment and CLI layering
//! - [`controller`]: Lifecycle state machine and its handle
//! - [`command`]: Host-facing start/stop operations
//! - [`delivery`]: Upload body encoding and the HTTP pipeline
//! - [`fix`]: Position fixes and batches
//! - [`platform`]: Collaborator traits the host implements
//! - [`session`]: Tracking state and the pending start request
//! - [`error`]: Error types

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod command;
pub mod config;
pub mod config_file;
pub mod controller;
pub mod delivery;
pub mod error;
mod events;
pub mod fix;
pub mod platform;
pub mod session;

// Re-exports for convenience
pub use command::{StartRequest, TrackingCommands};
pub use config::{
    SamplingParams, SamplingPriority, TrackingConfig, TrackingConfigBuilder,
    DEFAULT_MINIMUM_DISPLACEMENT_METERS, DEFAULT_SAMPLING_INTERVAL_SECS,
};
pub use controller::{ControllerHandle, LifecycleController};
pub use delivery::{
    BatchId, BatchSink, DeliveryOutcome, DeliveryPipeline, DeliveryReport, DeliveryStats,
    PipelineConfig,
};
pub use error::{ConfigError, DeliveryError, PlatformError, StartError};
pub use fix::{FixBatch, PositionFix};
pub use platform::{
    Collaborators, FixBatchSink, ForegroundHost, ForegroundNotice, LocationSettings,
    PermissionGate, PermissionKind, PermissionResponder, ResolutionHandle, ResolutionResponder,
    SamplingSource, SettingsOutcome, FOREGROUND_LOCATION_PERMISSIONS,
};
pub use session::{RequestId, SessionSnapshot, StartOutcome, TrackingSession, TrackingState};

// Config file exports
pub use config_file::{
    default_config_path, load_config_from_path, load_config_layers, ConfigOverrides,
    ConfigSource, FileConfigError, GeotrackFileConfig, GeotrackToml,
};
