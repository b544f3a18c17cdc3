//! Geotrack Daemon - Desktop Tracking Host
//!
//! Runs the tracking lifecycle on a desktop: recorded fixes are replayed from
//! a file or stdin and uploaded to the configured collector exactly as a
//! mobile host would upload live samples.
//!
//! # Usage
//!
//! ```bash
//! # Replay a recording to a collector
//! geotrack-daemon --upload-url https://collector.example/ingest --input track.ndjson
//!
//! # Pipe fixes in, with an auth header
//! tail -f fixes.ndjson | geotrack-daemon -u https://collector.example/ingest \
//!     --header "Authorization=Bearer abc"
//!
//! # With config file
//! geotrack-daemon --config ~/.config/geotrack/config.toml
//!
//! # Verbose logging
//! RUST_LOG=debug geotrack-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Stop tracking, wait for in-flight uploads, exit

mod host;
mod replay;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use geotrack_core::config_file::{load_config_layers, parse_header_pair, ConfigOverrides};
use geotrack_core::{
    BatchSink, Collaborators, DeliveryPipeline, LifecycleController, PipelineConfig,
    StartOutcome, TrackingCommands,
};

use host::{DesktopPermissions, DesktopSettings, LogForegroundHost};
use replay::{ReplayInput, ReplaySource};

/// Geotrack Daemon - replays position fixes through the tracking lifecycle
#[derive(Parser, Debug)]
#[command(name = "geotrack-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "GEOTRACK_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Collector URL fix batches are POSTed to
    #[arg(short = 'u', long, value_name = "URL")]
    upload_url: Option<String>,

    /// Sampling interval in seconds
    #[arg(short = 'i', long, value_name = "SECS")]
    interval: Option<i64>,

    /// Minimum displacement between fixes in meters
    #[arg(short = 'd', long, value_name = "METERS")]
    displacement: Option<i64>,

    /// Extra upload header (repeatable)
    #[arg(short = 'H', long = "header", value_name = "NAME=VALUE", value_parser = parse_header_arg)]
    headers: Vec<(String, String)>,

    /// NDJSON file of fixes to replay (default: stdin)
    #[arg(long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Pause between replayed batches in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 0)]
    pace_ms: u64,

    /// Behave as if the user denied location permission
    #[arg(long)]
    deny_permission: bool,

    /// Behave as if location services were switched off
    #[arg(long)]
    settings_off: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "GEOTRACK_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            upload_url: self.upload_url.clone(),
            sampling_interval_seconds: self.interval,
            minimum_displacement_meters: self.displacement,
            headers: self.headers.clone(),
            ..ConfigOverrides::default()
        }
    }
}

fn parse_header_arg(raw: &str) -> Result<(String, String), String> {
    parse_header_pair(raw).ok_or_else(|| format!("expected NAME=VALUE, got {raw:?}"))
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "geotrack_daemon={level},geotrack_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("Failed to install Ctrl+C handler")?;
                Ok("SIGINT")
            }
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("Failed to install Ctrl+C handler")?;
        Ok("Ctrl+C")
    }
}

/// Longest a single upload can take
fn drain_limit(config: &PipelineConfig) -> Duration {
    config.connect_timeout.saturating_add(config.read_timeout)
}

/// Wait until every submitted batch has completed, up to `limit`
async fn drain(pipeline: &DeliveryPipeline, limit: Duration) {
    if tokio::time::timeout(limit, pipeline.wait_idle()).await.is_err() {
        warn!(pending = pipeline.stats().pending(), "Giving up on in-flight uploads");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level);

    info!("Geotrack Daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let file_config = load_config_layers(
        args.config.clone(),
        ConfigOverrides::from_env(),
        args.overrides(),
    )
    .context("Failed to load configuration")?;
    info!(source = ?file_config.source(), "Configuration loaded");

    let tracking = file_config
        .tracking_config()
        .context("Invalid tracking configuration")?;
    let pipeline_config = file_config.pipeline_config();

    let pipeline =
        DeliveryPipeline::new(&pipeline_config).context("Failed to create delivery pipeline")?;
    info!(workers = pipeline.workers(), "Delivery pipeline ready");

    let input = args
        .input
        .clone()
        .map_or(ReplayInput::Stdin, ReplayInput::File);
    let source = Arc::new(ReplaySource::new(input, Duration::from_millis(args.pace_ms)));

    let collaborators = Collaborators {
        settings: Arc::new(DesktopSettings::new(!args.settings_off)),
        permissions: Arc::new(DesktopPermissions::new(!args.deny_permission)),
        source: source.clone(),
        host: Arc::new(LogForegroundHost),
    };

    let (handle, controller) =
        LifecycleController::spawn(collaborators, Arc::new(pipeline.clone()));
    let commands = TrackingCommands::new(handle.clone());

    match commands.start_tracking(tracking).await {
        Ok(StartOutcome::Started) => info!("Tracking"),
        Ok(StartOutcome::AlreadyTracking) => info!("Already tracking"),
        Err(e) => {
            error!(error = %e, "Could not start tracking");
            handle.shutdown().await;
            return Err(e).context("Start tracking failed");
        }
    }

    tokio::select! {
        received = shutdown_signal() => {
            info!(signal = received?, "Received signal, shutting down");
        }
        () = source.finished() => {
            info!("Replay input finished, shutting down");
        }
    }

    commands.stop_tracking().await;
    drain(&pipeline, drain_limit(&pipeline_config)).await;

    let stats = pipeline.stats();
    info!(
        submitted = stats.submitted,
        delivered = stats.delivered,
        failed = stats.failed,
        "Delivery summary"
    );

    handle.shutdown().await;
    if let Err(e) = controller.await {
        warn!(error = %e, "Controller task ended abnormally");
    }

    info!("Geotrack daemon stopped cleanly");
    Ok(())
}
