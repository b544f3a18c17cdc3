//! Delivery Pipeline Tests
//!
//! Runs the HTTP pipeline against a local capture server:
//! - Exact body and headers on the wire
//! - Error statuses still count as delivered
//! - Transport failures drop the batch
//! - Concurrency stays within the worker bound and batches never mix
//! - Fixes flow from the sampling source to the collector end to end

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use geotrack_core::delivery::UploadBody;
use geotrack_core::{
    BatchSink, Collaborators, DeliveryOutcome, DeliveryPipeline, DeliveryReport, FixBatch,
    FixBatchSink, ForegroundHost, ForegroundNotice, LifecycleController, LocationSettings,
    PermissionGate, PermissionKind, PermissionResponder, PipelineConfig, PlatformError,
    PositionFix, ResolutionHandle, ResolutionResponder, SamplingParams, SamplingSource,
    SettingsOutcome, StartOutcome, TrackingCommands, TrackingConfig,
};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Capture Server
// =============================================================================

struct Captured {
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Captured {
    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    fn points(&self) -> UploadBody {
        serde_json::from_slice(&self.body).expect("body should be an upload body")
    }
}

struct Capture {
    requests: Mutex<Vec<Captured>>,
    status: StatusCode,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Capture {
    fn answering(status: StatusCode) -> Arc<Self> {
        Self::slow(status, Duration::ZERO)
    }

    fn slow(status: StatusCode, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            status,
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }
}

async fn capture(State(capture): State<Arc<Capture>>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let now = capture.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    capture.max_in_flight.fetch_max(now, Ordering::SeqCst);

    if !capture.delay.is_zero() {
        tokio::time::sleep(capture.delay).await;
    }

    capture.requests.lock().push(Captured {
        headers,
        body: body.to_vec(),
    });
    capture.in_flight.fetch_sub(1, Ordering::SeqCst);
    capture.status
}

/// Serve `capture` on an ephemeral port and return the upload URL
async fn serve(capture: Arc<Capture>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/ingest", post(self::capture))
        .with_state(capture);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}/ingest")
}

/// A URL nothing listens on
async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/ingest")
}

async fn collect_reports(
    rx: &mut mpsc::UnboundedReceiver<DeliveryReport>,
    count: usize,
) -> Vec<DeliveryReport> {
    let mut reports = Vec::with_capacity(count);
    while reports.len() < count {
        let report = tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for delivery report")
            .expect("pipeline should still be reporting");
        reports.push(report);
    }
    reports
}

fn scenario_batch() -> FixBatch {
    FixBatch::new(vec![
        PositionFix::new(1_700_000_000_000, 1.0, 2.0, 5.0, 10.0),
        PositionFix::new(1_700_000_060_000, 1.001, 2.001, 4.0, 11.0),
    ])
    .unwrap()
}

fn config(url: &str) -> TrackingConfig {
    TrackingConfig::builder(url)
        .header("Authorization", "Bearer abc")
        .build()
        .unwrap()
}

// =============================================================================
// Wire Format
// =============================================================================

#[tokio::test]
async fn test_upload_body_and_headers() {
    let capture = Capture::answering(StatusCode::OK);
    let url = serve(capture.clone()).await;
    let pipeline = DeliveryPipeline::new(&PipelineConfig::default()).unwrap();

    let status = pipeline
        .deliver(&scenario_batch(), &config(&url))
        .await
        .unwrap();
    assert_eq!(status.as_u16(), 200);

    let requests = capture.requests.lock();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(
        String::from_utf8(request.body.clone()).unwrap(),
        r#"{"points":[{"time":"2023-11-14T22:13:20Z","latitude":1.0,"longitude":2.0,"accuracy":5.0,"altitude":10.0},{"time":"2023-11-14T22:14:20Z","latitude":1.001,"longitude":2.001,"accuracy":4.0,"altitude":11.0}]}"#
    );
    assert_eq!(request.header("authorization").as_deref(), Some("Bearer abc"));
    assert_eq!(
        request.header("content-type").as_deref(),
        Some("application/json; charset=utf-8")
    );
    assert_eq!(request.header("accept").as_deref(), Some("application/json"));
}

#[tokio::test]
async fn test_configured_header_replaces_default() {
    let capture = Capture::answering(StatusCode::OK);
    let url = serve(capture.clone()).await;
    let pipeline = DeliveryPipeline::new(&PipelineConfig::default()).unwrap();

    let config = TrackingConfig::builder(&url)
        .header("Accept", "*/*")
        .build()
        .unwrap();
    pipeline.deliver(&scenario_batch(), &config).await.unwrap();

    let requests = capture.requests.lock();
    assert_eq!(requests[0].header("accept").as_deref(), Some("*/*"));
    assert_eq!(requests[0].headers.get_all("accept").iter().count(), 1);
}

// =============================================================================
// Outcomes
// =============================================================================

#[tokio::test]
async fn test_error_status_counts_as_delivered() {
    let capture = Capture::answering(StatusCode::INTERNAL_SERVER_ERROR);
    let url = serve(capture.clone()).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let pipeline = DeliveryPipeline::with_reports(&PipelineConfig::default(), tx).unwrap();

    pipeline.submit(scenario_batch(), Arc::new(config(&url)));
    let reports = collect_reports(&mut rx, 1).await;

    assert_eq!(reports[0].outcome, DeliveryOutcome::Delivered { status: 500 });
    assert_eq!(reports[0].fix_count, 2);
    assert_eq!(capture.requests.lock().len(), 1);

    let stats = pipeline.stats();
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_connection_refused_drops_batch() {
    let url = closed_port_url().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let pipeline = DeliveryPipeline::with_reports(&PipelineConfig::default(), tx).unwrap();

    let batch_id = pipeline.submit(scenario_batch(), Arc::new(config(&url)));
    let reports = collect_reports(&mut rx, 1).await;

    assert_eq!(reports[0].batch_id, batch_id);
    assert!(matches!(reports[0].outcome, DeliveryOutcome::Failed { .. }));
    assert!(!reports[0].outcome.is_delivered());

    let stats = pipeline.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending(), 0);
}

#[tokio::test]
async fn test_non_finite_fix_never_reaches_collector() {
    let capture = Capture::answering(StatusCode::OK);
    let url = serve(capture.clone()).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let pipeline = DeliveryPipeline::with_reports(&PipelineConfig::default(), tx).unwrap();

    let batch = FixBatch::new(vec![
        PositionFix::new(1_700_000_000_000, 1.0, 2.0, 5.0, 10.0),
        PositionFix::new(1_700_000_060_000, f64::NAN, 2.0, f64::INFINITY, 10.0),
    ])
    .unwrap();
    pipeline.submit(batch, Arc::new(config(&url)));
    let reports = collect_reports(&mut rx, 1).await;

    assert!(matches!(reports[0].outcome, DeliveryOutcome::Failed { .. }));
    assert!(capture.requests.lock().is_empty());
    assert_eq!(pipeline.stats().failed, 1);
}

#[tokio::test]
async fn test_slow_collector_hits_read_timeout() {
    let capture = Capture::slow(StatusCode::OK, Duration::from_secs(3));
    let url = serve(capture).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let pipeline = DeliveryPipeline::with_reports(
        &PipelineConfig {
            read_timeout: Duration::from_millis(200),
            ..PipelineConfig::default()
        },
        tx,
    )
    .unwrap();

    pipeline.submit(scenario_batch(), Arc::new(config(&url)));
    let reports = collect_reports(&mut rx, 1).await;

    assert!(!reports[0].outcome.is_delivered());
    assert!(reports[0].elapsed < Duration::from_secs(3));
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_batches_bounded_and_unmixed() {
    const BATCHES: usize = 8;

    let capture = Capture::slow(StatusCode::OK, Duration::from_millis(100));
    let url = serve(capture.clone()).await;
    let config = Arc::new(config(&url));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let pipeline = DeliveryPipeline::with_reports(
        &PipelineConfig {
            workers: 2,
            ..PipelineConfig::default()
        },
        tx,
    )
    .unwrap();

    // Batch i carries fixes tagged with latitude i
    for i in 0..BATCHES {
        let lat = i as f64;
        let batch = FixBatch::new(vec![
            PositionFix::new(1_700_000_000_000, lat, 0.0, 1.0, 0.0),
            PositionFix::new(1_700_000_001_000, lat, 1.0, 1.0, 0.0),
            PositionFix::new(1_700_000_002_000, lat, 2.0, 1.0, 0.0),
        ])
        .unwrap();
        pipeline.submit(batch, Arc::clone(&config));
    }

    let reports = collect_reports(&mut rx, BATCHES).await;
    assert!(reports.iter().all(|r| r.outcome.is_delivered()));

    let max_in_flight = capture.max_in_flight.load(Ordering::SeqCst);
    assert!(max_in_flight <= 2, "saw {max_in_flight} concurrent uploads");

    let requests = capture.requests.lock();
    assert_eq!(requests.len(), BATCHES);

    let mut seen = BTreeSet::new();
    for request in requests.iter() {
        let points = request.points().points;
        assert_eq!(points.len(), 3);
        let lat = points[0].latitude;
        assert!(points.iter().all(|p| p.latitude == lat), "batch mixed fixes");
        let longitudes: Vec<f64> = points.iter().map(|p| p.longitude).collect();
        assert_eq!(longitudes, vec![0.0, 1.0, 2.0]);
        seen.insert(lat as usize);
    }
    assert_eq!(seen, (0..BATCHES).collect::<BTreeSet<_>>());
}

// =============================================================================
// End to End
// =============================================================================

struct AlwaysSatisfied;

#[async_trait]
impl LocationSettings for AlwaysSatisfied {
    async fn check_settings(&self, _params: &SamplingParams) -> SettingsOutcome {
        SettingsOutcome::Satisfied
    }

    fn start_resolution(
        &self,
        _resolution: ResolutionHandle,
        responder: ResolutionResponder,
    ) -> Result<(), PlatformError> {
        responder.resolve(true);
        Ok(())
    }
}

struct AllGranted;

impl PermissionGate for AllGranted {
    fn has_permission(&self, _kind: PermissionKind) -> bool {
        true
    }

    fn request_permissions(
        &self,
        kinds: &[PermissionKind],
        responder: PermissionResponder,
    ) -> Result<(), PlatformError> {
        responder.respond(kinds.to_vec());
        Ok(())
    }
}

#[derive(Default)]
struct HeldSource {
    sink: Mutex<Option<FixBatchSink>>,
}

impl SamplingSource for HeldSource {
    fn attach(&self, _params: &SamplingParams, sink: FixBatchSink) -> Result<(), PlatformError> {
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    fn detach(&self) {
        self.sink.lock().take();
    }
}

struct NoopHost;

impl ForegroundHost for NoopHost {
    fn start_foreground(&self, _notice: &ForegroundNotice) -> Result<(), PlatformError> {
        Ok(())
    }

    fn stop_foreground(&self) {}
}

#[tokio::test]
async fn test_fixes_flow_from_source_to_collector() {
    let capture = Capture::answering(StatusCode::OK);
    let url = serve(capture.clone()).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let pipeline = DeliveryPipeline::with_reports(&PipelineConfig::default(), tx).unwrap();

    let source = Arc::new(HeldSource::default());
    let collaborators = Collaborators {
        settings: Arc::new(AlwaysSatisfied),
        permissions: Arc::new(AllGranted),
        source: source.clone(),
        host: Arc::new(NoopHost),
    };
    let (handle, _task) = LifecycleController::spawn(collaborators, Arc::new(pipeline));
    let commands = TrackingCommands::new(handle);

    let outcome = commands.start_tracking(config(&url)).await;
    assert_eq!(outcome, Ok(StartOutcome::Started));

    let sink = source.sink.lock().clone().unwrap();
    sink.deliver(scenario_batch().into_inner());

    let reports = collect_reports(&mut rx, 1).await;
    assert_eq!(reports[0].outcome, DeliveryOutcome::Delivered { status: 200 });
    assert_eq!(reports[0].endpoint, url);

    let requests = capture.requests.lock();
    assert_eq!(requests[0].points().points[0].time, "2023-11-14T22:13:20Z");
    drop(requests);

    commands.stop_tracking().await;
    assert!(source.sink.lock().is_none());
}
