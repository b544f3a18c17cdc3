//! Delivery Pipeline
//!
//! Turns fix batches into HTTP uploads on a bounded pool of concurrent
//! deliveries. Submission is fire-and-forget: the caller gets a [`BatchId`]
//! back immediately and never waits for the network.
//!
//! Any HTTP response counts as delivered, whatever its status; only transport
//! and encoding failures count as failed. Failed batches are dropped.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify, Semaphore};
use uuid::Uuid;

use super::payload::encode_batch;
use crate::config::TrackingConfig;
use crate::error::DeliveryError;
use crate::fix::FixBatch;

/// Default number of concurrent deliveries
pub const DEFAULT_WORKERS: usize = 4;

/// Default TCP connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default read timeout
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Pipeline tuning
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum deliveries in flight at once
    pub workers: usize,
    /// Connect timeout per request
    pub connect_timeout: Duration,
    /// Read timeout per request
    pub read_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Identifier of one submitted batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub Uuid);

impl BatchId {
    /// Generate a new unique batch ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch_{}", self.0.simple())
    }
}

/// How a batch delivery ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// A response was received (any status)
    Delivered {
        /// HTTP status code of the response
        status: u16,
    },
    /// No response; the batch was dropped
    Failed {
        /// Failure description
        error: String,
        /// Whether the failure was a timeout
        timed_out: bool,
    },
}

impl DeliveryOutcome {
    /// Whether the batch reached the collector
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Completion notice for one batch
#[derive(Clone, Debug)]
pub struct DeliveryReport {
    /// Which batch
    pub batch_id: BatchId,
    /// Number of fixes in the batch
    pub fix_count: usize,
    /// Where it was sent
    pub endpoint: String,
    /// How it ended
    pub outcome: DeliveryOutcome,
    /// Time from worker start to completion
    pub elapsed: Duration,
}

/// Running delivery counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Batches handed to the pipeline
    pub submitted: u64,
    /// Batches that received a response
    pub delivered: u64,
    /// Batches dropped after a failure
    pub failed: u64,
}

impl DeliveryStats {
    /// Batches not yet completed
    #[must_use]
    pub fn pending(&self) -> u64 {
        self.submitted.saturating_sub(self.delivered + self.failed)
    }
}

/// Destination for fix batches produced while tracking
///
/// The lifecycle controller only knows this trait; [`DeliveryPipeline`] is the
/// HTTP implementation.
pub trait BatchSink: Send + Sync {
    /// Queue a batch for delivery and return immediately
    fn submit(&self, batch: FixBatch, config: Arc<TrackingConfig>) -> BatchId;

    /// Current counters
    fn stats(&self) -> DeliveryStats {
        DeliveryStats::default()
    }
}

struct PipelineInner {
    client: reqwest::Client,
    permits: Arc<Semaphore>,
    stats: Mutex<DeliveryStats>,
    idle: Notify,
    reports: Option<mpsc::UnboundedSender<DeliveryReport>>,
}

/// HTTP batch delivery with bounded concurrency
#[derive(Clone)]
pub struct DeliveryPipeline {
    inner: Arc<PipelineInner>,
    workers: usize,
}

impl DeliveryPipeline {
    /// Create a pipeline
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::ClientBuild`] if the HTTP client cannot be
    /// initialized (e.g. no TLS backend).
    pub fn new(config: &PipelineConfig) -> Result<Self, DeliveryError> {
        Self::build(config, None)
    }

    /// Create a pipeline that also sends a [`DeliveryReport`] per batch
    ///
    /// # Errors
    ///
    /// Same as [`DeliveryPipeline::new`].
    pub fn with_reports(
        config: &PipelineConfig,
        reports: mpsc::UnboundedSender<DeliveryReport>,
    ) -> Result<Self, DeliveryError> {
        Self::build(config, Some(reports))
    }

    fn build(
        config: &PipelineConfig,
        reports: Option<mpsc::UnboundedSender<DeliveryReport>>,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()
            .map_err(|e| DeliveryError::ClientBuild(e.to_string()))?;

        // A zero-sized pool would never deliver anything
        let workers = config.workers.max(1);

        Ok(Self {
            inner: Arc::new(PipelineInner {
                client,
                permits: Arc::new(Semaphore::new(workers)),
                stats: Mutex::new(DeliveryStats::default()),
                idle: Notify::new(),
                reports,
            }),
            workers,
        })
    }

    /// Number of concurrent deliveries allowed
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Deliver one batch and wait for the outcome
    ///
    /// Bypasses the worker bound and the counters. Returns the response
    /// status; a non-2xx status is still `Ok`.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] if the body cannot be encoded or no
    /// response is received.
    pub async fn deliver(
        &self,
        batch: &FixBatch,
        config: &TrackingConfig,
    ) -> Result<StatusCode, DeliveryError> {
        self.inner.deliver(batch, config).await
    }

    /// Resolves once every submitted batch has completed
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.stats.lock().pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl PipelineInner {
    async fn deliver(
        &self,
        batch: &FixBatch,
        config: &TrackingConfig,
    ) -> Result<StatusCode, DeliveryError> {
        let body = encode_batch(batch)?;

        let mut headers = HeaderMap::with_capacity(config.header_map().len() + 2);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        // Configured headers replace the defaults of the same name
        for (name, value) in config.header_map() {
            headers.insert(name.clone(), value.clone());
        }

        let response = self
            .client
            .post(config.upload_endpoint().clone())
            .headers(headers)
            .body(body)
            .send()
            .await?;

        Ok(response.status())
    }

    fn finish(&self, record: impl FnOnce(&mut DeliveryStats)) {
        let pending = {
            let mut stats = self.stats.lock();
            record(&mut stats);
            stats.pending()
        };
        if pending == 0 {
            self.idle.notify_waiters();
        }
    }

    async fn run(&self, batch_id: BatchId, batch: FixBatch, config: Arc<TrackingConfig>) {
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            tracing::error!(batch_id = %batch_id, "Delivery pool closed; dropping batch");
            self.finish(|stats| stats.failed += 1);
            return;
        };

        let started = Instant::now();
        let endpoint = config.upload_endpoint().to_string();
        let fix_count = batch.len();

        let outcome = match self.deliver(&batch, &config).await {
            Ok(status) => {
                if status.is_success() {
                    tracing::info!(
                        batch_id = %batch_id,
                        status = status.as_u16(),
                        fixes = fix_count,
                        "Batch delivered"
                    );
                } else {
                    tracing::warn!(
                        batch_id = %batch_id,
                        status = status.as_u16(),
                        fixes = fix_count,
                        "Collector answered with error status; not retried"
                    );
                }
                self.finish(|stats| stats.delivered += 1);
                DeliveryOutcome::Delivered {
                    status: status.as_u16(),
                }
            }
            Err(e) => {
                let timed_out = e.is_timeout();
                tracing::warn!(
                    batch_id = %batch_id,
                    endpoint = %endpoint,
                    fixes = fix_count,
                    timed_out,
                    error = %e,
                    "Batch delivery failed; dropping batch"
                );
                self.finish(|stats| stats.failed += 1);
                DeliveryOutcome::Failed {
                    error: e.to_string(),
                    timed_out,
                }
            }
        };

        if let Some(reports) = &self.reports {
            let report = DeliveryReport {
                batch_id,
                fix_count,
                endpoint,
                outcome,
                elapsed: started.elapsed(),
            };
            if reports.send(report).is_err() {
                tracing::trace!(batch_id = %batch_id, "Report receiver dropped");
            }
        }
    }
}

impl BatchSink for DeliveryPipeline {
    fn submit(&self, batch: FixBatch, config: Arc<TrackingConfig>) -> BatchId {
        let batch_id = BatchId::new();
        self.inner.stats.lock().submitted += 1;
        tracing::debug!(batch_id = %batch_id, fixes = batch.len(), "Batch queued for delivery");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run(batch_id, batch, config).await;
        });

        batch_id
    }

    fn stats(&self) -> DeliveryStats {
        *self.inner.stats.lock()
    }
}
