//! Sample Delivery
//!
//! Encodes fix batches as JSON and uploads them to the collector.
//!
//! # Usage
//!
//! ```ignore
//! use geotrack_core::delivery::{BatchSink, DeliveryPipeline, PipelineConfig};
//!
//! let pipeline = DeliveryPipeline::new(&PipelineConfig::default())?;
//! let batch_id = pipeline.submit(batch, Arc::new(config));
//! ```

pub mod payload;
mod pipeline;

pub use payload::{encode_batch, format_upload_time, UploadBody, UploadPoint};
pub use pipeline::{
    BatchId, BatchSink, DeliveryOutcome, DeliveryPipeline, DeliveryReport, DeliveryStats,
    PipelineConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_WORKERS,
};
