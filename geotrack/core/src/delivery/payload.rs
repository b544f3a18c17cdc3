//! Upload Body Encoding
//!
//! Wire format of one batch upload:
//!
//! ```text
//! {"points":[{"time":"2023-11-14T22:13:20Z","latitude":1.0,"longitude":2.0,"accuracy":5.0,"altitude":10.0}]}
//! ```
//!
//! Times are UTC, truncated to whole seconds, with a literal `Z` suffix.

use chrono::{Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;
use crate::fix::{FixBatch, PositionFix};

/// `strftime` pattern for upload timestamps
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Body of a batch upload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadBody {
    /// Fixes in sampling order
    pub points: Vec<UploadPoint>,
}

/// One fix as it appears on the wire
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadPoint {
    /// UTC timestamp, second precision
    pub time: String,
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Accuracy radius in meters
    pub accuracy: f64,
    /// Altitude in meters
    pub altitude: f64,
}

impl UploadPoint {
    fn from_fix(fix: &PositionFix) -> Result<Self, DeliveryError> {
        let time = format_upload_time(fix.timestamp_millis_since_epoch).ok_or_else(|| {
            DeliveryError::Serialization(format!(
                "timestamp {} ms is out of range",
                fix.timestamp_millis_since_epoch
            ))
        })?;

        let coordinates = [
            ("latitude", fix.latitude),
            ("longitude", fix.longitude),
            ("accuracy", fix.accuracy_meters),
            ("altitude", fix.altitude_meters),
        ];
        if let Some((field, value)) = coordinates.iter().find(|(_, v)| !v.is_finite()) {
            return Err(DeliveryError::Serialization(format!(
                "{field} {value} is not a finite number"
            )));
        }

        Ok(Self {
            time,
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy: fix.accuracy_meters,
            altitude: fix.altitude_meters,
        })
    }
}

impl UploadBody {
    /// Build the body for a batch
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Serialization`] if any fix carries a
    /// timestamp that cannot be written as a four-digit-year date, or a
    /// non-finite coordinate, accuracy or altitude.
    pub fn from_batch(batch: &FixBatch) -> Result<Self, DeliveryError> {
        let points = batch
            .fixes()
            .iter()
            .map(UploadPoint::from_fix)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { points })
    }
}

/// Format a Unix timestamp (ms) as `YYYY-MM-DDTHH:MM:SSZ`
///
/// `None` when the year falls outside `0..=9999`.
#[must_use]
pub fn format_upload_time(timestamp_millis: i64) -> Option<String> {
    Utc.timestamp_millis_opt(timestamp_millis)
        .single()
        .filter(|t| (0..=9999).contains(&t.year()))
        .map(|t| t.format(TIME_FORMAT).to_string())
}

/// Encode a batch into the JSON upload body
///
/// # Errors
///
/// Returns [`DeliveryError::Serialization`] on out-of-range timestamps,
/// non-finite values, or if JSON encoding fails.
pub fn encode_batch(batch: &FixBatch) -> Result<Vec<u8>, DeliveryError> {
    let body = UploadBody::from_batch(batch)?;
    serde_json::to_vec(&body).map_err(|e| DeliveryError::Serialization(e.to_string()))
}
