//! Position Fixes
//!
//! Fixes are produced by the platform's sampling source and consumed
//! read-only by the core. A [`FixBatch`] is the unit of delivery: one
//! non-empty, ordered group of fixes that becomes one upload.

use serde::{Deserialize, Serialize};

/// A single instantaneous position measurement
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    /// When the fix was taken (Unix timestamp ms)
    #[serde(alias = "time", alias = "t")]
    pub timestamp_millis_since_epoch: i64,
    /// Latitude in degrees
    #[serde(alias = "lat")]
    pub latitude: f64,
    /// Longitude in degrees
    #[serde(alias = "lon")]
    pub longitude: f64,
    /// Horizontal accuracy radius in meters
    #[serde(alias = "accuracy", alias = "acc", default)]
    pub accuracy_meters: f64,
    /// Altitude above the WGS84 ellipsoid in meters
    #[serde(alias = "altitude", alias = "alt", default)]
    pub altitude_meters: f64,
}

impl PositionFix {
    /// Create a fix
    #[must_use]
    pub fn new(
        timestamp_millis_since_epoch: i64,
        latitude: f64,
        longitude: f64,
        accuracy_meters: f64,
        altitude_meters: f64,
    ) -> Self {
        Self {
            timestamp_millis_since_epoch,
            latitude,
            longitude,
            accuracy_meters,
            altitude_meters,
        }
    }
}

/// A non-empty, ordered group of fixes delivered together
#[derive(Clone, Debug, PartialEq)]
pub struct FixBatch(Vec<PositionFix>);

impl FixBatch {
    /// Wrap fixes as a batch, or `None` if there are none
    #[must_use]
    pub fn new(fixes: Vec<PositionFix>) -> Option<Self> {
        if fixes.is_empty() {
            None
        } else {
            Some(Self(fixes))
        }
    }

    /// The fixes, in sampling order
    #[must_use]
    pub fn fixes(&self) -> &[PositionFix] {
        &self.0
    }

    /// Number of fixes (always at least one)
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; present for API symmetry with slices
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Take the fixes back out
    #[must_use]
    pub fn into_inner(self) -> Vec<PositionFix> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_batch_rejected() {
        assert!(FixBatch::new(Vec::new()).is_none());
    }

    #[test]
    fn test_batch_keeps_order() {
        let a = PositionFix::new(1, 1.0, 2.0, 3.0, 4.0);
        let b = PositionFix::new(2, 5.0, 6.0, 7.0, 8.0);
        let batch = FixBatch::new(vec![a, b]).unwrap();

        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());
        assert_eq!(batch.fixes(), &[a, b]);
    }

    #[test]
    fn test_fix_accepts_short_field_names() {
        let fix: PositionFix =
            serde_json::from_str(r#"{"t":1700000000000,"lat":1.0,"lon":2.0,"acc":5.0}"#).unwrap();
        assert_eq!(fix.timestamp_millis_since_epoch, 1_700_000_000_000);
        assert!((fix.accuracy_meters - 5.0).abs() < f64::EPSILON);
        assert!(fix.altitude_meters.abs() < f64::EPSILON);
    }
}
