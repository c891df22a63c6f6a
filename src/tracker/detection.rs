//! Per-frame detection input and the identifiers shared by every stage.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DetectionError;
use crate::tracker::rect::Rect;

/// Wall-clock instant of a frame.
pub type Timestamp = DateTime<Utc>;

/// Seconds from `from` to `to`, negative when `to` is earlier.
pub fn elapsed_seconds(from: Timestamp, to: Timestamp) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

/// Identifier of a camera feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(String);

impl CameraId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CameraId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for CameraId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Detection input for the tracker.
///
/// Only lives for the duration of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub camera_id: CameraId,
    pub timestamp: Timestamp,
    /// Bounding box in TLWH format
    pub bbox: Rect,
    /// Detection confidence score in [0, 1]
    pub confidence: f32,
    /// Class label reported by the detector
    pub label: String,
}

impl Detection {
    pub fn new(
        camera_id: CameraId,
        timestamp: Timestamp,
        bbox: Rect,
        confidence: f32,
        label: impl Into<String>,
    ) -> Self {
        Self {
            camera_id,
            timestamp,
            bbox,
            confidence,
            label: label.into(),
        }
    }

    pub fn validate(&self) -> Result<(), DetectionError> {
        self.bbox.validate()?;
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(DetectionError::Confidence(self.confidence));
        }
        Ok(())
    }
}
