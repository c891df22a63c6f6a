//! Builder for creating Detection objects from various input formats.

use chrono::Utc;

use crate::tracker::{CameraId, Detection, Rect, Timestamp};

/// Builder for creating `Detection` objects from various input formats.
#[derive(Debug, Clone)]
pub struct DetectionBuilder {
    camera_id: CameraId,
    timestamp: Timestamp,
    bbox: Rect,
    confidence: f32,
    label: String,
}

impl Default for DetectionBuilder {
    fn default() -> Self {
        Self {
            camera_id: CameraId::default(),
            timestamp: Utc::now(),
            bbox: Rect::default(),
            confidence: 1.0,
            label: "person".to_string(),
        }
    }
}

impl DetectionBuilder {
    /// Create a new detection builder.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn camera(mut self, camera_id: impl Into<CameraId>) -> Self {
        self.camera_id = camera_id.into();
        self
    }

    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set bounding box in TLBR format (x1, y1, x2, y2).
    pub fn tlbr(mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.bbox = Rect::from_tlbr(x1, y1, x2, y2);
        self
    }

    /// Set bounding box in XYWH format (center_x, center_y, width, height).
    pub fn xywh(mut self, cx: f32, cy: f32, w: f32, h: f32) -> Self {
        self.bbox = Rect::new(cx - w / 2.0, cy - h / 2.0, w, h);
        self
    }

    /// Set bounding box in TLWH format (left, top, width, height), as the
    /// detection input carries it.
    pub fn tlwh(mut self, x: f32, y: f32, w: f32, h: f32) -> Self {
        self.bbox = Rect::new(x, y, w, h);
        self
    }

    /// Set the confidence score.
    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Build the final `Detection`. Validation happens in the tracker.
    pub fn build(self) -> Detection {
        Detection::new(
            self.camera_id,
            self.timestamp,
            self.bbox,
            self.confidence,
            self.label,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_detection_builder() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let det = DetectionBuilder::new()
            .camera("entrance")
            .timestamp(ts)
            .tlbr(10.0, 20.0, 50.0, 80.0)
            .confidence(0.95)
            .build();

        assert_eq!(det.confidence, 0.95);
        assert_eq!(det.camera_id.as_str(), "entrance");
        assert_eq!(det.timestamp, ts);
        assert_eq!(det.label, "person");
        assert_eq!(det.bbox, Rect::new(10.0, 20.0, 40.0, 60.0));
    }

    #[test]
    fn test_box_formats_agree() {
        let a = DetectionBuilder::new().tlwh(10.0, 20.0, 40.0, 60.0).build();
        let b = DetectionBuilder::new().xywh(30.0, 50.0, 40.0, 60.0).build();
        assert_eq!(a.bbox, b.bbox);
        assert_eq!(a.bbox.center(), b.bbox.center());
    }
}
