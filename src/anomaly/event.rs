use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tracker::{CameraId, Timestamp, TrackId};

/// Alert severity, fixed per rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A fired rule. Immutable once created.
///
/// Serializes to the alert output schema
/// `{rule_id, track_id|null, camera_id, timestamp, severity, message}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub rule_id: String,
    /// `None` for camera-level rules
    pub track_id: Option<TrackId>,
    pub camera_id: CameraId,
    pub timestamp: Timestamp,
    pub severity: Severity,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_event_json_schema() {
        let event = AnomalyEvent {
            rule_id: "crowd".into(),
            track_id: None,
            camera_id: "lobby".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            severity: Severity::Warning,
            message: "occupancy 3 exceeds maximum 2".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["rule_id"], "crowd");
        assert!(json["track_id"].is_null());
        assert_eq!(json["camera_id"], "lobby");
        assert_eq!(json["timestamp"], "2024-01-02T03:04:05Z");
        assert_eq!(json["severity"], "warning");

        let with_track = AnomalyEvent {
            track_id: Some(TrackId(7)),
            ..event
        };
        assert_eq!(serde_json::to_value(&with_track).unwrap()["track_id"], 7);
    }
}
