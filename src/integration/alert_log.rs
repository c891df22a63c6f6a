use std::collections::{HashMap, VecDeque};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::anomaly::AnomalyEvent;
use crate::error::ConfigError;
use crate::tracker::{CameraId, Timestamp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertLogConfig {
    /// Events older than this, relative to the camera's newest one, are
    /// forgotten
    pub retention_seconds: f64,
    /// Events kept per camera
    pub capacity: usize,
}

impl Default for AlertLogConfig {
    fn default() -> Self {
        Self {
            retention_seconds: 86_400.0,
            capacity: 1024,
        }
    }
}

impl AlertLogConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.retention_seconds.is_finite() && self.retention_seconds > 0.0) {
            return Err(ConfigError::invalid("alerts.retention_seconds", "must be positive"));
        }
        if self.capacity == 0 {
            return Err(ConfigError::invalid("alerts.capacity", "must be at least 1"));
        }
        Ok(())
    }
}

/// Recent events, oldest first, bounded by age and count per camera.
///
/// A noisy camera only pushes out its own history.
#[derive(Debug, Clone)]
pub struct AlertLog {
    config: AlertLogConfig,
    cameras: HashMap<CameraId, VecDeque<AnomalyEvent>>,
}

impl AlertLog {
    pub fn new(config: AlertLogConfig) -> Self {
        Self {
            config,
            cameras: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.cameras.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.values().all(VecDeque::is_empty)
    }

    pub fn push(&mut self, event: AnomalyEvent) {
        let newest = event.timestamp;
        let cutoff = self.cutoff(newest);
        let events = self.cameras.entry(event.camera_id.clone()).or_default();
        events.push_back(event);
        while events.len() > self.config.capacity {
            events.pop_front();
        }
        events.retain(|e| e.timestamp >= cutoff);
    }

    /// Forget events older than the retention window ending at `now`.
    pub fn prune(&mut self, now: Timestamp) {
        let cutoff = self.cutoff(now);
        for events in self.cameras.values_mut() {
            events.retain(|e| e.timestamp >= cutoff);
        }
        self.cameras.retain(|_, events| !events.is_empty());
    }

    /// Events of `camera_id` at or after `since`, oldest first.
    pub fn recent(&self, camera_id: &CameraId, since: Timestamp) -> Vec<AnomalyEvent> {
        self.cameras
            .get(camera_id)
            .map(|events| events.iter().filter(|e| e.timestamp >= since).cloned().collect())
            .unwrap_or_default()
    }

    fn cutoff(&self, now: Timestamp) -> Timestamp {
        now - TimeDelta::milliseconds((self.config.retention_seconds * 1000.0) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::Severity;
    use chrono::{TimeZone, Utc};

    fn at(s: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap() + TimeDelta::seconds(s)
    }

    fn event(camera: &str, s: i64) -> AnomalyEvent {
        AnomalyEvent {
            rule_id: "r".into(),
            track_id: None,
            camera_id: camera.into(),
            timestamp: at(s),
            severity: Severity::Info,
            message: String::new(),
        }
    }

    #[test]
    fn test_recent_filters_camera_and_time() {
        let mut log = AlertLog::new(AlertLogConfig::default());
        log.push(event("a", 0));
        log.push(event("b", 5));
        log.push(event("a", 10));
        let recent = log.recent(&"a".into(), at(5));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].timestamp, at(10));
        assert_eq!(log.recent(&"a".into(), at(0)).len(), 2);
        assert!(log.recent(&"c".into(), at(0)).is_empty());
    }

    #[test]
    fn test_capacity_bound() {
        let mut log = AlertLog::new(AlertLogConfig {
            retention_seconds: 60.0,
            capacity: 3,
        });
        for s in 0..5 {
            log.push(event("a", s));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.recent(&"a".into(), at(0))[0].timestamp, at(2));
    }

    #[test]
    fn test_retention_window() {
        let mut log = AlertLog::new(AlertLogConfig {
            retention_seconds: 60.0,
            capacity: 100,
        });
        for s in [0, 3, 30, 63] {
            log.push(event("a", s));
        }
        log.push(event("b", 200));
        // 3 sits exactly on the cutoff and stays; b's clock does not age a
        let left: Vec<_> = log.recent(&"a".into(), at(0)).iter().map(|e| e.timestamp).collect();
        assert_eq!(left, vec![at(3), at(30), at(63)]);

        log.prune(at(200));
        assert!(log.recent(&"a".into(), at(0)).is_empty());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_capacity_is_per_camera() {
        let mut log = AlertLog::new(AlertLogConfig {
            retention_seconds: 600.0,
            capacity: 2,
        });
        log.push(event("quiet", 0));
        for s in 1..50 {
            log.push(event("noisy", s));
        }
        assert_eq!(log.recent(&"quiet".into(), at(0)).len(), 1);
        assert_eq!(log.recent(&"noisy".into(), at(0)).len(), 2);
        assert_eq!(log.len(), 3);
    }
}
