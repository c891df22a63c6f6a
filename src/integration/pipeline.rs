//! CameraPipeline: tracker, aggregator and rule engine for one camera.

use std::sync::Arc;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::analytics::{AggregateSnapshot, ResetScope, TemporalAggregator};
use crate::anomaly::{AnomalyEngine, AnomalyEvent, AnomalyRule};
use crate::config::MonitorConfig;
use crate::error::{ConfigError, PipelineError};
use crate::tracker::{
    CameraId, Detection, FrameUpdate, Timestamp, TrackSnapshot, TrackState, TrackSummary, Tracker,
    elapsed_seconds,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Silence after which a camera is fed empty frames
    pub frame_timeout_seconds: f64,
    /// Expected spacing of frames, used to pace synthetic empty frames
    pub frame_interval_seconds: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_timeout_seconds: 5.0,
            frame_interval_seconds: 0.2,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.frame_timeout_seconds.is_finite() && self.frame_timeout_seconds > 0.0) {
            return Err(ConfigError::invalid("pipeline.frame_timeout_seconds", "must be positive"));
        }
        if !(self.frame_interval_seconds.is_finite() && self.frame_interval_seconds > 0.0) {
            return Err(ConfigError::invalid("pipeline.frame_interval_seconds", "must be positive"));
        }
        Ok(())
    }
}

/// Result of processing one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameOutcome {
    pub timestamp: Option<Timestamp>,
    pub update: FrameUpdate,
    /// Confirmed-track positions fed to the aggregator
    pub recorded: usize,
    pub events: Vec<AnomalyEvent>,
}

/// Everything a camera holds, for collaborators that persist state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSnapshot {
    pub camera_id: CameraId,
    pub running: bool,
    pub last_frame: Option<Timestamp>,
    pub frames_processed: u64,
    pub tracks: Vec<TrackSnapshot>,
    pub archive: Vec<TrackSummary>,
    pub aggregate: AggregateSnapshot,
    pub busiest_hours: Vec<(u32, u64)>,
}

/// Processing pipeline for one camera.
///
/// Frames go through tracker, aggregator and rule engine in that order, one
/// at a time. Nothing in here is shared with other cameras.
pub struct CameraPipeline {
    camera_id: CameraId,
    config: PipelineConfig,
    tracker: Tracker,
    aggregator: TemporalAggregator,
    engine: AnomalyEngine,
    running: bool,
}

impl CameraPipeline {
    pub fn new(camera_id: CameraId, config: &MonitorConfig, rules: Arc<[AnomalyRule]>) -> Self {
        Self {
            tracker: Tracker::new(camera_id.clone(), config.tracker.clone()),
            aggregator: TemporalAggregator::new(camera_id.clone(), config.aggregator.clone()),
            engine: AnomalyEngine::new(camera_id.clone(), rules),
            config: config.pipeline.clone(),
            camera_id,
            running: true,
        }
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn aggregator(&self) -> &TemporalAggregator {
        &self.aggregator
    }

    pub fn engine(&self) -> &AnomalyEngine {
        &self.engine
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn last_frame(&self) -> Option<Timestamp> {
        self.tracker.last_timestamp()
    }

    /// Run one frame through the pipeline.
    ///
    /// A rejected frame (stopped camera, out-of-order timestamp) leaves all
    /// state untouched.
    pub fn process_frame(
        &mut self,
        timestamp: Timestamp,
        detections: &[Detection],
    ) -> Result<FrameOutcome, PipelineError> {
        if !self.running {
            return Err(PipelineError::CameraStopped(self.camera_id.clone()));
        }
        self.apply(timestamp, detections).inspect_err(|e| {
            tracing::warn!(camera = %self.camera_id, error = %e, "frame rejected");
        })
    }

    fn apply(
        &mut self,
        timestamp: Timestamp,
        detections: &[Detection],
    ) -> Result<FrameOutcome, PipelineError> {
        let update = self.tracker.update(timestamp, detections)?;
        self.aggregator.observe_time(timestamp);

        let mut recorded = 0;
        // a newly confirmed track brings the observations of its streak
        for id in &update.confirmed {
            let Some(track) = self.tracker.get(*id) else {
                continue;
            };
            for obs in track.streak() {
                if self.aggregator.record(obs.timestamp, obs.centroid).is_some() {
                    recorded += 1;
                }
            }
        }
        for id in &update.matched {
            if update.confirmed.contains(id) {
                continue;
            }
            let Some(track) = self.tracker.get(*id) else {
                continue;
            };
            if track.state == TrackState::Confirmed {
                let obs = track.last();
                if self.aggregator.record(obs.timestamp, obs.centroid).is_some() {
                    recorded += 1;
                }
            }
        }

        let events = self.engine.evaluate(
            timestamp,
            &self.tracker.snapshots(),
            &self.aggregator.snapshot(),
        );

        tracing::debug!(
            camera = %self.camera_id,
            detections = detections.len(),
            matched = update.matched.len(),
            created = update.created.len(),
            lost = update.lost.len(),
            removed = update.removed.len(),
            recorded,
            events = events.len(),
            "frame processed"
        );

        Ok(FrameOutcome {
            timestamp: Some(timestamp),
            update,
            recorded,
            events,
        })
    }

    /// Feed empty frames if the camera has been silent past its timeout.
    ///
    /// The gap is replayed as empty frames paced by `frame_interval_seconds`,
    /// at most `lost_after_misses` of them, the last one at `now`. Stopped
    /// cameras and cameras without a first frame are left alone.
    pub fn check_timeout(&mut self, now: Timestamp) -> Vec<FrameOutcome> {
        let Some(last) = self.last_frame() else {
            return Vec::new();
        };
        let silent = elapsed_seconds(last, now);
        if !self.running || silent <= self.config.frame_timeout_seconds {
            return Vec::new();
        }

        let interval = self.config.frame_interval_seconds;
        let cap = self.tracker.config().lost_after_misses.max(1) as usize;
        let frames = ((silent / interval).ceil() as usize).clamp(1, cap);
        tracing::info!(
            camera = %self.camera_id,
            silent_seconds = silent,
            frames,
            "frame timeout, replaying empty frames"
        );

        let mut outcomes = Vec::with_capacity(frames);
        for k in 1..=frames {
            let at = if k == frames {
                now
            } else {
                last + TimeDelta::milliseconds((interval * 1000.0 * k as f64) as i64)
            };
            match self.apply(at, &[]) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::warn!(camera = %self.camera_id, error = %e, "timeout frame rejected");
                    break;
                }
            }
        }
        outcomes
    }

    /// Stop accepting frames. State is kept as is.
    pub fn stop(&mut self) {
        if self.running {
            tracing::info!(camera = %self.camera_id, "camera stopped");
        }
        self.running = false;
    }

    /// Accept frames again; Lost tracks keep aging from where they were.
    pub fn resume(&mut self) {
        if !self.running {
            tracing::info!(camera = %self.camera_id, "camera resumed");
        }
        self.running = true;
    }

    pub fn reset(&mut self, scope: ResetScope) {
        self.aggregator.reset(scope);
    }

    pub fn export(&self) -> CameraSnapshot {
        CameraSnapshot {
            camera_id: self.camera_id.clone(),
            running: self.running,
            last_frame: self.last_frame(),
            frames_processed: self.tracker.frame_count(),
            tracks: self.tracker.snapshots(),
            archive: self.tracker.archive().cloned().collect(),
            aggregate: self.aggregator.snapshot(),
            busiest_hours: self.aggregator.busiest_hours(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{RuleKind, Severity};
    use crate::tracker::Rect;
    use chrono::{TimeZone, Utc};
    use nalgebra::Point2;

    fn at(ms: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 4, 2, 10, 0, 0).unwrap() + TimeDelta::milliseconds(ms)
    }

    fn det(x: f32, y: f32, ms: i64) -> Detection {
        Detection::new(
            "cam".into(),
            at(ms),
            Rect::from_center(Point2::new(x, y), 20.0, 40.0),
            0.9,
            "person",
        )
    }

    fn pipeline(rules: Vec<AnomalyRule>) -> CameraPipeline {
        CameraPipeline::new("cam".into(), &MonitorConfig::default(), rules.into())
    }

    #[test]
    fn test_confirmation_backfills_streak() {
        let mut p = pipeline(vec![]);
        let mut recorded = Vec::new();
        for i in 0..5 {
            let ms = i * 200;
            let outcome = p.process_frame(at(ms), &[det(100.0 + 5.0 * i as f32, 100.0, ms)]).unwrap();
            recorded.push(outcome.recorded);
        }
        assert_eq!(recorded, vec![0, 0, 3, 1, 1]);
        assert_eq!(p.aggregator().heatmap().total(), 5);
        assert_eq!(p.aggregator().histogram().total(), 5);
    }

    #[test]
    fn test_backfill_stays_in_its_day() {
        let mut p = pipeline(vec![]);
        let midnight = Utc.with_ymd_and_hms(2024, 9, 4, 0, 0, 0).unwrap();
        let mut recorded = Vec::new();
        for (i, ms) in [-400i64, -200, 0].into_iter().enumerate() {
            let ts = midnight + TimeDelta::milliseconds(ms);
            let det = Detection::new(
                "cam".into(),
                ts,
                Rect::from_center(Point2::new(100.0 + 5.0 * i as f32, 100.0), 20.0, 40.0),
                0.9,
                "person",
            );
            recorded.push(p.process_frame(ts, &[det]).unwrap().recorded);
        }
        // confirmed at midnight; the two frames before it belong to the closed day
        assert_eq!(recorded, vec![0, 0, 1]);
        let snap = p.aggregator().snapshot();
        assert_eq!(snap.period_start, Some(midnight.date_naive()));
        assert_eq!(snap.histogram.get(23), 0);
        assert_eq!(snap.histogram.get(0), 1);
        assert_eq!(snap.heatmap.total(), 1);
    }

    #[test]
    fn test_tentative_tracks_never_recorded() {
        let mut p = pipeline(vec![]);
        p.process_frame(at(0), &[det(100.0, 100.0, 0)]).unwrap();
        p.process_frame(at(200), &[det(100.0, 100.0, 200)]).unwrap();
        p.process_frame(at(400), &[]).unwrap();
        p.process_frame(at(600), &[]).unwrap();
        assert_eq!(p.aggregator().heatmap().total(), 0);
        assert!(p.tracker().tracks().next().is_none());
    }

    #[test]
    fn test_stopped_camera_rejects_frames() {
        let mut p = pipeline(vec![]);
        p.process_frame(at(0), &[det(10.0, 10.0, 0)]).unwrap();
        p.stop();
        assert_eq!(
            p.process_frame(at(200), &[]),
            Err(PipelineError::CameraStopped("cam".into()))
        );
        assert_eq!(p.last_frame(), Some(at(0)));
        p.resume();
        assert!(p.process_frame(at(400), &[]).is_ok());
    }

    #[test]
    fn test_out_of_order_leaves_state() {
        let mut p = pipeline(vec![]);
        p.process_frame(at(1000), &[det(10.0, 10.0, 1000)]).unwrap();
        let before = p.export();
        assert!(matches!(
            p.process_frame(at(500), &[]),
            Err(PipelineError::OutOfOrder { .. })
        ));
        assert_eq!(p.export(), before);
    }

    #[test]
    fn test_timeout_ages_tracks_to_lost() {
        let mut p = pipeline(vec![]);
        for i in 0..3 {
            p.process_frame(at(i * 200), &[det(100.0, 100.0, i * 200)]).unwrap();
        }
        // within the timeout nothing happens
        assert!(p.check_timeout(at(5400)).is_empty());

        let outcomes = p.check_timeout(at(10_000));
        assert_eq!(outcomes.len(), 10);
        assert_eq!(outcomes.last().and_then(|o| o.timestamp), Some(at(10_000)));
        let track = p.tracker().tracks().next().unwrap();
        assert_eq!(track.state, TrackState::Lost);
        assert_eq!(p.last_frame(), Some(at(10_000)));
    }

    #[test]
    fn test_timeout_skips_stopped_camera() {
        let mut p = pipeline(vec![]);
        p.process_frame(at(0), &[]).unwrap();
        p.stop();
        assert!(p.check_timeout(at(60_000)).is_empty());
    }

    #[test]
    fn test_no_activity_fires_from_timeout() {
        let rule = AnomalyRule {
            id: "idle".into(),
            kind: RuleKind::NoActivity {
                threshold_seconds: 30.0,
                active_hours: None,
            },
            severity: Severity::Info,
            cooldown_seconds: 600.0,
        };
        let mut p = pipeline(vec![rule]);
        p.process_frame(at(0), &[]).unwrap();
        let events: Vec<_> = p
            .check_timeout(at(31_000))
            .into_iter()
            .flat_map(|o| o.events)
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, at(31_000));
    }

    #[test]
    fn test_export_snapshot_serializes() {
        let mut p = pipeline(vec![]);
        for i in 0..3 {
            p.process_frame(at(i * 200), &[det(100.0, 100.0, i * 200)]).unwrap();
        }
        let snapshot = p.export();
        assert_eq!(snapshot.tracks.len(), 1);
        assert_eq!(snapshot.frames_processed, 3);
        assert_eq!(snapshot.busiest_hours, vec![(10, 3)]);
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: CameraSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.camera_id, snapshot.camera_id);
        assert_eq!(back.aggregate.heatmap.total(), 3);
    }
}
