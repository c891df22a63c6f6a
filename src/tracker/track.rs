//! Single object track for multi-object tracking.

use std::collections::VecDeque;
use std::fmt;

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

use crate::tracker::detection::{CameraId, Detection, Timestamp, elapsed_seconds};
use crate::tracker::rect::Rect;
use crate::tracker::track_state::TrackState;

/// Track identifier. Monotonic within a tracker and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One matched detection in a track's history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: Timestamp,
    pub centroid: Point2<f32>,
    pub bbox: Rect,
}

impl Observation {
    fn from_detection(det: &Detection) -> Self {
        Self {
            timestamp: det.timestamp,
            centroid: det.bbox.center(),
            bbox: det.bbox,
        }
    }
}

/// Single object track.
#[derive(Debug, Clone)]
pub struct Track {
    /// Unique track identifier
    pub id: TrackId,
    pub camera_id: CameraId,
    /// Current track state
    pub state: TrackState,
    /// Consecutive successful matches
    pub hits: u32,
    /// Consecutive frames without a match
    pub misses: u32,
    pub created_at: Timestamp,
    /// Time of the last matched detection
    pub updated_at: Timestamp,
    /// Set while the track is Lost
    pub lost_since: Option<Timestamp>,
    /// Confidence of the last matched detection
    pub confidence: f32,
    /// Total matched detections over the track's life
    pub observation_count: u64,
    history: VecDeque<Observation>,
    history_len: usize,
}

impl Track {
    /// Create a new Tentative track from an unmatched detection.
    pub fn new(id: TrackId, det: &Detection, history_len: usize) -> Self {
        let history_len = history_len.max(2);
        let mut history = VecDeque::with_capacity(history_len);
        history.push_back(Observation::from_detection(det));
        Self {
            id,
            camera_id: det.camera_id.clone(),
            state: TrackState::Tentative,
            hits: 1,
            misses: 0,
            created_at: det.timestamp,
            updated_at: det.timestamp,
            lost_since: None,
            confidence: det.confidence,
            observation_count: 1,
            history,
            history_len,
        }
    }

    /// Most recent observation. A track always holds at least one.
    pub fn last(&self) -> &Observation {
        // history is seeded in `new` and only ever trimmed from the front
        // down to `history_len >= 2`
        &self.history[self.history.len() - 1]
    }

    pub fn centroid(&self) -> Point2<f32> {
        self.last().centroid
    }

    pub fn rect(&self) -> Rect {
        self.last().bbox
    }

    pub fn history(&self) -> impl Iterator<Item = &Observation> {
        self.history.iter()
    }

    /// Velocity in pixels per second, from the last two observed centroids.
    pub fn velocity(&self) -> Vector2<f32> {
        let n = self.history.len();
        if n < 2 {
            return Vector2::zeros();
        }
        let (prev, last) = (&self.history[n - 2], &self.history[n - 1]);
        let dt = elapsed_seconds(prev.timestamp, last.timestamp);
        if dt <= 0.0 {
            return Vector2::zeros();
        }
        (last.centroid - prev.centroid) / dt as f32
    }

    /// Expected centroid at `at`.
    ///
    /// Tracks matched on the previous frame stay put; tracks that have
    /// missed are extrapolated along their last velocity.
    pub fn predict(&self, at: Timestamp) -> Point2<f32> {
        let last = self.last();
        if self.misses == 0 {
            return last.centroid;
        }
        let dt = elapsed_seconds(last.timestamp, at).max(0.0) as f32;
        last.centroid + self.velocity() * dt
    }

    /// Last box moved to the predicted centroid.
    pub fn predicted_rect(&self, at: Timestamp) -> Rect {
        let bbox = self.rect();
        Rect::from_center(self.predict(at), bbox.width, bbox.height)
    }

    /// Record a matched detection.
    pub fn update(&mut self, det: &Detection) {
        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(Observation::from_detection(det));
        self.hits += 1;
        self.misses = 0;
        self.updated_at = det.timestamp;
        self.confidence = det.confidence;
        self.observation_count += 1;
    }

    /// Record a frame without a match.
    pub fn mark_missed(&mut self) {
        self.misses += 1;
        self.hits = 0;
    }

    pub fn mark_confirmed(&mut self) {
        self.state = TrackState::Confirmed;
        self.lost_since = None;
    }

    pub fn mark_lost(&mut self, at: Timestamp) {
        self.state = TrackState::Lost;
        self.lost_since = Some(at);
    }

    /// Bring a Lost track back with a fresh detection, keeping its id.
    pub fn re_activate(&mut self, det: &Detection) {
        self.update(det);
        self.mark_confirmed();
    }

    /// The observations of the current match streak, oldest first.
    pub fn streak(&self) -> impl Iterator<Item = &Observation> {
        let n = (self.hits as usize).min(self.history.len());
        self.history.iter().skip(self.history.len() - n)
    }

    /// Seconds between creation and the last matched detection.
    pub fn dwell_seconds(&self) -> f64 {
        elapsed_seconds(self.created_at, self.updated_at)
    }

    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            id: self.id,
            camera_id: self.camera_id.clone(),
            state: self.state,
            centroid: self.centroid(),
            bbox: self.rect(),
            velocity: self.velocity(),
            hits: self.hits,
            misses: self.misses,
            confidence: self.confidence,
            created_at: self.created_at,
            updated_at: self.updated_at,
            lost_since: self.lost_since,
            history: self.history.iter().copied().collect(),
        }
    }

    pub fn summary(&self) -> TrackSummary {
        TrackSummary {
            id: self.id,
            camera_id: self.camera_id.clone(),
            first_seen: self.created_at,
            last_seen: self.updated_at,
            dwell_seconds: self.dwell_seconds(),
            observations: self.observation_count,
            confirmed: self.state != TrackState::Tentative,
        }
    }
}

/// Immutable copy of a track handed to readers outside the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSnapshot {
    pub id: TrackId,
    pub camera_id: CameraId,
    pub state: TrackState,
    pub centroid: Point2<f32>,
    pub bbox: Rect,
    pub velocity: Vector2<f32>,
    pub hits: u32,
    pub misses: u32,
    pub confidence: f32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub lost_since: Option<Timestamp>,
    pub history: Vec<Observation>,
}

impl TrackSnapshot {
    /// Seconds since the track was created, as of `now`.
    pub fn age_seconds(&self, now: Timestamp) -> f64 {
        elapsed_seconds(self.created_at, now)
    }
}

/// Session record kept after a track is archived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub id: TrackId,
    pub camera_id: CameraId,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    pub dwell_seconds: f64,
    pub observations: u64,
    /// False for tentative tracks discarded before confirmation
    pub confirmed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone, Utc};

    fn t(ms: i64) -> Timestamp {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn det_at(x: f32, y: f32, ms: i64) -> Detection {
        Detection::new(
            "cam".into(),
            t(ms),
            Rect::from_center(Point2::new(x, y), 20.0, 40.0),
            0.9,
            "person",
        )
    }

    #[test]
    fn test_velocity_from_last_two_observations() {
        let mut track = Track::new(TrackId(1), &det_at(100.0, 100.0, 0), 8);
        assert_eq!(track.velocity(), Vector2::zeros());

        track.update(&det_at(110.0, 100.0, 500));
        let v = track.velocity();
        assert!((v.x - 20.0).abs() < 1e-4);
        assert!(v.y.abs() < 1e-4);
    }

    #[test]
    fn test_predict_only_after_miss() {
        let mut track = Track::new(TrackId(1), &det_at(100.0, 100.0, 0), 8);
        track.update(&det_at(110.0, 100.0, 1000));

        let at = t(2000);
        assert_eq!(track.predict(at), Point2::new(110.0, 100.0));

        track.mark_missed();
        let p = track.predict(at);
        assert!((p.x - 120.0).abs() < 1e-4);
        assert!((p.y - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut track = Track::new(TrackId(1), &det_at(0.0, 0.0, 0), 3);
        for i in 1..10 {
            track.update(&det_at(i as f32, 0.0, i * 100));
        }
        assert_eq!(track.history().count(), 3);
        assert_eq!(track.observation_count, 10);
        assert_eq!(track.centroid(), Point2::new(9.0, 0.0));
    }

    #[test]
    fn test_streak_covers_consecutive_hits() {
        let mut track = Track::new(TrackId(1), &det_at(0.0, 0.0, 0), 8);
        track.update(&det_at(1.0, 0.0, 100));
        track.mark_missed();
        track.update(&det_at(3.0, 0.0, 300));
        track.update(&det_at(4.0, 0.0, 400));

        let xs: Vec<f32> = track.streak().map(|o| o.centroid.x).collect();
        assert_eq!(xs, vec![3.0, 4.0]);
    }

    #[test]
    fn test_summary_dwell() {
        let mut track = Track::new(TrackId(4), &det_at(0.0, 0.0, 0), 8);
        track.update(&det_at(0.0, 0.0, 2500));
        track.mark_confirmed();
        let summary = track.summary();
        assert_eq!(summary.id, TrackId(4));
        assert!((summary.dwell_seconds - 2.5).abs() < 1e-9);
        assert!(summary.confirmed);
        assert_eq!(summary.last_seen - summary.first_seen, TimeDelta::milliseconds(2500));
    }
}
