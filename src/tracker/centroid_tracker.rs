//! Per-camera centroid tracker: association, track lifecycle and archival.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use nalgebra::Point2;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, PipelineError};
use crate::tracker::detection::{CameraId, Detection, Timestamp, elapsed_seconds};
use crate::tracker::matching::{self, AssignmentResult, DistanceMetric, MatchStrategy};
use crate::tracker::rect::Rect;
use crate::tracker::track::{Track, TrackId, TrackSnapshot, TrackSummary};
use crate::tracker::track_state::TrackState;

/// Configuration for the Tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Costs strictly below this are matches (pixels for euclidean, 1-IoU for iou)
    pub gate_distance: f32,
    pub metric: DistanceMetric,
    pub strategy: MatchStrategy,
    /// Consecutive matches needed for Tentative -> Confirmed
    pub confirm_hits: u32,
    /// Consecutive misses needed for Confirmed -> Lost
    pub lost_after_misses: u32,
    /// Consecutive misses after which a Tentative track is discarded
    pub tentative_max_misses: u32,
    /// How long a Lost track is kept before archival
    pub lost_grace_seconds: f64,
    /// Observations kept per track
    pub history_len: usize,
    /// Extrapolate tracks that missed along their last velocity
    pub predict_motion: bool,
    /// Let unmatched detections revive Lost tracks in grace
    pub reacquire_lost: bool,
    /// Detections below this confidence are ignored
    pub min_confidence: f32,
    /// Labels to track; empty tracks every label
    pub labels: Vec<String>,
    /// Archived session summaries kept per camera
    pub archive_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            gate_distance: 80.0,
            metric: DistanceMetric::Euclidean,
            strategy: MatchStrategy::Greedy,
            confirm_hits: 3,
            lost_after_misses: 10,
            tentative_max_misses: 2,
            lost_grace_seconds: 30.0,
            history_len: 32,
            predict_motion: true,
            reacquire_lost: true,
            min_confidence: 0.35,
            labels: vec!["person".to_string()],
            archive_capacity: 256,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.gate_distance.is_finite() && self.gate_distance > 0.0) {
            return Err(ConfigError::invalid("tracker.gate_distance", "must be a positive number"));
        }
        if self.metric == DistanceMetric::Iou && self.gate_distance > 1.0 {
            return Err(ConfigError::invalid(
                "tracker.gate_distance",
                "iou gate is a 1-IoU cost and must be at most 1",
            ));
        }
        if self.confirm_hits == 0 {
            return Err(ConfigError::invalid("tracker.confirm_hits", "must be at least 1"));
        }
        if self.lost_after_misses == 0 {
            return Err(ConfigError::invalid("tracker.lost_after_misses", "must be at least 1"));
        }
        if self.tentative_max_misses == 0 {
            return Err(ConfigError::invalid("tracker.tentative_max_misses", "must be at least 1"));
        }
        if !(self.lost_grace_seconds.is_finite() && self.lost_grace_seconds >= 0.0) {
            return Err(ConfigError::invalid("tracker.lost_grace_seconds", "must be >= 0"));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::invalid("tracker.min_confidence", "must be within [0, 1]"));
        }
        Ok(())
    }

    fn accepts_label(&self, label: &str) -> bool {
        self.labels.is_empty() || self.labels.iter().any(|l| l == label)
    }
}

/// What one call to [`Tracker::update`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameUpdate {
    /// Live tracks matched to a detection
    pub matched: Vec<TrackId>,
    /// Tracks spawned from unmatched detections
    pub created: Vec<TrackId>,
    /// Live tracks without a detection this frame
    pub missed: Vec<TrackId>,
    /// Tracks that became Confirmed this frame, reacquired ones included
    pub confirmed: Vec<TrackId>,
    /// Lost tracks matched again
    pub reacquired: Vec<TrackId>,
    /// Tracks that turned Lost this frame
    pub lost: Vec<TrackId>,
    /// Tracks dropped from the store this frame
    pub removed: Vec<TrackSummary>,
    /// Malformed detections rejected
    pub dropped_detections: usize,
    /// Valid detections skipped by label or confidence filters
    pub filtered_detections: usize,
}

impl FrameUpdate {
    /// Every track id touched this frame.
    pub fn changed(&self) -> BTreeSet<TrackId> {
        self.matched
            .iter()
            .chain(&self.created)
            .chain(&self.missed)
            .chain(&self.reacquired)
            .copied()
            .chain(self.removed.iter().map(|s| s.id))
            .collect()
    }
}

/// Tracks objects for one camera.
///
/// Owns every track of its camera; readers only ever get snapshots.
pub struct Tracker {
    camera_id: CameraId,
    config: TrackerConfig,
    tracks: BTreeMap<TrackId, Track>,
    archive: VecDeque<TrackSummary>,
    next_id: u64,
    last_timestamp: Option<Timestamp>,
    frame_count: u64,
}

impl Tracker {
    pub fn new(camera_id: CameraId, config: TrackerConfig) -> Self {
        Self {
            camera_id,
            config,
            tracks: BTreeMap::new(),
            archive: VecDeque::new(),
            next_id: 1,
            last_timestamp: None,
            frame_count: 0,
        }
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.last_timestamp
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    /// All tracks in id order, Lost ones included.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    /// Snapshots of Tentative and Confirmed tracks.
    pub fn active_tracks(&self) -> Vec<TrackSnapshot> {
        self.tracks
            .values()
            .filter(|t| t.state.is_live())
            .map(Track::snapshot)
            .collect()
    }

    /// Snapshots of every track in the store.
    pub fn snapshots(&self) -> Vec<TrackSnapshot> {
        self.tracks.values().map(Track::snapshot).collect()
    }

    pub fn confirmed_count(&self) -> usize {
        self.tracks
            .values()
            .filter(|t| t.state == TrackState::Confirmed)
            .count()
    }

    /// Session summaries of archived tracks, oldest first.
    pub fn archive(&self) -> impl Iterator<Item = &TrackSummary> {
        self.archive.iter()
    }

    /// Process one frame of detections.
    ///
    /// An empty slice is a valid frame in which every track misses. Frames
    /// older than the last processed one are rejected and leave the tracker
    /// untouched.
    pub fn update(
        &mut self,
        timestamp: Timestamp,
        detections: &[Detection],
    ) -> Result<FrameUpdate, PipelineError> {
        if let Some(last) = self.last_timestamp {
            if timestamp < last {
                return Err(PipelineError::OutOfOrder {
                    camera: self.camera_id.clone(),
                    last,
                    got: timestamp,
                });
            }
        }
        self.last_timestamp = Some(timestamp);
        self.frame_count += 1;

        let mut out = FrameUpdate::default();

        // Step 1: Drop malformed and filtered detections
        let detections: Vec<&Detection> = detections
            .iter()
            .filter(|det| self.accept(det, &mut out))
            .collect();

        // Step 2: Associate live tracks with detections
        let live: Vec<TrackId> = self
            .tracks
            .values()
            .filter(|t| t.state.is_live())
            .map(|t| t.id)
            .collect();
        let det_idx: Vec<usize> = (0..detections.len()).collect();

        let AssignmentResult {
            matches,
            unmatched_tracks,
            unmatched_detections,
        } = self.associate(&live, &detections, &det_idx, timestamp, self.config.predict_motion);

        for (row, col) in matches {
            let id = live[row];
            let Some(track) = self.tracks.get_mut(&id) else {
                continue;
            };
            track.update(detections[col]);
            out.matched.push(id);
            if track.state == TrackState::Tentative && track.hits >= self.config.confirm_hits {
                track.mark_confirmed();
                out.confirmed.push(id);
                tracing::info!(camera = %self.camera_id, track = %id, "track confirmed");
            }
        }

        // Step 3: Offer leftover detections to Lost tracks still in grace
        let mut remaining: Vec<usize> = unmatched_detections;
        if self.config.reacquire_lost && !remaining.is_empty() {
            let lost: Vec<TrackId> = self
                .tracks
                .values()
                .filter(|t| t.state == TrackState::Lost)
                .map(|t| t.id)
                .collect();
            if !lost.is_empty() {
                let result = self.associate(&lost, &detections, &remaining, timestamp, false);
                for &(row, col) in &result.matches {
                    let id = lost[row];
                    let Some(track) = self.tracks.get_mut(&id) else {
                        continue;
                    };
                    track.re_activate(detections[col]);
                    out.reacquired.push(id);
                    out.confirmed.push(id);
                    tracing::info!(camera = %self.camera_id, track = %id, "lost track reacquired");
                }
                remaining = result.unmatched_detections;
            }
        }

        // Step 4: Init new tracks
        for idx in remaining {
            let id = TrackId(self.next_id);
            self.next_id += 1;
            let mut track = Track::new(id, detections[idx], self.config.history_len);
            if self.config.confirm_hits <= 1 {
                track.mark_confirmed();
                out.confirmed.push(id);
            }
            tracing::debug!(camera = %self.camera_id, track = %id, "track created");
            self.tracks.insert(id, track);
            out.created.push(id);
        }

        // Step 5: Age unmatched live tracks
        let mut discard = Vec::new();
        for row in unmatched_tracks {
            let id = live[row];
            let Some(track) = self.tracks.get_mut(&id) else {
                continue;
            };
            track.mark_missed();
            out.missed.push(id);
            let state = track.state;
            match state {
                TrackState::Confirmed if track.misses >= self.config.lost_after_misses => {
                    track.mark_lost(timestamp);
                    out.lost.push(id);
                    tracing::info!(
                        camera = %self.camera_id,
                        track = %id,
                        misses = track.misses,
                        "track lost"
                    );
                }
                TrackState::Tentative if track.misses >= self.config.tentative_max_misses => {
                    discard.push(id);
                }
                _ => {}
            }
        }

        // Step 6: Expire Lost tracks past their grace period
        let grace = self.config.lost_grace_seconds;
        for track in self.tracks.values_mut() {
            if track.state != TrackState::Lost || out.lost.contains(&track.id) {
                continue;
            }
            track.mark_missed();
            let expired = track
                .lost_since
                .is_some_and(|since| elapsed_seconds(since, timestamp) > grace);
            if expired {
                discard.push(track.id);
            }
        }

        for id in discard {
            if let Some(track) = self.tracks.remove(&id) {
                let summary = track.summary();
                tracing::debug!(
                    camera = %self.camera_id,
                    track = %id,
                    dwell = summary.dwell_seconds,
                    "track removed"
                );
                if summary.confirmed {
                    self.push_archive(summary.clone());
                }
                out.removed.push(summary);
            }
        }

        Ok(out)
    }

    fn accept(&self, det: &Detection, out: &mut FrameUpdate) -> bool {
        if det.camera_id != self.camera_id {
            tracing::warn!(
                camera = %self.camera_id,
                detection_camera = %det.camera_id,
                "dropping detection addressed to another camera"
            );
            out.dropped_detections += 1;
            return false;
        }
        if let Err(e) = det.validate() {
            tracing::warn!(camera = %self.camera_id, error = %e, "dropping malformed detection");
            out.dropped_detections += 1;
            return false;
        }
        if det.confidence < self.config.min_confidence || !self.config.accepts_label(&det.label) {
            out.filtered_detections += 1;
            return false;
        }
        true
    }

    /// Match `ids` (rows, in id order) against the detections selected by `cols`.
    fn associate(
        &self,
        ids: &[TrackId],
        detections: &[&Detection],
        cols: &[usize],
        timestamp: Timestamp,
        predict: bool,
    ) -> AssignmentResult {
        let tracks: Vec<&Track> = ids.iter().filter_map(|id| self.tracks.get(id)).collect();
        let cost: Array2<f32> = match self.config.metric {
            DistanceMetric::Euclidean => {
                let points: Vec<Point2<f32>> = tracks
                    .iter()
                    .map(|t| if predict { t.predict(timestamp) } else { t.centroid() })
                    .collect();
                let det_points: Vec<Point2<f32>> =
                    cols.iter().map(|&j| detections[j].bbox.center()).collect();
                matching::euclidean_distance(&points, &det_points)
            }
            DistanceMetric::Iou => {
                let rects: Vec<Rect> = tracks
                    .iter()
                    .map(|t| if predict { t.predicted_rect(timestamp) } else { t.rect() })
                    .collect();
                let det_rects: Vec<Rect> = cols.iter().map(|&j| detections[j].bbox).collect();
                matching::iou_distance(&rects, &det_rects)
            }
        };
        let mut result = matching::assign(&cost, self.config.gate_distance, self.config.strategy);
        // map local columns back to indices into `detections`
        for m in result.matches.iter_mut() {
            m.1 = cols[m.1];
        }
        for j in result.unmatched_detections.iter_mut() {
            *j = cols[*j];
        }
        result
    }

    fn push_archive(&mut self, summary: TrackSummary) {
        if self.config.archive_capacity == 0 {
            return;
        }
        if self.archive.len() == self.config.archive_capacity {
            self.archive.pop_front();
        }
        self.archive.push_back(summary);
    }
}
