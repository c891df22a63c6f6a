mod centroid_tracker;
mod detection;
mod matching;
mod rect;
mod track;
mod track_state;

pub use centroid_tracker::{FrameUpdate, Tracker, TrackerConfig};
pub use detection::{CameraId, Detection, Timestamp, elapsed_seconds};
pub use matching::{
    AssignmentResult, DistanceMetric, MatchStrategy, greedy_assignment, linear_assignment,
};
pub use rect::Rect;
pub use track::{Observation, Track, TrackId, TrackSnapshot, TrackSummary};
pub use track_state::TrackState;
