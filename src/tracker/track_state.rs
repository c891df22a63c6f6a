use serde::{Deserialize, Serialize};

/// Track state enumeration for object tracking lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    /// Newly created track, not yet confirmed
    #[default]
    Tentative,
    /// Matched for enough consecutive frames to be trusted
    Confirmed,
    /// Missed for too many frames; kept for a grace period
    Lost,
}

impl TrackState {
    /// Tentative and Confirmed tracks take part in primary association.
    pub fn is_live(self) -> bool {
        !matches!(self, TrackState::Lost)
    }
}
