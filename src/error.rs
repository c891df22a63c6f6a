//! Error types shared across the crate.

use crate::tracker::{CameraId, Timestamp};

/// Configuration errors. Raised at load time, never during evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A rule kind requires a threshold that was not supplied.
    #[error("rule `{rule}` is missing required field `{field}`")]
    MissingThreshold { rule: String, field: &'static str },

    /// A value was supplied but is out of range or inconsistent.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Two rules share the same id.
    #[error("duplicate rule id `{0}`")]
    DuplicateRule(String),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors signalled by a camera pipeline for a single frame.
///
/// The pipeline stays usable after any of these; the offending frame is
/// simply not applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("frame for camera `{camera}` at {got} is older than last processed frame at {last}")]
    OutOfOrder {
        camera: CameraId,
        last: Timestamp,
        got: Timestamp,
    },

    #[error("camera `{0}` is stopped")]
    CameraStopped(CameraId),

    #[error("unknown camera `{0}`")]
    UnknownCamera(CameraId),
}

/// Reasons a single detection is rejected before tracking.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DetectionError {
    #[error("bounding box has non-finite coordinates")]
    NonFinite,

    #[error("bounding box has negative dimensions ({width}x{height})")]
    NegativeSize { width: f32, height: f32 },

    #[error("confidence {0} is outside [0, 1]")]
    Confidence(f32),
}

/// Failures reading frames from a detection source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to read detections: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: invalid frame: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("line {line}: unrecognised timestamp `{value}`")]
    Timestamp { line: usize, value: String },
}

/// Failures at the alert dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatch queue is full")]
    QueueFull,

    #[error("dispatcher has shut down")]
    Disconnected,

    #[error("sink `{sink}` failed: {reason}")]
    Sink { sink: String, reason: String },
}
