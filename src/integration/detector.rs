//! Detection input: the source trait and the JSON frame wire format.

use std::collections::VecDeque;
use std::io::BufRead;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::tracker::{CameraId, Detection, Rect, Timestamp};

/// One camera frame worth of detections.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub camera_id: CameraId,
    pub timestamp: Timestamp,
    pub detections: Vec<Detection>,
}

/// Trait for anything that yields detection frames.
///
/// Implement this to connect a detection model or a recorded log to the
/// monitor. Frames from different cameras may be interleaved.
///
/// # Example
///
/// ```ignore
/// use occutrack_rs::{DetectionSource, Frame};
///
/// struct MyDetector {
///     // Your model here
/// }
///
/// impl DetectionSource for MyDetector {
///     type Error = std::io::Error;
///
///     fn next_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
///         // Grab a frame, run inference, return detections
///         Ok(None)
///     }
/// }
/// ```
pub trait DetectionSource {
    /// Error type for detection failures.
    type Error;

    /// The next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, Self::Error>;
}

/// Frame timestamp as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    /// Seconds since the Unix epoch
    Epoch(f64),
    /// ISO-8601; a value without offset is taken as UTC
    Iso(String),
}

impl WireTimestamp {
    pub fn to_timestamp(&self) -> Option<Timestamp> {
        match self {
            WireTimestamp::Epoch(secs) => {
                if !secs.is_finite() {
                    return None;
                }
                DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
            }
            WireTimestamp::Iso(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                        .ok()
                        .map(|naive| naive.and_utc())
                }),
        }
    }
}

/// One detection as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireDetection {
    /// `[x, y, w, h]` in frame coordinates
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub label: String,
}

/// One frame as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameInput {
    pub camera_id: CameraId,
    pub timestamp: WireTimestamp,
    #[serde(default)]
    pub detections: Vec<WireDetection>,
}

impl FrameInput {
    /// Resolve the timestamp and stamp every detection with the frame's
    /// camera and time. Returns `None` if the timestamp is unreadable.
    pub fn into_frame(self) -> Option<Frame> {
        let timestamp = self.timestamp.to_timestamp()?;
        let detections = self
            .detections
            .into_iter()
            .map(|d| {
                let [x, y, w, h] = d.bbox;
                Detection::new(
                    self.camera_id.clone(),
                    timestamp,
                    Rect::new(x, y, w, h),
                    d.confidence,
                    d.label,
                )
            })
            .collect();
        Some(Frame {
            camera_id: self.camera_id,
            timestamp,
            detections,
        })
    }
}

/// Reads one JSON [`FrameInput`] per line. Blank lines are skipped.
pub struct JsonLinesSource<R> {
    reader: R,
    line: usize,
    buf: String,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buf: String::new(),
        }
    }

    /// Lines consumed so far.
    pub fn line(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> DetectionSource for JsonLinesSource<R> {
    type Error = SourceError;

    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line += 1;
            let text = self.buf.trim();
            if text.is_empty() {
                continue;
            }
            let input: FrameInput = serde_json::from_str(text).map_err(|source| {
                SourceError::Parse {
                    line: self.line,
                    source,
                }
            })?;
            let value = match &input.timestamp {
                WireTimestamp::Epoch(secs) => secs.to_string(),
                WireTimestamp::Iso(s) => s.clone(),
            };
            return match input.into_frame() {
                Some(frame) => Ok(Some(frame)),
                None => Err(SourceError::Timestamp {
                    line: self.line,
                    value,
                }),
            };
        }
    }
}

/// Replays frames held in memory, in order.
#[derive(Debug, Clone, Default)]
pub struct FrameReplay {
    frames: VecDeque<Frame>,
}

impl FrameReplay {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }
}

impl DetectionSource for FrameReplay {
    type Error = std::convert::Infallible;

    fn next_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
        Ok(self.frames.pop_front())
    }
}
