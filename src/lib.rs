//! Multi-camera person tracking with occupancy analytics and rule-based
//! anomaly alerts.
//!
//! Per-frame detections go through a [`Tracker`], a [`TemporalAggregator`]
//! and an [`AnomalyEngine`] for each camera; the [`Monitor`] keeps one such
//! pipeline per camera and forwards events to an [`AlertDispatcher`].

pub mod analytics;
pub mod anomaly;
pub mod config;
pub mod error;
pub mod integration;
pub mod tracker;

pub use analytics::{
    AggregateSnapshot, AggregatorConfig, HeatmapGrid, HourHistogram, ResetScope,
    TemporalAggregator,
};
pub use anomaly::{AnomalyEngine, AnomalyEvent, AnomalyRule, RuleKind, RulesConfig, Severity};
pub use config::MonitorConfig;
pub use error::{ConfigError, DetectionError, DispatchError, PipelineError, SourceError};
pub use integration::{
    AlertDispatcher, AlertSink, CameraPipeline, CameraSnapshot, DetectionBuilder, DetectionSource,
    Frame, FrameOutcome, JsonLinesSource, Monitor, RetryingDispatcher,
};
pub use tracker::{
    CameraId, Detection, Rect, Timestamp, Track, TrackId, TrackSnapshot, TrackState, Tracker,
    TrackerConfig,
};
