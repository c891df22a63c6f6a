//! Integration module connecting detection sources, camera pipelines and
//! alert consumers.
//!
//! Detection models, camera I/O and dashboards live outside this crate; this
//! module holds the contracts they plug into and the [`Monitor`] that drives
//! one pipeline per camera.

mod alert_log;
mod builder;
mod detector;
mod dispatcher;
mod monitor;
mod pipeline;

pub use alert_log::{AlertLog, AlertLogConfig};
pub use builder::DetectionBuilder;
pub use detector::{
    DetectionSource, Frame, FrameInput, FrameReplay, JsonLinesSource,
    WireDetection, WireTimestamp,
};
pub use dispatcher::{
    AlertDispatcher, AlertSink, DispatchStats, DispatcherConfig, JsonLinesSink, LogSink,
    MemorySink, RecordingDispatcher, RetryingDispatcher,
};
pub use monitor::Monitor;
pub use pipeline::{CameraPipeline, CameraSnapshot, FrameOutcome, PipelineConfig};
