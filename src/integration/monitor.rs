//! Multi-camera registry and the query API read by dashboards.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::analytics::{AggregateSnapshot, HeatmapGrid, ResetScope};
use crate::anomaly::{AnomalyEvent, AnomalyRule};
use crate::config::MonitorConfig;
use crate::error::{ConfigError, PipelineError};
use crate::integration::alert_log::AlertLog;
use crate::integration::detector::Frame;
use crate::integration::dispatcher::AlertDispatcher;
use crate::integration::pipeline::{CameraPipeline, CameraSnapshot, FrameOutcome};
use crate::tracker::{CameraId, Detection, Timestamp, TrackSnapshot, TrackSummary};

type SharedPipeline = Arc<Mutex<CameraPipeline>>;

/// Runs one pipeline per camera and fans their events out.
///
/// Pipelines are created on a camera's first frame. Each one sits behind its
/// own lock, so frames of different cameras can be processed from different
/// threads while frames of one camera are serialized. Every query returns
/// copies.
pub struct Monitor {
    config: MonitorConfig,
    rules: Arc<[AnomalyRule]>,
    cameras: RwLock<HashMap<CameraId, SharedPipeline>>,
    alerts: Mutex<AlertLog>,
    dispatcher: Arc<dyn AlertDispatcher>,
}

impl Monitor {
    /// Validate the configuration and load the rules. Fails on any
    /// misconfigured rule.
    pub fn new(
        config: MonitorConfig,
        dispatcher: Arc<dyn AlertDispatcher>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let rules = config.load_rules()?;
        tracing::info!(rules = rules.len(), "monitor ready");
        Ok(Self {
            alerts: Mutex::new(AlertLog::new(config.alerts.clone())),
            config,
            rules,
            cameras: RwLock::new(HashMap::new()),
            dispatcher,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn rules(&self) -> &[AnomalyRule] {
        &self.rules
    }

    /// Known cameras, sorted.
    pub fn cameras(&self) -> Vec<CameraId> {
        let mut ids: Vec<CameraId> = self.cameras.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn process(&self, frame: Frame) -> Result<FrameOutcome, PipelineError> {
        self.process_frame(&frame.camera_id, frame.timestamp, &frame.detections)
    }

    /// Run one frame of `camera_id`, then log and dispatch its events.
    pub fn process_frame(
        &self,
        camera_id: &CameraId,
        timestamp: Timestamp,
        detections: &[Detection],
    ) -> Result<FrameOutcome, PipelineError> {
        let pipeline = self.pipeline_or_create(camera_id);
        let outcome = pipeline.lock().process_frame(timestamp, detections)?;
        self.publish(&outcome.events);
        Ok(outcome)
    }

    /// Process a frame after replaying its own camera's silence up to the
    /// frame's timestamp. Other cameras are not touched, so their clocks may
    /// be skewed against this one.
    pub fn ingest(&self, frame: Frame) -> Result<FrameOutcome, PipelineError> {
        match self.check_timeout(&frame.camera_id, frame.timestamp) {
            Ok(_) | Err(PipelineError::UnknownCamera(_)) => {}
            Err(e) => return Err(e),
        }
        self.process(frame)
    }

    /// Replay one camera's silence as empty frames. Returns the events raised.
    pub fn check_timeout(
        &self,
        camera_id: &CameraId,
        now: Timestamp,
    ) -> Result<Vec<AnomalyEvent>, PipelineError> {
        let pipeline = self.pipeline(camera_id)?;
        Ok(self.replay_silence(&pipeline, now))
    }

    /// Replay every silent camera as empty frames against a single `now`.
    /// Returns the events raised.
    pub fn check_timeouts(&self, now: Timestamp) -> Vec<AnomalyEvent> {
        let pipelines: Vec<SharedPipeline> = self.cameras.read().values().cloned().collect();
        pipelines
            .iter()
            .flat_map(|pipeline| self.replay_silence(pipeline, now))
            .collect()
    }

    fn replay_silence(&self, pipeline: &SharedPipeline, now: Timestamp) -> Vec<AnomalyEvent> {
        let outcomes = pipeline.lock().check_timeout(now);
        let mut events = Vec::new();
        for outcome in outcomes {
            self.publish(&outcome.events);
            events.extend(outcome.events);
        }
        events
    }

    /// Live (Tentative and Confirmed) tracks of a camera.
    pub fn get_active_tracks(&self, camera_id: &CameraId) -> Result<Vec<TrackSnapshot>, PipelineError> {
        self.with_camera(camera_id, |p| p.tracker().active_tracks())
    }

    pub fn get_heatmap(&self, camera_id: &CameraId) -> Result<HeatmapGrid, PipelineError> {
        self.with_camera(camera_id, |p| p.aggregator().heatmap().clone())
    }

    /// `(hour, count)` pairs, busiest first.
    pub fn get_busiest_hours(&self, camera_id: &CameraId) -> Result<Vec<(u32, u64)>, PipelineError> {
        self.with_camera(camera_id, |p| p.aggregator().busiest_hours())
    }

    /// Logged events of a camera at or after `since`, oldest first.
    pub fn get_recent_alerts(&self, camera_id: &CameraId, since: Timestamp) -> Vec<AnomalyEvent> {
        self.alerts.lock().recent(camera_id, since)
    }

    pub fn get_archive(&self, camera_id: &CameraId) -> Result<Vec<TrackSummary>, PipelineError> {
        self.with_camera(camera_id, |p| p.tracker().archive().cloned().collect())
    }

    pub fn snapshot(&self, camera_id: &CameraId) -> Result<AggregateSnapshot, PipelineError> {
        self.with_camera(camera_id, |p| p.aggregator().snapshot())
    }

    pub fn export_snapshot(&self, camera_id: &CameraId) -> Result<CameraSnapshot, PipelineError> {
        self.with_camera(camera_id, CameraPipeline::export)
    }

    /// Clear a camera's aggregates. Other cameras are not touched.
    pub fn reset(&self, camera_id: &CameraId, scope: ResetScope) -> Result<(), PipelineError> {
        self.with_camera_mut(camera_id, |p| p.reset(scope))
    }

    pub fn stop_camera(&self, camera_id: &CameraId) -> Result<(), PipelineError> {
        self.with_camera_mut(camera_id, CameraPipeline::stop)
    }

    pub fn resume_camera(&self, camera_id: &CameraId) -> Result<(), PipelineError> {
        self.with_camera_mut(camera_id, CameraPipeline::resume)
    }

    fn pipeline(&self, camera_id: &CameraId) -> Result<SharedPipeline, PipelineError> {
        self.cameras
            .read()
            .get(camera_id)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownCamera(camera_id.clone()))
    }

    fn pipeline_or_create(&self, camera_id: &CameraId) -> SharedPipeline {
        if let Ok(pipeline) = self.pipeline(camera_id) {
            return pipeline;
        }
        let mut cameras = self.cameras.write();
        let pipeline = cameras.entry(camera_id.clone()).or_insert_with(|| {
            tracing::info!(camera = %camera_id, "camera registered");
            Arc::new(Mutex::new(CameraPipeline::new(
                camera_id.clone(),
                &self.config,
                Arc::clone(&self.rules),
            )))
        });
        Arc::clone(pipeline)
    }

    fn with_camera<T>(
        &self,
        camera_id: &CameraId,
        f: impl FnOnce(&CameraPipeline) -> T,
    ) -> Result<T, PipelineError> {
        let pipeline = self.pipeline(camera_id)?;
        let guard = pipeline.lock();
        Ok(f(&*guard))
    }

    fn with_camera_mut<T>(
        &self,
        camera_id: &CameraId,
        f: impl FnOnce(&mut CameraPipeline) -> T,
    ) -> Result<T, PipelineError> {
        let pipeline = self.pipeline(camera_id)?;
        let mut guard = pipeline.lock();
        Ok(f(&mut *guard))
    }

    /// Log events and hand them to the dispatcher. Dispatch failures and
    /// dispatcher panics end here.
    fn publish(&self, events: &[AnomalyEvent]) {
        if events.is_empty() {
            return;
        }
        {
            let mut log = self.alerts.lock();
            for event in events {
                log.push(event.clone());
            }
        }
        for event in events {
            let dispatched =
                panic::catch_unwind(AssertUnwindSafe(|| self.dispatcher.on_event(event.clone())));
            match dispatched {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    rule = %event.rule_id,
                    camera = %event.camera_id,
                    error = %e,
                    "alert dispatch failed"
                ),
                Err(payload) => tracing::error!(
                    rule = %event.rule_id,
                    camera = %event.camera_id,
                    panic = panic_message(payload.as_ref()),
                    "alert dispatcher panicked"
                ),
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
