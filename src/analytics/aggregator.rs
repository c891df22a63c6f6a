//! Per-camera temporal aggregation of confirmed track positions.

use chrono::{FixedOffset, NaiveDate, Offset, Timelike, Utc};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::analytics::heatmap::HeatmapGrid;
use crate::analytics::histogram::HourHistogram;
use crate::error::ConfigError;
use crate::tracker::{CameraId, Timestamp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Frame size the grid is laid over, in detection coordinates
    pub frame_width: f32,
    pub frame_height: f32,
    pub grid_cols: usize,
    pub grid_rows: usize,
    /// Offset of local time from UTC, used for hour-of-day and day rollover
    pub utc_offset_minutes: i32,
    /// Zero heatmap and histogram when the local date changes
    pub daily_reset: bool,
    pub busiest_top_n: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            frame_width: 960.0,
            frame_height: 540.0,
            grid_cols: 32,
            grid_rows: 18,
            utc_offset_minutes: 0,
            daily_reset: true,
            busiest_top_n: 6,
        }
    }
}

impl AggregatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.frame_width.is_finite() && self.frame_width > 0.0) {
            return Err(ConfigError::invalid("aggregator.frame_width", "must be positive"));
        }
        if !(self.frame_height.is_finite() && self.frame_height > 0.0) {
            return Err(ConfigError::invalid("aggregator.frame_height", "must be positive"));
        }
        if self.grid_cols == 0 || self.grid_rows == 0 {
            return Err(ConfigError::invalid("aggregator.grid", "needs at least one cell"));
        }
        if self.offset().is_none() {
            return Err(ConfigError::invalid(
                "aggregator.utc_offset_minutes",
                "must be within +/- 24h",
            ));
        }
        Ok(())
    }

    pub fn offset(&self) -> Option<FixedOffset> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
    }
}

/// Which part of a camera's aggregate to clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetScope {
    Heatmap,
    Histogram,
    All,
}

/// Read-only copy of a camera's aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub camera_id: CameraId,
    pub heatmap: HeatmapGrid,
    pub histogram: HourHistogram,
    /// Local date the current period started on
    pub period_start: Option<NaiveDate>,
    pub last_record: Option<Timestamp>,
    pub utc_offset_minutes: i32,
}

impl AggregateSnapshot {
    /// Local hour of `ts` in the aggregate's time zone.
    pub fn local_hour(&self, ts: Timestamp) -> u32 {
        let offset = FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or(Utc.fix());
        ts.with_timezone(&offset).hour()
    }
}

/// Heatmap and hour histogram for one camera.
///
/// Created on the camera's first frame; only fed positions of Confirmed
/// tracks, at most once per track per frame.
pub struct TemporalAggregator {
    camera_id: CameraId,
    config: AggregatorConfig,
    offset: FixedOffset,
    heatmap: HeatmapGrid,
    histogram: HourHistogram,
    period_start: Option<NaiveDate>,
    last_record: Option<Timestamp>,
}

impl TemporalAggregator {
    pub fn new(camera_id: CameraId, config: AggregatorConfig) -> Self {
        let offset = config.offset().unwrap_or(Utc.fix());
        let heatmap = HeatmapGrid::new(
            config.grid_cols,
            config.grid_rows,
            config.frame_width,
            config.frame_height,
        );
        Self {
            camera_id,
            config,
            offset,
            heatmap,
            histogram: HourHistogram::new(),
            period_start: None,
            last_record: None,
        }
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    pub fn local_hour(&self, ts: Timestamp) -> u32 {
        ts.with_timezone(&self.offset).hour()
    }

    pub fn local_date(&self, ts: Timestamp) -> NaiveDate {
        ts.with_timezone(&self.offset).date_naive()
    }

    /// Roll the period over when `ts` falls on a later local date.
    ///
    /// Called before each record and on empty frames, so a quiet camera still
    /// starts the new day from zero.
    pub fn observe_time(&mut self, ts: Timestamp) {
        let day = self.local_date(ts);
        match self.period_start {
            Some(start) if self.config.daily_reset && day > start => {
                tracing::info!(
                    camera = %self.camera_id,
                    from = %start,
                    to = %day,
                    "daily rollover, resetting aggregates"
                );
                self.reset(ResetScope::All);
                self.period_start = Some(day);
            }
            None => self.period_start = Some(day),
            _ => {}
        }
    }

    /// Count one confirmed-track position update.
    ///
    /// Returns the heatmap cell hit, or `None` if nothing was counted: the
    /// centroid is not finite, or the update belongs to a day that has
    /// already rolled over.
    pub fn record(&mut self, timestamp: Timestamp, centroid: Point2<f32>) -> Option<(usize, usize)> {
        self.observe_time(timestamp);
        if self.is_stale(timestamp) {
            tracing::debug!(camera = %self.camera_id, %timestamp, "skipping update from a closed period");
            return None;
        }
        let Some(cell) = self.heatmap.increment(centroid) else {
            tracing::warn!(camera = %self.camera_id, "ignoring non-finite centroid");
            return None;
        };
        self.histogram.increment(self.local_hour(timestamp));
        self.last_record = Some(timestamp);
        Some(cell)
    }

    fn is_stale(&self, ts: Timestamp) -> bool {
        self.config.daily_reset
            && self
                .period_start
                .is_some_and(|start| self.local_date(ts) < start)
    }

    pub fn heatmap(&self) -> &HeatmapGrid {
        &self.heatmap
    }

    pub fn histogram(&self) -> &HourHistogram {
        &self.histogram
    }

    pub fn busiest_hours(&self) -> Vec<(u32, u64)> {
        self.histogram.busiest(self.config.busiest_top_n)
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        AggregateSnapshot {
            camera_id: self.camera_id.clone(),
            heatmap: self.heatmap.clone(),
            histogram: self.histogram.clone(),
            period_start: self.period_start,
            last_record: self.last_record,
            utc_offset_minutes: self.offset.local_minus_utc() / 60,
        }
    }

    pub fn reset(&mut self, scope: ResetScope) {
        match scope {
            ResetScope::Heatmap => self.heatmap.reset(),
            ResetScope::Histogram => self.histogram.reset(),
            ResetScope::All => {
                self.heatmap.reset();
                self.histogram.reset();
            }
        }
        tracing::debug!(camera = %self.camera_id, ?scope, "aggregate reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 10, h, m, 0).unwrap()
    }

    fn aggregator(config: AggregatorConfig) -> TemporalAggregator {
        TemporalAggregator::new("cam".into(), config)
    }

    #[test]
    fn test_record_updates_heatmap_and_histogram() {
        let mut agg = aggregator(AggregatorConfig::default());
        // 960x540 over 32x18 -> 30px cells
        assert_eq!(agg.record(at(9, 0), Point2::new(45.0, 75.0)), Some((2, 1)));
        agg.record(at(9, 30), Point2::new(45.0, 75.0));
        agg.record(at(14, 0), Point2::new(900.0, 10.0));

        let snap = agg.snapshot();
        assert_eq!(snap.heatmap.get(2, 1), Some(2));
        assert_eq!(snap.heatmap.total(), 3);
        assert_eq!(snap.histogram.get(9), 2);
        assert_eq!(snap.histogram.get(14), 1);
        assert_eq!(agg.busiest_hours(), vec![(9, 2), (14, 1)]);
    }

    #[test]
    fn test_local_hour_uses_offset() {
        let agg = aggregator(AggregatorConfig {
            utc_offset_minutes: -300,
            ..AggregatorConfig::default()
        });
        assert_eq!(agg.local_hour(at(14, 0)), 9);
        assert_eq!(agg.snapshot().local_hour(at(14, 0)), 9);
    }

    #[test]
    fn test_non_finite_centroid_not_counted() {
        let mut agg = aggregator(AggregatorConfig::default());
        assert_eq!(agg.record(at(9, 0), Point2::new(f32::NAN, 1.0)), None);
        assert_eq!(agg.heatmap().total(), 0);
        assert_eq!(agg.histogram().total(), 0);
    }

    #[test]
    fn test_reset_scopes() {
        let mut agg = aggregator(AggregatorConfig::default());
        agg.record(at(9, 0), Point2::new(10.0, 10.0));

        agg.reset(ResetScope::Heatmap);
        assert_eq!(agg.heatmap().total(), 0);
        assert_eq!(agg.histogram().total(), 1);

        agg.record(at(9, 5), Point2::new(10.0, 10.0));
        agg.reset(ResetScope::All);
        assert_eq!(agg.heatmap().total(), 0);
        assert_eq!(agg.histogram().total(), 0);
    }

    #[test]
    fn test_daily_rollover() {
        let mut agg = aggregator(AggregatorConfig::default());
        agg.record(at(23, 50), Point2::new(10.0, 10.0));
        let next_day = Utc.with_ymd_and_hms(2024, 3, 11, 0, 10, 0).unwrap();
        agg.record(next_day, Point2::new(10.0, 10.0));

        let snap = agg.snapshot();
        assert_eq!(snap.heatmap.total(), 1);
        assert_eq!(snap.histogram.get(23), 0);
        assert_eq!(snap.histogram.get(0), 1);
        assert_eq!(snap.period_start, Some(next_day.date_naive()));
    }

    #[test]
    fn test_update_from_closed_day_skipped() {
        let mut agg = aggregator(AggregatorConfig::default());
        let next_day = Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap();
        agg.observe_time(next_day);
        assert_eq!(agg.record(at(23, 59), Point2::new(10.0, 10.0)), None);
        assert!(agg.record(next_day, Point2::new(10.0, 10.0)).is_some());

        assert_eq!(agg.heatmap().total(), 1);
        assert_eq!(agg.histogram().get(23), 0);
        assert_eq!(agg.histogram().get(0), 1);
    }

    #[test]
    fn test_rollover_disabled() {
        let mut agg = aggregator(AggregatorConfig {
            daily_reset: false,
            ..AggregatorConfig::default()
        });
        agg.record(at(23, 50), Point2::new(10.0, 10.0));
        agg.record(Utc.with_ymd_and_hms(2024, 3, 11, 0, 10, 0).unwrap(), Point2::new(10.0, 10.0));
        assert_eq!(agg.heatmap().total(), 2);
    }

    #[test]
    fn test_validate_rejects_bad_offset() {
        let config = AggregatorConfig {
            utc_offset_minutes: 24 * 60,
            ..AggregatorConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(AggregatorConfig::default().validate().is_ok());
    }
}
