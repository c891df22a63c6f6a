//! Rule evaluation with per-key debounce.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::analytics::AggregateSnapshot;
use crate::anomaly::debounce::Debouncer;
use crate::anomaly::event::AnomalyEvent;
use crate::anomaly::rule::{AnomalyRule, RuleKind};
use crate::tracker::{CameraId, Timestamp, TrackId, TrackSnapshot, TrackState, elapsed_seconds};

/// What a rule state is kept for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Key {
    Track(TrackId),
    Camera,
}

/// Evaluates the configured rules for one camera.
pub struct AnomalyEngine {
    camera_id: CameraId,
    rules: Arc<[AnomalyRule]>,
    states: HashMap<(usize, Key), Debouncer>,
    /// When a track entered a loitering rule's zone
    zone_entries: HashMap<(usize, TrackId), Timestamp>,
    last_activity: Option<Timestamp>,
}

impl AnomalyEngine {
    pub fn new(camera_id: CameraId, rules: Arc<[AnomalyRule]>) -> Self {
        Self {
            camera_id,
            rules,
            states: HashMap::new(),
            zone_entries: HashMap::new(),
            last_activity: None,
        }
    }

    pub fn rules(&self) -> &[AnomalyRule] {
        &self.rules
    }

    /// Evaluate every rule against the current tracks and aggregate.
    ///
    /// Only Confirmed tracks of this camera count. Events come out in rule
    /// order, then track id order.
    pub fn evaluate(
        &mut self,
        timestamp: Timestamp,
        tracks: &[TrackSnapshot],
        aggregate: &AggregateSnapshot,
    ) -> Vec<AnomalyEvent> {
        let mut confirmed: Vec<&TrackSnapshot> = tracks
            .iter()
            .filter(|t| t.state == TrackState::Confirmed && t.camera_id == self.camera_id)
            .collect();
        confirmed.sort_by_key(|t| t.id);

        // idle time counts from the last frame with a Confirmed track, or
        // from the first evaluation
        if !confirmed.is_empty() {
            self.last_activity = Some(timestamp);
        }
        let last_active = *self.last_activity.get_or_insert(timestamp);
        let idle_seconds = elapsed_seconds(last_active, timestamp);

        let rules = Arc::clone(&self.rules);
        let mut events = Vec::new();
        for (idx, rule) in rules.iter().enumerate() {
            match &rule.kind {
                RuleKind::Loitering {
                    threshold_seconds,
                    zone,
                } => {
                    for track in &confirmed {
                        let dwell = match zone {
                            Some(zone) if zone.contains(track.centroid) => {
                                let entered = *self
                                    .zone_entries
                                    .entry((idx, track.id))
                                    .or_insert(timestamp);
                                elapsed_seconds(entered, timestamp)
                            }
                            Some(_) => {
                                self.zone_entries.remove(&(idx, track.id));
                                0.0
                            }
                            None => track.age_seconds(timestamp),
                        };
                        let condition = dwell > *threshold_seconds;
                        if self.step(idx, Key::Track(track.id), condition, timestamp) {
                            events.push(self.event(
                                rule,
                                Some(track.id),
                                timestamp,
                                format!(
                                    "track {} loitering for {:.0}s (limit {:.0}s)",
                                    track.id, dwell, threshold_seconds
                                ),
                            ));
                        }
                    }
                }
                RuleKind::OccupancyThreshold { max_occupancy } => {
                    let count = confirmed.len();
                    if self.step(idx, Key::Camera, count > *max_occupancy, timestamp) {
                        events.push(self.event(
                            rule,
                            None,
                            timestamp,
                            format!("occupancy {count} exceeds maximum {max_occupancy}"),
                        ));
                    }
                }
                RuleKind::ZoneIntrusion { zone } => {
                    for track in &confirmed {
                        let condition = zone.contains(track.centroid);
                        if self.step(idx, Key::Track(track.id), condition, timestamp) {
                            events.push(self.event(
                                rule,
                                Some(track.id),
                                timestamp,
                                format!(
                                    "track {} entered restricted zone at ({:.0}, {:.0})",
                                    track.id, track.centroid.x, track.centroid.y
                                ),
                            ));
                        }
                    }
                }
                RuleKind::NoActivity {
                    threshold_seconds,
                    active_hours,
                } => {
                    let in_hours = active_hours
                        .map(|w| w.contains(aggregate.local_hour(timestamp)))
                        .unwrap_or(true);
                    let condition =
                        confirmed.is_empty() && in_hours && idle_seconds > *threshold_seconds;
                    if self.step(idx, Key::Camera, condition, timestamp) {
                        events.push(self.event(
                            rule,
                            None,
                            timestamp,
                            format!(
                                "no activity for {:.0}s (limit {:.0}s)",
                                idle_seconds, threshold_seconds
                            ),
                        ));
                    }
                }
            }
        }

        self.settle_absent_tracks(&confirmed, tracks, timestamp);

        for event in &events {
            tracing::info!(
                camera = %self.camera_id,
                rule = %event.rule_id,
                track = ?event.track_id,
                severity = %event.severity,
                "anomaly triggered"
            );
        }
        events
    }

    fn step(&mut self, rule_idx: usize, key: Key, condition: bool, now: Timestamp) -> bool {
        let cooldown = self.rules[rule_idx].cooldown_seconds;
        self.states
            .entry((rule_idx, key))
            .or_default()
            .step(condition, now, cooldown)
    }

    /// Per-track states whose track was not evaluated this round see a false
    /// condition; states of tracks gone from the store are dropped once idle.
    fn settle_absent_tracks(
        &mut self,
        confirmed: &[&TrackSnapshot],
        all: &[TrackSnapshot],
        now: Timestamp,
    ) {
        let evaluated: BTreeSet<TrackId> = confirmed.iter().map(|t| t.id).collect();
        let present: BTreeSet<TrackId> = all.iter().map(|t| t.id).collect();
        let rules = &self.rules;

        self.states.retain(|&(idx, key), state| {
            let Key::Track(id) = key else {
                return true;
            };
            if evaluated.contains(&id) {
                return true;
            }
            let cooldown = rules[idx].cooldown_seconds;
            state.step(false, now, cooldown);
            present.contains(&id) || !state.is_idle(now, cooldown)
        });
        self.zone_entries
            .retain(|(_, id), _| evaluated.contains(id));
    }

    fn event(
        &self,
        rule: &AnomalyRule,
        track_id: Option<TrackId>,
        timestamp: Timestamp,
        message: String,
    ) -> AnomalyEvent {
        AnomalyEvent {
            rule_id: rule.id.clone(),
            track_id,
            camera_id: self.camera_id.clone(),
            timestamp,
            severity: rule.severity,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{AggregatorConfig, TemporalAggregator};
    use crate::anomaly::event::Severity;
    use crate::anomaly::rule::{HourWindow, Zone};
    use crate::tracker::Rect;
    use chrono::{TimeDelta, TimeZone, Utc};
    use nalgebra::{Point2, Vector2};

    fn at(s: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + TimeDelta::seconds(s)
    }

    fn track(id: u64, x: f32, y: f32, created: i64) -> TrackSnapshot {
        TrackSnapshot {
            id: TrackId(id),
            camera_id: "cam".into(),
            state: TrackState::Confirmed,
            centroid: Point2::new(x, y),
            bbox: Rect::from_center(Point2::new(x, y), 10.0, 20.0),
            velocity: Vector2::zeros(),
            hits: 3,
            misses: 0,
            confidence: 0.9,
            created_at: at(created),
            updated_at: at(created),
            lost_since: None,
            history: vec![],
        }
    }

    fn aggregate() -> AggregateSnapshot {
        TemporalAggregator::new("cam".into(), AggregatorConfig::default()).snapshot()
    }

    fn engine(rules: Vec<AnomalyRule>) -> AnomalyEngine {
        AnomalyEngine::new("cam".into(), rules.into())
    }

    fn rule(id: &str, kind: RuleKind, cooldown_seconds: f64) -> AnomalyRule {
        AnomalyRule {
            id: id.into(),
            kind,
            severity: Severity::Warning,
            cooldown_seconds,
        }
    }

    fn square() -> Zone {
        Zone::try_from(vec![[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]]).unwrap()
    }

    #[test]
    fn test_occupancy_fires_on_transition_only() {
        let mut engine = engine(vec![rule(
            "crowd",
            RuleKind::OccupancyThreshold { max_occupancy: 2 },
            60.0,
        )]);
        let agg = aggregate();
        let two = vec![track(1, 10.0, 10.0, 0), track(2, 50.0, 10.0, 0)];
        assert!(engine.evaluate(at(0), &two, &agg).is_empty());

        let three = vec![
            track(1, 10.0, 10.0, 0),
            track(2, 50.0, 10.0, 0),
            track(3, 90.0, 10.0, 1),
        ];
        let events = engine.evaluate(at(1), &three, &agg);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].rule_id, "crowd");
        assert_eq!(events[0].track_id, None);
        for s in 2..60 {
            assert!(engine.evaluate(at(s), &three, &agg).is_empty());
        }
    }

    #[test]
    fn test_tentative_tracks_ignored() {
        let mut engine = engine(vec![rule(
            "crowd",
            RuleKind::OccupancyThreshold { max_occupancy: 0 },
            60.0,
        )]);
        let mut t = track(1, 10.0, 10.0, 0);
        t.state = TrackState::Tentative;
        assert!(engine.evaluate(at(0), &[t], &aggregate()).is_empty());
    }

    #[test]
    fn test_loitering_from_creation() {
        let mut engine = engine(vec![rule(
            "loiter",
            RuleKind::Loitering {
                threshold_seconds: 30.0,
                zone: None,
            },
            60.0,
        )]);
        let agg = aggregate();
        let tracks = vec![track(4, 10.0, 10.0, 0)];
        assert!(engine.evaluate(at(30), &tracks, &agg).is_empty());
        let events = engine.evaluate(at(31), &tracks, &agg);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].track_id, Some(TrackId(4)));
        assert!(engine.evaluate(at(32), &tracks, &agg).is_empty());
    }

    #[test]
    fn test_loitering_in_zone_counts_from_entry() {
        let mut engine = engine(vec![rule(
            "loiter-zone",
            RuleKind::Loitering {
                threshold_seconds: 10.0,
                zone: Some(square()),
            },
            60.0,
        )]);
        let agg = aggregate();
        // old track, outside the zone
        assert!(engine.evaluate(at(100), &[track(1, 500.0, 500.0, 0)], &agg).is_empty());
        // walks in at t=101
        assert!(engine.evaluate(at(101), &[track(1, 50.0, 50.0, 0)], &agg).is_empty());
        assert!(engine.evaluate(at(111), &[track(1, 50.0, 50.0, 0)], &agg).is_empty());
        assert_eq!(engine.evaluate(at(112), &[track(1, 50.0, 50.0, 0)], &agg).len(), 1);
    }

    #[test]
    fn test_zone_intrusion_per_track() {
        let mut engine = engine(vec![rule(
            "restricted",
            RuleKind::ZoneIntrusion { zone: square() },
            5.0,
        )]);
        let agg = aggregate();
        let events = engine.evaluate(
            at(0),
            &[track(1, 50.0, 50.0, 0), track(2, 500.0, 50.0, 0), track(3, 10.0, 90.0, 0)],
            &agg,
        );
        let ids: Vec<_> = events.iter().map(|e| e.track_id).collect();
        assert_eq!(ids, vec![Some(TrackId(1)), Some(TrackId(3))]);

        // track 1 leaves, returns after its cooldown: fires again
        engine.evaluate(at(6), &[track(1, 500.0, 50.0, 0)], &agg);
        let events = engine.evaluate(at(7), &[track(1, 50.0, 50.0, 0)], &agg);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_no_activity_respects_threshold_and_hours() {
        let mut engine = engine(vec![rule(
            "idle",
            RuleKind::NoActivity {
                threshold_seconds: 60.0,
                active_hours: Some(HourWindow::new(9, 17).unwrap()),
            },
            300.0,
        )]);
        let agg = aggregate();
        assert!(engine.evaluate(at(0), &[track(1, 1.0, 1.0, 0)], &agg).is_empty());
        assert!(engine.evaluate(at(60), &[], &agg).is_empty());
        let events = engine.evaluate(at(61), &[], &agg);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].track_id, None);

        // outside active hours nothing fires
        let mut night = AnomalyEngine::new(
            "cam".into(),
            vec![rule(
                "idle",
                RuleKind::NoActivity {
                    threshold_seconds: 60.0,
                    active_hours: Some(HourWindow::new(20, 6).unwrap()),
                },
                300.0,
            )]
            .into(),
        );
        night.evaluate(at(0), &[], &agg);
        assert!(night.evaluate(at(3600), &[], &agg).is_empty());
    }

    #[test]
    fn test_state_of_vanished_track_is_dropped() {
        let mut engine = engine(vec![rule(
            "restricted",
            RuleKind::ZoneIntrusion { zone: square() },
            5.0,
        )]);
        let agg = aggregate();
        engine.evaluate(at(0), &[track(1, 50.0, 50.0, 0)], &agg);
        assert_eq!(engine.states.len(), 1);
        // still cooling down: kept
        engine.evaluate(at(1), &[], &agg);
        assert_eq!(engine.states.len(), 1);
        engine.evaluate(at(10), &[], &agg);
        assert!(engine.states.is_empty());
    }
}
