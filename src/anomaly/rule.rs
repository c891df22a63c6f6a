//! Anomaly rule definitions and their configuration format.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::anomaly::event::Severity;
use crate::error::ConfigError;

const DEFAULT_COOLDOWN_SECONDS: f64 = 60.0;

/// Closed polygon in frame coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<[f32; 2]>", into = "Vec<[f32; 2]>")]
pub struct Zone {
    vertices: Vec<Point2<f32>>,
}

impl Zone {
    pub fn new(vertices: Vec<Point2<f32>>) -> Result<Self, ConfigError> {
        if vertices.len() < 3 {
            return Err(ConfigError::invalid("zone_polygon", "needs at least 3 vertices"));
        }
        if vertices.iter().any(|p| !(p.x.is_finite() && p.y.is_finite())) {
            return Err(ConfigError::invalid("zone_polygon", "vertices must be finite"));
        }
        Ok(Self { vertices })
    }

    pub fn vertices(&self) -> &[Point2<f32>] {
        &self.vertices
    }

    /// Even-odd ray casting.
    pub fn contains(&self, p: Point2<f32>) -> bool {
        let n = self.vertices.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (a, b) = (self.vertices[i], self.vertices[j]);
            if (a.y > p.y) != (b.y > p.y) {
                let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
                if p.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

impl TryFrom<Vec<[f32; 2]>> for Zone {
    type Error = ConfigError;

    fn try_from(points: Vec<[f32; 2]>) -> Result<Self, Self::Error> {
        Zone::new(points.into_iter().map(|[x, y]| Point2::new(x, y)).collect())
    }
}

impl From<Zone> for Vec<[f32; 2]> {
    fn from(zone: Zone) -> Self {
        zone.vertices.iter().map(|p| [p.x, p.y]).collect()
    }
}

/// Local hours `[start, end)`; wraps past midnight when `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl HourWindow {
    pub fn new(start: u32, end: u32) -> Result<Self, ConfigError> {
        if start > 23 || end > 24 {
            return Err(ConfigError::invalid(
                "active_hours",
                format!("[{start}, {end}) is not a range of hours"),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, hour: u32) -> bool {
        match self.start.cmp(&self.end) {
            std::cmp::Ordering::Less => hour >= self.start && hour < self.end,
            std::cmp::Ordering::Greater => hour >= self.start || hour < self.end,
            std::cmp::Ordering::Equal => true,
        }
    }
}

/// The enumerated rule kinds with their thresholds.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleKind {
    /// Confirmed track present longer than `threshold_seconds`, measured
    /// from creation or, with a zone, from entering it.
    Loitering {
        threshold_seconds: f64,
        zone: Option<Zone>,
    },
    /// More Confirmed tracks than `max_occupancy`.
    OccupancyThreshold { max_occupancy: usize },
    /// Confirmed track centroid inside a restricted zone.
    ZoneIntrusion { zone: Zone },
    /// No Confirmed track for longer than `threshold_seconds` while within
    /// the active hours.
    NoActivity {
        threshold_seconds: f64,
        active_hours: Option<HourWindow>,
    },
}

impl RuleKind {
    pub fn name(&self) -> RuleKindName {
        match self {
            RuleKind::Loitering { .. } => RuleKindName::Loitering,
            RuleKind::OccupancyThreshold { .. } => RuleKindName::OccupancyThreshold,
            RuleKind::ZoneIntrusion { .. } => RuleKindName::ZoneIntrusion,
            RuleKind::NoActivity { .. } => RuleKindName::NoActivity,
        }
    }

    /// Keyed by track rather than by camera.
    pub fn is_per_track(&self) -> bool {
        matches!(self, RuleKind::Loitering { .. } | RuleKind::ZoneIntrusion { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKindName {
    Loitering,
    OccupancyThreshold,
    ZoneIntrusion,
    NoActivity,
}

impl RuleKindName {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleKindName::Loitering => "loitering",
            RuleKindName::OccupancyThreshold => "occupancy_threshold",
            RuleKindName::ZoneIntrusion => "zone_intrusion",
            RuleKindName::NoActivity => "no_activity",
        }
    }

    pub fn default_severity(self) -> Severity {
        match self {
            RuleKindName::Loitering | RuleKindName::OccupancyThreshold => Severity::Warning,
            RuleKindName::ZoneIntrusion => Severity::Critical,
            RuleKindName::NoActivity => Severity::Info,
        }
    }
}

impl fmt::Display for RuleKindName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleKindName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loitering" => Ok(RuleKindName::Loitering),
            "occupancy_threshold" | "occupancy" => Ok(RuleKindName::OccupancyThreshold),
            "zone_intrusion" => Ok(RuleKindName::ZoneIntrusion),
            "no_activity" => Ok(RuleKindName::NoActivity),
            other => Err(ConfigError::invalid("kind", format!("unknown rule kind `{other}`"))),
        }
    }
}

/// A loaded rule. Immutable after load.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyRule {
    pub id: String,
    pub kind: RuleKind,
    pub severity: Severity,
    pub cooldown_seconds: f64,
}

/// One rule entry as written in configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleEntry {
    /// Defaults to the kind name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Required in list form; taken from the map key in mapping form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<RuleKindName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loitering_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_occupancy: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_polygon: Option<Vec<[f32; 2]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_activity_seconds: Option<f64>,
    /// `[start, end)` local hours for no_activity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_hours: Option<[u32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

/// Rule section of the configuration: a list of entries, or a mapping from
/// rule kind to its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RulesConfig {
    List(Vec<RuleEntry>),
    ByKind(BTreeMap<String, RuleEntry>),
}

impl Default for RulesConfig {
    fn default() -> Self {
        RulesConfig::List(Vec::new())
    }
}

impl RulesConfig {
    /// Validate every entry and build the rule set. Fails on the first
    /// misconfigured rule.
    pub fn load(&self) -> Result<Vec<AnomalyRule>, ConfigError> {
        let rules = match self {
            RulesConfig::List(entries) => entries
                .iter()
                .map(|entry| entry.to_rule(None))
                .collect::<Result<Vec<_>, _>>()?,
            RulesConfig::ByKind(map) => map
                .iter()
                .map(|(key, entry)| entry.to_rule(Some(key.parse()?)))
                .collect::<Result<Vec<_>, _>>()?,
        };

        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(ConfigError::DuplicateRule(rule.id.clone()));
            }
        }
        Ok(rules)
    }
}

impl RuleEntry {
    fn to_rule(&self, key_kind: Option<RuleKindName>) -> Result<AnomalyRule, ConfigError> {
        let kind_name = match (self.kind, key_kind) {
            (Some(a), Some(b)) if a != b => {
                return Err(ConfigError::invalid(
                    "kind",
                    format!("entry under `{b}` declares kind `{a}`"),
                ));
            }
            (Some(k), _) | (None, Some(k)) => k,
            (None, None) => {
                return Err(ConfigError::MissingThreshold {
                    rule: self.id.clone().unwrap_or_else(|| "<unnamed>".into()),
                    field: "kind",
                });
            }
        };
        let id = self
            .id
            .clone()
            .unwrap_or_else(|| kind_name.as_str().to_string());

        let missing = |field: &'static str| ConfigError::MissingThreshold {
            rule: id.clone(),
            field,
        };

        let kind = match kind_name {
            RuleKindName::Loitering => RuleKind::Loitering {
                threshold_seconds: seconds(
                    "loitering_seconds",
                    self.loitering_seconds.ok_or_else(|| missing("loitering_seconds"))?,
                )?,
                zone: self.zone_polygon.clone().map(Zone::try_from).transpose()?,
            },
            RuleKindName::OccupancyThreshold => RuleKind::OccupancyThreshold {
                max_occupancy: self.max_occupancy.ok_or_else(|| missing("max_occupancy"))?,
            },
            RuleKindName::ZoneIntrusion => RuleKind::ZoneIntrusion {
                zone: Zone::try_from(self.zone_polygon.clone().ok_or_else(|| missing("zone_polygon"))?)?,
            },
            RuleKindName::NoActivity => RuleKind::NoActivity {
                threshold_seconds: seconds(
                    "no_activity_seconds",
                    self.no_activity_seconds.ok_or_else(|| missing("no_activity_seconds"))?,
                )?,
                active_hours: self
                    .active_hours
                    .map(|[start, end]| HourWindow::new(start, end))
                    .transpose()?,
            },
        };

        Ok(AnomalyRule {
            severity: self.severity.unwrap_or(kind_name.default_severity()),
            cooldown_seconds: seconds(
                "cooldown_seconds",
                self.cooldown_seconds.unwrap_or(DEFAULT_COOLDOWN_SECONDS),
            )?,
            id,
            kind,
        })
    }
}

fn seconds(field: &str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::invalid(field, format!("{value} is not a duration in seconds")))
    }
}
