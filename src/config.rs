//! Monitor configuration, loaded once at startup.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::analytics::AggregatorConfig;
use crate::anomaly::{AnomalyRule, RulesConfig};
use crate::error::ConfigError;
use crate::integration::{AlertLogConfig, DispatcherConfig, PipelineConfig};
use crate::tracker::TrackerConfig;

/// Every setting of a [`Monitor`](crate::Monitor). All sections are optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub tracker: TrackerConfig,
    pub aggregator: AggregatorConfig,
    pub pipeline: PipelineConfig,
    pub alerts: AlertLogConfig,
    pub dispatcher: DispatcherConfig,
    pub rules: RulesConfig,
}

impl MonitorConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: MonitorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check every section, rules included.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tracker.validate()?;
        self.aggregator.validate()?;
        self.pipeline.validate()?;
        self.alerts.validate()?;
        self.dispatcher.validate()?;
        self.rules.load()?;
        Ok(())
    }

    pub fn load_rules(&self) -> Result<Arc<[AnomalyRule]>, ConfigError> {
        Ok(self.rules.load()?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{DistanceMetric, MatchStrategy};

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = MonitorConfig::from_json_str("{}").unwrap();
        assert_eq!(config, MonitorConfig::default());
        assert_eq!(config.tracker.gate_distance, 80.0);
        assert_eq!(config.tracker.confirm_hits, 3);
        assert_eq!(config.aggregator.grid_cols, 32);
        assert!(config.load_rules().unwrap().is_empty());
    }

    #[test]
    fn test_partial_sections() {
        let config = MonitorConfig::from_json_str(
            r#"{
                "tracker": {"metric": "iou", "gate_distance": 0.7, "strategy": "optimal"},
                "aggregator": {"utc_offset_minutes": 120},
                "rules": {"occupancy_threshold": {"max_occupancy": 5}}
            }"#,
        )
        .unwrap();
        assert_eq!(config.tracker.metric, DistanceMetric::Iou);
        assert_eq!(config.tracker.strategy, MatchStrategy::Optimal);
        assert_eq!(config.tracker.lost_after_misses, 10);
        assert_eq!(config.aggregator.utc_offset_minutes, 120);
        assert_eq!(config.load_rules().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            MonitorConfig::from_json_str(r#"{"tracker": {"confirm_hits": 0}}"#),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            MonitorConfig::from_json_str(r#"{"trackr": {}}"#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            MonitorConfig::from_json_str(r#"{"rules": [{"kind": "loitering"}]}"#),
            Err(ConfigError::MissingThreshold { field: "loitering_seconds", .. })
        ));
    }

    #[test]
    fn test_from_missing_path() {
        assert!(matches!(
            MonitorConfig::from_path("/nonexistent/occutrack.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
