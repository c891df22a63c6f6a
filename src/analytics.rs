//! Time-aggregated occupancy statistics: spatial heatmaps and busiest hours.

mod aggregator;
mod heatmap;
mod histogram;

pub use aggregator::{AggregateSnapshot, AggregatorConfig, ResetScope, TemporalAggregator};
pub use heatmap::HeatmapGrid;
pub use histogram::{HOURS_PER_DAY, HourHistogram};
