//! Rule-based anomaly detection over track and aggregate state.

mod debounce;
mod engine;
mod event;
mod rule;

pub use debounce::{DebounceState, Debouncer};
pub use engine::AnomalyEngine;
pub use event::{AnomalyEvent, Severity};
pub use rule::{AnomalyRule, HourWindow, RuleKind, RuleKindName, RuleEntry, RulesConfig, Zone};
