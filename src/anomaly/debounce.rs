use crate::tracker::{Timestamp, elapsed_seconds};

/// Per-key rule state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebounceState {
    #[default]
    Normal,
    Triggered { since: Timestamp },
}

/// Normal -> Triggered fires once; Triggered -> Normal needs the condition
/// to have cleared and the cooldown to have elapsed since the trigger.
#[derive(Debug, Clone, Default)]
pub struct Debouncer {
    state: DebounceState,
}

impl Debouncer {
    pub fn state(&self) -> DebounceState {
        self.state
    }

    /// Feed the condition observed at `now`; returns true when the rule fires.
    pub fn step(&mut self, condition: bool, now: Timestamp, cooldown_seconds: f64) -> bool {
        match self.state {
            DebounceState::Normal => {
                if condition {
                    self.state = DebounceState::Triggered { since: now };
                    return true;
                }
            }
            DebounceState::Triggered { since } => {
                if !condition && elapsed_seconds(since, now) >= cooldown_seconds {
                    self.state = DebounceState::Normal;
                }
            }
        }
        false
    }

    /// Disarmed keys can be dropped without losing a pending cooldown.
    pub fn is_idle(&self, now: Timestamp, cooldown_seconds: f64) -> bool {
        match self.state {
            DebounceState::Normal => true,
            DebounceState::Triggered { since } => elapsed_seconds(since, now) >= cooldown_seconds,
        }
    }
}
