use serde::{Deserialize, Serialize};

pub const HOURS_PER_DAY: usize = 24;

/// Visit counts by local hour of day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourHistogram {
    counts: [u64; HOURS_PER_DAY],
}

impl HourHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one visit in `hour`. Hours outside 0..24 wrap.
    pub fn increment(&mut self, hour: u32) {
        self.counts[hour as usize % HOURS_PER_DAY] += 1;
    }

    pub fn get(&self, hour: u32) -> u64 {
        self.counts.get(hour as usize).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &[u64; HOURS_PER_DAY] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Up to `top_n` non-empty hours, busiest first; ties go to the earlier hour.
    pub fn busiest(&self, top_n: usize) -> Vec<(u32, u64)> {
        let mut hours: Vec<(u32, u64)> = self
            .counts
            .iter()
            .enumerate()
            .filter(|(_, c)| **c > 0)
            .map(|(h, &c)| (h as u32, c))
            .collect();
        hours.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        hours.truncate(top_n);
        hours
    }

    pub fn reset(&mut self) {
        self.counts = [0; HOURS_PER_DAY];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busiest_orders_by_count_then_hour() {
        let mut h = HourHistogram::new();
        for _ in 0..3 {
            h.increment(18);
        }
        h.increment(9);
        h.increment(7);
        h.increment(12);
        h.increment(12);

        assert_eq!(h.busiest(3), vec![(18, 3), (12, 2), (7, 1)]);
        assert_eq!(h.busiest(10).len(), 4);
        assert_eq!(h.total(), 7);
    }

    #[test]
    fn test_reset_and_bounds() {
        let mut h = HourHistogram::new();
        h.increment(23);
        assert_eq!(h.get(23), 1);
        assert_eq!(h.get(99), 0);
        h.reset();
        assert_eq!(h.total(), 0);
        assert!(h.busiest(6).is_empty());
    }
}
