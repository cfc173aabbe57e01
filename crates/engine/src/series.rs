//! Time-windowed observation series for rate-of-change detection.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use smartflow_core::Sample;
use std::collections::VecDeque;

/// Ordered (timestamp, value) samples for one target, bounded to a sliding
/// window ending at the newest sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationSeries {
    samples: VecDeque<Sample>,
}

impl ObservationSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample and prune everything older than `window` before it.
    ///
    /// Samples not strictly newer than the current latest sample are
    /// ignored, so re-fetching the same tick is a no-op. Returns whether the
    /// sample was appended.
    pub fn append(&mut self, sample: Sample, window: TimeDelta) -> bool {
        if let Some(latest) = self.samples.back() {
            if sample.timestamp <= latest.timestamp {
                return false;
            }
        }
        self.samples.push_back(sample);
        self.prune(window);
        true
    }

    /// Drop samples older than `latest.timestamp - window` from the front.
    pub fn prune(&mut self, window: TimeDelta) {
        let Some(latest) = self.samples.back() else {
            return;
        };
        let cutoff = latest.timestamp - window;
        while self.samples.front().is_some_and(|s| s.timestamp < cutoff) {
            self.samples.pop_front();
        }
    }

    /// Percent change from the earliest to the latest sample.
    /// Zero with fewer than two samples or a zero baseline.
    pub fn change_pct(&self) -> f64 {
        match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) if self.samples.len() >= 2 && first.value != 0.0 => {
                (last.value - first.value) / first.value * 100.0
            }
            _ => 0.0,
        }
    }

    pub fn first(&self) -> Option<&Sample> {
        self.samples.front()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;

    fn at_min(minutes: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap() + TimeDelta::minutes(minutes)
    }

    #[test]
    fn test_window_pruning_keeps_last_five_minutes() {
        let mut series = ObservationSeries::new();
        let window = TimeDelta::minutes(5);
        for minute in 0..=10 {
            assert!(series.append(Sample::new(at_min(minute), 1.0 + minute as f64), window));
        }

        let remaining: Vec<_> = series.iter().map(|s| s.timestamp).collect();
        let expected: Vec<_> = (5..=10).map(at_min).collect();
        assert_eq!(remaining, expected);
    }

    #[test]
    fn test_change_pct() {
        let mut series = ObservationSeries::new();
        let window = TimeDelta::minutes(5);
        assert_eq!(series.change_pct(), 0.0);

        series.append(Sample::new(at_min(0), 2.0), window);
        assert_eq!(series.change_pct(), 0.0);

        series.append(Sample::new(at_min(1), 3.0), window);
        assert!((series.change_pct() - 50.0).abs() < 1e-9);

        series.append(Sample::new(at_min(2), 1.0), window);
        assert!((series.change_pct() + 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_change_pct_zero_baseline() {
        let mut series = ObservationSeries::new();
        let window = TimeDelta::minutes(5);
        series.append(Sample::new(at_min(0), 0.0), window);
        series.append(Sample::new(at_min(1), 5.0), window);
        assert_eq!(series.change_pct(), 0.0);
    }

    #[test]
    fn test_stale_samples_ignored() {
        let mut series = ObservationSeries::new();
        let window = TimeDelta::minutes(5);
        assert!(series.append(Sample::new(at_min(3), 1.0), window));
        assert!(!series.append(Sample::new(at_min(3), 2.0), window));
        assert!(!series.append(Sample::new(at_min(1), 2.0), window));
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn test_serde_roundtrip_preserves_order() {
        let mut series = ObservationSeries::new();
        let window = TimeDelta::minutes(5);
        series.append(Sample::new(at_min(0), 1.0), window);
        series.append(Sample::new(at_min(1), 1.1), window);

        let json = serde_json::to_string(&series).unwrap();
        let parsed: ObservationSeries = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, series);
    }
}
