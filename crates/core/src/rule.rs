//! Alert rules gating notification emission.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// Tolerance for comparing percent changes against thresholds, so that a
/// change that equals the threshold counts as a crossing despite float
/// rounding.
const PCT_EPSILON: f64 = 1e-9;

/// Condition that gates notification for a watch target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertRule {
    /// Fire once per newly seen item identifier.
    NewItem(NewItemRule),
    /// Fire when a continuous metric moves by a percentage within a window.
    ThresholdCrossing(ThresholdCrossingRule),
}

impl AlertRule {
    pub fn new_item(min_value: Option<f64>) -> Self {
        AlertRule::NewItem(NewItemRule { min_value })
    }

    pub fn jump(window_secs: i64, min_change_pct: f64) -> Self {
        AlertRule::ThresholdCrossing(ThresholdCrossingRule {
            window_secs,
            min_change_pct,
            direction: Direction::Up,
        })
    }

    /// Short human-readable description, used in `/list`.
    pub fn describe(&self) -> String {
        match self {
            AlertRule::NewItem(rule) => match rule.min_value {
                Some(min) => format!("new items >= ${:.0}", min),
                None => "all new items".to_string(),
            },
            AlertRule::ThresholdCrossing(rule) => format!(
                "{}{}% in {}m",
                rule.direction.sign(),
                rule.min_change_pct,
                rule.window_secs / 60
            ),
        }
    }
}

/// At-most-once notification per distinct item, optionally gated on the
/// item's metric (e.g. USD value of a transfer).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NewItemRule {
    /// Minimum metric value; `None` accepts every item, including items
    /// without a metric.
    pub min_value: Option<f64>,
}

impl NewItemRule {
    pub fn passes(&self, value: Option<f64>) -> bool {
        match self.min_value {
            None => true,
            Some(min) => value.is_some_and(|v| v >= min),
        }
    }
}

/// Which price moves count as a crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Up,
    Down,
    Either,
}

impl Direction {
    fn sign(self) -> &'static str {
        match self {
            Direction::Up => "+",
            Direction::Down => "-",
            Direction::Either => "±",
        }
    }
}

/// Percent change over a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCrossingRule {
    pub window_secs: i64,
    /// Threshold in percent (25.0 = 25%). Always positive; `direction`
    /// selects the sign.
    pub min_change_pct: f64,
    #[serde(default)]
    pub direction: Direction,
}

impl ThresholdCrossingRule {
    pub fn window(&self) -> TimeDelta {
        TimeDelta::seconds(self.window_secs)
    }

    /// Inclusive: a change equal to the threshold is a crossing.
    pub fn is_crossed(&self, change_pct: f64) -> bool {
        let threshold = self.min_change_pct.abs() - PCT_EPSILON;
        match self.direction {
            Direction::Up => change_pct >= threshold,
            Direction::Down => -change_pct >= threshold,
            Direction::Either => change_pct.abs() >= threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_item_rule_passes() {
        let any = NewItemRule { min_value: None };
        assert!(any.passes(None));
        assert!(any.passes(Some(0.0)));

        let min = NewItemRule {
            min_value: Some(1000.0),
        };
        assert!(min.passes(Some(1000.0)));
        assert!(!min.passes(Some(999.99)));
        assert!(!min.passes(None));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let rule = ThresholdCrossingRule {
            window_secs: 300,
            min_change_pct: 25.0,
            direction: Direction::Up,
        };
        assert!(rule.is_crossed(25.0));
        assert!(rule.is_crossed(30.0));
        assert!(!rule.is_crossed(24.9));
        assert!(!rule.is_crossed(-40.0));
    }

    #[test]
    fn test_threshold_directions() {
        let mut rule = ThresholdCrossingRule {
            window_secs: 300,
            min_change_pct: 10.0,
            direction: Direction::Down,
        };
        assert!(rule.is_crossed(-10.0));
        assert!(!rule.is_crossed(15.0));

        rule.direction = Direction::Either;
        assert!(rule.is_crossed(-12.0));
        assert!(rule.is_crossed(12.0));
        assert!(!rule.is_crossed(5.0));
    }

    #[test]
    fn test_rule_serde_tagged() {
        let rule = AlertRule::jump(300, 25.0);
        let json = serde_json::to_string(&rule).unwrap();
        assert!(json.contains("\"kind\":\"threshold_crossing\""));
        let parsed: AlertRule = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, rule);

        // Direction defaults to up when absent
        let legacy = r#"{"kind":"threshold_crossing","window_secs":60,"min_change_pct":5.0}"#;
        let parsed: AlertRule = serde_json::from_str(legacy).unwrap();
        assert_eq!(parsed, AlertRule::jump(60, 5.0));
    }

    #[test]
    fn test_describe() {
        assert_eq!(AlertRule::jump(300, 25.0).describe(), "+25% in 5m");
        assert_eq!(AlertRule::new_item(Some(1000.0)).describe(), "new items >= $1000");
        assert_eq!(AlertRule::new_item(None).describe(), "all new items");
    }
}
