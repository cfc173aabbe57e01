//! Default alert rules applied by chat commands.

use smartflow_core::AlertRule;

/// Rules used when a command does not specify its own threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertDefaults {
    /// Percent change that triggers a jump alert.
    pub jump_pct: f64,
    /// Observation window for jump alerts, in seconds.
    pub window_secs: i64,
    /// Minimum USD value of a wallet transfer.
    pub min_wallet_usd: f64,
}

impl Default for AlertDefaults {
    fn default() -> Self {
        Self {
            jump_pct: 25.0,
            window_secs: 5 * 60,
            min_wallet_usd: 1000.0,
        }
    }
}

impl AlertDefaults {
    /// Jump rule with the given threshold, or the default one.
    pub fn jump_rule(&self, pct: Option<f64>) -> AlertRule {
        AlertRule::jump(self.window_secs, pct.unwrap_or(self.jump_pct))
    }

    /// Wallet transfer rule with the given minimum, or the default one.
    pub fn wallet_rule(&self, min_usd: Option<f64>) -> AlertRule {
        let min = min_usd.unwrap_or(self.min_wallet_usd);
        AlertRule::new_item((min > 0.0).then_some(min))
    }

    /// Every new listing is announced.
    pub fn listing_rule(&self) -> AlertRule {
        AlertRule::new_item(None)
    }
}
