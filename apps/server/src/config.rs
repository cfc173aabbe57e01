//! Application configuration, read from the environment.

use chrono::TimeDelta;
use smartflow_alerts::{AlertDefaults, NotifierConfig};
use smartflow_core::{AlertRule, ChatId, TargetClass};
use smartflow_engine::{PollerConfig, SchedulerConfig, SeenPolicy};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bot_token: String,
    /// Chat that receives the startup notice.
    pub admin_chat_id: Option<ChatId>,
    pub birdeye_api_key: Option<String>,
    pub helius_api_key: Option<String>,
    pub database_url: String,
    /// Hydrate and flush poller state through the database.
    pub persist_state: bool,
    pub state_flush_every: Duration,
    /// Status server port.
    pub port: u16,
    pub defaults: AlertDefaults,
    pub listing_poll: Duration,
    pub token_poll: Duration,
    pub wallet_poll: Duration,
    pub max_concurrent_fetches: usize,
    pub fetch_timeout: Duration,
    pub delivery_timeout: Duration,
    pub delivery_max_retries: u32,
    pub seen_cap: usize,
    pub seen_ttl_hours: i64,
    pub trend_every: Duration,
    pub trend_count: usize,
    pub auto_track_listings: bool,
    pub max_auto_tracked: usize,
    pub shutdown_grace: Duration,
}

impl AppConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup: &lookup };

        let bot_token = env.string("TG_BOT_TOKEN").ok_or(ConfigError::Missing("TG_BOT_TOKEN"))?;

        let defaults = AlertDefaults {
            jump_pct: env.positive("MCAP_JUMP_PCT", 25.0)?,
            window_secs: env.positive::<i64>("WINDOW_MIN", 5)? * 60,
            min_wallet_usd: env.parse("MIN_WALLET_USD", 1000.0)?,
        };

        Ok(Self {
            bot_token,
            admin_chat_id: env.optional("ADMIN_CHAT_ID")?,
            birdeye_api_key: env.string("BIRDEYE_API_KEY"),
            helius_api_key: env.string("HELIUS_API_KEY"),
            database_url: env
                .string("DATABASE_URL")
                .unwrap_or_else(|| "sqlite:smartflow.db".to_string()),
            persist_state: env.flag("PERSIST_STATE", true)?,
            state_flush_every: env.secs("STATE_FLUSH_SECS", 60)?,
            port: env.parse("PORT", 3000)?,
            defaults,
            listing_poll: env.secs("LISTING_POLL_SECS", 10)?,
            token_poll: env.secs("TOKEN_POLL_SECS", 10)?,
            wallet_poll: env.secs("WALLET_POLL_SECS", 30)?,
            max_concurrent_fetches: env.positive("MAX_CONCURRENT_FETCHES", 8)?,
            fetch_timeout: env.secs("FETCH_TIMEOUT_SECS", 10)?,
            delivery_timeout: env.secs("DELIVERY_TIMEOUT_SECS", 10)?,
            delivery_max_retries: env.parse("DELIVERY_MAX_RETRIES", 3)?,
            seen_cap: env.positive("SEEN_CAP", 5000)?,
            seen_ttl_hours: env.positive("SEEN_TTL_HOURS", 24)?,
            trend_every: Duration::from_secs(env.positive::<u64>("TREND_EVERY_MIN", 5)? * 60),
            trend_count: env.positive("TREND_COUNT", 10)?,
            auto_track_listings: env.flag("AUTO_TRACK_LISTINGS", true)?,
            max_auto_tracked: env.parse("MAX_AUTO_TRACKED", 50)?,
            shutdown_grace: env.secs("SHUTDOWN_GRACE_SECS", 5)?,
        })
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            max_concurrent_fetches: self.max_concurrent_fetches,
            fetch_timeout: self.fetch_timeout,
            seen: SeenPolicy {
                cap: self.seen_cap,
                ttl: TimeDelta::hours(self.seen_ttl_hours),
            },
            skip_items_before_watch: true,
            auto_track_listings: self.auto_track_listings && self.max_auto_tracked > 0,
            auto_track_rule: self.auto_track_rule(),
        }
    }

    pub fn auto_track_rule(&self) -> AlertRule {
        self.defaults.jump_rule(None)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            intervals: HashMap::from([
                (TargetClass::Listings, self.listing_poll),
                (TargetClass::Token, self.token_poll),
                (TargetClass::Wallet, self.wallet_poll),
            ]),
            shutdown_grace: self.shutdown_grace,
            ..SchedulerConfig::default()
        }
    }

    pub fn notifier_config(&self) -> NotifierConfig {
        NotifierConfig {
            send_timeout: self.delivery_timeout,
            max_retries: self.delivery_max_retries,
            ..Default::default()
        }
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Non-empty trimmed value.
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn optional<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        match self.string(key) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::Invalid { key, value }),
        }
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        Ok(self.optional(key)?.unwrap_or(default))
    }

    fn positive<T: FromStr + PartialOrd + Default + ToString>(
        &self,
        key: &'static str,
        default: T,
    ) -> Result<T, ConfigError> {
        let value = self.parse(key, default)?;
        if value <= T::default() {
            return Err(ConfigError::Invalid {
                key,
                value: value.to_string(),
            });
        }
        Ok(value)
    }

    fn secs(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.positive(key, default).map(Duration::from_secs)
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.string(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid { key, value: v.clone() }),
            },
        }
    }
}
