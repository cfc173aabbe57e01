//! Watch targets and their identifiers.

use crate::AlertRule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Telegram chat identifier.
pub type ChatId = i64;

/// Identifier of the pump.fun new-listing feed target.
pub const LISTINGS_FEED_ID: &str = "pumpfun";

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Class of watch target. Each class is backed by one external source
/// and polled on its own interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetClass {
    /// New token listings feed.
    Listings,
    /// Token price (by mint).
    Token,
    /// Wallet transfers (by owner address).
    Wallet,
}

impl TargetClass {
    pub const ALL: [TargetClass; 3] = [TargetClass::Listings, TargetClass::Token, TargetClass::Wallet];

    pub fn as_str(self) -> &'static str {
        match self {
            TargetClass::Listings => "listings",
            TargetClass::Token => "token",
            TargetClass::Wallet => "wallet",
        }
    }
}

impl fmt::Display for TargetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseTargetError {
    #[error("Unknown target class: {0}")]
    UnknownClass(String),
    #[error("Invalid Solana address: {0}")]
    InvalidAddress(String),
}

impl FromStr for TargetClass {
    type Err = ParseTargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "listings" => Ok(TargetClass::Listings),
            "token" => Ok(TargetClass::Token),
            "wallet" => Ok(TargetClass::Wallet),
            other => Err(ParseTargetError::UnknownClass(other.to_string())),
        }
    }
}

/// Check that a string looks like a base58 Solana public key.
pub fn is_valid_address(s: &str) -> bool {
    (32..=44).contains(&s.len()) && s.chars().all(|c| BASE58_ALPHABET.contains(c))
}

/// Abbreviate an address for display: `AbCdEf...WxYz`.
pub fn short_address(s: &str) -> String {
    if s.len() <= 12 || !s.is_ascii() {
        return s.to_string();
    }
    format!("{}...{}", &s[..6], &s[s.len() - 4..])
}

/// Unique key of a watch target: the same address may be watched as a
/// token and as a wallet independently.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetKey {
    pub class: TargetClass,
    pub id: String,
}

impl TargetKey {
    pub fn new(class: TargetClass, id: impl Into<String>) -> Self {
        Self {
            class,
            id: id.into(),
        }
    }

    /// Key of the new-listing feed.
    pub fn listings() -> Self {
        Self::new(TargetClass::Listings, LISTINGS_FEED_ID)
    }

    /// Build a key, validating the address for token and wallet targets.
    pub fn parse(class: TargetClass, id: &str) -> Result<Self, ParseTargetError> {
        let id = id.trim();
        if class != TargetClass::Listings && !is_valid_address(id) {
            return Err(ParseTargetError::InvalidAddress(id.to_string()));
        }
        Ok(Self::new(class, id))
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.id)
    }
}

/// An address, mint or feed under observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchTarget {
    pub key: TargetKey,
    /// Condition gating notifications for this target.
    pub rule: AlertRule,
    /// Chats to notify.
    pub subscribers: BTreeSet<ChatId>,
    /// Registered by the bot itself (auto-tracked listing), not by a user.
    pub auto: bool,
    pub created_at: DateTime<Utc>,
}

impl WatchTarget {
    pub fn new(key: TargetKey, rule: AlertRule) -> Self {
        Self {
            key,
            rule,
            subscribers: BTreeSet::new(),
            auto: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_subscriber(mut self, chat_id: ChatId) -> Self {
        self.subscribers.insert(chat_id);
        self
    }

    pub fn auto(mut self) -> Self {
        self.auto = true;
        self
    }

    pub fn class(&self) -> TargetClass {
        self.key.class
    }

    pub fn id(&self) -> &str {
        &self.key.id
    }
}
