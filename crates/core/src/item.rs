//! Items fetched from external sources.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observable item returned by an external source: a new listing,
/// a wallet transaction or a price tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedItem {
    /// Opaque identifier (signature, mint, tick id). Dedup key.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Metric input: USD value of a transfer, or USD price of a tick.
    pub value: Option<f64>,
    /// Display name (token name, transfer description).
    pub label: Option<String>,
    pub symbol: Option<String>,
    pub link: Option<String>,
}

impl FetchedItem {
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            timestamp,
            value: None,
            label: None,
            symbol: None,
            link: None,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    /// Convert a price tick into an observation sample.
    pub fn sample(&self) -> Option<Sample> {
        self.value.map(|value| Sample {
            timestamp: self.timestamp,
            value,
        })
    }
}

/// A (timestamp, value) observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}
