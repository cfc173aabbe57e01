//! pump.fun REST client: newest coins and trending coins.

use crate::error::check_status;
use crate::{ExternalSource, FetchError};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use smartflow_core::FetchedItem;
use std::time::Duration;
use tracing::debug;

/// Maximum number of coins taken from the newest-coins feed per poll.
pub const NEWEST_LIMIT: usize = 20;

/// A coin as returned by the pump.fun frontend API.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpCoin {
    pub mint: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub usd_market_cap: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
}

impl PumpCoin {
    pub fn link(&self) -> String {
        coin_link(&self.mint)
    }

    /// Name to display, falling back to the symbol.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.symbol.as_deref())
    }
}

pub fn coin_link(mint: &str) -> String {
    format!("https://pump.fun/coin/{}", mint)
}

/// Parse a pump.fun coin list. The API returns either a bare array or an
/// object with a `coins` array; the mint field name varies by endpoint.
pub fn parse_coins(json: &serde_json::Value, limit: usize) -> Vec<PumpCoin> {
    let list = match json.as_array() {
        Some(list) => list,
        None => match json["coins"].as_array() {
            Some(list) => list,
            None => return Vec::new(),
        },
    };

    list.iter()
        .filter_map(|coin| {
            let mint = ["mint", "mintAddress", "address", "tokenMint"]
                .iter()
                .find_map(|field| coin[*field].as_str())
                .filter(|m| !m.is_empty())?
                .to_string();

            let created_at = coin["created_timestamp"]
                .as_i64()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

            Some(PumpCoin {
                mint,
                name: coin["name"].as_str().map(str::to_string),
                symbol: coin["symbol"].as_str().map(str::to_string),
                usd_market_cap: coin["usd_market_cap"]
                    .as_f64()
                    .or_else(|| coin["marketCap"].as_f64()),
                created_at,
            })
        })
        .take(limit)
        .collect()
}

/// pump.fun frontend API client.
#[derive(Clone)]
pub struct PumpFunClient {
    client: reqwest::Client,
    base_url: String,
}

impl PumpFunClient {
    const BASE_URL: &'static str = "https://frontend-api.pump.fun";

    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        Self::with_base_url(Self::BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let response = check_status(self.client.get(&url).send().await?)?;
        Ok(response.json().await?)
    }

    /// Fetch the newest created coins.
    pub async fn fetch_newest(&self) -> Result<Vec<PumpCoin>, FetchError> {
        let json = self.get_json("/coins/created").await?;
        let coins = parse_coins(&json, NEWEST_LIMIT);
        debug!(count = coins.len(), "pump.fun: fetched newest coins");
        Ok(coins)
    }

    /// Fetch the trending coins, at most `limit`.
    pub async fn fetch_trending(&self, limit: usize) -> Result<Vec<PumpCoin>, FetchError> {
        let json = self.get_json("/trending").await?;
        Ok(parse_coins(&json, limit))
    }
}

/// New-listing source backed by the pump.fun newest-coins feed. The
/// target id is ignored: there is one global feed.
pub struct PumpFunListingSource {
    client: PumpFunClient,
}

impl PumpFunListingSource {
    pub fn new(client: PumpFunClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExternalSource for PumpFunListingSource {
    fn name(&self) -> &str {
        "pump.fun listings"
    }

    async fn fetch_recent_items(&self, _target_id: &str) -> Result<Vec<FetchedItem>, FetchError> {
        let now = Utc::now();
        let items = self
            .client
            .fetch_newest()
            .await?
            .into_iter()
            .map(|coin| {
                let mut item = FetchedItem::new(coin.mint.clone(), coin.created_at.unwrap_or(now))
                    .with_link(coin.link());
                if let Some(name) = coin.display_name() {
                    item = item.with_label(name);
                }
                if let Some(symbol) = coin.symbol {
                    item = item.with_symbol(symbol);
                }
                if let Some(mcap) = coin.usd_market_cap {
                    item = item.with_value(mcap);
                }
                item
            })
            .collect();
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_coins_array() {
        let json = serde_json::json!([
            {"mint": "MintA", "name": "Alpha", "symbol": "ALP", "usd_market_cap": 5400.5, "created_timestamp": 1_700_000_000_000i64},
            {"mintAddress": "MintB", "symbol": "BET"},
            {"name": "no mint"}
        ]);
        let coins = parse_coins(&json, 20);
        assert_eq!(coins.len(), 2);
        assert_eq!(coins[0].mint, "MintA");
        assert_eq!(coins[0].usd_market_cap, Some(5400.5));
        assert_eq!(coins[0].created_at.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(coins[1].mint, "MintB");
        assert_eq!(coins[1].display_name(), Some("BET"));
    }

    #[test]
    fn test_parse_coins_wrapped_and_limited() {
        let json = serde_json::json!({
            "coins": [{"mint": "A"}, {"address": "B"}, {"tokenMint": "C"}]
        });
        let coins = parse_coins(&json, 2);
        let mints: Vec<_> = coins.iter().map(|c| c.mint.as_str()).collect();
        assert_eq!(mints, vec!["A", "B"]);
    }

    #[test]
    fn test_parse_coins_unexpected_shape() {
        assert!(parse_coins(&serde_json::json!({"error": "nope"}), 10).is_empty());
    }

    #[test]
    fn test_coin_link() {
        assert_eq!(coin_link("Mint"), "https://pump.fun/coin/Mint");
    }
}
