//! Birdeye price API client.

use crate::error::check_status;
use crate::{ExternalSource, FetchError, PriceOracle};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use smartflow_core::FetchedItem;
use std::time::Duration;

/// Wrapped SOL mint, used to price native SOL transfers.
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Parse a Birdeye `/defi/price` response into (price, update time).
pub fn parse_price(json: &serde_json::Value) -> Result<(f64, Option<DateTime<Utc>>), FetchError> {
    let data = &json["data"];
    let price = data["value"]
        .as_f64()
        .ok_or_else(|| FetchError::Parse("No price value in response".to_string()))?;
    let updated_at = data["updateUnixTime"]
        .as_i64()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
    Ok((price, updated_at))
}

/// Birdeye REST client.
#[derive(Clone)]
pub struct BirdeyeClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl BirdeyeClient {
    const BASE_URL: &'static str = "https://public-api.birdeye.so";

    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(FetchError::MissingApiKey("birdeye"));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            base_url: Self::BASE_URL.to_string(),
        })
    }

    /// Fetch the USD price of a mint and the time Birdeye last updated it.
    pub async fn price(&self, mint: &str) -> Result<(f64, Option<DateTime<Utc>>), FetchError> {
        let url = format!("{}/defi/price", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("address", mint)])
            .header("X-API-KEY", &self.api_key)
            .header("x-chain", "solana")
            .header("accept", "application/json")
            .send()
            .await?;
        let json: serde_json::Value = check_status(response)?.json().await?;
        parse_price(&json)
    }
}

#[async_trait]
impl PriceOracle for BirdeyeClient {
    async fn usd_price(&self, mint: &str) -> Result<f64, FetchError> {
        self.price(mint).await.map(|(price, _)| price)
    }
}

/// Price-tick source for token targets: one tick per poll.
pub struct BirdeyePriceSource {
    client: BirdeyeClient,
}

impl BirdeyePriceSource {
    pub fn new(client: BirdeyeClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExternalSource for BirdeyePriceSource {
    fn name(&self) -> &str {
        "birdeye price"
    }

    async fn fetch_recent_items(&self, mint: &str) -> Result<Vec<FetchedItem>, FetchError> {
        let (price, updated_at) = self.client.price(mint).await?;
        let timestamp = updated_at.unwrap_or_else(Utc::now);
        let item = FetchedItem::new(format!("{}@{}", mint, timestamp.timestamp()), timestamp)
            .with_value(price)
            .with_link(format!("https://birdeye.so/token/{}?chain=solana", mint));
        Ok(vec![item])
    }
}
