//! Helius enhanced-transactions client for wallet activity.

use crate::birdeye::WSOL_MINT;
use crate::error::check_status;
use crate::{ExternalSource, FetchError, PriceOracle};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use smartflow_core::FetchedItem;
use std::sync::Arc;
use std::time::Duration;

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// Transactions requested per wallet poll.
pub const TRANSACTION_LIMIT: usize = 20;

/// Net native SOL flow of one transaction relative to a wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletTransfer {
    pub signature: String,
    pub timestamp: i64,
    /// Positive for inflow, negative for outflow.
    pub net_sol: f64,
    pub kind: String,
    pub description: Option<String>,
}

/// Parse Helius enhanced transactions, computing the net SOL flow for
/// `address`. Transactions that move no SOL for the wallet are skipped.
pub fn parse_transactions(address: &str, json: &serde_json::Value) -> Vec<WalletTransfer> {
    let Some(txs) = json.as_array() else {
        return Vec::new();
    };

    txs.iter()
        .filter_map(|tx| {
            let signature = tx["signature"].as_str()?.to_string();
            let timestamp = tx["timestamp"].as_i64()?;

            let mut net_lamports: i128 = 0;
            for transfer in tx["nativeTransfers"].as_array().into_iter().flatten() {
                let amount = transfer["amount"].as_i64().unwrap_or(0) as i128;
                if transfer["toUserAccount"].as_str() == Some(address) {
                    net_lamports += amount;
                }
                if transfer["fromUserAccount"].as_str() == Some(address) {
                    net_lamports -= amount;
                }
            }
            if net_lamports == 0 {
                return None;
            }

            Some(WalletTransfer {
                signature,
                timestamp,
                net_sol: net_lamports as f64 / LAMPORTS_PER_SOL,
                kind: tx["type"].as_str().unwrap_or("UNKNOWN").to_string(),
                description: tx["description"]
                    .as_str()
                    .filter(|d| !d.is_empty())
                    .map(str::to_string),
            })
        })
        .collect()
}

impl WalletTransfer {
    /// Convert into a fetched item valued at `sol_usd` per SOL.
    pub fn into_item(self, sol_usd: Option<f64>) -> FetchedItem {
        let timestamp = Utc
            .timestamp_opt(self.timestamp, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let direction = if self.net_sol >= 0.0 { "in" } else { "out" };
        let label = self.description.unwrap_or_else(|| {
            format!("{}: {:.3} SOL {}", self.kind, self.net_sol.abs(), direction)
        });

        let mut item = FetchedItem::new(self.signature.clone(), timestamp)
            .with_label(label)
            .with_symbol("SOL")
            .with_link(format!("https://solscan.io/tx/{}", self.signature));
        if let Some(price) = sol_usd {
            item = item.with_value(self.net_sol.abs() * price);
        }
        item
    }
}

/// Value transfers in USD at the current SOL price. A failed price lookup
/// fails the whole batch so nothing is recorded unvalued.
pub async fn value_transfers(
    transfers: Vec<WalletTransfer>,
    prices: Option<&dyn PriceOracle>,
) -> Result<Vec<FetchedItem>, FetchError> {
    if transfers.is_empty() {
        return Ok(Vec::new());
    }
    let sol_usd = match prices {
        Some(oracle) => Some(oracle.usd_price(WSOL_MINT).await?),
        None => None,
    };
    Ok(transfers
        .into_iter()
        .map(|transfer| transfer.into_item(sol_usd))
        .collect())
}

/// Wallet-activity source. Transfers are valued in USD using the SOL
/// price from `prices`; without an oracle items carry no metric.
pub struct HeliusWalletSource {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    prices: Option<Arc<dyn PriceOracle>>,
}

impl HeliusWalletSource {
    const BASE_URL: &'static str = "https://api.helius.xyz";

    pub fn new(
        api_key: impl Into<String>,
        prices: Option<Arc<dyn PriceOracle>>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(FetchError::MissingApiKey("helius"));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            base_url: Self::BASE_URL.to_string(),
            prices,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl ExternalSource for HeliusWalletSource {
    fn name(&self) -> &str {
        "helius wallet"
    }

    async fn fetch_recent_items(&self, address: &str) -> Result<Vec<FetchedItem>, FetchError> {
        let url = format!("{}/v0/addresses/{}/transactions", self.base_url, address);
        let limit = TRANSACTION_LIMIT.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[("api-key", self.api_key.as_str()), ("limit", limit.as_str())])
            .send()
            .await?;
        let json: serde_json::Value = check_status(response)?.json().await?;
        let transfers = parse_transactions(address, &json);
        value_transfers(transfers, self.prices.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// SOL priced at 100 USD unless switched to failing.
    #[derive(Default)]
    struct SolOracle {
        failing: AtomicBool,
    }

    #[async_trait]
    impl PriceOracle for SolOracle {
        async fn usd_price(&self, mint: &str) -> Result<f64, FetchError> {
            assert_eq!(mint, WSOL_MINT);
            if self.failing.load(Ordering::SeqCst) {
                return Err(FetchError::RateLimited);
            }
            Ok(100.0)
        }
    }

    const WALLET: &str = "Wa11et1111111111111111111111111111111111111";

    fn sample_transactions() -> serde_json::Value {
        serde_json::json!([
            {
                "signature": "sig-out",
                "timestamp": 1_700_000_100i64,
                "type": "TRANSFER",
                "description": "",
                "nativeTransfers": [
                    {"fromUserAccount": WALLET, "toUserAccount": "Other", "amount": 2_500_000_000i64}
                ]
            },
            {
                "signature": "sig-in",
                "timestamp": 1_700_000_000i64,
                "type": "SWAP",
                "description": "wallet swapped 10 USDC for 0.5 SOL",
                "nativeTransfers": [
                    {"fromUserAccount": "Pool", "toUserAccount": WALLET, "amount": 500_000_000i64}
                ]
            },
            {
                "signature": "sig-none",
                "timestamp": 1_700_000_200i64,
                "type": "NFT_SALE",
                "nativeTransfers": [
                    {"fromUserAccount": "A", "toUserAccount": "B", "amount": 1i64}
                ]
            }
        ])
    }

    #[test]
    fn test_parse_transactions_net_flow() {
        let transfers = parse_transactions(WALLET, &sample_transactions());
        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].signature, "sig-out");
        assert!((transfers[0].net_sol + 2.5).abs() < 1e-9);
        assert_eq!(transfers[0].description, None);
        assert!((transfers[1].net_sol - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_transfer_into_item() {
        let transfers = parse_transactions(WALLET, &sample_transactions());
        let item = transfers[0].clone().into_item(Some(100.0));
        assert_eq!(item.id, "sig-out");
        assert_eq!(item.value, Some(250.0));
        assert_eq!(item.label.as_deref(), Some("TRANSFER: 2.500 SOL out"));
        assert_eq!(item.timestamp.timestamp(), 1_700_000_100);

        let unvalued = transfers[1].clone().into_item(None);
        assert_eq!(unvalued.value, None);
        assert_eq!(
            unvalued.label.as_deref(),
            Some("wallet swapped 10 USDC for 0.5 SOL")
        );
    }

    #[test]
    fn test_parse_transactions_not_array() {
        assert!(parse_transactions(WALLET, &serde_json::json!({"error": "bad key"})).is_empty());
    }

    #[tokio::test]
    async fn test_value_transfers_fails_without_sol_price() {
        let oracle = SolOracle::default();
        oracle.failing.store(true, Ordering::SeqCst);
        let transfers = parse_transactions(WALLET, &sample_transactions());

        let result = value_transfers(transfers.clone(), Some(&oracle)).await;
        assert!(matches!(result, Err(FetchError::RateLimited)));

        oracle.failing.store(false, Ordering::SeqCst);
        let items = value_transfers(transfers, Some(&oracle)).await.unwrap();
        assert_eq!(items[0].value, Some(250.0));
        assert_eq!(items[1].value, Some(50.0));
    }

    #[tokio::test]
    async fn test_value_transfers_without_oracle() {
        let transfers = parse_transactions(WALLET, &sample_transactions());
        let items = value_transfers(transfers, None).await.unwrap();
        assert!(items.iter().all(|item| item.value.is_none()));
        assert!(value_transfers(Vec::new(), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_recent_items_values_transfers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", format!("/v0/addresses/{}/transactions", WALLET).as_str())
            .match_query(mockito::Matcher::UrlEncoded("api-key".into(), "key".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(sample_transactions().to_string())
            .create_async()
            .await;

        let oracle: Arc<dyn PriceOracle> = Arc::new(SolOracle::default());
        let source = HeliusWalletSource::new("key", Some(oracle), Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.url());

        let items = source.fetch_recent_items(WALLET).await.unwrap();
        let ids: Vec<_> = items.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec!["sig-out", "sig-in"]);
        assert_eq!(items[0].value, Some(250.0));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_recent_items_fails_when_price_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", format!("/v0/addresses/{}/transactions", WALLET).as_str())
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(sample_transactions().to_string())
            .create_async()
            .await;

        let oracle = Arc::new(SolOracle::default());
        oracle.failing.store(true, Ordering::SeqCst);
        let prices: Arc<dyn PriceOracle> = oracle;
        let source = HeliusWalletSource::new("key", Some(prices), Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.url());

        let result = source.fetch_recent_items(WALLET).await;
        assert!(matches!(result, Err(FetchError::RateLimited)));
    }
}
