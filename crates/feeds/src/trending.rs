//! Trending coins board with a cached HTML rendering.

use crate::pumpfun::{PumpCoin, PumpFunClient};
use crate::PriceOracle;
use futures_util::future::join_all;
use smartflow_core::short_address;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const NO_TRENDING_TEXT: &str = "No trending data available right now.";

/// Render the trending list as Telegram HTML.
pub fn render_trending(coins: &[(PumpCoin, Option<f64>)]) -> String {
    if coins.is_empty() {
        return NO_TRENDING_TEXT.to_string();
    }

    let lines: Vec<String> = coins
        .iter()
        .enumerate()
        .map(|(i, (coin, price))| {
            let fallback = format!("Token {}", i + 1);
            let name = coin.name.as_deref().unwrap_or(fallback.as_str());
            let symbol = coin
                .symbol
                .as_deref()
                .map(|s| format!(" ({})", s))
                .unwrap_or_default();
            let price = price
                .map(|p| format!("${:.10}", p))
                .unwrap_or_else(|| "n/a".to_string());
            format!(
                "{}. <b>{}{}</b> — <i>{}</i>\n   <a href=\"{}\">{}</a>",
                i + 1,
                escape_html(name),
                escape_html(&symbol),
                price,
                escape_html(&coin.link()),
                escape_html(&short_address(&coin.mint))
            )
        })
        .collect();

    format!("🔥 <b>Pump.fun Trending</b>\n{}", lines.join("\n"))
}

/// Escape text for Telegram HTML parse mode, including attribute values.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Trending coins enriched with USD prices, cached between refreshes.
pub struct TrendingBoard {
    pumpfun: PumpFunClient,
    prices: Option<Arc<dyn PriceOracle>>,
    count: usize,
    cached: RwLock<Option<String>>,
}

impl TrendingBoard {
    pub fn new(pumpfun: PumpFunClient, prices: Option<Arc<dyn PriceOracle>>, count: usize) -> Self {
        Self {
            pumpfun,
            prices,
            count,
            cached: RwLock::new(None),
        }
    }

    /// Fetch trending coins and prices, update the cache and return the text.
    pub async fn refresh(&self) -> String {
        let coins = match self.pumpfun.fetch_trending(self.count).await {
            Ok(coins) => coins,
            Err(e) => {
                warn!(error = %e, "Failed to fetch trending coins");
                Vec::new()
            }
        };

        let priced: Vec<(PumpCoin, Option<f64>)> = match &self.prices {
            Some(oracle) => {
                let futures = coins.iter().map(|coin| {
                    let oracle = Arc::clone(oracle);
                    async move { oracle.usd_price(&coin.mint).await.ok() }
                });
                let prices = join_all(futures).await;
                coins.into_iter().zip(prices).collect()
            }
            None => coins.into_iter().map(|coin| (coin, None)).collect(),
        };

        debug!(count = priced.len(), "Trending board refreshed");
        let text = render_trending(&priced);
        *self.cached.write().await = Some(text.clone());
        text
    }

    /// Cached text, refreshing on first use.
    pub async fn text(&self) -> String {
        if let Some(text) = self.cached.read().await.clone() {
            return text;
        }
        self.refresh().await
    }

    /// Refresh the board every `every` until cancelled.
    pub async fn run_refresher(self: Arc<Self>, every: Duration, cancel: CancellationToken) {
        info!(every_secs = every.as_secs(), "Starting trending refresher");
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.refresh().await;
                }
            }
        }

        info!("Trending refresher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FetchError;
    use async_trait::async_trait;

    struct FixedOracle(f64);

    #[async_trait]
    impl PriceOracle for FixedOracle {
        async fn usd_price(&self, _mint: &str) -> Result<f64, FetchError> {
            Ok(self.0)
        }
    }

    fn board(server: &mockito::Server, prices: Option<Arc<dyn PriceOracle>>) -> TrendingBoard {
        let pumpfun = PumpFunClient::with_base_url(server.url(), Duration::from_secs(5)).unwrap();
        TrendingBoard::new(pumpfun, prices, 2)
    }

    fn coin(mint: &str, name: Option<&str>, symbol: Option<&str>) -> PumpCoin {
        PumpCoin {
            mint: mint.to_string(),
            name: name.map(str::to_string),
            symbol: symbol.map(str::to_string),
            usd_market_cap: None,
            created_at: None,
        }
    }

    #[test]
    fn test_render_trending_empty() {
        assert_eq!(render_trending(&[]), NO_TRENDING_TEXT);
    }

    #[test]
    fn test_render_trending_lines() {
        let coins = vec![
            (
                coin("MintAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA", Some("Alpha"), Some("ALP")),
                Some(0.5),
            ),
            (coin("MintBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB", None, None), None),
        ];
        let text = render_trending(&coins);
        assert!(text.starts_with("🔥 <b>Pump.fun Trending</b>"));
        assert!(text.contains("1. <b>Alpha (ALP)</b> — <i>$0.5000000000</i>"));
        assert!(text.contains("2. <b>Token 2</b> — <i>n/a</i>"));
        assert!(text.contains("https://pump.fun/coin/MintBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB"));
        assert!(text.contains("MintAA...AAAA"));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>&co</b>"), "&lt;b&gt;&amp;co&lt;/b&gt;");
        assert_eq!(escape_html("a\"b"), "a&quot;b");
    }

    #[test]
    fn test_render_trending_escapes_link_attribute() {
        let text = render_trending(&[(coin("Mint\"><b>x", None, None), None)]);
        assert!(text.contains("href=\"https://pump.fun/coin/Mint&quot;&gt;&lt;b&gt;x\""));
    }

    #[tokio::test]
    async fn test_text_refreshes_once_then_serves_cache() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!([
            {"mint": "MintAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA", "name": "Alpha", "symbol": "ALP"},
            {"mint": "MintBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB", "name": "Beta"},
            {"mint": "MintCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCC", "name": "Gamma"}
        ]);
        let mock = server
            .mock("GET", "/trending")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .expect(1)
            .create_async()
            .await;

        let board = board(&server, Some(Arc::new(FixedOracle(0.25))));
        let first = board.text().await;
        assert!(first.contains("1. <b>Alpha (ALP)</b> — <i>$0.2500000000</i>"));
        assert!(first.contains("2. <b>Beta</b>"));
        assert!(!first.contains("Gamma"));

        assert_eq!(board.text().await, first);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_fetch_renders_no_data_text() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/trending")
            .with_status(500)
            .create_async()
            .await;

        let board = board(&server, None);
        assert_eq!(board.refresh().await, NO_TRENDING_TEXT);
        assert_eq!(board.text().await, NO_TRENDING_TEXT);
    }

    #[tokio::test]
    async fn test_refresh_replaces_cached_text() {
        let mut server = mockito::Server::new_async().await;
        let empty = server
            .mock("GET", "/trending")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let board = board(&server, None);
        assert_eq!(board.text().await, NO_TRENDING_TEXT);
        empty.remove_async().await;

        server
            .mock("GET", "/trending")
            .with_status(200)
            .with_body(r#"[{"mint": "MintDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDDD", "name": "Delta"}]"#)
            .create_async()
            .await;
        let refreshed = board.refresh().await;
        assert!(refreshed.contains("<b>Delta</b> — <i>n/a</i>"));
        assert_eq!(board.text().await, refreshed);
    }
}
