//! Capability traits for external data sources.

use crate::FetchError;
use async_trait::async_trait;
use smartflow_core::FetchedItem;

/// A source of recent items for one class of watch target.
///
/// Implementations return a bounded list of the most recent items for the
/// given target id, in any order; the poller sorts them chronologically.
#[async_trait]
pub trait ExternalSource: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Fetch recent items for a target (mint, wallet address, feed id).
    async fn fetch_recent_items(&self, target_id: &str) -> Result<Vec<FetchedItem>, FetchError>;
}

/// USD price lookups by token mint.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn usd_price(&self, mint: &str) -> Result<f64, FetchError>;
}
