//! External data sources for the signal poller.
//!
//! This crate provides REST clients for the third-party APIs the bot
//! consumes, each exposed through the [`ExternalSource`] capability so the
//! poller never depends on a concrete API.
//!
//! ## Sources
//!
//! - `pumpfun` - newest and trending coins (listing feed)
//! - `birdeye` - token USD prices (price ticks, SOL valuation)
//! - `helius` - enhanced wallet transactions (wallet flow)

pub mod birdeye;
pub mod error;
pub mod helius;
pub mod pumpfun;
pub mod source;
pub mod trending;

pub use birdeye::{BirdeyeClient, BirdeyePriceSource, WSOL_MINT};
pub use error::*;
pub use helius::HeliusWalletSource;
pub use pumpfun::{PumpCoin, PumpFunClient, PumpFunListingSource};
pub use source::*;
pub use trending::{escape_html, TrendingBoard, NO_TRENDING_TEXT};
