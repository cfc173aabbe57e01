//! Telegram alert delivery for market signals.
//!
//! This crate provides:
//! - SQLite storage for watch subscriptions and poller state
//! - Telegram bot commands for managing watches
//! - Event delivery with timeouts and bounded retries

pub mod config;
pub mod db;
pub mod format;
pub mod notifier;
pub mod sender;
pub mod telegram;

pub use config::AlertDefaults;
pub use db::{Database, DbError};
pub use format::format_event;
pub use notifier::{DeliveryReport, Notifier, NotifierConfig};
pub use sender::{DeliveryError, MessageSender};
pub use telegram::{Command, CommandContext, TelegramBot};
