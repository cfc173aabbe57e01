//! Telegram bot handlers.

use crate::config::AlertDefaults;
use crate::db::Database;
use crate::sender::{DeliveryError, MessageSender};
use async_trait::async_trait;
use smartflow_core::{short_address, TargetClass, TargetKey, LISTINGS_FEED_ID};
use smartflow_engine::{WatchOutcome, WatchRegistry};
use smartflow_feeds::{escape_html, TrendingBoard};
use std::collections::HashSet;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::command::BotCommands;
use teloxide::{ApiError, RequestError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Reply used when a command cannot be served.
pub const NO_DATA_TEXT: &str = "No data available right now, try again later.";

const WATCH_USAGE: &str = "Usage: /watch &lt;mint&gt; [pct]\nExample: /watch So11111111111111111111111111111111111111112 30";
const WALLET_USAGE: &str = "Usage: /wallet &lt;address&gt; [min_usd]\nExample: /wallet 9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM 5000";
const UNWATCH_USAGE: &str = "Usage: /unwatch &lt;mint|address|listings&gt;";

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("Telegram API error: {0}")]
    Api(#[from] RequestError),
}

/// Bot commands.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Start the bot")]
    Start,
    #[command(description = "Show help")]
    Help,
    #[command(description = "Alert on token price jumps. Usage: /watch <mint> [pct]")]
    Watch(String),
    #[command(description = "Alert on wallet transfers. Usage: /wallet <address> [min_usd]")]
    Wallet(String),
    #[command(description = "New pump.fun listings. Usage: /listings on|off")]
    Listings(String),
    #[command(rename = "watch_on", description = "Subscribe to new pump.fun listings")]
    WatchOn,
    #[command(rename = "watch_off", description = "Unsubscribe from new pump.fun listings")]
    WatchOff,
    #[command(description = "Stop watching a token or wallet. Usage: /unwatch <id>")]
    Unwatch(String),
    #[command(description = "List your watches")]
    List,
    #[command(description = "Show trending pump.fun coins")]
    Trending,
}

/// Parse `/watch` arguments: a mint and an optional percent threshold.
pub fn parse_watch_args(args: &str) -> Result<(TargetKey, Option<f64>), &'static str> {
    let mut parts = args.split_whitespace();
    let mint = parts.next().ok_or(WATCH_USAGE)?;
    let key = TargetKey::parse(TargetClass::Token, mint).map_err(|_| WATCH_USAGE)?;
    let pct = parse_optional_number(parts.next(), WATCH_USAGE)?;
    if pct.is_some_and(|p| p <= 0.0) || parts.next().is_some() {
        return Err(WATCH_USAGE);
    }
    Ok((key, pct))
}

/// Parse `/wallet` arguments: an address and an optional USD minimum.
pub fn parse_wallet_args(args: &str) -> Result<(TargetKey, Option<f64>), &'static str> {
    let mut parts = args.split_whitespace();
    let address = parts.next().ok_or(WALLET_USAGE)?;
    let key = TargetKey::parse(TargetClass::Wallet, address).map_err(|_| WALLET_USAGE)?;
    let min = parse_optional_number(parts.next(), WALLET_USAGE)?;
    if min.is_some_and(|m| m < 0.0) || parts.next().is_some() {
        return Err(WALLET_USAGE);
    }
    Ok((key, min))
}

/// Parse an on/off switch. An empty argument asks for the current state.
pub fn parse_toggle(args: &str) -> Result<Option<bool>, &'static str> {
    match args.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "on" | "yes" | "1" => Ok(Some(true)),
        "off" | "no" | "0" => Ok(Some(false)),
        _ => Err("Usage: /listings on|off"),
    }
}

fn parse_optional_number(raw: Option<&str>, usage: &'static str) -> Result<Option<f64>, &'static str> {
    match raw {
        None => Ok(None),
        Some(raw) => {
            let value: f64 = raw.trim_end_matches('%').parse().map_err(|_| usage)?;
            if value.is_finite() {
                Ok(Some(value))
            } else {
                Err(usage)
            }
        }
    }
}

/// Command state shared by every chat: the registry, persistence and the
/// trending board.
pub struct CommandContext {
    registry: Arc<WatchRegistry>,
    defaults: AlertDefaults,
    db: Option<Database>,
    trending: Option<Arc<TrendingBoard>>,
    enabled: HashSet<TargetClass>,
}

impl CommandContext {
    pub fn new(registry: Arc<WatchRegistry>, defaults: AlertDefaults) -> Self {
        Self {
            registry,
            defaults,
            db: None,
            trending: None,
            enabled: TargetClass::ALL.into_iter().collect(),
        }
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_trending(mut self, board: Arc<TrendingBoard>) -> Self {
        self.trending = Some(board);
        self
    }

    /// Restrict watch commands to classes that have a source.
    pub fn with_enabled_classes(mut self, classes: impl IntoIterator<Item = TargetClass>) -> Self {
        self.enabled = classes.into_iter().collect();
        self
    }

    /// Execute a command for a chat and return the HTML reply.
    pub async fn reply(&self, chat_id: smartflow_core::ChatId, cmd: Command) -> String {
        match cmd {
            Command::Start => "👋 <b>Welcome to Smart Flow</b>\n\n\
                 Solana market signals straight to this chat:\n\
                 • /listings on: new pump.fun listings\n\
                 • /watch &lt;mint&gt; [pct]: token price jumps\n\
                 • /wallet &lt;address&gt; [min_usd]: large wallet transfers\n\
                 • /trending: what is hot on pump.fun\n\n\
                 Use /help to see all commands."
                .to_string(),

            Command::Help => escape_html(&Command::descriptions().to_string()),

            Command::Watch(args) => {
                if !self.enabled.contains(&TargetClass::Token) {
                    return "Token price tracking is disabled on this bot (no price API key).".to_string();
                }
                match parse_watch_args(&args) {
                    Ok((key, pct)) => self.watch(chat_id, key, self.defaults.jump_rule(pct)).await,
                    Err(usage) => usage.to_string(),
                }
            }

            Command::Wallet(args) => {
                if !self.enabled.contains(&TargetClass::Wallet) {
                    return "Wallet tracking is disabled on this bot (no wallet API key).".to_string();
                }
                match parse_wallet_args(&args) {
                    Ok((key, min)) => self.watch(chat_id, key, self.defaults.wallet_rule(min)).await,
                    Err(usage) => usage.to_string(),
                }
            }

            Command::Listings(args) => match parse_toggle(&args) {
                Ok(Some(on)) => self.set_listings(chat_id, on).await,
                Ok(None) => {
                    let on = self
                        .registry
                        .subscribers(&TargetKey::listings())
                        .contains(&chat_id);
                    format!(
                        "New listing alerts are <b>{}</b>. Use /listings on|off",
                        if on { "on" } else { "off" }
                    )
                }
                Err(usage) => usage.to_string(),
            },

            Command::WatchOn => self.set_listings(chat_id, true).await,
            Command::WatchOff => self.set_listings(chat_id, false).await,

            Command::Unwatch(args) => {
                let id = match args.trim() {
                    "" => return UNWATCH_USAGE.to_string(),
                    "listings" => LISTINGS_FEED_ID,
                    id => id,
                };
                let removed = self.registry.unwatch_id(id, chat_id);
                if removed.is_empty() {
                    return format!("You are not watching <code>{}</code>.", escape_html(id));
                }
                for key in &removed {
                    self.persist_unwatch(key, chat_id).await;
                }
                format!("🛑 Stopped watching <code>{}</code>.", escape_html(&short_address(id)))
            }

            Command::List => {
                let targets = self.registry.list_watched(chat_id);
                if targets.is_empty() {
                    return "You are not watching anything yet. Use /help to get started.".to_string();
                }
                let lines: Vec<String> = targets
                    .iter()
                    .map(|target| {
                        format!(
                            "• {} <code>{}</code>: {}{}",
                            target.class(),
                            escape_html(&short_address(target.id())),
                            target.rule.describe(),
                            if target.auto { " (auto)" } else { "" }
                        )
                    })
                    .collect();
                format!("<b>Your watches</b>\n{}", lines.join("\n"))
            }

            Command::Trending => match &self.trending {
                Some(board) => board.text().await,
                None => NO_DATA_TEXT.to_string(),
            },
        }
    }

    async fn watch(&self, chat_id: smartflow_core::ChatId, key: TargetKey, rule: smartflow_core::AlertRule) -> String {
        let outcome = self.registry.watch(key.clone(), chat_id, rule);
        if let Some(target) = self.registry.get(&key) {
            if let Some(db) = &self.db {
                if let Err(e) = db.add_watch(&target, chat_id).await {
                    warn!(target = %key, error = %e, "Failed to persist watch");
                }
            }
        }
        info!(chat_id = chat_id, target = %key, outcome = ?outcome, "Watch registered");

        let verb = match outcome {
            WatchOutcome::AlreadyWatching => "Updated",
            WatchOutcome::Created | WatchOutcome::Subscribed => "Watching",
        };
        format!(
            "✅ {} {} <code>{}</code>: {}",
            verb,
            key.class,
            escape_html(&short_address(&key.id)),
            rule.describe()
        )
    }

    async fn set_listings(&self, chat_id: smartflow_core::ChatId, on: bool) -> String {
        let key = TargetKey::listings();
        if on {
            self.watch(chat_id, key, self.defaults.listing_rule()).await;
            "🚀 New pump.fun listing alerts are on.".to_string()
        } else {
            if self.registry.unwatch(&key, chat_id) {
                self.persist_unwatch(&key, chat_id).await;
            }
            "🔕 New pump.fun listing alerts are off.".to_string()
        }
    }

    async fn persist_unwatch(&self, key: &TargetKey, chat_id: smartflow_core::ChatId) {
        if let Some(db) = &self.db {
            if let Err(e) = db.remove_watch(key, chat_id).await {
                warn!(target = %key, error = %e, "Failed to persist unwatch");
            }
        }
    }
}

/// Telegram bot wrapper.
pub struct TelegramBot {
    bot: Bot,
    ctx: CommandContext,
}

impl TelegramBot {
    /// Create a new bot with the given token.
    pub fn new(token: &str, ctx: CommandContext) -> Self {
        let bot = Bot::new(token);
        Self { bot, ctx }
    }

    /// Get the underlying bot for sending messages.
    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Send an HTML message to a chat.
    pub async fn send_html(&self, chat_id: smartflow_core::ChatId, message: &str) -> Result<(), TelegramError> {
        self.bot
            .send_message(ChatId(chat_id), message)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }

    /// Run the bot command handler until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let bot = self.bot.clone();
        if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
            warn!(error = %e, "Failed to register bot commands");
        }

        let handler = Update::filter_message().filter_command::<Command>().endpoint(
            move |bot: Bot, msg: Message, cmd: Command| {
                let this = Arc::clone(&self);
                async move { this.handle_command(bot, msg, cmd).await }
            },
        );

        let mut dispatcher = Dispatcher::builder(bot, handler).build();
        let shutdown = dispatcher.shutdown_token();
        tokio::spawn(async move {
            cancel.cancelled().await;
            if let Ok(done) = shutdown.shutdown() {
                done.await;
            }
        });

        info!("Telegram command handler started");
        dispatcher.dispatch().await;
        info!("Telegram command handler stopped");
    }

    async fn handle_command(&self, bot: Bot, msg: Message, cmd: Command) -> Result<(), TelegramError> {
        let reply = self.ctx.reply(msg.chat.id.0, cmd).await;
        bot.send_message(msg.chat.id, reply)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageSender for TelegramBot {
    async fn send(&self, chat_id: smartflow_core::ChatId, html: &str) -> Result<(), DeliveryError> {
        self.send_html(chat_id, html).await.map_err(|e| match e {
            TelegramError::Api(err) => delivery_error(chat_id, err),
        })
    }
}

fn delivery_error(chat_id: smartflow_core::ChatId, err: RequestError) -> DeliveryError {
    match err {
        RequestError::RetryAfter(secs) => DeliveryError::RetryAfter(secs.duration()),
        RequestError::Api(
            ApiError::BotBlocked
            | ApiError::ChatNotFound
            | ApiError::UserDeactivated
            | ApiError::BotKicked
            | ApiError::BotKickedFromSupergroup,
        ) => DeliveryError::InvalidChat(chat_id),
        RequestError::MigrateToChatId(_) => DeliveryError::InvalidChat(chat_id),
        RequestError::Api(ApiError::CantParseEntities(description)) => DeliveryError::Rejected(description),
        RequestError::Api(ApiError::MessageTextIsEmpty) => DeliveryError::Rejected("message text is empty".to_string()),
        RequestError::Api(ApiError::Unknown(description)) if description.starts_with("Bad Request") => {
            DeliveryError::Rejected(description)
        }
        other => DeliveryError::Api(other.to_string()),
    }
}
