//! Smart Flow - Solana market signal bot
//!
//! Polls pump.fun listings, token prices and wallet activity, and pushes
//! alerts to Telegram chats.

mod config;
mod persistence;
mod status_notifier;
mod status_server;

use clap::Parser;
use config::{AppConfig, ConfigError};
use status_notifier::{StatusEvent, StatusNotifier};
use status_server::StatusState;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use smartflow_alerts::{CommandContext, Database, MessageSender, Notifier, TelegramBot};
use smartflow_core::TargetClass;
use smartflow_engine::{Poller, Scheduler, WatchRegistry};
use smartflow_feeds::{
    BirdeyeClient, BirdeyePriceSource, FetchError, HeliusWalletSource, PriceOracle, PumpFunClient,
    PumpFunListingSource, TrendingBoard,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Buffered events between the poll loops and the notifier.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Smart Flow CLI
#[derive(Parser, Debug)]
#[command(name = "smartflow-bot")]
#[command(about = "Solana market signal bot for Telegram", long_about = None)]
struct Args {
    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Status server port (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database URL (overrides DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Keep poller state in memory only
    #[arg(long, default_value_t = false)]
    no_persist: bool,
}

#[derive(Error, Debug)]
enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Source setup failed: {0}")]
    Source(#[from] FetchError),
    #[error("Status server failed to start: {0}")]
    Io(#[from] std::io::Error),
}

fn init_logging(level: &str) {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// External sources built from the configured API keys.
struct Sources {
    pumpfun: PumpFunClient,
    oracle: Option<Arc<dyn PriceOracle>>,
    token: Option<BirdeyePriceSource>,
    wallet: Option<HeliusWalletSource>,
}

fn build_sources(config: &AppConfig) -> Result<Sources, FetchError> {
    let pumpfun = PumpFunClient::new(config.fetch_timeout)?;

    let birdeye = match &config.birdeye_api_key {
        Some(key) => Some(BirdeyeClient::new(key.as_str(), config.fetch_timeout)?),
        None => {
            warn!("BIRDEYE_API_KEY not set: token price tracking disabled");
            None
        }
    };
    let oracle = birdeye
        .clone()
        .map(|client| Arc::new(client) as Arc<dyn PriceOracle>);

    let wallet = match &config.helius_api_key {
        Some(key) => {
            if oracle.is_none() {
                warn!("Wallet transfers have no USD value without BIRDEYE_API_KEY; min_usd rules will not fire");
            }
            Some(HeliusWalletSource::new(key.as_str(), oracle.clone(), config.fetch_timeout)?)
        }
        None => {
            warn!("HELIUS_API_KEY not set: wallet tracking disabled");
            None
        }
    };

    Ok(Sources {
        pumpfun,
        oracle,
        token: birdeye.map(BirdeyePriceSource::new),
        wallet,
    })
}

async fn connect_database(config: &AppConfig) -> Option<Database> {
    match Database::connect(&config.database_url).await {
        Ok(db) => Some(db),
        Err(e) => {
            error!(url = %config.database_url, error = %e, "Failed to open database, running in memory");
            None
        }
    }
}

async fn run(args: Args) -> Result<(), StartupError> {
    let mut config = AppConfig::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(url) = args.database_url {
        config.database_url = url;
    }
    if args.no_persist {
        config.persist_state = false;
    }

    info!("🚀 Smart Flow starting...");
    info!("  Database: {}", config.database_url);
    info!("  Persist state: {}", config.persist_state);
    info!(
        "  Jump alerts: +{}% in {}m",
        config.defaults.jump_pct,
        config.defaults.window_secs / 60
    );
    info!("  Min wallet transfer: ${}", config.defaults.min_wallet_usd);
    info!("  Status port: {}", config.port);

    let started_at = Instant::now();
    let db = connect_database(&config).await;

    let registry = Arc::new(WatchRegistry::new(config.max_auto_tracked));
    if let Some(db) = &db {
        match persistence::load_watches(db, &registry).await {
            Ok(count) => info!(targets = count, "Loaded watches"),
            Err(e) => warn!(error = %e, "Failed to load watches"),
        }
    }

    let sources = build_sources(&config)?;
    let mut enabled = vec![TargetClass::Listings];
    let mut poller = Poller::new(registry.clone(), config.poller_config()).with_source(
        TargetClass::Listings,
        Arc::new(PumpFunListingSource::new(sources.pumpfun.clone())),
    );
    if let Some(token) = sources.token {
        poller = poller.with_source(TargetClass::Token, Arc::new(token));
        enabled.push(TargetClass::Token);
    }
    if let Some(wallet) = sources.wallet {
        poller = poller.with_source(TargetClass::Wallet, Arc::new(wallet));
        enabled.push(TargetClass::Wallet);
    }
    let poller = Arc::new(poller);

    if let (Some(db), true) = (&db, config.persist_state) {
        match persistence::hydrate_state(db, &poller).await {
            Ok(count) => info!(targets = count, "Restored poller state"),
            Err(e) => warn!(error = %e, "Failed to restore poller state"),
        }
    }

    let cancel = CancellationToken::new();

    let trending = Arc::new(TrendingBoard::new(
        sources.pumpfun,
        sources.oracle,
        config.trend_count,
    ));
    let trending_handle = tokio::spawn(
        trending
            .clone()
            .run_refresher(config.trend_every, cancel.clone()),
    );

    let mut ctx = CommandContext::new(registry.clone(), config.defaults)
        .with_trending(trending)
        .with_enabled_classes(enabled);
    if let Some(db) = &db {
        ctx = ctx.with_database(db.clone());
    }
    let bot = Arc::new(TelegramBot::new(&config.bot_token, ctx));
    let bot_handle = tokio::spawn(bot.clone().run(cancel.clone()));

    let sender: Arc<dyn MessageSender> = bot.clone();
    let notifier = Arc::new(Notifier::new(
        registry.clone(),
        sender.clone(),
        config.notifier_config(),
    ));
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let notifier_handle = tokio::spawn(notifier.clone().run(events_rx));
    let scheduler = Scheduler::start(poller.clone(), events_tx, config.scheduler_config());

    let flusher_handle = match (&db, config.persist_state) {
        (Some(db), true) => Some(tokio::spawn(persistence::run_state_flusher(
            db.clone(),
            poller.clone(),
            config.state_flush_every,
            cancel.clone(),
        ))),
        _ => None,
    };

    let status_state = Arc::new(StatusState {
        poller: poller.clone(),
        notifier: notifier.clone(),
        started_at,
    });
    let server_handle =
        status_server::start_status_server(status_state, config.port, cancel.clone()).await?;

    let status = config
        .admin_chat_id
        .map(|chat_id| Arc::new(StatusNotifier::new(sender.clone(), chat_id)));
    if let Some(status) = &status {
        let status = status.clone();
        tokio::spawn(async move { status.notify(StatusEvent::Started).await });
    }

    info!("Press Ctrl+C to stop...");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C, shutting down");
    }
    warn!("Shutdown signal received");

    if let Some(status) = &status {
        let _ = tokio::time::timeout(config.delivery_timeout, status.notify(StatusEvent::Stopping)).await;
    }

    // Stop polling first so the event channel closes and the notifier drains.
    let backlog_dropped = scheduler.dropped_events();
    scheduler.shutdown().await;
    if tokio::time::timeout(config.shutdown_grace, notifier_handle).await.is_err() {
        warn!("Notifier did not drain in time");
    }

    cancel.cancel();
    let grace = Duration::from_secs(2);
    let _ = tokio::time::timeout(grace, bot_handle).await;
    let _ = tokio::time::timeout(grace, server_handle).await;
    trending_handle.abort();
    if let Some(handle) = flusher_handle {
        let _ = tokio::time::timeout(grace, handle).await;
    }

    if let (Some(db), true) = (&db, config.persist_state) {
        match persistence::flush(db, &poller).await {
            Ok(()) => info!("Final state flushed"),
            Err(e) => error!(error = %e, "Failed to flush state on shutdown"),
        }
    }

    let stats = poller.stats();
    let (delivered, dropped) = notifier.counts();
    info!("📈 Final Stats:");
    info!("  Total uptime: {} seconds", started_at.elapsed().as_secs());
    info!("  Ticks: {}", stats.ticks);
    info!("  Events: {}", stats.events_emitted);
    info!("  Fetch failures: {}", stats.fetch_failures);
    info!("  Alerts delivered: {} (dropped {})", delivered, dropped);
    info!("  Events dropped while notifier was behind: {}", backlog_dropped);

    info!("👋 Smart Flow stopped");
    Ok(())
}

#[tokio::main]
async fn main() {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    init_logging(&args.log_level);

    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
