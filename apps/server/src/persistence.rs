//! Loading and flushing bot state through the database.

use chrono::Utc;
use smartflow_alerts::{Database, DbError};
use smartflow_engine::{Poller, WatchRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Load stored watches into the registry. Returns the number of targets.
pub async fn load_watches(db: &Database, registry: &WatchRegistry) -> Result<usize, DbError> {
    let targets = db.load_watches().await?;
    let count = targets.len();
    for target in targets {
        registry.insert(target);
    }
    Ok(count)
}

/// Restore poller state for targets that are still watched.
pub async fn hydrate_state(db: &Database, poller: &Poller) -> Result<usize, DbError> {
    let registry = poller.registry();
    let snapshots: Vec<_> = db
        .load_state()
        .await?
        .into_iter()
        .filter(|(key, _)| registry.contains(key))
        .collect();
    let count = snapshots.len();
    poller.state().hydrate(snapshots, Utc::now());
    Ok(count)
}

/// Persist poller state and the auto-tracked watches.
pub async fn flush(db: &Database, poller: &Poller) -> Result<(), DbError> {
    let snapshots = poller.state().snapshot();
    db.save_state(&snapshots).await?;
    db.replace_auto_watches(&poller.registry().all()).await?;
    debug!(targets = snapshots.len(), "Poller state flushed");
    Ok(())
}

/// Flush state every `every` until cancelled.
pub async fn run_state_flusher(db: Database, poller: Arc<Poller>, every: Duration, cancel: CancellationToken) {
    info!(every_secs = every.as_secs(), "Starting state flusher");
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; nothing has changed yet.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = flush(&db, &poller).await {
                    warn!(error = %e, "Failed to flush poller state");
                }
            }
        }
    }

    info!("State flusher stopped");
}
