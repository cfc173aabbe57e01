//! Per-class polling loops.

use crate::Poller;
use smartflow_core::{Event, TargetClass};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Polling cadence per target class.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub intervals: HashMap<TargetClass, Duration>,
    /// How long in-flight ticks may run after shutdown is requested.
    pub shutdown_grace: Duration,
    /// Events held per loop while the notifier's channel is full. The
    /// oldest are dropped beyond this.
    pub max_backlog: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            intervals: HashMap::from([
                (TargetClass::Listings, Duration::from_secs(10)),
                (TargetClass::Token, Duration::from_secs(10)),
                (TargetClass::Wallet, Duration::from_secs(30)),
            ]),
            shutdown_grace: Duration::from_secs(5),
            max_backlog: 10_000,
        }
    }
}

/// Handle to the running polling loops.
pub struct Scheduler {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    shutdown_grace: Duration,
    dropped: Arc<AtomicU64>,
}

impl Scheduler {
    /// Spawn one loop per configured class. Ticks of a class never overlap;
    /// a tick that overruns its interval delays the next one instead of
    /// queueing a burst.
    pub fn start(poller: Arc<Poller>, events: mpsc::Sender<Event>, config: SchedulerConfig) -> Self {
        let cancel = CancellationToken::new();
        let dropped = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::new();

        for class in TargetClass::ALL {
            let Some(every) = config.intervals.get(&class).copied() else {
                continue;
            };
            if !poller.has_source(class) {
                warn!(class = %class, "No source configured, class will not be polled");
                continue;
            }
            info!(class = %class, interval_secs = every.as_secs(), "Starting poll loop");
            let forwarder = Forwarder {
                class,
                events: events.clone(),
                backlog: VecDeque::new(),
                max_backlog: config.max_backlog.max(1),
                dropped: dropped.clone(),
            };
            handles.push(tokio::spawn(run_poll_loop(
                poller.clone(),
                class,
                every,
                forwarder,
                cancel.clone(),
            )));
        }

        Self {
            cancel,
            handles,
            shutdown_grace: config.shutdown_grace,
            dropped,
        }
    }

    pub fn loops(&self) -> usize {
        self.handles.len()
    }

    /// Events dropped because the backlog overflowed.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop scheduling ticks, wait up to the grace period for in-flight
    /// ticks, then abort whatever is left.
    pub async fn shutdown(self) {
        self.cancel.cancel();

        let mut handles = self.handles;
        let joined = tokio::time::timeout(self.shutdown_grace, async {
            for handle in handles.iter_mut() {
                let _ = handle.await;
            }
        })
        .await;

        if joined.is_err() {
            warn!(
                grace_secs = self.shutdown_grace.as_secs(),
                "Poll loops did not stop in time, aborting"
            );
            for handle in &handles {
                handle.abort();
            }
        }
        info!("Scheduler stopped");
    }
}

/// Hands events to the notifier without waiting on it.
struct Forwarder {
    class: TargetClass,
    events: mpsc::Sender<Event>,
    backlog: VecDeque<Event>,
    max_backlog: usize,
    dropped: Arc<AtomicU64>,
}

impl Forwarder {
    /// Queue `new` and push as much of the backlog as the channel accepts.
    /// Returns false once the channel is closed.
    fn forward(&mut self, new: Vec<Event>) -> bool {
        self.backlog.extend(new);
        while let Some(event) = self.backlog.pop_front() {
            match self.events.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    self.backlog.push_front(event);
                    break;
                }
                Err(TrySendError::Closed(_)) => return false,
            }
        }

        let overflow = self.backlog.len().saturating_sub(self.max_backlog);
        if overflow > 0 {
            self.backlog.drain(..overflow);
            self.dropped.fetch_add(overflow as u64, Ordering::Relaxed);
            warn!(
                class = %self.class,
                dropped = overflow,
                backlog = self.backlog.len(),
                "Notifier is behind, dropped oldest events"
            );
        }
        true
    }

    /// Wait until the backlog is handed off or the channel closes.
    async fn drain(&mut self) {
        while let Some(event) = self.backlog.pop_front() {
            if self.events.send(event).await.is_err() {
                break;
            }
        }
    }
}

async fn run_poll_loop(
    poller: Arc<Poller>,
    class: TargetClass,
    every: Duration,
    mut forwarder: Forwarder,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        // A started tick always runs to completion: its items are already
        // marked seen, so its events must reach the notifier.
        let report = poller.tick(class).await;
        report.log();

        if !forwarder.forward(report.events) {
            warn!(class = %class, "Event channel closed, stopping poll loop");
            return;
        }
    }

    forwarder.drain().await;
    info!(class = %class, "Poll loop stopped");
}
