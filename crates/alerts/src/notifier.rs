//! Event delivery: fans each event out to the target's subscribers.

use crate::format::format_event;
use crate::sender::{DeliveryError, MessageSender};
use futures_util::future::join_all;
use smartflow_core::{ChatId, Event};
use smartflow_engine::WatchRegistry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Configuration for the notifier.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Timeout for a single send.
    pub send_timeout: Duration,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// Backoff before the first retry; doubles on each retry.
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(10),
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Events delivered together before their outcome is logged.
const MAX_BATCH: usize = 64;

/// Dropped deliveries named in the summary line.
const DROP_SAMPLE: usize = 3;

/// Outcome of delivering one or more events.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub events: usize,
    pub sent: u32,
    pub dropped: Vec<(ChatId, DeliveryError)>,
}

impl DeliveryReport {
    fn merge(&mut self, other: DeliveryReport) {
        self.events += other.events;
        self.sent += other.sent;
        self.dropped.extend(other.dropped);
    }

    /// Log the batch once, aggregating drops.
    pub fn log(&self) {
        if self.dropped.is_empty() {
            debug!(events = self.events, sent = self.sent, "Alerts delivered");
            return;
        }

        let sample: Vec<String> = self
            .dropped
            .iter()
            .take(DROP_SAMPLE)
            .map(|(chat_id, e)| format!("{} ({})", chat_id, e))
            .collect();
        let invalid_chats = self
            .dropped
            .iter()
            .filter(|(_, e)| matches!(e, DeliveryError::InvalidChat(_)))
            .count();
        warn!(
            events = self.events,
            sent = self.sent,
            dropped = self.dropped.len(),
            invalid_chats = invalid_chats,
            sample = %sample.join(", "),
            "Dropped alerts"
        );
    }
}

/// Delivers events to every subscriber of the originating target.
pub struct Notifier {
    registry: Arc<WatchRegistry>,
    sender: Arc<dyn MessageSender>,
    config: NotifierConfig,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Notifier {
    pub fn new(registry: Arc<WatchRegistry>, sender: Arc<dyn MessageSender>, config: NotifierConfig) -> Self {
        Self {
            registry,
            sender,
            config,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Messages delivered and dropped so far.
    pub fn counts(&self) -> (u64, u64) {
        (
            self.delivered.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
        )
    }

    /// Consume events until the channel closes.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<Event>) {
        info!("Starting notifier");
        while let Some(event) = events.recv().await {
            let mut report = self.process_event(&event).await;
            while report.events < MAX_BATCH {
                let Ok(event) = events.try_recv() else {
                    break;
                };
                report.merge(self.process_event(&event).await);
            }
            report.log();
        }
        info!("Notifier stopped");
    }

    /// Deliver one event. Subscribers are looked up at delivery time.
    pub async fn process_event(&self, event: &Event) -> DeliveryReport {
        let mut report = DeliveryReport {
            events: 1,
            ..Default::default()
        };
        let subscribers = self.registry.subscribers(event.target());
        if subscribers.is_empty() {
            debug!(target = %event.target(), kind = event.kind(), "No subscribers, dropping event");
            return report;
        }

        let message = format_event(event);
        let results = join_all(
            subscribers
                .iter()
                .map(|chat_id| self.send_with_retry(*chat_id, &message)),
        )
        .await;

        for (chat_id, result) in subscribers.iter().zip(results) {
            match result {
                Ok(()) => {
                    debug!(chat_id = chat_id, target = %event.target(), kind = event.kind(), "Alert sent");
                    report.sent += 1;
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    report.dropped.push((*chat_id, e));
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        report
    }

    /// Send with a per-attempt timeout, retrying transient failures.
    pub async fn send_with_retry(&self, chat_id: ChatId, html: &str) -> Result<(), DeliveryError> {
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(self.config.send_timeout, self.sender.send(chat_id, html)).await {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Timeout),
            };

            let error = match result {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };

            if attempt >= self.config.max_retries {
                return Err(DeliveryError::Exhausted {
                    attempts: attempt + 1,
                    last: error.to_string(),
                });
            }

            let delay = error.retry_after().unwrap_or_else(|| self.backoff(attempt));
            debug!(chat_id = chat_id, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %error, "Retrying send");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.config
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.config.max_backoff)
    }
}
