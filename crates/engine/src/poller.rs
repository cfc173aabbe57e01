//! Signal poller: fetches items for watch targets and turns new items and
//! threshold crossings into events.

use crate::{PollerState, SeenPolicy, WatchRegistry};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use smartflow_core::{
    is_valid_address, AlertRule, Event, FetchedItem, NewItemRule, TargetClass, TargetKey,
    ThresholdCrossingRule, WatchTarget,
};
use smartflow_feeds::{ExternalSource, FetchError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Number of failed target keys included in the per-tick warning.
const FAILURE_SAMPLE: usize = 3;

/// Configuration for the poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Maximum concurrent fetches within one tick.
    pub max_concurrent_fetches: usize,
    /// Timeout for a single fetch.
    pub fetch_timeout: Duration,
    /// SeenSet retention.
    pub seen: SeenPolicy,
    /// Items older than the target's watch time are recorded but not
    /// announced, so a fresh watch does not replay history.
    pub skip_items_before_watch: bool,
    /// Register announced listings as token targets.
    pub auto_track_listings: bool,
    /// Rule used for auto-tracked listings.
    pub auto_track_rule: AlertRule,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 8,
            fetch_timeout: Duration::from_secs(10),
            seen: SeenPolicy::default(),
            skip_items_before_watch: true,
            auto_track_listings: true,
            auto_track_rule: AlertRule::jump(300, 25.0),
        }
    }
}

/// Counters for the status endpoint.
#[derive(Debug, Default)]
pub struct PollerStats {
    pub ticks: AtomicU64,
    pub targets_polled: AtomicU64,
    pub events_emitted: AtomicU64,
    pub fetch_failures: AtomicU64,
}

impl PollerStats {
    fn record(&self, report: &TickReport) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.targets_polled
            .fetch_add(report.polled as u64, Ordering::Relaxed);
        self.events_emitted
            .fetch_add(report.events.len() as u64, Ordering::Relaxed);
        self.fetch_failures
            .fetch_add(report.failures.len() as u64, Ordering::Relaxed);
    }

    pub fn summary(&self) -> StatsSummary {
        StatsSummary {
            ticks: self.ticks.load(Ordering::Relaxed),
            targets_polled: self.targets_polled.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
        }
    }
}

/// Summary of poller statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StatsSummary {
    pub ticks: u64,
    pub targets_polled: u64,
    pub events_emitted: u64,
    pub fetch_failures: u64,
}

/// Outcome of one tick over a target class.
#[derive(Debug)]
pub struct TickReport {
    pub class: TargetClass,
    pub polled: usize,
    pub events: Vec<Event>,
    pub failures: Vec<(TargetKey, FetchError)>,
}

impl TickReport {
    /// Log the tick once, aggregating failures.
    pub fn log(&self) {
        if self.failures.is_empty() {
            debug!(
                class = %self.class,
                polled = self.polled,
                events = self.events.len(),
                "Tick completed"
            );
            return;
        }

        let sample: Vec<String> = self
            .failures
            .iter()
            .take(FAILURE_SAMPLE)
            .map(|(key, e)| format!("{} ({})", key, e))
            .collect();
        let transient = self.failures.iter().filter(|(_, e)| e.is_transient()).count();
        let permanent = self.failures.iter().filter(|(_, e)| e.is_permanent()).count();
        warn!(
            class = %self.class,
            polled = self.polled,
            events = self.events.len(),
            failed = self.failures.len(),
            transient = transient,
            permanent = permanent,
            sample = %sample.join(", "),
            "Tick completed with fetch failures"
        );
    }
}

/// Polls watch targets through their class's external source.
pub struct Poller {
    sources: HashMap<TargetClass, Arc<dyn ExternalSource>>,
    registry: Arc<WatchRegistry>,
    state: Arc<PollerState>,
    config: PollerConfig,
    stats: PollerStats,
}

impl Poller {
    pub fn new(registry: Arc<WatchRegistry>, config: PollerConfig) -> Self {
        let state = Arc::new(PollerState::new(config.seen));
        Self {
            sources: HashMap::new(),
            registry,
            state,
            config,
            stats: PollerStats::default(),
        }
    }

    /// Attach the source backing a target class.
    pub fn with_source(mut self, class: TargetClass, source: Arc<dyn ExternalSource>) -> Self {
        self.sources.insert(class, source);
        self
    }

    pub fn has_source(&self, class: TargetClass) -> bool {
        self.sources.contains_key(&class)
    }

    pub fn registry(&self) -> &Arc<WatchRegistry> {
        &self.registry
    }

    pub fn state(&self) -> &Arc<PollerState> {
        &self.state
    }

    pub fn stats(&self) -> StatsSummary {
        self.stats.summary()
    }

    /// Poll one target. Fetch errors are logged and yield no events.
    pub async fn poll(&self, target: &WatchTarget) -> Vec<Event> {
        match self.try_poll(target).await {
            Ok(events) => events,
            Err(e) => {
                debug!(target = %target.key, error = %e, "Poll failed");
                Vec::new()
            }
        }
    }

    /// Poll one target, surfacing fetch errors.
    pub async fn try_poll(&self, target: &WatchTarget) -> Result<Vec<Event>, FetchError> {
        let source = self
            .sources
            .get(&target.class())
            .ok_or_else(|| FetchError::NoSource(target.class().to_string()))?;

        let fetch = source.fetch_recent_items(target.id());
        let items = tokio::time::timeout(self.config.fetch_timeout, fetch)
            .await
            .map_err(|_| {
                FetchError::Timeout(format!(
                    "{} after {:?}",
                    source.name(),
                    self.config.fetch_timeout
                ))
            })??;

        Ok(self.process_items(target, items, Utc::now()))
    }

    /// Apply fetched items to the target's state, oldest first, and return
    /// the resulting events.
    pub fn process_items(
        &self,
        target: &WatchTarget,
        mut items: Vec<FetchedItem>,
        now: DateTime<Utc>,
    ) -> Vec<Event> {
        items.sort_by_key(|item| item.timestamp);

        match target.rule {
            AlertRule::NewItem(rule) => self.process_new_items(target, &rule, items, now),
            AlertRule::ThresholdCrossing(rule) => self.process_samples(target, &rule, items),
        }
    }

    fn process_new_items(
        &self,
        target: &WatchTarget,
        rule: &NewItemRule,
        items: Vec<FetchedItem>,
        now: DateTime<Utc>,
    ) -> Vec<Event> {
        let skip_before = self
            .config
            .skip_items_before_watch
            .then_some(target.created_at);
        // Anything older than the seen retention may have been announced
        // and forgotten already.
        let stale_before = now - self.config.seen.ttl;

        self.state.with_target(&target.key, |state| {
            let mut events = Vec::new();
            for item in items {
                // Unvalued items stay unrecorded until they can be judged.
                if rule.min_value.is_some() && item.value.is_none() {
                    continue;
                }
                if !state.seen.insert(&item.id, now) {
                    continue;
                }
                if item.timestamp < stale_before {
                    continue;
                }
                if skip_before.is_some_and(|created| item.timestamp < created) {
                    continue;
                }
                if rule.passes(item.value) {
                    events.push(Event::NewItem {
                        target: target.key.clone(),
                        item,
                    });
                }
            }
            events
        })
    }

    fn process_samples(
        &self,
        target: &WatchTarget,
        rule: &ThresholdCrossingRule,
        items: Vec<FetchedItem>,
    ) -> Vec<Event> {
        let window = rule.window();

        self.state.with_target(&target.key, |state| {
            let mut events = Vec::new();
            for item in items {
                let Some(sample) = item.sample() else {
                    continue;
                };
                if !state.series.append(sample, window) {
                    continue;
                }

                let change_pct = state.series.change_pct();
                if !rule.is_crossed(change_pct) {
                    continue;
                }

                if let (Some(first), Some(last)) = (state.series.first(), state.series.last()) {
                    events.push(Event::Jump {
                        target: target.key.clone(),
                        change_pct,
                        window_secs: rule.window_secs,
                        first: *first,
                        last: *last,
                        symbol: item.symbol.clone(),
                    });
                }
                state.series.clear();
            }
            events
        })
    }

    /// Poll every target of a class concurrently, bounded by
    /// `max_concurrent_fetches`.
    pub async fn tick(&self, class: TargetClass) -> TickReport {
        let targets = self.registry.targets_of(class);
        let polled = targets.len();
        let limit = self.config.max_concurrent_fetches.max(1);

        let results: Vec<(TargetKey, Result<Vec<Event>, FetchError>)> = stream::iter(targets)
            .map(|target| async move {
                let result = self.try_poll(&target).await;
                (target.key, result)
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut report = TickReport {
            class,
            polled,
            events: Vec::new(),
            failures: Vec::new(),
        };
        for (key, result) in results {
            match result {
                Ok(events) => report.events.extend(events),
                Err(e) => report.failures.push((key, e)),
            }
        }

        if class == TargetClass::Listings && self.config.auto_track_listings {
            self.auto_track(&report.events);
        }

        let registry = &self.registry;
        self.state
            .retain(|key| key.class != class || registry.contains(key));

        self.stats.record(&report);
        report
    }

    /// Register newly announced listings as token targets for the same
    /// subscribers.
    fn auto_track(&self, events: &[Event]) {
        if !self.has_source(TargetClass::Token) {
            return;
        }

        for event in events {
            let Event::NewItem { target, item } = event else {
                continue;
            };
            if !is_valid_address(&item.id) {
                continue;
            }
            let subscribers = self.registry.subscribers(target);
            let key = TargetKey::new(TargetClass::Token, item.id.clone());
            let evicted = self
                .registry
                .track_auto(key, &subscribers, self.config.auto_track_rule);
            for key in evicted {
                info!(target = %key, "Evicted auto-tracked token");
                self.state.remove(&key);
            }
        }
    }
}
