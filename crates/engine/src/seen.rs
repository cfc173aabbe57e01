//! Bounded de-duplication ledger of already-processed item identifiers.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{HashMap, VecDeque};

/// Log length below which stale observations are never compacted.
const COMPACT_MIN: usize = 64;

/// Retention policy for a [`SeenSet`].
#[derive(Debug, Clone, Copy)]
pub struct SeenPolicy {
    /// Maximum identifiers kept per target. Oldest are evicted first.
    pub cap: usize,
    /// Identifiers older than this are forgotten.
    pub ttl: TimeDelta,
}

impl Default for SeenPolicy {
    fn default() -> Self {
        Self {
            cap: 5000,
            ttl: TimeDelta::hours(24),
        }
    }
}

/// Identifiers already processed for one target.
///
/// Re-observing an identifier refreshes it, so retention drops the
/// identifiers a source stopped returning, least recently seen first.
#[derive(Debug, Clone)]
pub struct SeenSet {
    seen_at: HashMap<String, DateTime<Utc>>,
    // Observation log; an entry is live only while its time matches `seen_at`.
    order: VecDeque<(String, DateTime<Utc>)>,
    policy: SeenPolicy,
}

impl SeenSet {
    pub fn new(policy: SeenPolicy) -> Self {
        Self {
            seen_at: HashMap::new(),
            order: VecDeque::new(),
            policy,
        }
    }

    /// Rebuild from persisted `(id, seen_at)` pairs, oldest first.
    pub fn from_entries(entries: Vec<(String, DateTime<Utc>)>, policy: SeenPolicy, now: DateTime<Utc>) -> Self {
        let mut set = Self::new(policy);
        for (id, seen_at) in entries {
            set.seen_at.insert(id.clone(), seen_at);
            set.order.push_back((id, seen_at));
        }
        set.prune(now);
        set
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen_at.contains_key(id)
    }

    /// Record an observation of `id`. Returns true if it was not already
    /// present; otherwise its retention is extended to `now`.
    pub fn insert(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        let fresh = match self.seen_at.get(id) {
            Some(at) if *at >= now => return false,
            Some(_) => false,
            None => true,
        };
        self.seen_at.insert(id.to_string(), now);
        self.order.push_back((id.to_string(), now));
        self.prune(now);
        fresh
    }

    /// Forget expired identifiers and enforce the capacity cap.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.policy.ttl;
        loop {
            let Some((id, at)) = self.order.front() else {
                break;
            };
            let live = self.seen_at.get(id) == Some(at);
            if live && *at >= cutoff && self.seen_at.len() <= self.policy.cap {
                break;
            }
            if let Some((id, _)) = self.order.pop_front() {
                if live {
                    self.seen_at.remove(&id);
                }
            }
        }

        if self.order.len() > self.policy.cap.saturating_mul(2).max(COMPACT_MIN) {
            let seen_at = &self.seen_at;
            self.order.retain(|(id, at)| seen_at.get(id) == Some(at));
        }
    }

    pub fn len(&self) -> usize {
        self.seen_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen_at.is_empty()
    }

    /// `(id, seen_at)` pairs, least recently seen first, for persistence.
    pub fn entries(&self) -> Vec<(String, DateTime<Utc>)> {
        self.order
            .iter()
            .filter(|(id, at)| self.seen_at.get(id) == Some(at))
            .cloned()
            .collect()
    }
}
