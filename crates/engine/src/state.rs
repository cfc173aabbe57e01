//! Per-target poller state: seen identifiers and observation series.

use crate::{ObservationSeries, SeenPolicy, SeenSet};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use smartflow_core::TargetKey;

/// Mutable state the poller keeps for one target.
#[derive(Debug, Clone)]
pub struct TargetState {
    pub seen: SeenSet,
    pub series: ObservationSeries,
}

impl TargetState {
    pub fn new(policy: SeenPolicy) -> Self {
        Self {
            seen: SeenSet::new(policy),
            series: ObservationSeries::new(),
        }
    }
}

/// Serializable form of [`TargetState`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetSnapshot {
    pub seen: Vec<(String, DateTime<Utc>)>,
    pub series: ObservationSeries,
}

/// Process-wide poller state, keyed by target.
///
/// Each entry is only mutated by the poll of its own target; entry guards
/// are never held across an await point.
#[derive(Debug)]
pub struct PollerState {
    targets: DashMap<TargetKey, TargetState>,
    policy: SeenPolicy,
}

impl PollerState {
    pub fn new(policy: SeenPolicy) -> Self {
        Self {
            targets: DashMap::new(),
            policy,
        }
    }

    /// Run `f` against the target's state, creating it on first use.
    pub fn with_target<R>(&self, key: &TargetKey, f: impl FnOnce(&mut TargetState) -> R) -> R {
        let mut entry = self
            .targets
            .entry(key.clone())
            .or_insert_with(|| TargetState::new(self.policy));
        f(entry.value_mut())
    }

    pub fn remove(&self, key: &TargetKey) {
        self.targets.remove(key);
    }

    /// Drop state for targets no longer watched.
    pub fn retain(&self, mut keep: impl FnMut(&TargetKey) -> bool) {
        self.targets.retain(|key, _| keep(key));
    }

    pub fn contains(&self, key: &TargetKey) -> bool {
        self.targets.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Snapshot every target's state for persistence.
    pub fn snapshot(&self) -> Vec<(TargetKey, TargetSnapshot)> {
        self.targets
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    TargetSnapshot {
                        seen: entry.seen.entries(),
                        series: entry.series.clone(),
                    },
                )
            })
            .collect()
    }

    /// Load persisted state, replacing whatever is held for those targets.
    pub fn hydrate(&self, snapshots: Vec<(TargetKey, TargetSnapshot)>, now: DateTime<Utc>) {
        for (key, snapshot) in snapshots {
            let state = TargetState {
                seen: SeenSet::from_entries(snapshot.seen, self.policy, now),
                series: snapshot.series,
            };
            self.targets.insert(key, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;
    use smartflow_core::{Sample, TargetClass};

    #[test]
    fn test_snapshot_and_hydrate() {
        let now = Utc::now();
        let key = TargetKey::new(TargetClass::Token, "mint");
        let state = PollerState::new(SeenPolicy::default());
        state.with_target(&key, |target| {
            target.seen.insert("tick-1", now);
            target
                .series
                .append(Sample::new(now, 1.5), TimeDelta::minutes(5));
        });

        let snapshot = state.snapshot();
        let restored = PollerState::new(SeenPolicy::default());
        restored.hydrate(snapshot.clone(), now);

        assert_eq!(restored.snapshot(), snapshot);
        assert!(restored.with_target(&key, |target| target.seen.contains("tick-1")));
    }

    #[test]
    fn test_retain() {
        let state = PollerState::new(SeenPolicy::default());
        let keep = TargetKey::new(TargetClass::Wallet, "a");
        let drop = TargetKey::new(TargetClass::Wallet, "b");
        state.with_target(&keep, |_| ());
        state.with_target(&drop, |_| ());

        state.retain(|key| key == &keep);
        assert!(state.contains(&keep));
        assert!(!state.contains(&drop));
    }
}
