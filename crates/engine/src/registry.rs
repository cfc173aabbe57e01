//! Registry of active watch targets, shared by the command layer and the
//! poller.

use dashmap::DashMap;
use smartflow_core::{AlertRule, ChatId, TargetClass, TargetKey, WatchTarget};
use std::collections::HashMap;
use tracing::debug;

/// Result of a `watch` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// A new target was created.
    Created,
    /// The chat was added to an existing target.
    Subscribed,
    /// The chat already watched the target; the rule was refreshed.
    AlreadyWatching,
}

/// Thread-safe registry of watch targets.
#[derive(Debug)]
pub struct WatchRegistry {
    targets: DashMap<TargetKey, WatchTarget>,
    max_auto_tracked: usize,
}

impl Default for WatchRegistry {
    fn default() -> Self {
        Self::new(50)
    }
}

impl WatchRegistry {
    pub fn new(max_auto_tracked: usize) -> Self {
        Self {
            targets: DashMap::new(),
            max_auto_tracked,
        }
    }

    /// Subscribe a chat to a target with the given rule.
    ///
    /// One rule applies per target; the latest `watch` call sets it. Watching
    /// an auto-tracked target turns it into a user target.
    pub fn watch(&self, key: TargetKey, chat_id: ChatId, rule: AlertRule) -> WatchOutcome {
        let mut created = false;
        let mut target = self.targets.entry(key.clone()).or_insert_with(|| {
            created = true;
            WatchTarget::new(key, rule)
        });
        if target.rule != rule {
            debug!(target = %target.key, rule = ?rule, "Replacing target rule");
            target.rule = rule;
        }
        target.auto = false;
        let inserted = target.subscribers.insert(chat_id);

        if created {
            WatchOutcome::Created
        } else if inserted {
            WatchOutcome::Subscribed
        } else {
            WatchOutcome::AlreadyWatching
        }
    }

    /// Unsubscribe a chat from a target. The target is removed when its last
    /// subscriber leaves. Returns whether the chat was subscribed.
    pub fn unwatch(&self, key: &TargetKey, chat_id: ChatId) -> bool {
        let removed = match self.targets.get_mut(key) {
            Some(mut target) => target.subscribers.remove(&chat_id),
            None => return false,
        };
        self.targets.remove_if(key, |_, target| target.subscribers.is_empty());
        removed
    }

    /// Unsubscribe a chat from every target with this id, whatever its class.
    pub fn unwatch_id(&self, id: &str, chat_id: ChatId) -> Vec<TargetKey> {
        TargetClass::ALL
            .iter()
            .map(|class| TargetKey::new(*class, id))
            .filter(|key| self.unwatch(key, chat_id))
            .collect()
    }

    /// Targets a chat is subscribed to, sorted by key.
    pub fn list_watched(&self, chat_id: ChatId) -> Vec<WatchTarget> {
        let mut targets: Vec<WatchTarget> = self
            .targets
            .iter()
            .filter(|entry| entry.subscribers.contains(&chat_id))
            .map(|entry| entry.value().clone())
            .collect();
        targets.sort_by(|a, b| a.key.cmp(&b.key));
        targets
    }

    /// Snapshot of all targets of a class.
    pub fn targets_of(&self, class: TargetClass) -> Vec<WatchTarget> {
        self.targets
            .iter()
            .filter(|entry| entry.key().class == class)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn all(&self) -> Vec<WatchTarget> {
        self.targets.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn get(&self, key: &TargetKey) -> Option<WatchTarget> {
        self.targets.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &TargetKey) -> bool {
        self.targets.contains_key(key)
    }

    pub fn subscribers(&self, key: &TargetKey) -> Vec<ChatId> {
        self.targets
            .get(key)
            .map(|entry| entry.subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Insert a fully-formed target (hydration from storage).
    pub fn insert(&self, target: WatchTarget) {
        self.targets.insert(target.key.clone(), target);
    }

    /// Register a target on behalf of the bot for the given subscribers.
    ///
    /// Existing targets only gain subscribers. Auto targets beyond the cap
    /// are evicted oldest first; the evicted keys are returned.
    pub fn track_auto(&self, key: TargetKey, subscribers: &[ChatId], rule: AlertRule) -> Vec<TargetKey> {
        if subscribers.is_empty() {
            return Vec::new();
        }
        self.targets
            .entry(key.clone())
            .and_modify(|target| target.subscribers.extend(subscribers.iter().copied()))
            .or_insert_with(|| {
                let mut target = WatchTarget::new(key, rule).auto();
                target.subscribers.extend(subscribers.iter().copied());
                target
            });
        self.evict_auto_overflow()
    }

    fn evict_auto_overflow(&self) -> Vec<TargetKey> {
        let mut autos: Vec<(chrono::DateTime<chrono::Utc>, TargetKey)> = self
            .targets
            .iter()
            .filter(|entry| entry.auto)
            .map(|entry| (entry.created_at, entry.key().clone()))
            .collect();
        if autos.len() <= self.max_auto_tracked {
            return Vec::new();
        }
        autos.sort();
        let overflow = autos.len() - self.max_auto_tracked;
        autos
            .into_iter()
            .take(overflow)
            .filter_map(|(_, key)| self.targets.remove_if(&key, |_, t| t.auto).map(|(key, _)| key))
            .collect()
    }

    /// Number of targets per class.
    pub fn counts(&self) -> HashMap<TargetClass, usize> {
        let mut counts = HashMap::new();
        for entry in self.targets.iter() {
            *counts.entry(entry.key().class).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn token(id: &str) -> TargetKey {
        TargetKey::new(TargetClass::Token, id)
    }

    #[test]
    fn test_watch_and_unwatch() {
        let registry = WatchRegistry::default();
        let rule = AlertRule::jump(300, 25.0);

        assert_eq!(registry.watch(token("m1"), 1, rule), WatchOutcome::Created);
        assert_eq!(registry.watch(token("m1"), 2, rule), WatchOutcome::Subscribed);
        assert_eq!(registry.watch(token("m1"), 2, rule), WatchOutcome::AlreadyWatching);
        assert_eq!(registry.subscribers(&token("m1")), vec![1, 2]);

        assert!(registry.unwatch(&token("m1"), 1));
        assert!(!registry.unwatch(&token("m1"), 1));
        assert!(registry.contains(&token("m1")));

        assert!(registry.unwatch(&token("m1"), 2));
        assert!(!registry.contains(&token("m1")));
    }

    #[test]
    fn test_latest_rule_wins() {
        let registry = WatchRegistry::default();
        registry.watch(token("m1"), 1, AlertRule::jump(300, 25.0));
        registry.watch(token("m1"), 2, AlertRule::jump(300, 10.0));
        assert_eq!(registry.get(&token("m1")).unwrap().rule, AlertRule::jump(300, 10.0));
    }

    #[test]
    fn test_list_watched_and_unwatch_id() {
        let registry = WatchRegistry::default();
        registry.watch(token("addr"), 7, AlertRule::jump(300, 25.0));
        registry.watch(TargetKey::new(TargetClass::Wallet, "addr"), 7, AlertRule::new_item(Some(1000.0)));
        registry.watch(token("other"), 8, AlertRule::jump(300, 25.0));

        let listed: Vec<_> = registry.list_watched(7).into_iter().map(|t| t.key).collect();
        assert_eq!(listed, vec![token("addr"), TargetKey::new(TargetClass::Wallet, "addr")]);

        let removed = registry.unwatch_id("addr", 7);
        assert_eq!(removed.len(), 2);
        assert!(registry.list_watched(7).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_track_auto_caps_and_preserves_user_targets() {
        let registry = WatchRegistry::new(2);
        let rule = AlertRule::jump(300, 25.0);
        registry.watch(token("user"), 1, rule);

        assert!(registry.track_auto(token("a1"), &[1], rule).is_empty());
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(registry.track_auto(token("a2"), &[1], rule).is_empty());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let evicted = registry.track_auto(token("a3"), &[1], rule);

        assert_eq!(evicted, vec![token("a1")]);
        assert!(registry.contains(&token("user")));
        assert!(registry.contains(&token("a3")));
        assert_eq!(registry.targets_of(TargetClass::Token).len(), 3);
    }

    #[test]
    fn test_watching_auto_target_promotes_it() {
        let registry = WatchRegistry::new(1);
        let rule = AlertRule::jump(300, 25.0);
        registry.track_auto(token("a1"), &[1], rule);
        registry.watch(token("a1"), 2, rule);

        let target = registry.get(&token("a1")).unwrap();
        assert!(!target.auto);
        assert_eq!(registry.subscribers(&token("a1")), vec![1, 2]);
    }
}
