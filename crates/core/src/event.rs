//! Events emitted by the poller.

use crate::{FetchedItem, Sample, TargetKey};
use serde::{Deserialize, Serialize};

/// A notification-worthy observation for one watch target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// A previously unseen item passed the target's new-item rule.
    NewItem { target: TargetKey, item: FetchedItem },
    /// The target's metric crossed its percent-change threshold.
    Jump {
        target: TargetKey,
        change_pct: f64,
        window_secs: i64,
        first: Sample,
        last: Sample,
        symbol: Option<String>,
    },
}

impl Event {
    pub fn target(&self) -> &TargetKey {
        match self {
            Event::NewItem { target, .. } | Event::Jump { target, .. } => target,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::NewItem { .. } => "new_item",
            Event::Jump { .. } => "jump",
        }
    }
}
