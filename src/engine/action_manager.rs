// src/engine/action_manager.rs

//! Fanout bookkeeping for in-flight actions.
//!
//! Every running or delayed action is filed under its fanout. The transport
//! concurrency limit is the smallest fanout among them: admitting an action
//! with a lower fanout tightens the limit for everybody until it finishes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::dag::EntityId;

/// Fanout used when an action does not set one (or sets one below 1).
pub const DEFAULT_FANOUT: usize = 64;

#[derive(Debug, Clone)]
pub struct ActionManager {
    default_fanout: usize,
    /// fanout → actions filed under it. Never holds an empty bucket.
    buckets: BTreeMap<usize, BTreeSet<EntityId>>,
    /// action → its bucket key.
    tracked: HashMap<EntityId, usize>,
    total_submitted: usize,
}

impl Default for ActionManager {
    fn default() -> Self {
        Self::new(DEFAULT_FANOUT)
    }
}

impl ActionManager {
    pub fn new(default_fanout: usize) -> Self {
        Self {
            default_fanout: default_fanout.max(1),
            buckets: BTreeMap::new(),
            tracked: HashMap::new(),
            total_submitted: 0,
        }
    }

    pub fn default_fanout(&self) -> usize {
        self.default_fanout
    }

    pub fn set_default_fanout(&mut self, fanout: usize) {
        self.default_fanout = fanout.max(1);
    }

    /// Effective concurrency limit, `None` when nothing is in flight.
    pub fn fanout(&self) -> Option<usize> {
        self.buckets.keys().next().copied()
    }

    pub fn contains(&self, action: EntityId) -> bool {
        self.tracked.contains_key(&action)
    }

    /// Actions currently running or delayed.
    pub fn in_flight(&self) -> usize {
        self.tracked.len()
    }

    /// Actions ever admitted.
    pub fn total_submitted(&self) -> usize {
        self.total_submitted
    }

    pub fn running_tasks(&self) -> BTreeSet<EntityId> {
        self.buckets.values().flatten().copied().collect()
    }

    /// Start tracking `action`. Returns `true` if the effective limit changed.
    pub fn add_task(&mut self, action: EntityId, fanout: Option<usize>) -> bool {
        if self.tracked.contains_key(&action) {
            return false;
        }

        let key = fanout.filter(|f| *f >= 1).unwrap_or(self.default_fanout);
        let previous = self.fanout();

        self.buckets.entry(key).or_default().insert(action);
        self.tracked.insert(action, key);
        self.total_submitted += 1;

        let changed = self.fanout() != previous;
        debug!(
            %action,
            fanout = key,
            in_flight = self.tracked.len(),
            effective = ?self.fanout(),
            changed,
            "action admitted"
        );
        changed
    }

    /// Forget every in-flight action, e.g. after an aborted run.
    pub fn clear(&mut self) {
        if !self.tracked.is_empty() {
            debug!(in_flight = self.tracked.len(), "dropping in-flight actions");
        }
        self.buckets.clear();
        self.tracked.clear();
    }

    /// Stop tracking `action`. Returns `true` if the effective limit changed.
    pub fn remove_task(&mut self, action: EntityId) -> bool {
        let Some(key) = self.tracked.remove(&action) else {
            warn!(%action, "remove_task for an action that is not tracked");
            return false;
        };

        let previous = self.fanout();
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.remove(&action);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }

        let changed = self.fanout() != previous;
        debug!(
            %action,
            fanout = key,
            in_flight = self.tracked.len(),
            effective = ?self.fanout(),
            changed,
            "action released"
        );
        changed
    }
}
