// src/dag/service.rs

use std::collections::BTreeMap;

use crate::dag::entity::EntityId;

/// A named collection of actions taking part in the dependency graph.
#[derive(Debug, Clone, Default)]
pub struct Service {
    /// Action name → action entity.
    pub actions: BTreeMap<String, EntityId>,
    /// Set when the last action finished with warnings.
    pub warnings: bool,
    /// Ghost service: resolves like any other, never dispatches a command.
    pub simulate: bool,
}

impl Service {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn simulated() -> Self {
        Self {
            simulate: true,
            ..Self::default()
        }
    }

    pub fn action(&self, name: &str) -> Option<EntityId> {
        self.actions.get(name).copied()
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }
}
