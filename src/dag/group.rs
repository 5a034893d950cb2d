// src/dag/group.rs

//! Service groups and their boundary nodes.
//!
//! A group hides a sub-graph of services behind two synthetic boundaries:
//!
//! ```text
//!            source                 (depends on every top subservice)
//!           /      \
//!        sub_a    sub_b
//!           \      /
//!             sink                  (every bottom subservice depends on it)
//! ```
//!
//! From the outside the group is one node. Running it forward prepares the
//! source, which pulls the whole sub-graph down to the sink; running it in
//! reverse prepares the sink and climbs back to the source.

use std::collections::BTreeMap;

use tracing::debug;

use crate::dag::entity::EntityId;
use crate::dag::graph::DagGraph;
use crate::errors::{GraphError, Result};
use crate::types::DepKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundarySide {
    Source,
    Sink,
}

impl BoundarySide {
    pub fn name(self) -> &'static str {
        match self {
            BoundarySide::Source => "source",
            BoundarySide::Sink => "sink",
        }
    }
}

/// Synthetic boundary node of a group. Never carries a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    pub group: EntityId,
    pub side: BoundarySide,
}

#[derive(Debug, Clone)]
pub struct ServiceGroup {
    pub subservices: BTreeMap<String, EntityId>,
    pub source: EntityId,
    pub sink: EntityId,
}

impl ServiceGroup {
    pub(crate) fn new(source: EntityId, sink: EntityId) -> Self {
        Self {
            subservices: BTreeMap::new(),
            source,
            sink,
        }
    }

    /// Boundary whose completion completes the group.
    pub fn final_boundary(&self, reverse: bool) -> EntityId {
        if reverse { self.sink } else { self.source }
    }

    pub fn subservice(&self, name: &str) -> Option<EntityId> {
        self.subservices.get(name).copied()
    }
}

impl DagGraph {
    fn group(&self, group: EntityId) -> &ServiceGroup {
        self.entity(group)
            .as_group()
            .unwrap_or_else(|| panic!("entity {group} is not a service group"))
    }

    /// Subservices of `group`, in name order.
    pub fn subservices(&self, group: EntityId) -> Vec<EntityId> {
        self.group(group).subservices.values().copied().collect()
    }

    /// Add `target` to the sub-graph of `group`.
    ///
    /// With `base`, `base` (registered as well if needed) depends on
    /// `target` through an internal edge of the given kind. Without it,
    /// `target` hangs directly between source and sink. Boundary wiring is
    /// recomputed afterwards.
    pub fn add_inter_dep(
        &mut self,
        group: EntityId,
        target: EntityId,
        base: Option<EntityId>,
        kind: DepKind,
    ) -> Result<()> {
        self.register_subservice(group, target)?;
        let linked = match base {
            Some(base) => self
                .register_subservice(group, base)
                .and_then(|()| self.add_edge(base, target, kind, true).map(|_| ())),
            None => Ok(()),
        };
        // Rewire even when the edge was refused: both ends may be new members.
        self.update_edges(group)?;
        linked
    }

    /// Detach a subservice from the sub-graph, on both sides.
    pub fn remove_inter_dep(&mut self, group: EntityId, name: &str) -> Result<()> {
        let removed = self
            .entity_mut(group)
            .as_group_mut()
            .and_then(|g| g.subservices.remove(name));
        let Some(sub) = removed else {
            return Err(GraphError::ServiceNotFound(format!(
                "{}.{}",
                self.label(group),
                name
            )));
        };

        let edges: Vec<_> = {
            let entity = self.entity(sub);
            entity
                .children
                .values()
                .chain(entity.parents.values())
                .copied()
                .collect()
        };
        for edge in edges {
            self.remove_edge(edge);
        }
        self.entity_mut(sub).scope = None;

        debug!(group = %self.label(group), subservice = %name, "subservice removed");
        self.update_edges(group)
    }

    /// Restore the boundary invariant of `group`: a subservice without an
    /// internal parent is a child of the source, a subservice without an
    /// internal child is a parent of the sink.
    pub fn update_edges(&mut self, group: EntityId) -> Result<()> {
        let (source, sink) = {
            let g = self.group(group);
            (g.source, g.sink)
        };

        for sub in self.subservices(group) {
            let has_internal_parent = self
                .parents(sub)
                .any(|dep| dep.internal && dep.parent != source);
            let linked_to_source = self.entity(source).has_child(sub);

            if has_internal_parent && linked_to_source {
                self.remove_dep(source, sub);
            } else if !has_internal_parent && !linked_to_source {
                self.add_edge(source, sub, DepKind::Require, true)?;
            }

            let has_internal_child = self
                .children(sub)
                .any(|dep| dep.internal && dep.child != sink);
            let linked_to_sink = self.entity(sub).has_child(sink);

            if has_internal_child && linked_to_sink {
                self.remove_dep(sub, sink);
            } else if !has_internal_child && !linked_to_sink {
                self.add_edge(sub, sink, DepKind::Require, true)?;
            }
        }

        Ok(())
    }

    fn register_subservice(&mut self, group: EntityId, sub: EntityId) -> Result<()> {
        if !self.entity(sub).is_service_like() {
            return Err(GraphError::IllegalDependency {
                from: self.label(group),
                to: self.label(sub),
                reason: "only services and groups can join a group".to_string(),
            });
        }

        let name = self.entity(sub).name.clone();
        match self.group(group).subservice(&name) {
            Some(existing) if existing == sub => return Ok(()),
            Some(_) => {
                return Err(GraphError::DuplicateService(format!(
                    "{}.{}",
                    self.label(group),
                    name
                )));
            }
            None => {}
        }
        if let Some(other) = self.entity(sub).scope {
            return Err(GraphError::IllegalDependency {
                from: self.label(group),
                to: self.label(sub),
                reason: format!("already a member of '{}'", self.label(other)),
            });
        }

        self.entity_mut(sub).scope = Some(group);
        if let Some(g) = self.entity_mut(group).as_group_mut() {
            g.subservices.insert(name.clone(), sub);
        }
        debug!(group = %self.label(group), subservice = %name, "subservice registered");
        Ok(())
    }
}
