// src/dag/entity.rs

//! Graph entities.
//!
//! Every node of the graph is an [`Entity`]: the common fields (name, target,
//! edges, status, variables) plus an [`EntityKind`] carrying what is specific
//! to services, groups, group boundaries and actions.

use std::collections::BTreeMap;
use std::fmt;

use crate::dag::action::Action;
use crate::dag::dependency::EdgeId;
use crate::dag::group::{Boundary, ServiceGroup};
use crate::dag::service::Service;
use crate::nodeset::NodeSet;
use crate::types::Status;

/// Index of an entity in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub(crate) usize);

impl EntityId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub enum EntityKind {
    Service(Service),
    Group(ServiceGroup),
    Boundary(Boundary),
    Action(Action),
}

/// Per-run bookkeeping, cleared by [`Entity::reset`].
#[derive(Debug, Clone, Default)]
pub(crate) struct RunState {
    /// Action this entity was prepared with.
    pub action: Option<String>,
    /// Set once the entity stopped waiting on dependencies.
    pub started: bool,
    /// Aggregated status of the dependencies when the entity started.
    pub deps_status: Option<Status>,
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub name: String,
    pub target: NodeSet,
    pub status: Status,
    pub variables: BTreeMap<String, String>,
    pub desc: Option<String>,
    /// Run root: the entity a run was requested on.
    pub origin: bool,
    /// Enclosing group for subservices and boundaries, owning service for
    /// actions.
    pub scope: Option<EntityId>,
    pub kind: EntityKind,
    pub(crate) children: BTreeMap<EntityId, EdgeId>,
    pub(crate) parents: BTreeMap<EntityId, EdgeId>,
    pub(crate) run: RunState,
}

impl Entity {
    pub(crate) fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            target: NodeSet::new(),
            status: Status::NoStatus,
            variables: BTreeMap::new(),
            desc: None,
            origin: false,
            scope: None,
            kind,
            children: BTreeMap::new(),
            parents: BTreeMap::new(),
            run: RunState::default(),
        }
    }

    pub fn is_service(&self) -> bool {
        matches!(self.kind, EntityKind::Service(_))
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, EntityKind::Group(_))
    }

    pub fn is_boundary(&self) -> bool {
        matches!(self.kind, EntityKind::Boundary(_))
    }

    pub fn is_action(&self) -> bool {
        matches!(self.kind, EntityKind::Action(_))
    }

    /// Services and groups: the entities that own a place in a service graph.
    pub fn is_service_like(&self) -> bool {
        self.is_service() || self.is_group()
    }

    pub fn as_service(&self) -> Option<&Service> {
        match &self.kind {
            EntityKind::Service(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_service_mut(&mut self) -> Option<&mut Service> {
        match &mut self.kind {
            EntityKind::Service(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&ServiceGroup> {
        match &self.kind {
            EntityKind::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut ServiceGroup> {
        match &mut self.kind {
            EntityKind::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_boundary(&self) -> Option<&Boundary> {
        match &self.kind {
            EntityKind::Boundary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_action(&self) -> Option<&Action> {
        match &self.kind {
            EntityKind::Action(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_action_mut(&mut self) -> Option<&mut Action> {
        match &mut self.kind {
            EntityKind::Action(a) => Some(a),
            _ => None,
        }
    }

    /// Number of entities this one depends on.
    pub fn children_count(&self) -> usize {
        self.children.len()
    }

    /// Number of entities depending on this one.
    pub fn parents_count(&self) -> usize {
        self.parents.len()
    }

    pub fn has_child(&self, id: EntityId) -> bool {
        self.children.contains_key(&id)
    }

    pub fn has_parent(&self, id: EntityId) -> bool {
        self.parents.contains_key(&id)
    }

    /// Action this entity was prepared with in the current run.
    pub fn current_action(&self) -> Option<&str> {
        self.run.action.as_deref()
    }

    /// Return to `NoStatus` for a new run. Locks are cleared as well.
    pub fn reset(&mut self) {
        self.status = Status::NoStatus;
        self.origin = false;
        self.run = RunState::default();
        match &mut self.kind {
            EntityKind::Action(action) => action.reset(),
            EntityKind::Service(service) => service.warnings = false,
            EntityKind::Group(_) | EntityKind::Boundary(_) => {}
        }
    }
}
