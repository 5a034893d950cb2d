// src/dag/graph.rs

use std::collections::BTreeSet;
use std::fmt::Write as _;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::dag::action::Action;
use crate::dag::dependency::{Dependency, EdgeId};
use crate::dag::entity::{Entity, EntityId, EntityKind};
use crate::dag::group::{Boundary, BoundarySide, ServiceGroup};
use crate::dag::service::Service;
use crate::errors::{GraphError, Result};
use crate::nodeset::NodeSet;
use crate::types::{DepKind, STATUS_ACTION, Status};

/// Arena holding every entity and every dependency edge of a graph.
///
/// Entities never move and are never removed; edges are removed by leaving a
/// hole in the edge arena. Edges are only created and removed through
/// [`DagGraph::add_dep`] / [`DagGraph::remove_dep`] (and their crate-internal
/// variants) which update both endpoints together.
///
/// An edge is refused if any run could end up waiting on itself, counting
/// service and action dependencies together (see [`DagGraph::waits_on`]).
#[derive(Debug, Clone, Default)]
pub struct DagGraph {
    entities: Vec<Entity>,
    edges: Vec<Option<Dependency>>,
    /// Actions whose runs walk dependents before dependencies.
    reverse_actions: BTreeSet<String>,
}

impl DagGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Set the actions run in reverse. Meant to be called before any
    /// dependency exists: the cycle check of existing edges is not redone.
    pub fn set_reverse_actions<I, S>(&mut self, actions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reverse_actions = actions.into_iter().map(Into::into).collect();
    }

    pub fn is_reverse_action(&self, action: &str) -> bool {
        self.reverse_actions.contains(action)
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        (0..self.entities.len()).map(EntityId)
    }

    /// Entity by id. Ids are only handed out by this arena.
    pub fn entity(&self, id: EntityId) -> &Entity {
        &self.entities[id.0]
    }

    pub fn entity_mut(&mut self, id: EntityId) -> &mut Entity {
        &mut self.entities[id.0]
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id.0)
    }

    pub fn status(&self, id: EntityId) -> Status {
        self.entity(id).status
    }

    pub fn action(&self, id: EntityId) -> &Action {
        self.entity(id)
            .as_action()
            .unwrap_or_else(|| panic!("entity {id} is not an action"))
    }

    pub fn action_mut(&mut self, id: EntityId) -> &mut Action {
        self.entity_mut(id)
            .as_action_mut()
            .unwrap_or_else(|| panic!("entity {id} is not an action"))
    }

    /// Create a service entity.
    pub fn add_service(&mut self, name: impl Into<String>, service: Service) -> EntityId {
        self.push(Entity::new(name, EntityKind::Service(service)))
    }

    /// Create a service group together with its source and sink boundaries.
    pub fn add_group(&mut self, name: impl Into<String>) -> EntityId {
        let group = EntityId(self.entities.len());
        let source = EntityId(group.0 + 1);
        let sink = EntityId(group.0 + 2);

        self.push(Entity::new(
            name,
            EntityKind::Group(ServiceGroup::new(source, sink)),
        ));

        for side in [BoundarySide::Source, BoundarySide::Sink] {
            let mut boundary = Entity::new(side.name(), EntityKind::Boundary(Boundary { group, side }));
            boundary.scope = Some(group);
            self.push(boundary);
        }

        group
    }

    /// Attach a new action to a service.
    ///
    /// The action runs on its own target if one is set on the returned
    /// entity, on the service's target otherwise.
    pub fn add_action(
        &mut self,
        service: EntityId,
        name: impl Into<String>,
        action: Action,
    ) -> Result<EntityId> {
        let name = name.into();
        let owner = self.entity(service);
        let Some(svc) = owner.as_service() else {
            return Err(GraphError::ConfigError(format!(
                "'{}' cannot own actions",
                owner.name
            )));
        };
        if svc.has_action(&name) {
            return Err(GraphError::DuplicateAction {
                service: owner.name.clone(),
                action: name,
            });
        }

        let mut entity = Entity::new(name.clone(), EntityKind::Action(action));
        entity.scope = Some(service);
        let id = self.push(entity);

        if let Some(svc) = self.entity_mut(service).as_service_mut() {
            svc.actions.insert(name, id);
        }

        Ok(id)
    }

    /// Make `parent` depend on `child`.
    pub fn add_dep(&mut self, parent: EntityId, child: EntityId, kind: DepKind) -> Result<EdgeId> {
        self.add_edge(parent, child, kind, false)
    }

    /// Single entry point creating an edge and recording it on both ends.
    pub(crate) fn add_edge(
        &mut self,
        parent: EntityId,
        child: EntityId,
        kind: DepKind,
        internal: bool,
    ) -> Result<EdgeId> {
        let illegal = |graph: &DagGraph, reason: &str| GraphError::IllegalDependency {
            from: graph.label(parent),
            to: graph.label(child),
            reason: reason.to_string(),
        };

        if parent == child {
            return Err(illegal(self, "an entity cannot depend on itself"));
        }
        if self.entity(parent).is_action() != self.entity(child).is_action() {
            return Err(illegal(self, "actions can only depend on actions"));
        }
        if self.entity(parent).has_child(child) || self.entity(parent).has_parent(child) {
            return Err(illegal(self, "dependency already exists"));
        }

        let edge = EdgeId(self.edges.len());
        self.edges.push(Some(Dependency {
            parent,
            child,
            kind,
            internal,
        }));
        self.entity_mut(parent).children.insert(child, edge);
        self.entity_mut(child).parents.insert(parent, edge);

        if let Err(stuck) = self.find_wait_cycle() {
            self.remove_edge(edge);
            self.edges.pop();
            return Err(GraphError::DependencyCycle(format!(
                "'{}' -> '{}' closes a cycle through '{}'",
                self.label(parent),
                self.label(child),
                self.label(stuck)
            )));
        }

        debug!(
            parent = %self.label(parent),
            child = %self.label(child),
            %kind,
            internal,
            "dependency added"
        );

        Ok(edge)
    }

    /// Remove the dependency of `parent` on `child`, if any.
    pub fn remove_dep(&mut self, parent: EntityId, child: EntityId) -> Option<Dependency> {
        let edge = self.entity(parent).children.get(&child).copied()?;
        self.remove_edge(edge)
    }

    /// Single entry point removing an edge from both ends.
    pub(crate) fn remove_edge(&mut self, edge: EdgeId) -> Option<Dependency> {
        let dep = self.edges.get_mut(edge.0)?.take()?;
        self.entity_mut(dep.parent).children.remove(&dep.child);
        self.entity_mut(dep.child).parents.remove(&dep.parent);
        Some(dep)
    }

    /// Change the strength of an existing dependency.
    pub fn set_dep_kind(&mut self, parent: EntityId, child: EntityId, kind: DepKind) -> bool {
        let Some(edge) = self.entity(parent).children.get(&child).copied() else {
            return false;
        };
        match self.edges[edge.0].as_mut() {
            Some(dep) => {
                dep.kind = kind;
                true
            }
            None => false,
        }
    }

    pub fn edge(&self, edge: EdgeId) -> Option<&Dependency> {
        self.edges.get(edge.0).and_then(|e| e.as_ref())
    }

    /// Edge between `parent` and `child`, if `parent` depends on `child`.
    pub fn dependency(&self, parent: EntityId, child: EntityId) -> Option<&Dependency> {
        let edge = self.entity(parent).children.get(&child)?;
        self.edge(*edge)
    }

    /// Edges towards the entities `id` depends on.
    pub fn children(&self, id: EntityId) -> impl Iterator<Item = &Dependency> + '_ {
        self.entity(id)
            .children
            .values()
            .filter_map(move |edge| self.edge(*edge))
    }

    /// Edges from the entities depending on `id`.
    pub fn parents(&self, id: EntityId) -> impl Iterator<Item = &Dependency> + '_ {
        self.entity(id)
            .parents
            .values()
            .filter_map(move |edge| self.edge(*edge))
    }

    /// What `id` waits on in the given traversal direction.
    pub fn dependencies_of(&self, id: EntityId, reverse: bool) -> Vec<Dependency> {
        if reverse {
            self.parents(id).cloned().collect()
        } else {
            self.children(id).cloned().collect()
        }
    }

    /// What waits on `id` in the given traversal direction.
    pub fn dependents_of(&self, id: EntityId, reverse: bool) -> Vec<EntityId> {
        if reverse {
            self.children(id).map(|d| d.child).collect()
        } else {
            self.parents(id).map(|d| d.parent).collect()
        }
    }

    /// Entities `id` waits on during a run walking in the given direction.
    ///
    /// Besides its dependency edges, a service waits on the actions it may
    /// run in that direction and a group on its final boundary. An action
    /// waits on its action dependencies and is held until the dependencies
    /// of its service, and of every enclosing group, are resolved.
    pub fn waits_on(&self, id: EntityId, reverse: bool) -> Vec<EntityId> {
        let entity = self.entity(id);
        let mut targets: Vec<EntityId> = match &entity.kind {
            EntityKind::Action(_) => entity.children.keys().copied().collect(),
            _ => self
                .dependencies_of(id, reverse)
                .iter()
                .map(|dep| dep.target(reverse))
                .collect(),
        };

        match &entity.kind {
            EntityKind::Service(service) => targets.extend(
                service
                    .actions
                    .values()
                    .copied()
                    .filter(|action| self.may_run(*action, reverse)),
            ),
            EntityKind::Group(group) => targets.push(group.final_boundary(reverse)),
            EntityKind::Action(_) => {
                for scope in self.scopes(id) {
                    targets.extend(
                        self.dependencies_of(scope, reverse)
                            .iter()
                            .map(|dep| dep.target(reverse)),
                    );
                }
            }
            EntityKind::Boundary(_) => {}
        }

        targets
    }

    /// Owning service of an action, then the enclosing groups, innermost
    /// first. Empty for top-level entities.
    pub fn scopes(&self, id: EntityId) -> Vec<EntityId> {
        let mut scopes = Vec::new();
        let mut next = self.entity(id).scope;
        while let Some(scope) = next {
            scopes.push(scope);
            next = self.entity(scope).scope;
        }
        scopes
    }

    /// A service may run `action` in a run of that direction when it is the
    /// requested action, the `status` action of a check, or the target of
    /// an action dependency.
    fn may_run(&self, action: EntityId, reverse: bool) -> bool {
        let entity = self.entity(action);
        entity.name == STATUS_ACTION
            || self.is_reverse_action(&entity.name) == reverse
            || !entity.parents.is_empty()
    }

    /// Some entity that would wait on itself, in either direction.
    fn find_wait_cycle(&self) -> std::result::Result<(), EntityId> {
        for reverse in [false, true] {
            let mut waits: DiGraphMap<EntityId, ()> = DiGraphMap::new();
            for id in self.ids() {
                waits.add_node(id);
                for target in self.waits_on(id, reverse) {
                    waits.add_edge(id, target, ());
                }
            }
            toposort(&waits, None).map_err(|cycle| cycle.node_id())?;
        }
        Ok(())
    }

    /// Whether running `action` on `id` makes sense: services must define
    /// it, groups need at least one subservice defining it.
    pub fn has_action(&self, id: EntityId, action: &str) -> bool {
        match &self.entity(id).kind {
            EntityKind::Service(s) => s.has_action(action),
            EntityKind::Group(g) => g
                .subservices
                .values()
                .any(|sub| self.has_action(*sub, action)),
            EntityKind::Boundary(_) => true,
            EntityKind::Action(_) => self.entity(id).name == action,
        }
    }

    /// Action entity for `action` on service `id`.
    pub fn find_action(&self, id: EntityId, action: &str) -> Option<EntityId> {
        self.entity(id).as_service().and_then(|s| s.action(action))
    }

    /// Nodes an action runs on before any filtering: its own target, else
    /// its service's.
    pub fn action_target(&self, id: EntityId) -> &NodeSet {
        let entity = self.entity(id);
        match entity.scope {
            Some(service) if entity.target.is_empty() => &self.entity(service).target,
            _ => &entity.target,
        }
    }

    /// Dotted path used in logs: `group.service.action`.
    pub fn label(&self, id: EntityId) -> String {
        let entity = self.entity(id);
        match entity.scope {
            Some(scope) => format!("{}.{}", self.label(scope), entity.name),
            None => entity.name.clone(),
        }
    }

    /// Return every entity to `NoStatus`.
    pub fn reset(&mut self) {
        for entity in self.entities.iter_mut() {
            entity.reset();
        }
    }

    /// Graphviz rendering of services, groups and their dependencies.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph dependency {\n  compound=true;\n  node [style=filled];\n");

        for id in self.ids() {
            let entity = self.entity(id);
            if entity.is_action() || entity.scope.is_some() {
                continue;
            }
            self.write_dot_entity(&mut out, id, 1);
        }

        for edge in self.edges.iter().flatten() {
            if self.entity(edge.parent).is_action() {
                continue;
            }
            let style = match edge.kind {
                DepKind::Require => "",
                DepKind::RequireWeak => " [style=dashed]",
                DepKind::Check => " [style=dotted]",
            };
            let _ = writeln!(
                out,
                "  \"{}\" -> \"{}\"{};",
                self.label(edge.parent),
                self.label(edge.child),
                style
            );
        }

        out.push_str("}\n");
        out
    }

    fn write_dot_entity(&self, out: &mut String, id: EntityId, depth: usize) {
        let indent = "  ".repeat(depth);
        let entity = self.entity(id);
        match &entity.kind {
            EntityKind::Group(group) => {
                let _ = writeln!(out, "{indent}subgraph \"cluster_{}\" {{", self.label(id));
                let _ = writeln!(out, "{indent}  label=\"{}\";", entity.name);
                for boundary in [group.source, group.sink] {
                    let _ = writeln!(
                        out,
                        "{indent}  \"{}\" [shape=point];",
                        self.label(boundary)
                    );
                }
                for sub in group.subservices.values() {
                    self.write_dot_entity(out, *sub, depth + 1);
                }
                let _ = writeln!(out, "{indent}}}");
            }
            EntityKind::Service(service) => {
                let color = if service.simulate { "lightgrey" } else { "lightblue" };
                let _ = writeln!(
                    out,
                    "{indent}\"{}\" [fillcolor={color}];",
                    self.label(id)
                );
            }
            EntityKind::Boundary(_) | EntityKind::Action(_) => {}
        }
    }

    fn push(&mut self, entity: Entity) -> EntityId {
        let id = EntityId(self.entities.len());
        self.entities.push(entity);
        id
    }
}
