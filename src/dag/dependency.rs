// src/dag/dependency.rs

//! Typed dependency edges.

use crate::dag::entity::EntityId;
use crate::types::DepKind;

/// Index of an edge in the graph's edge arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub(crate) usize);

/// A dependency between two entities: `parent` depends on `child`.
///
/// Edges are stored once, in [`crate::dag::DagGraph`]; both endpoints only
/// keep the edge id, so the two directions can never disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub parent: EntityId,
    pub child: EntityId,
    pub kind: DepKind,
    /// The edge lives entirely inside a group's sub-graph.
    pub internal: bool,
}

impl Dependency {
    pub fn is_strong(&self) -> bool {
        self.kind == DepKind::Require
    }

    pub fn is_check(&self) -> bool {
        self.kind == DepKind::Check
    }

    /// The entity that has to be resolved first, given the traversal direction.
    pub fn target(&self, reverse: bool) -> EntityId {
        if reverse { self.parent } else { self.child }
    }

    /// The entity waiting on [`Dependency::target`].
    pub fn dependent(&self, reverse: bool) -> EntityId {
        if reverse { self.child } else { self.parent }
    }
}
