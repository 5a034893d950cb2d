// src/dag/mod.rs

//! Dependency graph representation and scheduling.
//!
//! - [`graph`] holds the arena of entities and typed dependency edges.
//! - [`entity`], [`service`], [`action`] and [`group`] define what lives in
//!   the arena; groups bring their source/sink boundaries.
//! - [`scheduler`] contains the per-run state machine that prepares
//!   dependencies, starts entities and propagates statuses.
//! - [`scheduler_step`] defines the result type for scheduler steps.

pub mod action;
pub mod dependency;
pub mod entity;
pub mod graph;
pub mod group;
pub mod scheduler;
pub mod scheduler_step;
pub mod service;

pub use action::{Action, ResolvedAction, Verdict};
pub use dependency::{Dependency, EdgeId};
pub use entity::{Entity, EntityId, EntityKind};
pub use graph::DagGraph;
pub use group::{Boundary, BoundarySide, ServiceGroup};
pub use scheduler::{RunPlan, Scheduler};
pub use scheduler_step::SchedulerStep;
pub use service::Service;
