// src/engine/mod.rs

//! Execution engine.
//!
//! This module ties together:
//! - the dependency [`crate::dag::Scheduler`] (traversal + status propagation)
//! - the [`ActionManager`] (fanout bookkeeping of in-flight actions)
//! - the [`ServiceManager`] (service registry, run selection, overall status)
//! - the async [`Runtime`] that feeds transport events into the pure core.
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::time::Duration;

use crate::dag::EntityId;
use crate::nodeset::NodeSet;
use crate::types::{ActionMode, Status};

/// Result of one command on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeResult {
    pub node: String,
    /// `None` when the command never produced an exit status (timeout,
    /// signal, spawn failure).
    pub exit_code: Option<i32>,
    /// Combined stdout/stderr.
    pub output: String,
    pub timed_out: bool,
}

impl NodeResult {
    pub fn exited(node: impl Into<String>, code: i32) -> Self {
        Self {
            node: node.into(),
            exit_code: Some(code),
            output: String::new(),
            timed_out: false,
        }
    }

    pub fn timeout(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            exit_code: None,
            output: String::new(),
            timed_out: true,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn is_error(&self) -> bool {
        !self.timed_out && self.exit_code != Some(0)
    }
}

/// Per-node results of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub nodes: Vec<NodeResult>,
}

impl DispatchOutcome {
    pub fn new(nodes: Vec<NodeResult>) -> Self {
        Self { nodes }
    }

    /// Nodes whose command exited non-zero (or without status).
    pub fn error_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_error()).count()
    }

    pub fn timeout_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.timed_out).count()
    }
}

/// Command the transport has to run.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub action: EntityId,
    /// `service.action` path, for logs.
    pub label: String,
    pub command: String,
    /// Empty: run once on the local host.
    pub nodes: NodeSet,
    pub mode: ActionMode,
    pub timeout: Option<Duration>,
}

/// Command produced by the pure core, executed by the IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    Dispatch(DispatchRequest),
    /// Send `TimerFired { action }` back after `delay`.
    ArmTimer { action: EntityId, delay: Duration },
    /// New lowest fanout in effect; `None` once nothing is in flight.
    SetConcurrencyLimit(Option<usize>),
}

/// Read-only notifications for progress display.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// An action was handed to the transport.
    Started {
        entity: EntityId,
        label: String,
        command: String,
        nodes: NodeSet,
    },
    /// An entity reached a terminal status.
    Completed {
        entity: EntityId,
        label: String,
        status: Status,
    },
    StatusChanged {
        entity: EntityId,
        label: String,
        from: Status,
        to: Status,
    },
    /// An action is waiting on its delay timer (first attempt or retry).
    Delayed {
        entity: EntityId,
        label: String,
        delay: Duration,
    },
}

/// Events flowing into the runtime from the transport.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    ActionCompleted {
        action: EntityId,
        outcome: DispatchOutcome,
    },
    TimerFired {
        action: EntityId,
    },
    /// Ctrl+C or an embedding application asked the run to stop.
    ShutdownRequested,
}

pub mod action_manager;
pub mod core;
pub mod manager;
pub mod observer;
pub mod runtime;

pub use action_manager::{ActionManager, DEFAULT_FANOUT};
pub use core::{CoreRuntime, CoreStep};
pub use manager::{ManagerOptions, RunOptions, ServiceManager};
pub use observer::{LogObserver, Observer};
pub use runtime::Runtime;
