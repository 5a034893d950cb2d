// src/types.rs

//! Small shared enums used across the graph, the engine and the config layer.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Name of the action used to resolve `check` dependencies.
pub const STATUS_ACTION: &str = "status";

/// Status of a graph entity (service, group, boundary or action).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Status {
    /// Not part of the current run (yet).
    #[default]
    NoStatus,
    /// Prepared, waiting for dependencies or for a delay timer.
    Waiting,
    /// Dispatched to the transport, or running its sub-graph.
    InProgress,
    Done,
    DoneWithWarnings,
    TimedOut,
    TooManyErrors,
    Error,
    /// Failure originated in a dependency, not in the entity itself.
    DepError,
    /// Nothing left to run once node filters were applied.
    Skipped,
    /// Excluded from the run before it started.
    Locked,
}

impl Status {
    /// Terminal statuses end the entity's participation in a run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Done
                | Status::DoneWithWarnings
                | Status::TimedOut
                | Status::TooManyErrors
                | Status::Error
                | Status::DepError
                | Status::Skipped
        )
    }

    /// Terminal statuses that count as a failure for dependents.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Status::TimedOut | Status::TooManyErrors | Status::Error | Status::DepError
        )
    }

    /// Neither terminal nor excluded: something still has to happen.
    pub fn is_unresolved(self) -> bool {
        !self.is_terminal() && self != Status::Locked
    }

    /// Ordering used to fold several final statuses into one.
    pub fn severity(self) -> u8 {
        match self {
            Status::NoStatus | Status::Locked | Status::Skipped | Status::Done => 0,
            Status::Waiting | Status::InProgress => 1,
            Status::DoneWithWarnings => 2,
            Status::DepError => 3,
            Status::TimedOut => 4,
            Status::TooManyErrors => 5,
            Status::Error => 6,
        }
    }

    /// Fold two statuses, keeping the most severe one.
    pub fn worst(self, other: Status) -> Status {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::NoStatus => "NO_STATUS",
            Status::Waiting => "WAITING_STATUS",
            Status::InProgress => "IN_PROGRESS",
            Status::Done => "DONE",
            Status::DoneWithWarnings => "DONE_WITH_WARNINGS",
            Status::TimedOut => "TIMED_OUT",
            Status::TooManyErrors => "TOO_MANY_ERRORS",
            Status::Error => "ERROR",
            Status::DepError => "DEP_ERROR",
            Status::Skipped => "SKIPPED",
            Status::Locked => "LOCKED",
        };
        f.write_str(s)
    }
}

/// Strength of a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepKind {
    /// Failure of the dependency is fatal to the dependent.
    Require,
    /// Failure is tolerated; the dependent ends with warnings.
    RequireWeak,
    /// The dependency runs the `status` action instead of the requested one.
    Check,
}

impl fmt::Display for DepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DepKind::Require => "require",
            DepKind::RequireWeak => "require_weak",
            DepKind::Check => "check",
        };
        f.write_str(s)
    }
}

impl FromStr for DepKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "require" => Ok(DepKind::Require),
            "require_weak" | "weak" => Ok(DepKind::RequireWeak),
            "check" => Ok(DepKind::Check),
            other => Err(format!(
                "invalid dependency type: {other} (expected \"require\", \"require_weak\" or \"check\")"
            )),
        }
    }
}

/// How an action reaches its target nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionMode {
    /// Run the command on every target node.
    #[default]
    Normal,
    /// Run the command once, locally; the node set is exposed as `%TARGET`.
    Delegate,
}

impl FromStr for ActionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal" => Ok(ActionMode::Normal),
            "delegate" => Ok(ActionMode::Delegate),
            other => Err(format!(
                "invalid action mode: {other} (expected \"normal\" or \"delegate\")"
            )),
        }
    }
}
