// src/dag/action.rs

//! Actions: the leaf execution units of the graph.
//!
//! An action belongs to one service and holds a command template, its
//! execution tunables (timeout, delay, retries, thresholds, fanout) and the
//! bookkeeping of the current run. The result classification lives here;
//! the scheduler decides what to do with the verdict.

use std::time::{Duration, Instant};

use crate::engine::DispatchOutcome;
use crate::nodeset::NodeSet;
use crate::types::{ActionMode, Status};

#[derive(Debug, Clone)]
pub struct Action {
    /// Command template, `%VAR` placeholders are resolved before a run.
    pub command: String,
    /// Per-node timeout; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Wait before the first attempt, and between retries.
    pub delay: Duration,
    pub maxretry: u32,
    /// Retries already consumed in this run.
    pub tries: u32,
    /// Non-zero exits tolerated before the action fails.
    pub errors: usize,
    /// Non-zero exits tolerated before the action reports warnings.
    pub warnings: usize,
    pub fanout: Option<usize>,
    pub mode: ActionMode,
    /// Per-node results of the last attempt.
    pub last_result: Option<DispatchOutcome>,
    pub start_time: Option<Instant>,
    pub stop_time: Option<Instant>,
    /// How many times the command was handed to the transport in this run.
    pub dispatched: u32,
    pub(crate) resolved: Option<ResolvedAction>,
}

/// Command line and nodes computed by the run pre-flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAction {
    pub command: String,
    pub nodes: NodeSet,
    pub fanout: Option<usize>,
    /// The configured target was emptied by node filters.
    pub skipped: bool,
}

/// What to do with a finished attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retry,
    Final(Status),
}

impl Action {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: None,
            delay: Duration::ZERO,
            maxretry: 0,
            tries: 0,
            errors: 0,
            warnings: 0,
            fanout: None,
            mode: ActionMode::Normal,
            last_result: None,
            start_time: None,
            stop_time: None,
            dispatched: 0,
            resolved: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_retry(mut self, maxretry: u32) -> Self {
        self.maxretry = maxretry;
        self
    }

    pub fn with_errors(mut self, errors: usize) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_warnings(mut self, warnings: usize) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = Some(fanout);
        self
    }

    pub fn with_mode(mut self, mode: ActionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Retries left in the budget.
    pub fn retries_left(&self) -> u32 {
        self.maxretry.saturating_sub(self.tries)
    }

    /// Wall time between the first dispatch and the last completion.
    ///
    /// `None` if the action never reached the transport.
    pub fn duration(&self) -> Option<Duration> {
        match (self.start_time, self.stop_time) {
            (Some(start), Some(stop)) => Some(stop.saturating_duration_since(start)),
            _ => None,
        }
    }

    pub fn resolved(&self) -> Option<&ResolvedAction> {
        self.resolved.as_ref()
    }

    /// Command handed to the transport.
    pub fn effective_command(&self) -> &str {
        self.resolved
            .as_ref()
            .map(|r| r.command.as_str())
            .unwrap_or(&self.command)
    }

    /// Classify a finished attempt.
    ///
    /// A timed-out node is never tolerated: the attempt is retried while
    /// budget remains, then ends `TimedOut`. Only non-zero exits count
    /// against the thresholds. Up to `errors` of them are tolerated, beyond
    /// that the attempt is retried, then ends `TooManyErrors`. Tolerated
    /// exits above `warnings` give `DoneWithWarnings`.
    pub fn classify(&self, outcome: &DispatchOutcome) -> Verdict {
        let nb_timeout = outcome.timeout_count();
        let nb_errors = outcome.error_count();
        let can_retry = self.tries < self.maxretry;

        if nb_timeout > 0 {
            return if can_retry {
                Verdict::Retry
            } else {
                Verdict::Final(Status::TimedOut)
            };
        }

        if nb_errors > self.errors {
            return if can_retry {
                Verdict::Retry
            } else {
                Verdict::Final(Status::TooManyErrors)
            };
        }

        if nb_errors > self.warnings {
            Verdict::Final(Status::DoneWithWarnings)
        } else {
            Verdict::Final(Status::Done)
        }
    }

    pub fn reset(&mut self) {
        self.tries = 0;
        self.last_result = None;
        self.start_time = None;
        self.stop_time = None;
        self.dispatched = 0;
        self.resolved = None;
    }
}
