// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::engine::{CoreCommand, EngineEvent};

/// Structured result of a single scheduler "step".
///
/// This is useful for tests that want to manually step the graph and make
/// assertions about what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Work for the IO shell, in the order it was produced.
    pub commands: Vec<CoreCommand>,
    /// Progress notifications produced by this step.
    pub events: Vec<EngineEvent>,
    /// Whether this step caused the current run to finish (i.e. every root
    /// is now resolved).
    pub run_just_finished: bool,
}

impl SchedulerStep {
    /// Actions handed to the transport in this step.
    pub fn dispatched(&self) -> impl Iterator<Item = &crate::engine::DispatchRequest> {
        self.commands.iter().filter_map(|cmd| match cmd {
            CoreCommand::Dispatch(req) => Some(req),
            _ => None,
        })
    }
}
