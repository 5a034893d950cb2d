//! Drive a `CoreRuntime` to completion without Tokio.
//!
//! Commands are turned into pending events (completions from a [`Script`],
//! timers firing at once); a `pick` function chooses which pending event is
//! delivered next, so tests can explore arbitrary completion orders.

use std::collections::HashSet;

use svcgraph::dag::EntityId;
use svcgraph::engine::{CoreCommand, CoreRuntime, CoreStep, EngineEvent, RuntimeEvent};
use svcgraph::types::Status;

use crate::fake_transport::{Script, TransportLog};

/// Something that happened, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trace {
    Dispatched(String),
    Finished(String, Status),
}

#[derive(Debug, Default)]
pub struct DriveResult {
    pub log: TransportLog,
    pub trace: Vec<Trace>,
    /// Most actions in flight at once.
    pub max_in_flight: usize,
    /// Steps executed, the initial one included.
    pub steps: usize,
}

impl DriveResult {
    pub fn position(&self, wanted: &Trace) -> Option<usize> {
        self.trace.iter().position(|t| t == wanted)
    }

    /// Index of the terminal event of `label`.
    pub fn finished_at(&self, label: &str) -> Option<usize> {
        self.trace
            .iter()
            .position(|t| matches!(t, Trace::Finished(l, _) if l == label))
    }

    pub fn dispatched_at(&self, label: &str) -> Option<usize> {
        self.position(&Trace::Dispatched(label.to_string()))
    }
}

/// Feed `first` and every following step until the core stops.
pub fn drive<F>(core: &mut CoreRuntime, first: CoreStep, script: &Script, mut pick: F) -> DriveResult
where
    F: FnMut(usize) -> usize,
{
    let mut result = DriveResult::default();
    let mut pending: Vec<RuntimeEvent> = Vec::new();
    let mut in_flight: HashSet<EntityId> = HashSet::new();

    let mut keep_running = apply(first, script, &mut result, &mut pending, &mut in_flight);
    result.steps = 1;

    while keep_running && !pending.is_empty() {
        let idx = pick(pending.len()) % pending.len();
        let event = pending.remove(idx);
        if let RuntimeEvent::ActionCompleted { action, .. } = &event {
            in_flight.remove(action);
        }

        let step = core.step(event);
        keep_running = apply(step, script, &mut result, &mut pending, &mut in_flight);
        result.steps += 1;

        assert!(result.steps < 100_000, "core never finished");
    }

    result
}

/// Deliver pending events in the order they were produced.
pub fn drive_fifo(core: &mut CoreRuntime, first: CoreStep, script: &Script) -> DriveResult {
    drive(core, first, script, |_| 0)
}

fn apply(
    step: CoreStep,
    script: &Script,
    result: &mut DriveResult,
    pending: &mut Vec<RuntimeEvent>,
    in_flight: &mut HashSet<EntityId>,
) -> bool {
    for event in &step.events {
        match event {
            EngineEvent::Started { label, .. } => {
                result.trace.push(Trace::Dispatched(label.clone()));
            }
            EngineEvent::Completed { label, status, .. } => {
                result.trace.push(Trace::Finished(label.clone(), *status));
            }
            EngineEvent::StatusChanged { .. } | EngineEvent::Delayed { .. } => {}
        }
    }

    for command in step.commands {
        match command {
            CoreCommand::Dispatch(request) => {
                let attempt = result.log.record(&request);
                let outcome = script.outcome(&request, attempt);
                in_flight.insert(request.action);
                result.max_in_flight = result.max_in_flight.max(in_flight.len());
                pending.push(RuntimeEvent::ActionCompleted {
                    action: request.action,
                    outcome,
                });
            }
            CoreCommand::ArmTimer { action, delay } => {
                result.log.timers.push((action, delay));
                pending.push(RuntimeEvent::TimerFired { action });
            }
            CoreCommand::SetConcurrencyLimit(limit) => result.log.limits.push(limit),
        }
    }

    step.keep_running
}
