// src/engine/core.rs

//! Synchronous heart of a run.
//!
//! [`CoreRuntime`] takes one [`RuntimeEvent`] at a time (an action finished,
//! a delay timer fired, a shutdown was asked for), lets the scheduler settle
//! every status that follows from it, passes the resulting notifications to
//! the observers and returns the transport work as [`CoreCommand`]s.
//!
//! Nothing here awaits or spawns. `engine::runtime::Runtime` owns the channel
//! and the transport, so whole runs can be stepped from a plain `#[test]`.

use std::fmt;

use tracing::{debug, warn};

use crate::dag::{EntityId, Scheduler, SchedulerStep};
use crate::engine::observer::Observer;
use crate::engine::{CoreCommand, EngineEvent, RuntimeEvent};
use crate::errors::Result;
use crate::types::Status;

/// Result of feeding one event into the core.
#[derive(Debug, Clone, Default)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Notifications already handed to the observers.
    pub events: Vec<EngineEvent>,
    /// `false` once the run finished or a shutdown was requested.
    pub keep_running: bool,
}

/// Scheduler plus the observers that hear about every status change.
pub struct CoreRuntime {
    scheduler: Scheduler,
    observers: Vec<Box<dyn Observer + Send>>,
}

impl fmt::Debug for CoreRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreRuntime")
            .field("scheduler", &self.scheduler)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            observers: Vec::new(),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn add_observer(&mut self, observer: Box<dyn Observer + Send>) {
        self.observers.push(observer);
    }

    /// Expose whether a run is active (for tests).
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    pub fn overall_status(&self) -> Status {
        self.scheduler.overall_status()
    }

    /// Start a run and return the first batch of commands.
    pub fn start_run(&mut self, roots: &[EntityId], action: &str) -> Result<CoreStep> {
        let step = self.scheduler.start_run(roots, action)?;
        Ok(self.finish_step(step))
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        let step = match event {
            RuntimeEvent::ActionCompleted { action, outcome } => {
                self.scheduler.step_completion(action, outcome)
            }
            RuntimeEvent::TimerFired { action } => self.scheduler.step_timer(action),
            RuntimeEvent::ShutdownRequested => {
                warn!(
                    in_flight = self.scheduler.action_manager().in_flight(),
                    "shutdown requested; abandoning the current run"
                );
                return CoreStep::default();
            }
        };
        self.finish_step(step)
    }

    fn finish_step(&mut self, step: SchedulerStep) -> CoreStep {
        self.publish(&step.events);

        let keep_running = !step.run_just_finished && !self.scheduler.is_idle();
        debug!(
            commands = step.commands.len(),
            events = step.events.len(),
            keep_running,
            "core step done"
        );

        CoreStep {
            commands: step.commands,
            events: step.events,
            keep_running,
        }
    }

    fn publish(&mut self, events: &[EngineEvent]) {
        for event in events {
            for observer in self.observers.iter_mut() {
                observer.on_event(event);
            }
        }
    }
}
