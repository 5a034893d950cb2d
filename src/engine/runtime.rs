// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::errors::{GraphError, Result};
use crate::exec::Transport;

use super::core::{CoreRuntime, CoreStep};
use super::{CoreCommand, RuntimeEvent};

/// Async side of one run: waits for completions and timers on the event
/// channel, feeds them to the borrowed [`CoreRuntime`] and forwards the
/// dispatches, timers and limits it asks for to the transport.
pub struct Runtime<'a, T: Transport> {
    core: &'a mut CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    transport: T,
}

impl<T: Transport> fmt::Debug for Runtime<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<'a, T: Transport> Runtime<'a, T> {
    pub fn new(core: &'a mut CoreRuntime, event_rx: mpsc::Receiver<RuntimeEvent>, transport: T) -> Self {
        Self {
            core,
            event_rx,
            transport,
        }
    }

    /// Main event loop.
    ///
    /// - Executes the commands of the step that started the run.
    /// - Consumes `RuntimeEvent`s from `event_rx` and feeds them into the core.
    /// - Executes commands returned by the core until it says to stop.
    pub async fn run(mut self, initial: CoreStep) -> Result<()> {
        info!("svcgraph runtime started");

        let mut keep_running = self.apply(initial).await?;

        while keep_running {
            let Some(event) = self.event_rx.recv().await else {
                return Err(GraphError::Other(anyhow::anyhow!(
                    "runtime event channel closed before the run finished"
                )));
            };

            debug!(?event, "runtime received event");

            // Feed the event into the pure core and get commands back.
            let step = self.core.step(event);
            keep_running = self.apply(step).await?;
        }

        info!("runtime exiting");
        Ok(())
    }

    async fn apply(&mut self, step: CoreStep) -> Result<bool> {
        for command in step.commands {
            self.execute_command(command).await?;
        }
        Ok(step.keep_running)
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::Dispatch(request) => {
                debug!(action = %request.label, nodes = %request.nodes, "dispatching to transport");
                self.transport.dispatch(request).await
            }
            CoreCommand::ArmTimer { action, delay } => self.transport.arm_timer(action, delay).await,
            CoreCommand::SetConcurrencyLimit(limit) => {
                debug!(?limit, "updating transport concurrency limit");
                self.transport.set_concurrency_limit(limit).await
            }
        }
    }
}
