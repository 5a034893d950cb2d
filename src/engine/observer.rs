// src/engine/observer.rs

//! Read-only progress notifications.

use tracing::{debug, info};

use crate::engine::EngineEvent;

/// Receives every [`EngineEvent`] in the order the core produced them.
pub trait Observer {
    fn on_event(&mut self, event: &EngineEvent);
}

impl<F> Observer for F
where
    F: FnMut(&EngineEvent),
{
    fn on_event(&mut self, event: &EngineEvent) {
        self(event)
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn on_event(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::Started {
                label,
                command,
                nodes,
                ..
            } => info!(action = %label, %command, %nodes, "started"),
            EngineEvent::Completed { label, status, .. } => {
                info!(entity = %label, %status, "completed")
            }
            EngineEvent::StatusChanged { label, from, to, .. } => {
                debug!(entity = %label, %from, %to, "status changed")
            }
            EngineEvent::Delayed { label, delay, .. } => {
                info!(action = %label, ?delay, "delayed")
            }
        }
    }
}
