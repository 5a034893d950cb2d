// src/exec/backend.rs

//! Pluggable transport abstraction.
//!
//! The runtime talks to a `Transport` instead of raw channels. This makes it
//! easy to swap in a fake transport in tests while keeping the production
//! implementation in [`executor_loop`](super::executor_loop).
//!
//! - `ShellTransport` is the default implementation used by `svcgraph`. It
//!   wraps the executor loop and forwards dispatches and limit changes over
//!   an mpsc channel; timers are plain `tokio::time::sleep` tasks.
//! - Tests can provide their own `Transport` that, for example, records
//!   which actions were dispatched and directly emits `ActionCompleted`
//!   events.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::dag::EntityId;
use crate::engine::{DispatchRequest, RuntimeEvent};
use crate::errors::{Error, Result};

use super::ShellOptions;
use super::executor_loop::{ExecMessage, spawn_executor};

pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Trait abstracting how commands reach their nodes.
///
/// Every call returns once the request is handed over; results come back
/// later as [`RuntimeEvent`]s on the runtime channel.
pub trait Transport: Send {
    /// Run `request.command` on every node of `request.nodes` and report one
    /// `ActionCompleted` once all of them finished.
    fn dispatch(&mut self, request: DispatchRequest) -> TransportFuture<'_>;

    /// New cap on concurrently running node commands; `None` restores the
    /// transport default.
    fn set_concurrency_limit(&mut self, limit: Option<usize>) -> TransportFuture<'_>;

    /// Report `TimerFired { action }` after `delay`.
    fn arm_timer(&mut self, action: EntityId, delay: Duration) -> TransportFuture<'_>;
}

/// Real transport used in production.
pub struct ShellTransport {
    tx: mpsc::Sender<ExecMessage>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
}

impl ShellTransport {
    /// Create a new shell transport, wiring it to the given runtime event
    /// sender.
    ///
    /// This spawns the background executor loop immediately.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, options: ShellOptions) -> Self {
        let tx = spawn_executor(runtime_tx.clone(), options);
        Self { tx, runtime_tx }
    }
}

impl Transport for ShellTransport {
    fn dispatch(&mut self, request: DispatchRequest) -> TransportFuture<'_> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(ExecMessage::Dispatch(request))
                .await
                .map_err(Error::from)?;
            Ok(())
        })
    }

    fn set_concurrency_limit(&mut self, limit: Option<usize>) -> TransportFuture<'_> {
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(ExecMessage::SetLimit(limit))
                .await
                .map_err(Error::from)?;
            Ok(())
        })
    }

    fn arm_timer(&mut self, action: EntityId, delay: Duration) -> TransportFuture<'_> {
        let runtime_tx = self.runtime_tx.clone();

        Box::pin(async move {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if runtime_tx
                    .send(RuntimeEvent::TimerFired { action })
                    .await
                    .is_err()
                {
                    debug!(%action, "runtime gone before the timer fired");
                }
            });
            Ok(())
        })
    }
}
