// src/exec/executor_loop.rs

//! Main executor loop that runs node commands under the fanout limit.

use std::collections::{HashMap, VecDeque};

use tokio::sync::mpsc;
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info, warn};

use crate::dag::EntityId;
use crate::engine::{DispatchOutcome, DispatchRequest, NodeResult, RuntimeEvent};
use crate::exec::node_runner::{NodeJob, run_node};
use crate::exec::{LOCAL_NODE, ShellOptions};
use crate::types::ActionMode;

/// Requests from [`ShellTransport`](super::ShellTransport) to the loop.
#[derive(Debug)]
pub enum ExecMessage {
    Dispatch(DispatchRequest),
    SetLimit(Option<usize>),
}

/// Per-node results of one dispatch, collected until every node reported.
struct Invocation {
    label: String,
    remaining: usize,
    results: Vec<NodeResult>,
}

struct ExecutorState {
    options: ShellOptions,
    limit: usize,
    pending: VecDeque<NodeJob>,
    invocations: HashMap<EntityId, Invocation>,
    running: JoinSet<NodeResult>,
    /// Join handle id → (action, node), so a panicked job still reports.
    jobs: HashMap<Id, (EntityId, String)>,
}

/// Spawn the background executor loop.
///
/// The returned sender is what [`ShellTransport`](super::ShellTransport)
/// uses. Each node command runs in its own Tokio task; never more than the
/// current limit at once. Once every node of a dispatch reported, one
/// `ActionCompleted` goes back to the runtime.
pub fn spawn_executor(
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    options: ShellOptions,
) -> mpsc::Sender<ExecMessage> {
    let (tx, mut rx) = mpsc::channel::<ExecMessage>(64);

    tokio::spawn(async move {
        info!(fanout = options.default_fanout, "executor loop started");

        let mut state = ExecutorState {
            limit: options.default_fanout.max(1),
            options,
            pending: VecDeque::new(),
            invocations: HashMap::new(),
            running: JoinSet::new(),
            jobs: HashMap::new(),
        };
        let mut closed = false;

        loop {
            tokio::select! {
                msg = rx.recv(), if !closed => match msg {
                    Some(ExecMessage::Dispatch(request)) => state.enqueue(request),
                    Some(ExecMessage::SetLimit(limit)) => state.set_limit(limit),
                    None => {
                        debug!("executor channel closed; draining running jobs");
                        closed = true;
                    }
                },
                Some(joined) = state.running.join_next_with_id(), if !state.running.is_empty() => {
                    let (id, result) = match joined {
                        Ok((id, result)) => (id, Some(result)),
                        Err(err) => {
                            error!(error = %err, "node job failed to complete");
                            (err.id(), None)
                        }
                    };
                    if let Some(completed) = state.record(id, result) {
                        if runtime_tx.send(completed).await.is_err() {
                            debug!("runtime gone; dropping completion");
                        }
                    }
                },
                else => break,
            }

            state.fill();

            if closed && state.running.is_empty() {
                break;
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

impl ExecutorState {
    fn enqueue(&mut self, request: DispatchRequest) {
        let nodes: Vec<String> = match request.mode {
            ActionMode::Delegate => vec![LOCAL_NODE.to_string()],
            ActionMode::Normal if request.nodes.is_empty() => vec![LOCAL_NODE.to_string()],
            ActionMode::Normal => request.nodes.iter().map(str::to_string).collect(),
        };

        debug!(
            action = %request.label,
            nodes = nodes.len(),
            queued = self.pending.len(),
            "queueing node jobs"
        );

        self.invocations.insert(
            request.action,
            Invocation {
                label: request.label.clone(),
                remaining: nodes.len(),
                results: Vec::with_capacity(nodes.len()),
            },
        );

        for node in nodes {
            let local = node == LOCAL_NODE || self.options.is_local(&node);
            self.pending.push_back(NodeJob {
                action: request.action,
                label: request.label.clone(),
                node,
                command: request.command.clone(),
                timeout: request.timeout,
                local,
            });
        }
    }

    fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit.unwrap_or(self.options.default_fanout).max(1);
        debug!(limit = self.limit, running = self.running.len(), "concurrency limit updated");
    }

    /// Start queued jobs while below the limit. Lowering the limit never
    /// stops a job already running.
    fn fill(&mut self) {
        while self.running.len() < self.limit {
            let Some(job) = self.pending.pop_front() else {
                break;
            };
            let key = (job.action, job.node.clone());
            let options = self.options.clone();
            let handle = self.running.spawn(run_node(job, options));
            self.jobs.insert(handle.id(), key);
        }
    }

    /// File one node result; returns the completion event once the whole
    /// dispatch reported.
    fn record(&mut self, id: Id, result: Option<NodeResult>) -> Option<RuntimeEvent> {
        let Some((action, node)) = self.jobs.remove(&id) else {
            warn!("result for an unknown node job; ignoring");
            return None;
        };
        let result = result.unwrap_or_else(|| {
            NodeResult::exited(node, -1).with_output("node job aborted")
        });

        let invocation = self.invocations.get_mut(&action)?;
        invocation.results.push(result);
        invocation.remaining = invocation.remaining.saturating_sub(1);
        if invocation.remaining > 0 {
            return None;
        }

        let invocation = self.invocations.remove(&action)?;
        let outcome = DispatchOutcome::new(invocation.results);
        info!(
            action = %invocation.label,
            nodes = outcome.nodes.len(),
            errors = outcome.error_count(),
            timeouts = outcome.timeout_count(),
            "action finished on all nodes"
        );
        Some(RuntimeEvent::ActionCompleted { action, outcome })
    }
}
