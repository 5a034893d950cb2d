use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use svcgraph::dag::EntityId;
use svcgraph::engine::{DispatchOutcome, DispatchRequest, NodeResult, RuntimeEvent};
use svcgraph::exec::{LOCAL_NODE, Transport, TransportFuture};
use svcgraph::types::ActionMode;

/// What a node answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Exit(i32),
    Timeout,
}

impl Reply {
    fn result(self, node: &str) -> NodeResult {
        match self {
            Reply::Exit(code) => NodeResult::exited(node, code),
            Reply::Timeout => NodeResult::timeout(node),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Rule {
    all: Option<Reply>,
    nodes: HashMap<String, Reply>,
    /// Attempts failing with exit 1 before the other replies apply.
    fail_first: u32,
}

/// Canned node replies per action label (`service.action`).
///
/// Anything not scripted exits 0.
#[derive(Debug, Clone, Default)]
pub struct Script {
    rules: HashMap<String, Rule>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every node of `label` exits with `code`.
    pub fn exit(mut self, label: &str, code: i32) -> Self {
        self.rules.entry(label.to_string()).or_default().all = Some(Reply::Exit(code));
        self
    }

    /// Every node of `label` times out.
    pub fn timeout(mut self, label: &str) -> Self {
        self.rules.entry(label.to_string()).or_default().all = Some(Reply::Timeout);
        self
    }

    pub fn node(mut self, label: &str, node: &str, reply: Reply) -> Self {
        self.rules
            .entry(label.to_string())
            .or_default()
            .nodes
            .insert(node.to_string(), reply);
        self
    }

    /// The first `attempts` dispatches of `label` fail everywhere.
    pub fn fail_first(mut self, label: &str, attempts: u32) -> Self {
        self.rules.entry(label.to_string()).or_default().fail_first = attempts;
        self
    }

    /// Outcome of the `attempt`-th (1-based) dispatch of `request`.
    pub fn outcome(&self, request: &DispatchRequest, attempt: u32) -> DispatchOutcome {
        let nodes: Vec<String> = if request.mode == ActionMode::Delegate || request.nodes.is_empty()
        {
            vec![LOCAL_NODE.to_string()]
        } else {
            request.nodes.iter().map(str::to_string).collect()
        };
        let rule = self.rules.get(&request.label);

        let results = nodes
            .iter()
            .map(|node| {
                let reply = match rule {
                    Some(rule) if attempt <= rule.fail_first => Reply::Exit(1),
                    Some(rule) => rule
                        .nodes
                        .get(node)
                        .copied()
                        .or(rule.all)
                        .unwrap_or(Reply::Exit(0)),
                    None => Reply::Exit(0),
                };
                reply.result(node)
            })
            .collect();

        DispatchOutcome::new(results)
    }
}

/// Everything a fake transport was asked to do.
#[derive(Debug, Clone, Default)]
pub struct TransportLog {
    /// Labels of dispatched actions, in dispatch order.
    pub dispatched: Vec<String>,
    /// Nodes of every dispatch, in dispatch order.
    pub nodes: Vec<Vec<String>>,
    /// Command lines, in dispatch order.
    pub commands: Vec<String>,
    pub limits: Vec<Option<usize>>,
    pub timers: Vec<(EntityId, Duration)>,
    attempts: HashMap<String, u32>,
}

impl TransportLog {
    pub fn count(&self, label: &str) -> usize {
        self.dispatched.iter().filter(|l| *l == label).count()
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        self.dispatched.iter().position(|l| l == label)
    }

    /// Record a dispatch and return its 1-based attempt number.
    pub fn record(&mut self, request: &DispatchRequest) -> u32 {
        self.dispatched.push(request.label.clone());
        self.nodes
            .push(request.nodes.iter().map(str::to_string).collect());
        self.commands.push(request.command.clone());
        let attempt = self.attempts.entry(request.label.clone()).or_default();
        *attempt += 1;
        *attempt
    }
}

/// A fake transport that:
/// - records what it was asked to do
/// - immediately reports `ActionCompleted` with the scripted outcome
/// - fires every timer immediately.
pub struct ScriptedTransport {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    script: Script,
    log: Arc<Mutex<TransportLog>>,
}

impl ScriptedTransport {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, script: Script) -> Self {
        Self {
            runtime_tx,
            script,
            log: Arc::new(Mutex::new(TransportLog::default())),
        }
    }

    /// Shared handle on the log, readable after the transport moved into a run.
    pub fn log(&self) -> Arc<Mutex<TransportLog>> {
        Arc::clone(&self.log)
    }
}

impl Transport for ScriptedTransport {
    fn dispatch(&mut self, request: DispatchRequest) -> TransportFuture<'_> {
        let tx = self.runtime_tx.clone();
        let attempt = self.log.lock().unwrap().record(&request);
        let outcome = self.script.outcome(&request, attempt);

        Box::pin(async move {
            tx.send(RuntimeEvent::ActionCompleted {
                action: request.action,
                outcome,
            })
            .await
            .map_err(anyhow::Error::from)?;
            Ok(())
        })
    }

    fn set_concurrency_limit(&mut self, limit: Option<usize>) -> TransportFuture<'_> {
        self.log.lock().unwrap().limits.push(limit);
        Box::pin(async { Ok(()) })
    }

    fn arm_timer(&mut self, action: EntityId, delay: Duration) -> TransportFuture<'_> {
        self.log.lock().unwrap().timers.push((action, delay));
        let tx = self.runtime_tx.clone();

        Box::pin(async move {
            tx.send(RuntimeEvent::TimerFired { action })
                .await
                .map_err(anyhow::Error::from)?;
            Ok(())
        })
    }
}
