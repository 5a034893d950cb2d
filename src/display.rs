// src/display.rs

//! Console output: one progress line per event and the end-of-run summary.

use std::io::{self, Write};

use crate::dag::{DagGraph, EntityId, EntityKind};
use crate::engine::{EngineEvent, Observer, ServiceManager};
use crate::types::Status;

/// Prints progress lines on stdout.
///
/// Only services, groups and actions that reach the transport are shown;
/// status transitions stay in the debug log.
#[derive(Debug, Default)]
pub struct ConsoleObserver {
    verbose: bool,
}

impl ConsoleObserver {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    fn line(&self, text: &str) {
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{text}");
    }
}

impl Observer for ConsoleObserver {
    fn on_event(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::Started {
                label,
                command,
                nodes,
                ..
            } => {
                let on = if nodes.is_empty() {
                    "localhost".to_string()
                } else {
                    nodes.to_string()
                };
                if self.verbose {
                    self.line(&format!("{label:<32} started on {on}: {command}"));
                } else {
                    self.line(&format!("{label:<32} started on {on}"));
                }
            }
            EngineEvent::Delayed { label, delay, .. } => {
                self.line(&format!("{label:<32} waiting {:.1}s", delay.as_secs_f64()));
            }
            EngineEvent::Completed { label, status, .. } => {
                self.line(&format!("{label:<32} {status}"));
            }
            EngineEvent::StatusChanged { .. } => {}
        }
    }
}

/// Final status of every entity the last run touched, plus failing nodes.
pub fn summary(manager: &ServiceManager) -> String {
    let graph = manager.graph();
    let mut out = String::new();

    for id in graph.ids() {
        let entity = graph.entity(id);
        if entity.status == Status::NoStatus || entity.is_boundary() {
            continue;
        }
        match &entity.kind {
            EntityKind::Service(_) | EntityKind::Group(_) => {
                out.push_str(&format!("{:<40} {}\n", graph.label(id), entity.status));
            }
            EntityKind::Action(_) => push_action(&mut out, graph, id),
            EntityKind::Boundary(_) => {}
        }
    }

    out.push_str(&format!("{:<40} {}\n", "overall", manager.overall_status()));
    out
}

fn push_action(out: &mut String, graph: &DagGraph, id: EntityId) {
    let action = graph.action(id);
    let Some(result) = &action.last_result else {
        return;
    };

    let failing: Vec<_> = result
        .nodes
        .iter()
        .filter(|node| node.is_error() || node.timed_out)
        .collect();
    if failing.is_empty() {
        return;
    }

    let duration = action
        .duration()
        .map(|d| format!(" in {:.2}s", d.as_secs_f64()))
        .unwrap_or_default();
    out.push_str(&format!(
        "  {} {} after {} attempt(s){}\n",
        graph.label(id),
        graph.status(id),
        action.dispatched,
        duration
    ));
    for node in failing {
        let reason = if node.timed_out {
            "timeout".to_string()
        } else {
            match node.exit_code {
                Some(code) => format!("exit {code}"),
                None => "no exit status".to_string(),
            }
        };
        out.push_str(&format!("    {}: {}", node.node, reason));
        if let Some(first) = node.output.lines().next() {
            out.push_str(&format!(" ({first})"));
        }
        out.push('\n');
    }
}
