// src/exec/node_runner.rs

//! Single node command runner.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::dag::EntityId;
use crate::engine::NodeResult;
use crate::exec::ShellOptions;

/// One command on one node.
#[derive(Debug, Clone)]
pub struct NodeJob {
    pub action: EntityId,
    pub label: String,
    pub node: String,
    pub command: String,
    pub timeout: Option<Duration>,
    /// Run through a local shell instead of `ssh`.
    pub local: bool,
}

/// Run a job to completion and describe what happened.
///
/// Spawn and wait failures are reported as a node error (no exit status)
/// rather than propagated: the action classification decides what they mean.
pub async fn run_node(job: NodeJob, options: ShellOptions) -> NodeResult {
    let node = job.node.clone();
    match run_node_inner(&job, &options).await {
        Ok(result) => result,
        Err(err) => {
            warn!(
                action = %job.label,
                node = %node,
                error = %err,
                "node command could not run"
            );
            NodeResult {
                node,
                exit_code: None,
                output: format!("{err:#}"),
                timed_out: false,
            }
        }
    }
}

fn build_command(job: &NodeJob, options: &ShellOptions) -> Command {
    if job.local {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&job.command);
        c
    } else {
        let mut c = Command::new(&options.ssh_path);
        c.args(&options.ssh_options).arg(&job.node).arg(&job.command);
        c
    }
}

async fn run_node_inner(job: &NodeJob, options: &ShellOptions) -> Result<NodeResult> {
    debug!(
        action = %job.label,
        node = %job.node,
        local = job.local,
        cmd = %job.command,
        "starting node command"
    );

    let mut cmd = build_command(job, options);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .with_context(|| format!("spawning command of '{}' on {}", job.label, job.node))?;

    let waited = match job.timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(waited) => waited,
            Err(_) => {
                // The child future is dropped here, kill_on_drop reaps it.
                info!(
                    action = %job.label,
                    node = %job.node,
                    ?limit,
                    "node command timed out"
                );
                return Ok(NodeResult::timeout(&job.node));
            }
        },
        None => child.wait_with_output().await,
    };

    let output = waited
        .with_context(|| format!("waiting for command of '{}' on {}", job.label, job.node))?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    let code = output.status.code();
    debug!(
        action = %job.label,
        node = %job.node,
        exit_code = ?code,
        success = output.status.success(),
        "node command exited"
    );

    Ok(NodeResult {
        node: job.node.clone(),
        exit_code: code,
        output: text.trim_end().to_string(),
        timed_out: false,
    })
}
