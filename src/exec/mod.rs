// src/exec/mod.rs

//! Command execution layer.
//!
//! This module is responsible for actually running action commands on their
//! nodes, using `tokio::process::Command`, and reporting back to the
//! orchestration runtime via `RuntimeEvent`s.
//!
//! - [`backend`] provides the `Transport` trait and the concrete
//!   `ShellTransport` that the runtime uses in production, and which tests
//!   can replace with a fake implementation.
//! - [`executor_loop`] owns the background loop that queues node jobs under
//!   the current concurrency limit and aggregates per-node results.
//! - [`node_runner`] runs one command on one node (`sh -c` or `ssh`).

pub mod backend;
pub mod executor_loop;
pub mod node_runner;

pub use backend::{ShellTransport, Transport, TransportFuture};
pub use executor_loop::spawn_executor;

use crate::engine::DEFAULT_FANOUT;

/// Node name used for commands that run once on the control host.
pub const LOCAL_NODE: &str = "localhost";

/// How the shell transport reaches nodes.
#[derive(Debug, Clone)]
pub struct ShellOptions {
    pub ssh_path: String,
    /// Extra arguments passed to every `ssh` invocation.
    pub ssh_options: Vec<String>,
    /// Nodes reached with a local `sh -c` instead of `ssh`.
    pub local_nodes: Vec<String>,
    /// Concurrency limit while no action is in flight.
    pub default_fanout: usize,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            ssh_path: "ssh".to_string(),
            ssh_options: vec!["-oBatchMode=yes".to_string()],
            local_nodes: vec![LOCAL_NODE.to_string()],
            default_fanout: DEFAULT_FANOUT,
        }
    }
}

impl ShellOptions {
    pub fn is_local(&self, node: &str) -> bool {
        self.local_nodes.iter().any(|n| n == node)
    }
}
