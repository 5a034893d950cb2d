// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod display;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod nodeset;
pub mod types;
pub mod variables;

use anyhow::{Context, Result, anyhow};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::{CliArgs, LogLevel};
use crate::config::{build_manager, default_config_path, load_and_validate, shell_options};
use crate::display::ConsoleObserver;
use crate::engine::{RunOptions, RuntimeEvent, ServiceManager};
use crate::exec::ShellTransport;
use crate::nodeset::NodeSet;
use crate::types::Status;

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - config loading and graph build
/// - run selection from the command line
/// - the shell transport
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let mut manager = build_manager(&cfg)?;

    if args.graph {
        print!("{}", manager.graph().to_dot());
        return Ok(0);
    }

    let action = args
        .action
        .clone()
        .ok_or_else(|| anyhow!("an action to run is required"))?;
    let opts = run_options(&args)?;

    if args.dry_run {
        print_dry_run(&manager, &args.services, &action)?;
        return Ok(0);
    }

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let mut shell = shell_options(&cfg);
    if let Some(fanout) = args.fanout {
        shell.default_fanout = fanout;
    }
    let transport = ShellTransport::new(rt_tx.clone(), shell);

    // Ctrl-C → abandon the run.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let verbose = matches!(args.log_level, Some(LogLevel::Debug | LogLevel::Trace));
    manager.add_observer(Box::new(ConsoleObserver::new(verbose)));

    info!(%action, services = ?args.services, "starting");
    let status = manager
        .run(&args.services, &action, &opts, transport, rt_rx)
        .await?;

    print!("{}", display::summary(&manager));
    Ok(exit_code(status))
}

/// Per-run options from the command line.
pub fn run_options(args: &CliArgs) -> Result<RunOptions> {
    let only_nodes = args.nodes.as_deref().map(NodeSet::parse).transpose()?;
    let excluded_nodes = match args.exclude_nodes.as_deref() {
        Some(pattern) => NodeSet::parse(pattern)?,
        None => NodeSet::new(),
    };

    Ok(RunOptions {
        excluded_services: args.exclude_services.clone(),
        only_nodes,
        excluded_nodes,
        defines: args.defines.iter().cloned().collect(),
        fanout: args.fanout,
    })
}

/// Process exit code for an overall status.
pub fn exit_code(status: Status) -> i32 {
    match status {
        Status::Done | Status::Skipped | Status::Locked | Status::NoStatus => 0,
        Status::DoneWithWarnings => 3,
        Status::TimedOut => 5,
        Status::Waiting
        | Status::InProgress
        | Status::TooManyErrors
        | Status::Error
        | Status::DepError => 6,
    }
}

/// Simple dry-run output: what the run would reach, in no particular
/// execution order, with the unresolved command templates.
fn print_dry_run(manager: &ServiceManager, services: &[String], action: &str) -> Result<()> {
    let plan = manager.plan(services, action)?;
    let graph = manager.graph();
    let reverse = manager.core().scheduler().is_reverse_action(action);

    println!("svcgraph dry-run");
    println!("  action = {action}{}", if reverse { " (reverse order)" } else { "" });
    println!();

    println!("services ({}):", plan.services.len());
    for (id, name) in &plan.services {
        let entity = graph.entity(*id);
        if entity.is_group() {
            println!("  - {} [group] {name}", graph.label(*id));
            continue;
        }
        println!("  - {} {name}", graph.label(*id));
        if let Some(action_id) = graph.find_action(*id, name) {
            let target = graph.action_target(action_id);
            println!("      cmd: {}", graph.action(action_id).command);
            if !target.is_empty() {
                println!("      target: {target}");
            }
        }
        let deps: Vec<_> = graph
            .children(*id)
            .filter(|dep| !graph.entity(dep.child).is_boundary())
            .map(|dep| format!("{} ({})", graph.label(dep.child), dep.kind))
            .collect();
        if !deps.is_empty() {
            println!("      requires: {}", deps.join(", "));
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
