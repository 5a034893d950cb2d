#![allow(dead_code)]

pub use svcgraph_test_utils::builders;
pub use svcgraph_test_utils::init_tracing;

use svcgraph::engine::{RunOptions, ServiceManager};
use svcgraph::errors::Result;
use svcgraph_test_utils::fake_transport::Script;
use svcgraph_test_utils::sync_driver::{DriveResult, drive_fifo};

/// Start `action` on `names` and drive the core synchronously, completions
/// delivered in dispatch order.
pub fn run_sync(
    manager: &mut ServiceManager,
    names: &[&str],
    action: &str,
    script: &Script,
) -> Result<DriveResult> {
    run_sync_with(manager, names, action, &RunOptions::default(), script)
}

pub fn run_sync_with(
    manager: &mut ServiceManager,
    names: &[&str],
    action: &str,
    opts: &RunOptions,
    script: &Script,
) -> Result<DriveResult> {
    let first = manager.start(names, action, opts)?;
    Ok(drive_fifo(manager.core_mut(), first, script))
}

/// Status of the action `action` of top-level service `service`.
pub fn action_status(manager: &ServiceManager, service: &str, action: &str) -> svcgraph::types::Status {
    let id = manager.service(service).expect("service exists");
    let action_id = manager
        .graph()
        .find_action(id, action)
        .expect("action exists");
    manager.graph().status(action_id)
}
