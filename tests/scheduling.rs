// tests/scheduling.rs

mod common;
use crate::common::builders::{ManagerBuilder, action, retrying};
use crate::common::{action_status, init_tracing, run_sync, run_sync_with};

use std::collections::BTreeMap;
use std::error::Error;
use std::time::Duration;

use svcgraph::dag::{Action, Service};
use svcgraph::engine::{
    CoreCommand, EngineEvent, ManagerOptions, RunOptions, RuntimeEvent, ServiceManager,
};
use svcgraph::errors::GraphError;
use svcgraph::nodeset::NodeSet;
use svcgraph::types::{DepKind, Status};
use svcgraph_test_utils::fake_transport::{Reply, Script};
use svcgraph_test_utils::sync_driver::{Trace, drive_fifo};

type TestResult = Result<(), Box<dyn Error>>;

/// S1 requires S2.
fn chain() -> ManagerBuilder {
    ManagerBuilder::new()
        .echo_service("S1")
        .echo_service("S2")
        .require("S1", "S2")
}

#[test]
fn dependency_runs_before_its_dependent() -> TestResult {
    init_tracing();
    let mut manager = chain().build();

    let result = run_sync(&mut manager, &["S1"], "start", &Script::new())?;

    assert_eq!(result.log.dispatched, vec!["S2.start", "S1.start"]);
    let s2_done = result.finished_at("S2").expect("S2 finished");
    let s1_dispatched = result.dispatched_at("S1.start").expect("S1 dispatched");
    assert!(s2_done < s1_dispatched);

    assert_eq!(manager.status_of("S1"), Some(Status::Done));
    assert_eq!(manager.status_of("S2"), Some(Status::Done));
    assert_eq!(manager.overall_status(), Status::Done);
    assert!(manager.core().is_idle());
    Ok(())
}

#[test]
fn failed_requirement_blocks_the_dependent() -> TestResult {
    init_tracing();
    let mut manager = chain().build();
    let script = Script::new().exit("S2.start", 1);

    let result = run_sync(&mut manager, &["S1"], "start", &script)?;

    assert_eq!(result.log.dispatched, vec!["S2.start"]);
    assert_eq!(action_status(&manager, "S2", "start"), Status::TooManyErrors);
    assert_eq!(manager.status_of("S2"), Some(Status::Error));
    assert_eq!(manager.status_of("S1"), Some(Status::DepError));
    assert_eq!(action_status(&manager, "S1", "start"), Status::NoStatus);
    assert_eq!(manager.overall_status(), Status::DepError);
    Ok(())
}

#[test]
fn failed_weak_requirement_only_warns() -> TestResult {
    init_tracing();
    let mut manager = ManagerBuilder::new()
        .echo_service("S1")
        .echo_service("S2")
        .dep("S1", "S2", DepKind::RequireWeak)
        .build();
    let script = Script::new().exit("S2.start", 1);

    let result = run_sync(&mut manager, &["S1"], "start", &script)?;

    assert_eq!(result.log.dispatched, vec!["S2.start", "S1.start"]);
    assert_eq!(manager.status_of("S2"), Some(Status::Error));
    assert_eq!(action_status(&manager, "S1", "start"), Status::Done);
    assert_eq!(manager.status_of("S1"), Some(Status::DoneWithWarnings));
    Ok(())
}

#[test]
fn check_dependency_runs_the_status_action() -> TestResult {
    init_tracing();
    let mut manager = ManagerBuilder::new()
        .echo_service("S1")
        .echo_service("S2")
        .dep("S1", "S2", DepKind::Check)
        .build();

    let result = run_sync(&mut manager, &["S1"], "start", &Script::new())?;
    assert_eq!(result.log.dispatched, vec!["S2.status", "S1.start"]);
    assert_eq!(manager.status_of("S1"), Some(Status::Done));

    let script = Script::new().exit("S2.status", 1);
    let result = run_sync(&mut manager, &["S1"], "start", &script)?;
    assert_eq!(result.log.count("S2.start"), 0);
    assert_eq!(manager.status_of("S1"), Some(Status::DoneWithWarnings));
    Ok(())
}

#[test]
fn shared_dependency_is_dispatched_once() -> TestResult {
    init_tracing();
    let mut manager = ManagerBuilder::new()
        .echo_service("A")
        .echo_service("B")
        .echo_service("C")
        .echo_service("D")
        .require("A", "B")
        .require("A", "C")
        .require("B", "D")
        .require("C", "D")
        .build();

    let result = run_sync(&mut manager, &["A"], "start", &Script::new())?;

    assert_eq!(result.log.count("D.start"), 1);
    assert_eq!(result.log.position("D.start"), Some(0));
    assert_eq!(result.log.position("A.start"), Some(3));
    assert_eq!(manager.overall_status(), Status::Done);
    Ok(())
}

#[test]
fn prepare_is_a_no_op_once_an_entity_is_scheduled() -> TestResult {
    init_tracing();
    let mut manager = chain().build();
    let s2 = manager.service("S2").expect("S2 registered");

    let first = manager.start(&["S1"], "start", &RunOptions::default())?;
    assert_eq!(first.commands.iter().filter(|c| matches!(c, CoreCommand::Dispatch(_))).count(), 1);

    let again = manager.core_mut().scheduler_mut().prepare(s2, "start");
    assert!(again.commands.is_empty());
    assert!(again.events.is_empty());

    let result = drive_fifo(manager.core_mut(), first, &Script::new());
    assert_eq!(result.log.count("S2.start"), 1);
    assert_eq!(manager.overall_status(), Status::Done);
    Ok(())
}

#[test]
fn failing_action_is_retried_until_the_budget_is_spent() -> TestResult {
    init_tracing();
    let mut manager = ManagerBuilder::new()
        .service("S", vec![("start", retrying("false", 2, Duration::ZERO))])
        .build();
    let script = Script::new().exit("S.start", 1);

    let result = run_sync(&mut manager, &["S"], "start", &script)?;

    assert_eq!(result.log.count("S.start"), 3);
    assert_eq!(result.log.timers.len(), 2);
    assert_eq!(action_status(&manager, "S", "start"), Status::TooManyErrors);
    assert_eq!(manager.status_of("S"), Some(Status::Error));

    let id = manager.service("S").expect("S registered");
    let action_id = manager.graph().find_action(id, "start").expect("action");
    let action = manager.graph().action(action_id);
    assert_eq!(action.tries, 2);
    assert_eq!(action.dispatched, 3);
    assert!(action.duration().is_some());
    Ok(())
}

#[test]
fn retry_succeeds_after_transient_failures() -> TestResult {
    init_tracing();
    let mut manager = ManagerBuilder::new()
        .service("S", vec![("start", retrying("flaky", 3, Duration::ZERO))])
        .build();
    let script = Script::new().fail_first("S.start", 2);

    let result = run_sync(&mut manager, &["S"], "start", &script)?;

    assert_eq!(result.log.count("S.start"), 3);
    assert_eq!(manager.status_of("S"), Some(Status::Done));
    Ok(())
}

#[test]
fn timeouts_win_over_errors_once_retries_are_spent() -> TestResult {
    init_tracing();
    let mut manager = ManagerBuilder::new()
        .service("S", vec![("start", retrying("sleep 60", 1, Duration::ZERO))])
        .target("S", "n[1-2]")
        .build();
    let script = Script::new()
        .node("S.start", "n1", Reply::Timeout)
        .node("S.start", "n2", Reply::Exit(1));

    let result = run_sync(&mut manager, &["S"], "start", &script)?;

    assert_eq!(result.log.count("S.start"), 2);
    assert_eq!(action_status(&manager, "S", "start"), Status::TimedOut);
    assert_eq!(manager.status_of("S"), Some(Status::Error));
    Ok(())
}

#[test]
fn error_tolerance_does_not_cover_timeouts() -> TestResult {
    init_tracing();
    let mut manager = ManagerBuilder::new()
        .service("S", vec![("start", action("mount").with_errors(1))])
        .target("S", "n[1-2]")
        .build();
    let script = Script::new().node("S.start", "n1", Reply::Timeout);

    let result = run_sync(&mut manager, &["S"], "start", &script)?;

    assert_eq!(result.log.count("S.start"), 1);
    assert_eq!(action_status(&manager, "S", "start"), Status::TimedOut);
    assert_eq!(manager.status_of("S"), Some(Status::Error));

    let mut retried = ManagerBuilder::new()
        .service(
            "S",
            vec![("start", retrying("mount", 1, Duration::ZERO).with_errors(1))],
        )
        .target("S", "n[1-2]")
        .build();

    let result = run_sync(&mut retried, &["S"], "start", &script)?;

    assert_eq!(result.log.count("S.start"), 2);
    assert_eq!(action_status(&retried, "S", "start"), Status::TimedOut);
    Ok(())
}

#[test]
fn delayed_action_waits_for_its_timer() -> TestResult {
    init_tracing();
    let mut manager = ManagerBuilder::new()
        .service(
            "S",
            vec![("start", action("echo").with_delay(Duration::from_secs(5)))],
        )
        .build();
    let id = manager.service("S").expect("S registered");
    let action_id = manager.graph().find_action(id, "start").expect("action");

    let first = manager.start(&["S"], "start", &RunOptions::default())?;
    assert!(
        !first
            .commands
            .iter()
            .any(|c| matches!(c, CoreCommand::Dispatch(_)))
    );
    assert!(first.commands.iter().any(|c| matches!(
        c,
        CoreCommand::ArmTimer { action, delay } if *action == action_id && *delay == Duration::from_secs(5)
    )));
    assert!(first.events.iter().any(|e| matches!(e, EngineEvent::Delayed { .. })));
    assert_eq!(manager.graph().status(action_id), Status::Waiting);

    let result = drive_fifo(manager.core_mut(), first, &Script::new());
    assert_eq!(result.log.dispatched, vec!["S.start"]);
    assert_eq!(manager.status_of("S"), Some(Status::Done));
    Ok(())
}

#[test]
fn error_and_warning_thresholds_classify_partial_failures() -> TestResult {
    init_tracing();
    let tolerant = || action("mount").with_errors(1).with_warnings(0);

    let mut manager = ManagerBuilder::new()
        .service("S", vec![("start", tolerant())])
        .target("S", "n[1-4]")
        .build();

    let one_down = Script::new().node("S.start", "n2", Reply::Exit(1));
    run_sync(&mut manager, &["S"], "start", &one_down)?;
    assert_eq!(action_status(&manager, "S", "start"), Status::DoneWithWarnings);
    assert_eq!(manager.status_of("S"), Some(Status::DoneWithWarnings));
    let id = manager.service("S").expect("S registered");
    assert!(
        manager
            .graph()
            .entity(id)
            .as_service()
            .is_some_and(|s| s.warnings)
    );

    let two_down = Script::new()
        .node("S.start", "n2", Reply::Exit(1))
        .node("S.start", "n4", Reply::Timeout);
    run_sync(&mut manager, &["S"], "start", &two_down)?;
    assert_eq!(action_status(&manager, "S", "start"), Status::TimedOut);
    assert_eq!(manager.status_of("S"), Some(Status::Error));
    Ok(())
}

#[test]
fn simulated_service_resolves_without_running_anything() -> TestResult {
    init_tracing();
    let mut manager = ManagerBuilder::new()
        .echo_service("S1")
        .simulated("S2")
        .require("S1", "S2")
        .build();
    let s2 = manager.service("S2").expect("S2 registered");
    let ghost = manager
        .graph_mut()
        .add_action(s2, "start", Action::new("rm -rf /"))?;

    let result = run_sync(&mut manager, &["S1"], "start", &Script::new())?;

    assert_eq!(result.log.dispatched, vec!["S1.start"]);
    assert_eq!(manager.status_of("S2"), Some(Status::Done));
    assert_eq!(manager.status_of("S1"), Some(Status::Done));
    assert_eq!(manager.graph().action(ghost).duration(), None);
    assert_eq!(manager.graph().action(ghost).dispatched, 0);
    Ok(())
}

#[test]
fn excluded_service_is_locked_and_ignored() -> TestResult {
    init_tracing();
    let mut manager = chain().build();
    let opts = RunOptions {
        excluded_services: vec!["S2".to_string()],
        ..RunOptions::default()
    };

    let result = run_sync_with(&mut manager, &["S1"], "start", &opts, &Script::new())?;

    assert_eq!(result.log.dispatched, vec!["S1.start"]);
    assert_eq!(manager.status_of("S2"), Some(Status::Locked));
    assert_eq!(manager.status_of("S1"), Some(Status::Done));
    Ok(())
}

#[test]
fn excluded_root_is_dropped_from_the_run() -> TestResult {
    init_tracing();
    let mut manager = ManagerBuilder::new()
        .echo_service("A")
        .echo_service("B")
        .build();
    let opts = RunOptions {
        excluded_services: vec!["A".to_string()],
        ..RunOptions::default()
    };

    let result = run_sync_with(&mut manager, &[], "start", &opts, &Script::new())?;

    assert_eq!(result.log.dispatched, vec!["B.start"]);
    assert_eq!(manager.status_of("A"), Some(Status::Locked));
    assert_eq!(manager.overall_status(), Status::Done);
    Ok(())
}

#[test]
fn node_filters_skip_actions_left_without_nodes() -> TestResult {
    init_tracing();
    let mut manager = chain().target("S2", "n[1-2]").build();
    let opts = RunOptions {
        only_nodes: Some(NodeSet::parse("n9")?),
        ..RunOptions::default()
    };

    let result = run_sync_with(&mut manager, &["S1"], "start", &opts, &Script::new())?;

    assert_eq!(result.log.dispatched, vec!["S1.start"]);
    assert_eq!(action_status(&manager, "S2", "start"), Status::Skipped);
    assert_eq!(manager.status_of("S2"), Some(Status::Skipped));
    assert_eq!(manager.status_of("S1"), Some(Status::Done));
    Ok(())
}

#[test]
fn excluded_nodes_are_removed_from_the_target() -> TestResult {
    init_tracing();
    let mut manager = ManagerBuilder::new()
        .echo_service("S")
        .target("S", "n[1-3]")
        .build();
    let opts = RunOptions {
        excluded_nodes: NodeSet::parse("n2")?,
        ..RunOptions::default()
    };

    let result = run_sync_with(&mut manager, &["S"], "start", &opts, &Script::new())?;

    assert_eq!(result.log.nodes, vec![vec!["n1".to_string(), "n3".to_string()]]);
    Ok(())
}

#[test]
fn stop_walks_dependents_first() -> TestResult {
    init_tracing();
    let mut manager = chain().build();

    let start = run_sync(&mut manager, &[], "start", &Script::new())?;
    assert_eq!(start.log.dispatched, vec!["S2.start", "S1.start"]);

    let stop = run_sync(&mut manager, &[], "stop", &Script::new())?;
    assert_eq!(stop.log.dispatched, vec!["S1.stop", "S2.stop"]);
    let s1_done = stop.finished_at("S1").expect("S1 finished");
    let s2_dispatched = stop.dispatched_at("S2.stop").expect("S2 dispatched");
    assert!(s1_done < s2_dispatched);
    Ok(())
}

#[test]
fn failed_stop_blocks_the_services_below() -> TestResult {
    init_tracing();
    let mut manager = chain().build();
    let script = Script::new().exit("S1.stop", 1);

    let result = run_sync(&mut manager, &[], "stop", &script)?;

    assert_eq!(result.log.dispatched, vec!["S1.stop"]);
    assert_eq!(manager.status_of("S1"), Some(Status::Error));
    assert_eq!(manager.status_of("S2"), Some(Status::DepError));
    Ok(())
}

#[test]
fn reverse_actions_are_configurable() -> TestResult {
    init_tracing();
    let options = ManagerOptions {
        reverse_actions: vec!["halt".to_string()],
        ..ManagerOptions::default()
    };
    let mut manager = ManagerBuilder::with_options(options)
        .service("S1", vec![("stop", action("s1")), ("halt", action("h1"))])
        .service("S2", vec![("stop", action("s2")), ("halt", action("h2"))])
        .require("S1", "S2")
        .build();

    let stop = run_sync(&mut manager, &[], "stop", &Script::new())?;
    assert_eq!(stop.log.dispatched, vec!["S2.stop", "S1.stop"]);

    let halt = run_sync(&mut manager, &[], "halt", &Script::new())?;
    assert_eq!(halt.log.dispatched, vec!["S1.halt", "S2.halt"]);
    Ok(())
}

#[test]
fn action_dependencies_run_first() -> TestResult {
    init_tracing();
    let mut manager = ManagerBuilder::new()
        .service(
            "S",
            vec![("prepare", action("mkdir -p /run/s")), ("start", action("s"))],
        )
        .build();
    let id = manager.service("S").expect("S registered");
    let prepare = manager.graph().find_action(id, "prepare").expect("prepare");
    let start = manager.graph().find_action(id, "start").expect("start");
    manager.graph_mut().add_dep(start, prepare, DepKind::Require)?;

    let result = run_sync(&mut manager, &["S"], "start", &Script::new())?;

    assert_eq!(result.log.dispatched, vec!["S.prepare", "S.start"]);
    assert_eq!(manager.graph().status(prepare), Status::Done);
    assert_eq!(manager.status_of("S"), Some(Status::Done));
    Ok(())
}

#[test]
fn failed_action_dependency_fails_the_service() -> TestResult {
    init_tracing();
    let mut manager = ManagerBuilder::new()
        .echo_service("S1")
        .service("S2", vec![("init", action("init"))])
        .build();
    let s1 = manager.service("S1").expect("S1 registered");
    let s2 = manager.service("S2").expect("S2 registered");
    let start = manager.graph().find_action(s1, "start").expect("start");
    let init = manager.graph().find_action(s2, "init").expect("init");
    manager.graph_mut().add_dep(start, init, DepKind::Require)?;
    let script = Script::new().exit("S2.init", 2);

    let result = run_sync(&mut manager, &["S1"], "start", &script)?;

    assert_eq!(result.log.dispatched, vec!["S2.init"]);
    assert_eq!(manager.graph().status(start), Status::DepError);
    assert_eq!(manager.status_of("S1"), Some(Status::DepError));
    assert_eq!(manager.status_of("S2"), Some(Status::Error));
    Ok(())
}

/// S2 requires S3, and S1.start depends on S2.start.
fn action_dependency_on_a_dependent() -> ManagerBuilder {
    ManagerBuilder::new()
        .echo_service("S1")
        .echo_service("S2")
        .echo_service("S3")
        .require("S2", "S3")
}

fn link_starts(manager: &mut ServiceManager) -> TestResult {
    let s1 = manager.service("S1").expect("S1 registered");
    let s2 = manager.service("S2").expect("S2 registered");
    let s1_start = manager.graph().find_action(s1, "start").expect("S1.start");
    let s2_start = manager.graph().find_action(s2, "start").expect("S2.start");
    manager.graph_mut().add_dep(s1_start, s2_start, DepKind::Require)?;
    Ok(())
}

#[test]
fn action_dependency_brings_in_the_owning_service() -> TestResult {
    init_tracing();
    let mut manager = action_dependency_on_a_dependent().build();
    link_starts(&mut manager)?;

    let result = run_sync(&mut manager, &["S1"], "start", &Script::new())?;

    assert_eq!(result.log.dispatched, vec!["S3.start", "S2.start", "S1.start"]);
    let s3_done = result.finished_at("S3").expect("S3 finished");
    let s2_dispatched = result.dispatched_at("S2.start").expect("S2 dispatched");
    assert!(s3_done < s2_dispatched);

    assert_eq!(manager.status_of("S3"), Some(Status::Done));
    assert_eq!(manager.status_of("S2"), Some(Status::Done));
    assert_eq!(manager.status_of("S1"), Some(Status::Done));
    assert!(manager.core().is_idle());
    Ok(())
}

#[test]
fn action_is_held_while_its_service_requirement_fails() -> TestResult {
    init_tracing();
    let mut manager = action_dependency_on_a_dependent().build();
    link_starts(&mut manager)?;
    let script = Script::new().exit("S3.start", 1);

    let result = run_sync(&mut manager, &["S1"], "start", &script)?;

    assert_eq!(result.log.dispatched, vec!["S3.start"]);
    assert_eq!(manager.status_of("S3"), Some(Status::Error));
    assert_eq!(manager.status_of("S2"), Some(Status::DepError));
    assert_eq!(action_status(&manager, "S2", "start"), Status::DepError);
    assert_eq!(manager.status_of("S1"), Some(Status::DepError));
    Ok(())
}

#[test]
fn excluded_service_is_skipped_by_action_dependencies() -> TestResult {
    init_tracing();
    let mut manager = action_dependency_on_a_dependent().build();
    link_starts(&mut manager)?;
    let opts = RunOptions {
        excluded_services: vec!["S2".to_string()],
        ..RunOptions::default()
    };

    let result = run_sync_with(&mut manager, &["S1"], "start", &opts, &Script::new())?;

    assert_eq!(result.log.dispatched, vec!["S1.start"]);
    assert_eq!(manager.status_of("S2"), Some(Status::Locked));
    assert_eq!(manager.status_of("S3"), Some(Status::NoStatus));
    assert_eq!(manager.status_of("S1"), Some(Status::Done));
    Ok(())
}

#[test]
fn action_edge_against_a_service_edge_is_refused() -> TestResult {
    init_tracing();
    let mut manager = ManagerBuilder::new()
        .echo_service("A")
        .echo_service("B")
        .require("A", "B")
        .build();
    let a = manager.service("A").expect("A registered");
    let b = manager.service("B").expect("B registered");
    let a_start = manager.graph().find_action(a, "start").expect("A.start");
    let b_start = manager.graph().find_action(b, "start").expect("B.start");

    let err = manager
        .graph_mut()
        .add_dep(b_start, a_start, DepKind::Require)
        .expect_err("B.start would wait on A, which waits on B");
    assert!(matches!(err, GraphError::DependencyCycle(_)));
    assert_eq!(manager.graph().children(b_start).count(), 0);
    assert_eq!(manager.graph().parents(a_start).count(), 0);

    // The same edge along the service edge is fine.
    manager.graph_mut().add_dep(a_start, b_start, DepKind::Require)?;
    let result = run_sync(&mut manager, &["A"], "start", &Script::new())?;
    assert_eq!(result.log.dispatched, vec!["B.start", "A.start"]);
    Ok(())
}

#[test]
fn missing_action_fails_before_anything_runs() {
    init_tracing();
    let mut manager = ManagerBuilder::new()
        .service("S1", vec![("reload", action("kill -HUP 1"))])
        .service("S2", vec![("start", action("s2"))])
        .require("S1", "S2")
        .build();

    let err = manager
        .start(&["S1"], "reload", &RunOptions::default())
        .expect_err("S2 has no reload");

    match err {
        GraphError::ActionNotFound { service, action } => {
            assert_eq!(service, "S2");
            assert_eq!(action, "reload");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(manager.status_of("S1"), Some(Status::NoStatus));
    assert!(manager.core().is_idle());
}

#[test]
fn unknown_service_is_rejected() {
    let mut manager = chain().build();
    let err = manager
        .start(&["nope"], "start", &RunOptions::default())
        .expect_err("unknown service");
    assert!(matches!(err, GraphError::ServiceNotFound(name) if name == "nope"));
}

#[test]
fn commands_are_resolved_through_the_variable_scopes() -> TestResult {
    init_tracing();
    let mut manager = ManagerBuilder::new()
        .service(
            "fs",
            vec![("start", action("mount %FS on %{TARGET} by %SERVICE.%ACTION (%%)"))],
        )
        .target("fs", "n[1-2]")
        .variable("FS", "scratch")
        .build();

    let result = run_sync(&mut manager, &["fs"], "start", &Script::new())?;
    assert_eq!(result.log.commands, vec!["mount scratch on n1,n2 by fs.start (%)"]);

    let opts = RunOptions {
        defines: BTreeMap::from([("FS".to_string(), "work".to_string())]),
        ..RunOptions::default()
    };
    let result = run_sync_with(&mut manager, &["fs"], "start", &opts, &Script::new())?;
    assert_eq!(result.log.commands, vec!["mount work on n1,n2 by fs.start (%)"]);

    let id = manager.service("fs").expect("fs registered");
    manager
        .graph_mut()
        .entity_mut(id)
        .variables
        .insert("FS".to_string(), "home".to_string());
    let result = run_sync_with(&mut manager, &["fs"], "start", &opts, &Script::new())?;
    assert_eq!(result.log.commands, vec!["mount home on n1,n2 by fs.start (%)"]);
    Ok(())
}

#[test]
fn undefined_variable_aborts_the_run() {
    let mut manager = ManagerBuilder::new()
        .service("S", vec![("start", action("echo %NOPE"))])
        .build();

    let err = manager
        .start(&["S"], "start", &RunOptions::default())
        .expect_err("NOPE is undefined");

    assert!(matches!(err, GraphError::UndefinedVariable { name, .. } if name == "NOPE"));
}

#[test]
fn concurrency_limit_follows_the_lowest_fanout_in_flight() -> TestResult {
    init_tracing();
    let mut manager = ManagerBuilder::new()
        .service("A", vec![("start", action("a").with_fanout(2))])
        .service("B", vec![("start", action("b").with_fanout(8))])
        .build();

    let result = run_sync(&mut manager, &[], "start", &Script::new())?;

    assert_eq!(result.max_in_flight, 2);
    assert_eq!(result.log.limits, vec![Some(2), Some(8), None]);
    Ok(())
}

#[test]
fn fanout_override_replaces_the_default() -> TestResult {
    init_tracing();
    let mut manager = chain().build();
    let opts = RunOptions {
        fanout: Some(3),
        ..RunOptions::default()
    };

    let result = run_sync_with(&mut manager, &["S1"], "start", &opts, &Script::new())?;

    assert_eq!(result.log.limits, vec![Some(3), None, Some(3), None]);
    Ok(())
}

#[test]
fn stray_events_are_ignored() -> TestResult {
    init_tracing();
    let mut manager = chain().build();
    let s1 = manager.service("S1").expect("S1 registered");
    let s1_start = manager.graph().find_action(s1, "start").expect("start");

    let first = manager.start(&["S1"], "start", &RunOptions::default())?;

    // S1.start is still waiting on S2.
    let stray = manager.core_mut().step(RuntimeEvent::TimerFired { action: s1_start });
    assert!(stray.commands.is_empty());
    assert!(stray.keep_running);

    let result = drive_fifo(manager.core_mut(), first, &Script::new());
    assert_eq!(result.log.dispatched, vec!["S2.start", "S1.start"]);
    Ok(())
}

#[test]
fn shutdown_stops_the_core() -> TestResult {
    init_tracing();
    let mut manager = chain().build();
    let _first = manager.start(&["S1"], "start", &RunOptions::default())?;

    let step = manager.core_mut().step(RuntimeEvent::ShutdownRequested);

    assert!(!step.keep_running);
    assert!(step.commands.is_empty());
    assert!(!manager.core().is_finished());
    Ok(())
}

#[test]
fn every_entity_reports_one_terminal_event() -> TestResult {
    init_tracing();
    let mut manager = chain().build();

    let result = run_sync(&mut manager, &["S1"], "start", &Script::new())?;

    let finished: Vec<_> = result
        .trace
        .iter()
        .filter_map(|t| match t {
            Trace::Finished(label, status) => Some((label.as_str(), *status)),
            Trace::Dispatched(_) => None,
        })
        .collect();
    assert_eq!(
        finished,
        vec![
            ("S2.start", Status::Done),
            ("S2", Status::Done),
            ("S1.start", Status::Done),
            ("S1", Status::Done),
        ]
    );
    Ok(())
}

#[test]
fn services_can_be_added_by_hand() -> TestResult {
    let mut manager = chain().build();
    let err = manager
        .add_service("S1", Service::new())
        .expect_err("duplicate name");
    assert!(matches!(err, GraphError::DuplicateService(name) if name == "S1"));

    let ids: Vec<_> = manager.services().map(|(name, _)| name.to_string()).collect();
    assert_eq!(ids, vec!["S1", "S2"]);
    Ok(())
}
