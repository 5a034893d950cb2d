// tests/cli.rs

mod common;
use crate::common::builders::ManagerBuilder;
use crate::common::run_sync;

use std::error::Error;

use clap::Parser;
use svcgraph::cli::CliArgs;
use svcgraph::display::summary;
use svcgraph::logging::parse_level_str;
use svcgraph::types::Status;
use svcgraph::{exit_code, run_options};
use svcgraph_test_utils::fake_transport::Script;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn action_and_services_are_positional() -> TestResult {
    let args = CliArgs::try_parse_from([
        "svcgraph", "-c", "cluster.toml", "-x", "web", "-x", "db", "-d", "FS=scratch", "-n",
        "n[1-4]", "-X", "n2", "--fanout", "8", "start", "lustre", "nfs",
    ])?;

    assert_eq!(args.action.as_deref(), Some("start"));
    assert_eq!(args.services, vec!["lustre", "nfs"]);
    assert_eq!(args.exclude_services, vec!["web", "db"]);

    let opts = run_options(&args)?;
    assert_eq!(opts.defines.get("FS").map(String::as_str), Some("scratch"));
    assert_eq!(
        opts.only_nodes.as_ref().map(ToString::to_string).as_deref(),
        Some("n1,n2,n3,n4")
    );
    assert!(opts.excluded_nodes.contains("n2"));
    assert_eq!(opts.fanout, Some(8));
    Ok(())
}

#[test]
fn action_is_required_unless_printing_the_graph() {
    assert!(CliArgs::try_parse_from(["svcgraph"]).is_err());
    assert!(CliArgs::try_parse_from(["svcgraph", "--graph"]).is_ok());
}

#[test]
fn malformed_define_is_rejected() {
    assert!(CliArgs::try_parse_from(["svcgraph", "-d", "novalue", "start"]).is_err());
    assert!(CliArgs::try_parse_from(["svcgraph", "-d", "=x", "start"]).is_err());
}

#[test]
fn invalid_node_filter_is_reported() -> TestResult {
    let args = CliArgs::try_parse_from(["svcgraph", "-n", "n[1-", "start"])?;
    assert!(run_options(&args).is_err());
    Ok(())
}

#[test]
fn exit_codes_follow_the_overall_status() {
    assert_eq!(exit_code(Status::Done), 0);
    assert_eq!(exit_code(Status::Skipped), 0);
    assert_eq!(exit_code(Status::DoneWithWarnings), 3);
    assert_eq!(exit_code(Status::TimedOut), 5);
    assert_eq!(exit_code(Status::Error), 6);
    assert_eq!(exit_code(Status::DepError), 6);
}

#[test]
fn log_levels_parse_case_insensitively() {
    assert_eq!(parse_level_str("INFO"), Some(tracing::Level::INFO));
    assert_eq!(parse_level_str(" warning "), Some(tracing::Level::WARN));
    assert_eq!(parse_level_str("loud"), None);
}

#[test]
fn summary_lists_touched_entities_and_failing_nodes() -> TestResult {
    let mut manager = ManagerBuilder::new()
        .echo_service("S1")
        .echo_service("S2")
        .echo_service("idle")
        .require("S1", "S2")
        .target("S2", "n[1-2]")
        .build();
    let script = Script::new().node("S2.start", "n2", svcgraph_test_utils::fake_transport::Reply::Exit(7));

    run_sync(&mut manager, &["S1"], "start", &script)?;
    let text = summary(&manager);

    assert!(text.contains("S1"));
    assert!(text.contains("DEP_ERROR"));
    assert!(text.contains("n2"));
    assert!(!text.contains("idle"));
    Ok(())
}
