// tests/variables.rs

use std::collections::BTreeMap;

use svcgraph::errors::GraphError;
use svcgraph::variables::{Scope, referenced, substitute};

fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn both_placeholder_forms_are_substituted() {
    let globals = vars(&[("FS", "scratch"), ("NODE", "n1")]);
    let scope = Scope::new().then(&globals);

    assert_eq!(
        scope.resolve("mount %FS on %{NODE}s", "svc.start").unwrap(),
        "mount scratch on n1s"
    );
}

#[test]
fn double_percent_is_a_literal() {
    let scope = Scope::new();
    assert_eq!(
        scope.resolve("date +%%H:%%M", "svc.start").unwrap(),
        "date +%H:%M"
    );
}

#[test]
fn earlier_layers_win() {
    let action = vars(&[("FS", "action")]);
    let service = vars(&[("FS", "service"), ("OPTS", "-o ro")]);
    let globals = vars(&[("FS", "global"), ("OPTS", "-o rw"), ("DEV", "/dev/sda")]);
    let scope = Scope::new().then(&action).then(&service).then(&globals);

    assert_eq!(scope.lookup("FS"), Some("action"));
    assert_eq!(scope.lookup("OPTS"), Some("-o ro"));
    assert_eq!(scope.lookup("DEV"), Some("/dev/sda"));
    assert_eq!(scope.lookup("NOPE"), None);
}

#[test]
fn values_are_not_expanded_again() {
    let globals = vars(&[("A", "%B"), ("B", "boom")]);
    let scope = Scope::new().then(&globals);

    assert_eq!(scope.resolve("echo %A", "svc.start").unwrap(), "echo %B");
}

#[test]
fn undefined_variable_names_its_owner() {
    let err = Scope::new()
        .resolve("echo %MISSING", "fs.start")
        .expect_err("undefined");

    match err {
        GraphError::UndefinedVariable { entity, name } => {
            assert_eq!(entity, "fs.start");
            assert_eq!(name, "MISSING");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn stray_percent_signs_are_kept() {
    let scope = Scope::new();
    assert_eq!(scope.resolve("100% sure", "svc").unwrap(), "100% sure");
    assert_eq!(scope.resolve("tail %", "svc").unwrap(), "tail %");
}

#[test]
fn referenced_lists_names_in_order() {
    assert_eq!(
        referenced("%A and %{B_2} but not %%C"),
        vec!["A", "B_2"]
    );
}

#[test]
fn substitute_takes_any_lookup() {
    let out = substitute("%X-%Y", "svc", |name| match name {
        "X" => Some("1"),
        "Y" => Some("2"),
        _ => None,
    })
    .unwrap();
    assert_eq!(out, "1-2");
}
