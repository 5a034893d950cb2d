// src/config/validate.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{
    ConfigFile, DepLists, GroupConfig, RawConfigFile, ServiceConfig, Tunables,
};
use crate::errors::{GraphError, Result};
use crate::nodeset::NodeSet;
use crate::types::STATUS_ACTION;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = GraphError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

/// Check everything the graph build relies on, before any entity exists.
pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_services(cfg)?;
    validate_global_config(cfg)?;
    validate_tunables("defaults", &cfg.defaults)?;
    validate_scope("", &cfg.service, &cfg.group, &cfg.config.reverse_actions)?;
    Ok(())
}

fn ensure_has_services(cfg: &RawConfigFile) -> Result<()> {
    if cfg.service.is_empty() && cfg.group.is_empty() {
        return Err(GraphError::ConfigError(
            "config must contain at least one [service.<name>] or [group.<name>] section"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.fanout == 0 {
        return Err(GraphError::ConfigError(
            "[config].fanout must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.config.ssh_path.trim().is_empty() {
        return Err(GraphError::ConfigError(
            "[config].ssh_path must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn qualify(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn validate_name(path: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains('.') || name.chars().any(char::is_whitespace) {
        return Err(GraphError::ConfigError(format!(
            "invalid name '{}': names must be non-empty, without dots or spaces",
            qualify(path, name)
        )));
    }
    Ok(())
}

fn validate_tunables(owner: &str, tunables: &Tunables) -> Result<()> {
    for (key, value) in [("timeout", tunables.timeout), ("delay", tunables.delay)] {
        if let Some(secs) = value {
            if !secs.is_finite() || secs < 0.0 {
                return Err(GraphError::ConfigError(format!(
                    "'{owner}': {key} must be a non-negative number of seconds (got {secs})"
                )));
            }
        }
    }
    if tunables.fanout == Some(0) {
        return Err(GraphError::ConfigError(format!(
            "'{owner}': fanout must be >= 1 (got 0)"
        )));
    }
    Ok(())
}

fn validate_target(target: Option<&String>) -> Result<()> {
    if let Some(pattern) = target {
        NodeSet::parse(pattern)?;
    }
    Ok(())
}

/// Services and groups sharing one namespace: the top level, or the inside
/// of one group.
fn validate_scope(
    path: &str,
    services: &BTreeMap<String, ServiceConfig>,
    groups: &BTreeMap<String, GroupConfig>,
    reverse_actions: &[String],
) -> Result<()> {
    let mut members: BTreeMap<&str, &DepLists> = BTreeMap::new();

    for (name, service) in services {
        validate_name(path, name)?;
        members.insert(name.as_str(), &service.deps);
    }
    for (name, group) in groups {
        validate_name(path, name)?;
        if members.insert(name.as_str(), &group.deps).is_some() {
            return Err(GraphError::DuplicateService(qualify(path, name)));
        }
    }

    for (name, deps) in &members {
        let qualified = qualify(path, name);
        validate_dependencies(&qualified, name, deps, |dep| members.contains_key(dep))?;
    }
    validate_cycles(path, &members)?;

    for (name, service) in services {
        let qualified = qualify(path, name);
        validate_tunables(&qualified, &service.tunables)?;
        validate_target(service.target.as_ref())?;
        validate_actions(&qualified, name, service, services)?;
    }
    validate_action_cycles(path, &members, services, reverse_actions)?;

    for (name, group) in groups {
        let qualified = qualify(path, name);
        validate_tunables(&qualified, &group.tunables)?;
        validate_target(group.target.as_ref())?;
        validate_scope(&qualified, &group.services, &group.groups, reverse_actions)?;
    }

    Ok(())
}

/// Unknown targets, self dependencies and targets listed under two kinds.
fn validate_dependencies(
    qualified: &str,
    own: &str,
    deps: &DepLists,
    exists: impl Fn(&str) -> bool,
) -> Result<()> {
    let mut seen = BTreeSet::new();

    for (kind, dep) in deps.iter() {
        if dep == own {
            return Err(GraphError::IllegalDependency {
                from: qualified.to_string(),
                to: dep.to_string(),
                reason: "an entity cannot depend on itself".to_string(),
            });
        }
        if !exists(dep) {
            return Err(GraphError::MissingDependency {
                entity: qualified.to_string(),
                dependency: dep.to_string(),
            });
        }
        if !seen.insert(dep) {
            return Err(GraphError::IllegalDependency {
                from: qualified.to_string(),
                to: dep.to_string(),
                reason: format!("listed more than once (last as {kind})"),
            });
        }
    }

    Ok(())
}

fn validate_cycles(path: &str, members: &BTreeMap<&str, &DepLists>) -> Result<()> {
    // Edge direction: dep -> dependent
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in members.keys() {
        graph.add_node(name);
    }
    for (name, deps) in members {
        for (_, dep) in deps.iter() {
            graph.add_edge(dep, name, ());
        }
    }

    // A topological sort will fail if there is a cycle.
    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(GraphError::DependencyCycle(format!(
            "cycle detected involving '{}'",
            qualify(path, cycle.node_id())
        ))),
    }
}

/// Split an action dependency into (service, action).
///
/// `"start"` is an action of `own`, `"db.start"` an action of the sibling
/// service `db`.
pub(crate) fn split_action_ref<'a>(own: &'a str, dep: &'a str) -> (&'a str, &'a str) {
    match dep.split_once('.') {
        Some((service, action)) => (service, action),
        None => (own, dep),
    }
}

fn validate_actions(
    qualified: &str,
    own: &str,
    service: &ServiceConfig,
    siblings: &BTreeMap<String, ServiceConfig>,
) -> Result<()> {
    for (action_name, action) in &service.actions {
        validate_name(qualified, action_name)?;
        let action_qualified = qualify(qualified, action_name);
        validate_tunables(&action_qualified, &action.tunables)?;
        validate_target(action.target.as_ref())?;

        if action.cmd.trim().is_empty() {
            return Err(GraphError::ConfigError(format!(
                "action '{action_qualified}' has an empty cmd"
            )));
        }

        let mut seen = BTreeSet::new();
        for (_, dep) in action.deps.iter() {
            let (dep_service, dep_action) = split_action_ref(own, dep);
            if dep_service == own && dep_action == action_name {
                return Err(GraphError::IllegalDependency {
                    from: action_qualified.clone(),
                    to: dep.to_string(),
                    reason: "an action cannot depend on itself".to_string(),
                });
            }
            let exists = siblings
                .get(dep_service)
                .is_some_and(|s| s.actions.contains_key(dep_action));
            if !exists {
                return Err(GraphError::MissingDependency {
                    entity: action_qualified.clone(),
                    dependency: dep.to_string(),
                });
            }
            if !seen.insert((dep_service, dep_action)) {
                return Err(GraphError::IllegalDependency {
                    from: action_qualified.clone(),
                    to: dep.to_string(),
                    reason: "listed more than once".to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Wait cycles mixing service and action dependencies.
///
/// A run of either direction waits: from a service or group on its
/// dependencies in that direction, from a service on the actions it may run,
/// and from an action on its action dependencies plus the dependencies of its
/// service. Groups count as single nodes here; their inside is its own scope.
fn validate_action_cycles(
    path: &str,
    members: &BTreeMap<&str, &DepLists>,
    services: &BTreeMap<String, ServiceConfig>,
    reverse_actions: &[String],
) -> Result<()> {
    let mut depended_on: BTreeSet<(&str, &str)> = BTreeSet::new();
    for (service_name, service) in services {
        for action in service.actions.values() {
            for (_, dep) in action.deps.iter() {
                depended_on.insert(split_action_ref(service_name, dep));
            }
        }
    }

    for reverse in [false, true] {
        // Edge direction: waiting -> waited on
        let mut graph: DiGraphMap<(&str, Option<&str>), ()> = DiGraphMap::new();
        let mut service_waits: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for (&name, deps) in members {
            graph.add_node((name, None));
            for (_, dep) in deps.iter() {
                if reverse {
                    graph.add_edge((dep, None), (name, None), ());
                    service_waits.entry(dep).or_default().push(name);
                } else {
                    graph.add_edge((name, None), (dep, None), ());
                    service_waits.entry(name).or_default().push(dep);
                }
            }
        }

        for (service_name, service) in services {
            let service_name = service_name.as_str();
            let waits = service_waits.get(service_name).cloned().unwrap_or_default();
            for (action_name, action) in &service.actions {
                let action_name = action_name.as_str();
                let node = (service_name, Some(action_name));

                let may_run = action_name == STATUS_ACTION
                    || reverse_actions.iter().any(|r| r == action_name) == reverse
                    || depended_on.contains(&(service_name, action_name));
                if may_run {
                    graph.add_edge((service_name, None), node, ());
                }

                graph.add_node(node);
                for (_, dep) in action.deps.iter() {
                    let (dep_service, dep_action) = split_action_ref(service_name, dep);
                    graph.add_edge(node, (dep_service, Some(dep_action)), ());
                }
                for &target in &waits {
                    graph.add_edge(node, (target, None), ());
                }
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            let (service, action) = cycle.node_id();
            let service = qualify(path, service);
            let entity = match action {
                Some(action) => qualify(&service, action),
                None => service,
            };
            return Err(GraphError::DependencyCycle(format!(
                "cycle detected between service and action dependencies involving '{entity}'"
            )));
        }
    }

    Ok(())
}
