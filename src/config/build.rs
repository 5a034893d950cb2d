// src/config/build.rs

//! Turn a validated [`ConfigFile`] into a populated [`ServiceManager`].

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::model::{ConfigFile, DepLists, GroupConfig, ServiceConfig, Tunables};
use crate::config::validate::split_action_ref;
use crate::dag::{Action, DagGraph, EntityId, Service};
use crate::engine::{ManagerOptions, ServiceManager};
use crate::errors::{GraphError, Result};
use crate::exec::ShellOptions;
use crate::nodeset::NodeSet;
use crate::types::DepKind;

/// Engine options of the `[config]` section.
pub fn manager_options(cfg: &ConfigFile) -> ManagerOptions {
    ManagerOptions {
        default_fanout: cfg.config.fanout,
        reverse_actions: cfg.config.reverse_actions.clone(),
    }
}

/// Transport options of the `[config]` section.
pub fn shell_options(cfg: &ConfigFile) -> ShellOptions {
    ShellOptions {
        ssh_path: cfg.config.ssh_path.clone(),
        ssh_options: cfg.config.ssh_options.clone(),
        local_nodes: cfg.config.local_nodes.clone(),
        default_fanout: cfg.config.fanout,
    }
}

/// Build the whole graph and register the top-level services and groups.
pub fn build_manager(cfg: &ConfigFile) -> Result<ServiceManager> {
    let mut manager = ServiceManager::new(manager_options(cfg));

    for (name, value) in &cfg.variables {
        manager.add_variable(name, value);
    }

    let inherited = Inherited {
        tunables: cfg.defaults.clone(),
        target: None,
    };
    let members = build_scope(
        manager.graph_mut(),
        None,
        &cfg.service,
        &cfg.group,
        &inherited,
    )?;

    for id in members.values() {
        manager.register_service(*id)?;
    }

    debug!(
        services = members.len(),
        entities = manager.graph().len(),
        "graph built from configuration"
    );
    Ok(manager)
}

/// What a scope passes down to its members.
#[derive(Debug, Clone)]
struct Inherited {
    tunables: Tunables,
    target: Option<String>,
}

/// Build the services and groups of one scope, then wire their
/// dependencies: plain edges at the top level, internal edges inside a group.
fn build_scope(
    graph: &mut DagGraph,
    group: Option<EntityId>,
    services: &BTreeMap<String, ServiceConfig>,
    groups: &BTreeMap<String, GroupConfig>,
    inherited: &Inherited,
) -> Result<BTreeMap<String, EntityId>> {
    let mut members = BTreeMap::new();
    let mut deps: Vec<(&str, &DepLists)> = Vec::new();

    for (name, cfg) in services {
        let id = build_service(graph, name, cfg, inherited)?;
        members.insert(name.clone(), id);
        deps.push((name.as_str(), &cfg.deps));
    }

    for (name, cfg) in groups {
        let id = graph.add_group(name.as_str());
        {
            let entity = graph.entity_mut(id);
            entity.desc = cfg.desc.clone();
            entity.variables = cfg.variables.clone();
            entity.target = parse_target(cfg.target.as_ref())?;
        }
        let nested = Inherited {
            tunables: inherited.tunables.merge(&cfg.tunables),
            target: cfg.target.clone().or_else(|| inherited.target.clone()),
        };
        let inner = build_scope(graph, Some(id), &cfg.services, &cfg.groups, &nested)?;
        if inner.is_empty() {
            return Err(GraphError::ConfigError(format!(
                "group '{}' has no services",
                graph.label(id)
            )));
        }

        members.insert(name.clone(), id);
        deps.push((name.as_str(), &cfg.deps));
    }

    if let Some(group) = group {
        for id in members.values() {
            graph.add_inter_dep(group, *id, None, DepKind::Require)?;
        }
    }

    for (name, lists) in deps {
        let base = lookup(&members, name, name)?;
        for (kind, dep) in lists.iter() {
            let target = lookup(&members, name, dep)?;
            match group {
                Some(group) => graph.add_inter_dep(group, target, Some(base), kind)?,
                None => {
                    graph.add_dep(base, target, kind)?;
                }
            }
        }
    }

    wire_action_deps(graph, services, &members)?;

    Ok(members)
}

fn lookup(members: &BTreeMap<String, EntityId>, from: &str, name: &str) -> Result<EntityId> {
    members
        .get(name)
        .copied()
        .ok_or_else(|| GraphError::MissingDependency {
            entity: from.to_string(),
            dependency: name.to_string(),
        })
}

fn parse_target(pattern: Option<&String>) -> Result<NodeSet> {
    match pattern {
        Some(pattern) => NodeSet::parse(pattern),
        None => Ok(NodeSet::new()),
    }
}

fn build_service(
    graph: &mut DagGraph,
    name: &str,
    cfg: &ServiceConfig,
    inherited: &Inherited,
) -> Result<EntityId> {
    let service = Service {
        simulate: cfg.simulate,
        ..Service::default()
    };
    let id = graph.add_service(name, service);
    {
        let entity = graph.entity_mut(id);
        entity.desc = cfg.desc.clone();
        entity.variables = cfg.variables.clone();
        entity.target = parse_target(cfg.target.as_ref().or(inherited.target.as_ref()))?;
    }

    let tunables = inherited.tunables.merge(&cfg.tunables);
    for (action_name, action_cfg) in &cfg.actions {
        let merged = tunables.merge(&action_cfg.tunables);
        let mut action = Action::new(action_cfg.cmd.as_str())
            .with_delay(merged.delay())
            .with_retry(merged.retry.unwrap_or(0))
            .with_errors(merged.errors.unwrap_or(0))
            .with_warnings(merged.warnings.unwrap_or(0))
            .with_mode(merged.mode.unwrap_or_default());
        if let Some(timeout) = merged.timeout() {
            action = action.with_timeout(timeout);
        }
        if let Some(fanout) = merged.fanout {
            action = action.with_fanout(fanout);
        }

        let action_id = graph.add_action(id, action_name.as_str(), action)?;
        let entity = graph.entity_mut(action_id);
        entity.desc = action_cfg.desc.clone();
        entity.variables = action_cfg.variables.clone();
        entity.target = parse_target(action_cfg.target.as_ref())?;
    }

    debug!(service = %graph.label(id), actions = cfg.actions.len(), "service built");
    Ok(id)
}

fn wire_action_deps(
    graph: &mut DagGraph,
    services: &BTreeMap<String, ServiceConfig>,
    members: &BTreeMap<String, EntityId>,
) -> Result<()> {
    for (service_name, cfg) in services {
        let service = lookup(members, service_name, service_name)?;
        for (action_name, action_cfg) in &cfg.actions {
            let from = action_entity(graph, service, service_name, action_name)?;
            for (kind, dep) in action_cfg.deps.iter() {
                let (dep_service, dep_action) = split_action_ref(service_name, dep);
                let owner = lookup(members, service_name, dep_service)?;
                let to = action_entity(graph, owner, dep_service, dep_action)?;
                graph.add_dep(from, to, kind)?;
            }
        }
    }
    Ok(())
}

fn action_entity(graph: &DagGraph, service: EntityId, service_name: &str, action: &str) -> Result<EntityId> {
    graph
        .find_action(service, action)
        .ok_or_else(|| GraphError::ActionNotFound {
            service: service_name.to_string(),
            action: action.to_string(),
        })
}
