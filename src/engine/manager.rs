// src/engine/manager.rs

//! Service registry and run orchestration.
//!
//! The [`ServiceManager`] is the engine context: it owns the graph (through
//! the core runtime), the top-level service registry and the global
//! variables. A run goes through four phases:
//!
//! 1. reset every entity and lock excluded services,
//! 2. plan: walk what the run can reach and fail on missing actions,
//! 3. resolve commands, node sets and fanouts of every reachable action,
//! 4. hand the roots to the scheduler and drive the async runtime.

use std::collections::BTreeMap;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::dag::{DagGraph, EntityId, ResolvedAction, RunPlan, Scheduler, Service};
use crate::engine::action_manager::ActionManager;
use crate::engine::core::{CoreRuntime, CoreStep};
use crate::engine::observer::Observer;
use crate::engine::runtime::Runtime;
use crate::engine::{DEFAULT_FANOUT, RuntimeEvent};
use crate::errors::{GraphError, Result};
use crate::exec::Transport;
use crate::nodeset::NodeSet;
use crate::types::Status;
use crate::variables::Scope;

/// Engine-wide settings, usually from the `[config]` table.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub default_fanout: usize,
    /// Actions run dependents first.
    pub reverse_actions: Vec<String>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            default_fanout: DEFAULT_FANOUT,
            reverse_actions: vec!["stop".to_string()],
        }
    }
}

/// Per-run selection and overrides, usually from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Top-level services locked out of the run.
    pub excluded_services: Vec<String>,
    /// Restrict every action to these nodes.
    pub only_nodes: Option<NodeSet>,
    pub excluded_nodes: NodeSet,
    /// Variables overriding the global ones.
    pub defines: BTreeMap<String, String>,
    /// Default fanout override.
    pub fanout: Option<usize>,
}

#[derive(Debug)]
pub struct ServiceManager {
    core: CoreRuntime,
    services: BTreeMap<String, EntityId>,
    variables: BTreeMap<String, String>,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new(ManagerOptions::default())
    }
}

impl ServiceManager {
    pub fn new(options: ManagerOptions) -> Self {
        let scheduler = Scheduler::new(DagGraph::new(), ActionManager::new(options.default_fanout))
            .with_reverse_actions(options.reverse_actions);
        Self {
            core: CoreRuntime::new(scheduler),
            services: BTreeMap::new(),
            variables: BTreeMap::new(),
        }
    }

    pub fn graph(&self) -> &DagGraph {
        self.core.scheduler().graph()
    }

    pub fn graph_mut(&mut self) -> &mut DagGraph {
        self.core.scheduler_mut().graph_mut()
    }

    pub fn core(&self) -> &CoreRuntime {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut CoreRuntime {
        &mut self.core
    }

    pub fn add_observer(&mut self, observer: Box<dyn Observer + Send>) {
        self.core.add_observer(observer);
    }

    /// Make an existing top-level service or group selectable by name.
    pub fn register_service(&mut self, id: EntityId) -> Result<()> {
        let entity = self.graph().entity(id);
        if !entity.is_service_like() {
            return Err(GraphError::ConfigError(format!(
                "'{}' is not a service",
                self.graph().label(id)
            )));
        }
        let name = entity.name.clone();
        if self.services.contains_key(&name) {
            return Err(GraphError::DuplicateService(name));
        }
        debug!(service = %name, "service registered");
        self.services.insert(name, id);
        Ok(())
    }

    /// Create and register a top-level service.
    pub fn add_service(&mut self, name: &str, service: Service) -> Result<EntityId> {
        if self.services.contains_key(name) {
            return Err(GraphError::DuplicateService(name.to_string()));
        }
        let id = self.graph_mut().add_service(name, service);
        self.register_service(id)?;
        Ok(id)
    }

    /// Create and register a top-level group.
    pub fn add_group(&mut self, name: &str) -> Result<EntityId> {
        if self.services.contains_key(name) {
            return Err(GraphError::DuplicateService(name.to_string()));
        }
        let id = self.graph_mut().add_group(name);
        self.register_service(id)?;
        Ok(id)
    }

    pub fn add_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    pub fn service(&self, name: &str) -> Option<EntityId> {
        self.services.get(name).copied()
    }

    /// Registered services, in name order.
    pub fn services(&self) -> impl Iterator<Item = (&str, EntityId)> + '_ {
        self.services.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn status_of(&self, name: &str) -> Option<Status> {
        self.service(name).map(|id| self.graph().status(id))
    }

    pub fn overall_status(&self) -> Status {
        self.core.overall_status()
    }

    /// Everything a run would touch, without changing any state.
    pub fn plan<S: AsRef<str>>(&self, names: &[S], action: &str) -> Result<RunPlan> {
        let roots = self.select(names)?;
        self.core.scheduler().plan(&roots, action)
    }

    /// Prepare a run and return the first batch of commands.
    ///
    /// An empty `names` selects every registered service.
    pub fn start<S: AsRef<str>>(
        &mut self,
        names: &[S],
        action: &str,
        opts: &RunOptions,
    ) -> Result<CoreStep> {
        let mut roots = self.select(names)?;
        let excluded = opts
            .excluded_services
            .iter()
            .map(|name| {
                self.service(name)
                    .ok_or_else(|| GraphError::ServiceNotFound(name.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        let scheduler = self.core.scheduler_mut();
        scheduler.reset();
        if let Some(fanout) = opts.fanout {
            scheduler.action_manager_mut().set_default_fanout(fanout);
        }

        for id in excluded {
            self.lock(id);
        }
        roots.retain(|root| {
            let locked = self.graph().status(*root) == Status::Locked;
            if locked {
                info!(service = %self.graph().label(*root), "excluded from the run");
            }
            !locked
        });

        let plan = self.core.scheduler().plan(&roots, action)?;
        self.resolve_actions(&plan, opts)?;

        self.core.start_run(&roots, action)
    }

    /// Run `action` on `names` (every service if empty) to completion and
    /// return the overall status.
    pub async fn run<S, T>(
        &mut self,
        names: &[S],
        action: &str,
        opts: &RunOptions,
        transport: T,
        event_rx: mpsc::Receiver<RuntimeEvent>,
    ) -> Result<Status>
    where
        S: AsRef<str>,
        T: Transport,
    {
        let initial = self.start(names, action, opts)?;
        Runtime::new(&mut self.core, event_rx, transport)
            .run(initial)
            .await?;

        if !self.core.is_finished() {
            return Err(GraphError::Other(anyhow!(
                "run of '{action}' stopped before every service resolved"
            )));
        }

        let status = self.overall_status();
        info!(%action, %status, "run complete");
        Ok(status)
    }

    fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<EntityId>> {
        if names.is_empty() {
            return Ok(self.services.values().copied().collect());
        }
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.service(name)
                    .ok_or_else(|| GraphError::ServiceNotFound(name.to_string()))
            })
            .collect()
    }

    /// Lock a service, or a group and everything inside it.
    fn lock(&mut self, id: EntityId) {
        let graph = self.graph_mut();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let entity = graph.entity(next);
            if let Some(group) = entity.as_group() {
                stack.extend(group.subservices.values().copied());
            }
            // Action dependencies into a locked service are skipped too.
            if let Some(service) = entity.as_service() {
                stack.extend(service.actions.values().copied());
            }
            graph.entity_mut(next).status = Status::Locked;
        }
        debug!(service = %self.graph().label(id), "locked");
    }

    /// Compute the command line, nodes and fanout of every planned action.
    fn resolve_actions(&mut self, plan: &RunPlan, opts: &RunOptions) -> Result<()> {
        let mut resolved = Vec::with_capacity(plan.actions.len());
        for id in &plan.actions {
            resolved.push((*id, self.resolve_action(*id, opts)?));
        }

        let graph = self.graph_mut();
        for (id, action) in resolved {
            graph.action_mut(id).resolved = Some(action);
        }
        Ok(())
    }

    fn resolve_action(&self, id: EntityId, opts: &RunOptions) -> Result<ResolvedAction> {
        let graph = self.graph();
        let entity = graph.entity(id);
        let action = graph.action(id);
        let label = graph.label(id);

        let target = graph.action_target(id);
        let mut nodes = match &opts.only_nodes {
            Some(only) => target.intersection(only),
            None => target.clone(),
        };
        nodes = nodes.difference(&opts.excluded_nodes);
        let skipped = !target.is_empty() && nodes.is_empty();

        let fanout = action.fanout.filter(|f| *f >= 1);
        let effective_fanout = fanout.unwrap_or(self.core.scheduler().action_manager().default_fanout());

        let service = entity.scope;
        let service_entity = service.map(|s| graph.entity(s));
        let builtins = BTreeMap::from([
            ("NAME".to_string(), entity.name.clone()),
            ("ACTION".to_string(), entity.name.clone()),
            (
                "SERVICE".to_string(),
                service_entity.map(|s| s.name.clone()).unwrap_or_default(),
            ),
            ("TARGET".to_string(), nodes.to_string()),
            ("FANOUT".to_string(), effective_fanout.to_string()),
            (
                "TIMEOUT".to_string(),
                action.timeout.map_or(0, |t| t.as_secs()).to_string(),
            ),
            (
                "DESC".to_string(),
                entity
                    .desc
                    .clone()
                    .or_else(|| service_entity.and_then(|s| s.desc.clone()))
                    .unwrap_or_default(),
            ),
        ]);

        let mut scope = Scope::new().then(&entity.variables);
        let mut enclosing = service;
        while let Some(owner) = enclosing {
            let owner = graph.entity(owner);
            scope = scope.then(&owner.variables);
            enclosing = owner.scope;
        }
        let scope = scope
            .then(&opts.defines)
            .then(&self.variables)
            .then(&builtins);

        let command = scope.resolve(&action.command, &label)?;
        debug!(action = %label, %command, %nodes, skipped, "action resolved");

        Ok(ResolvedAction {
            command,
            nodes,
            fanout,
            skipped,
        })
    }
}
