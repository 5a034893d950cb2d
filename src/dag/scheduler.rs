// src/dag/scheduler.rs

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::mem;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::dag::action::Verdict;
use crate::dag::dependency::Dependency;
use crate::dag::entity::{EntityId, EntityKind};
use crate::dag::graph::DagGraph;
use crate::dag::scheduler_step::SchedulerStep;
use crate::engine::{
    ActionManager, CoreCommand, DispatchOutcome, DispatchRequest, EngineEvent,
};
use crate::errors::{GraphError, Result};
use crate::types::{STATUS_ACTION, Status};

/// Entities and actions a run can reach, computed before anything starts.
#[derive(Debug, Clone, Default)]
pub struct RunPlan {
    /// Services and groups with the action they would run.
    pub services: Vec<(EntityId, String)>,
    /// Every action entity that may be dispatched.
    pub actions: BTreeSet<EntityId>,
}

/// Scheduler holds the graph plus the mutable per-run state.
///
/// It is responsible for:
/// - walking dependencies before dependents (`prepare`)
/// - starting services, groups and actions once their dependencies resolved
/// - the action state machine (delay, dispatch, retry, classification)
/// - propagating terminal statuses to the entities waiting on them
///
/// It never performs IO: dispatches, timers and concurrency changes are
/// queued as [`CoreCommand`]s and returned in a [`SchedulerStep`].
#[derive(Debug)]
pub struct Scheduler {
    graph: DagGraph,
    manager: ActionManager,
    /// Traversal direction of the current run.
    reverse: bool,
    roots: Vec<EntityId>,
    /// Entities waiting for (re-)evaluation.
    queue: VecDeque<EntityId>,
    commands: Vec<CoreCommand>,
    events: Vec<EngineEvent>,
    run_counter: u64,
    current_run_id: Option<u64>,
}

impl Scheduler {
    pub fn new(graph: DagGraph, manager: ActionManager) -> Self {
        Self {
            graph,
            manager,
            reverse: false,
            roots: Vec::new(),
            queue: VecDeque::new(),
            commands: Vec::new(),
            events: Vec::new(),
            run_counter: 0,
            current_run_id: None,
        }
    }

    /// Actions whose runs walk dependents before dependencies.
    pub fn with_reverse_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.graph.set_reverse_actions(actions);
        self
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut DagGraph {
        &mut self.graph
    }

    pub fn action_manager(&self) -> &ActionManager {
        &self.manager
    }

    pub fn action_manager_mut(&mut self) -> &mut ActionManager {
        &mut self.manager
    }

    pub fn is_reverse_action(&self, action: &str) -> bool {
        self.graph.is_reverse_action(action)
    }

    /// Returns `true` if there is currently no active run.
    pub fn is_idle(&self) -> bool {
        self.current_run_id.is_none()
    }

    pub fn current_run_id(&self) -> Option<u64> {
        self.current_run_id
    }

    pub fn roots(&self) -> &[EntityId] {
        &self.roots
    }

    /// Every root reached a terminal status (or is locked) and no action
    /// is still running or delayed.
    pub fn is_finished(&self) -> bool {
        self.manager.in_flight() == 0
            && self
                .roots
                .iter()
                .all(|root| !self.graph.status(*root).is_unresolved())
    }

    /// Most severe final status among the roots.
    pub fn overall_status(&self) -> Status {
        self.roots
            .iter()
            .map(|root| self.graph.status(*root))
            .fold(Status::Done, Status::worst)
    }

    /// Walk everything a run of `action` from `roots` can reach and check
    /// every service on the way defines the action it would run.
    pub fn plan(&self, roots: &[EntityId], action: &str) -> Result<RunPlan> {
        let reverse = self.is_reverse_action(action);
        let mut plan = RunPlan::default();
        let mut seen: HashSet<(EntityId, String)> = HashSet::new();
        let mut stack: Vec<(EntityId, String)> =
            roots.iter().map(|root| (*root, action.to_string())).collect();

        while let Some((id, name)) = stack.pop() {
            if !seen.insert((id, name.clone())) {
                continue;
            }

            let entity = self.graph.entity(id);
            if entity.status == Status::Locked {
                continue;
            }

            match &entity.kind {
                EntityKind::Service(service) => {
                    if !service.simulate {
                        let Some(action_id) = service.action(&name) else {
                            return Err(GraphError::ActionNotFound {
                                service: self.graph.label(id),
                                action: name,
                            });
                        };
                        for reached in self.plan_action(action_id, &mut plan) {
                            self.plan_held_action(reached, reverse, &mut stack);
                        }
                    }
                    plan.services.push((id, name.clone()));
                }
                EntityKind::Group(group) => {
                    for sub in group.subservices.values() {
                        stack.push((*sub, name.clone()));
                    }
                    plan.services.push((id, name.clone()));
                }
                EntityKind::Boundary(_) | EntityKind::Action(_) => {}
            }

            for dep in self.graph.dependencies_of(id, reverse) {
                let next = if dep.is_check() { STATUS_ACTION } else { name.as_str() };
                stack.push((dep.target(reverse), next.to_string()));
            }
        }

        Ok(plan)
    }

    /// Action entities `action` transitively depends on, itself included.
    /// Returns the ones not planned before.
    fn plan_action(&self, action: EntityId, plan: &mut RunPlan) -> Vec<EntityId> {
        let mut added = Vec::new();
        let mut stack = vec![action];
        while let Some(id) = stack.pop() {
            if self.graph.status(id) == Status::Locked {
                continue;
            }
            if plan.actions.insert(id) {
                added.push(id);
                stack.extend(self.graph.children(id).map(|dep| dep.child));
            }
        }
        added
    }

    /// What preparing `action` through an action dependency also prepares:
    /// its service, and the dependencies of the enclosing groups.
    fn plan_held_action(
        &self,
        action: EntityId,
        reverse: bool,
        stack: &mut Vec<(EntityId, String)>,
    ) {
        let name = self.graph.entity(action).name.clone();
        let scopes = self.graph.scopes(action);
        if let Some(owner) = scopes.first() {
            stack.push((*owner, name.clone()));
        }
        for group in scopes.iter().skip(1) {
            for dep in self.graph.dependencies_of(*group, reverse) {
                let next = if dep.is_check() { STATUS_ACTION } else { name.as_str() };
                stack.push((dep.target(reverse), next.to_string()));
            }
        }
    }

    /// Start a run of `action` from `roots`.
    ///
    /// Fails before anything is prepared if a reachable service does not
    /// define the action it would have to run.
    pub fn start_run(&mut self, roots: &[EntityId], action: &str) -> Result<SchedulerStep> {
        self.plan(roots, action)?;

        self.run_counter += 1;
        self.current_run_id = Some(self.run_counter);
        self.reverse = self.is_reverse_action(action);
        self.roots = roots.to_vec();

        for root in roots {
            self.graph.entity_mut(*root).origin = true;
        }

        info!(
            run_id = self.run_counter,
            action,
            reverse = self.reverse,
            roots = ?roots.iter().map(|r| self.graph.label(*r)).collect::<Vec<_>>(),
            "starting run"
        );

        for root in roots {
            self.enqueue_prepare(*root, action);
        }
        self.drain();

        Ok(self.take_step())
    }

    /// Prepare `id` for `action`: dependencies first, the entity itself once
    /// they are resolved.
    ///
    /// No-op once the entity left `NoStatus`.
    pub fn prepare(&mut self, id: EntityId, action: &str) -> SchedulerStep {
        self.enqueue_prepare(id, action);
        self.drain();
        self.take_step()
    }

    /// A dispatched action finished on all of its nodes.
    pub fn step_completion(&mut self, action: EntityId, outcome: DispatchOutcome) -> SchedulerStep {
        if self.graph.status(action) != Status::InProgress {
            warn!(
                action = %self.graph.label(action),
                status = %self.graph.status(action),
                "completion for an action that is not in progress; ignoring"
            );
            return self.take_step();
        }

        let label = self.graph.label(action);
        let now = Instant::now();
        let entity_action = self.graph.action_mut(action);
        entity_action.stop_time = Some(now);
        let verdict = entity_action.classify(&outcome);
        let errors = outcome.error_count();
        let timeouts = outcome.timeout_count();
        entity_action.last_result = Some(outcome);

        match verdict {
            Verdict::Retry => {
                entity_action.tries += 1;
                let delay = entity_action.delay;
                let tries = entity_action.tries;
                let maxretry = entity_action.maxretry;
                warn!(
                    action = %label,
                    errors,
                    timeouts,
                    tries,
                    maxretry,
                    "action failed; retrying"
                );
                self.set_status(action, Status::Waiting);
                self.arm_timer(action, delay);
            }
            Verdict::Final(status) => {
                debug!(action = %label, errors, timeouts, %status, "action classified");
                self.untrack(action);
                let deps_status = self.graph.entity(action).run.deps_status;
                let status = if status == Status::Done
                    && deps_status == Some(Status::DoneWithWarnings)
                {
                    Status::DoneWithWarnings
                } else {
                    status
                };
                self.finish(action, status);
            }
        }

        self.drain();
        self.take_step()
    }

    /// The delay timer of `action` fired.
    pub fn step_timer(&mut self, action: EntityId) -> SchedulerStep {
        if !self.manager.contains(action) || self.graph.status(action) != Status::Waiting {
            warn!(
                action = %self.graph.label(action),
                status = %self.graph.status(action),
                "timer fired for an action that is not delayed; ignoring"
            );
            return self.take_step();
        }

        self.dispatch(action);
        self.drain();
        self.take_step()
    }

    /// Return every entity to `NoStatus` for a new run.
    pub fn reset(&mut self) {
        self.graph.reset();
        self.manager.clear();
        self.queue.clear();
        self.commands.clear();
        self.events.clear();
        self.roots.clear();
        self.reverse = false;
        self.current_run_id = None;
    }

    fn enqueue_prepare(&mut self, id: EntityId, action: &str) {
        if self.graph.status(id) != Status::NoStatus {
            return;
        }
        self.graph.entity_mut(id).run.action = Some(action.to_string());
        self.set_status(id, Status::Waiting);
        self.queue.push_back(id);
    }

    fn drain(&mut self) {
        while let Some(id) = self.queue.pop_front() {
            self.evaluate(id);
        }
    }

    /// Actions always follow their own dependencies forward; everything else
    /// follows the run direction.
    fn direction(&self, id: EntityId) -> bool {
        !self.graph.entity(id).is_action() && self.reverse
    }

    /// Re-check a waiting entity: prepare what it still waits on, or start it.
    fn evaluate(&mut self, id: EntityId) {
        let entity = self.graph.entity(id);
        if entity.status != Status::Waiting || entity.run.started {
            return;
        }
        let action = entity.run.action.clone().unwrap_or_default();
        let reverse = self.direction(id);
        let deps = self.graph.dependencies_of(id, reverse);
        let held = self.held_by(id);

        let mut unresolved = 0usize;
        let edges = deps
            .iter()
            .map(|dep| (dep, reverse))
            .chain(held.iter().map(|(dep, rev)| (dep, *rev)));
        for (dep, reverse) in edges {
            let target = dep.target(reverse);
            let status = self.graph.status(target);
            if status == Status::NoStatus {
                unresolved += 1;
                let next = self.action_for(target, dep, &action);
                self.enqueue_prepare(target, &next);
                if self.graph.entity(target).is_action() {
                    self.prepare_owner(target);
                }
            } else if status.is_unresolved() {
                unresolved += 1;
            }
        }

        if unresolved > 0 {
            debug!(entity = %self.graph.label(id), unresolved, "waiting on dependencies");
            return;
        }

        if self.held_back(&held) {
            debug!(entity = %self.graph.label(id), "service dependency failed");
            self.finish(id, Status::DepError);
            return;
        }

        match self.eval_deps_status(id, &deps, reverse) {
            Status::DepError => {
                debug!(entity = %self.graph.label(id), "required dependency failed");
                self.finish(id, Status::DepError);
            }
            deps_status => self.start(id, deps_status),
        }
    }

    /// Dependencies an action is held on besides its own: those of its
    /// service and of every enclosing group, each in its walking direction.
    ///
    /// For an action prepared by its own service they are already resolved;
    /// they matter when the action is reached through an action dependency.
    fn held_by(&self, id: EntityId) -> Vec<(Dependency, bool)> {
        if !self.graph.entity(id).is_action() {
            return Vec::new();
        }
        self.graph
            .scopes(id)
            .into_iter()
            .flat_map(|scope| {
                let reverse = self.direction(scope);
                self.graph
                    .dependencies_of(scope, reverse)
                    .into_iter()
                    .map(move |dep| (dep, reverse))
            })
            .collect()
    }

    /// A required dependency of the action's service (or group) failed.
    fn held_back(&self, held: &[(Dependency, bool)]) -> bool {
        held.iter().any(|(dep, reverse)| {
            dep.is_strong() && self.graph.status(dep.target(*reverse)).is_failure()
        })
    }

    /// An action reached through an action dependency brings its service
    /// into the run, so the service reports a status of its own.
    fn prepare_owner(&mut self, action: EntityId) {
        let entity = self.graph.entity(action);
        let Some(owner) = entity.scope else {
            return;
        };
        if self.graph.status(owner) == Status::NoStatus {
            let name = entity.name.clone();
            debug!(
                service = %self.graph.label(owner),
                action = %name,
                "service prepared through an action dependency"
            );
            self.enqueue_prepare(owner, &name);
        }
    }

    /// Action a dependency target has to run.
    fn action_for(&self, target: EntityId, dep: &Dependency, action: &str) -> String {
        let entity = self.graph.entity(target);
        if entity.is_action() {
            entity.name.clone()
        } else if dep.is_check() {
            STATUS_ACTION.to_string()
        } else {
            action.to_string()
        }
    }

    /// Fold the statuses of resolved dependencies.
    ///
    /// A failed `Require` dependency gives `DepError`; a failed weak or check
    /// dependency gives `DoneWithWarnings`. Boundaries also surface warnings
    /// of the subservices they collect.
    fn eval_deps_status(&self, id: EntityId, deps: &[Dependency], reverse: bool) -> Status {
        let collects_warnings = self.graph.entity(id).is_boundary();
        let mut result = Status::Done;

        for dep in deps {
            let status = self.graph.status(dep.target(reverse));
            if status == Status::Locked {
                continue;
            }
            if status.is_failure() {
                if dep.is_strong() {
                    return Status::DepError;
                }
                result = Status::DoneWithWarnings;
            } else if status == Status::DoneWithWarnings && collects_warnings {
                result = Status::DoneWithWarnings;
            } else if status.is_unresolved() {
                return Status::Waiting;
            }
        }

        result
    }

    /// Dependencies are resolved and none of the required ones failed.
    fn start(&mut self, id: EntityId, deps_status: Status) {
        {
            let run = &mut self.graph.entity_mut(id).run;
            run.started = true;
            run.deps_status = Some(deps_status);
        }
        let action = self.graph.entity(id).run.action.clone().unwrap_or_default();

        match &self.graph.entity(id).kind {
            EntityKind::Boundary(_) => self.finish(id, deps_status),
            EntityKind::Group(group) => {
                let boundary = group.final_boundary(self.reverse);
                self.set_status(id, Status::InProgress);
                info!(group = %self.graph.label(id), %action, "entering service group");
                self.enqueue_prepare(boundary, &action);
            }
            EntityKind::Service(service) if service.simulate => {
                debug!(service = %self.graph.label(id), "simulated service; nothing to run");
                self.finish(id, deps_status);
            }
            EntityKind::Service(service) => {
                let Some(action_id) = service.action(&action) else {
                    panic!(
                        "service '{}' has no action '{}' although the run was planned",
                        self.graph.label(id),
                        action
                    );
                };
                self.set_status(id, Status::InProgress);
                match self.graph.status(action_id) {
                    Status::NoStatus => self.enqueue_prepare(action_id, &action),
                    status if status.is_terminal() => self.complete_service(id),
                    _ => {
                        debug!(
                            service = %self.graph.label(id),
                            %action,
                            "action already scheduled through an action dependency"
                        );
                    }
                }
            }
            EntityKind::Action(_) => self.launch_action(id, deps_status),
        }
    }

    /// First attempt of an action whose dependencies resolved.
    fn launch_action(&mut self, id: EntityId, deps_status: Status) {
        let simulate = self
            .graph
            .entity(id)
            .scope
            .and_then(|service| self.graph.entity(service).as_service())
            .is_some_and(|service| service.simulate);
        if simulate {
            self.finish(id, deps_status);
            return;
        }

        let action = self.graph.action(id);
        if action.resolved().is_some_and(|r| r.skipped) {
            info!(action = %self.graph.label(id), "no node left after filtering; skipping");
            self.finish(id, Status::Skipped);
            return;
        }

        let delay = action.delay;
        if delay.is_zero() {
            self.dispatch(id);
        } else {
            self.track(id);
            self.arm_timer(id, delay);
        }
    }

    fn dispatch(&mut self, id: EntityId) {
        self.track(id);

        let label = self.graph.label(id);
        let nodes = match self.graph.action(id).resolved() {
            Some(resolved) => resolved.nodes.clone(),
            None => self.graph.action_target(id).clone(),
        };

        let now = Instant::now();
        let action = self.graph.action_mut(id);
        action.dispatched += 1;
        if action.start_time.is_none() {
            action.start_time = Some(now);
        }
        let command = action.effective_command().to_string();
        let mode = action.mode;
        let timeout = action.timeout;
        let attempt = action.dispatched;

        self.set_status(id, Status::InProgress);
        info!(action = %label, attempt, %nodes, "dispatching action");

        self.events.push(EngineEvent::Started {
            entity: id,
            label: label.clone(),
            command: command.clone(),
            nodes: nodes.clone(),
        });
        self.commands.push(CoreCommand::Dispatch(DispatchRequest {
            action: id,
            label,
            command,
            nodes,
            mode,
            timeout,
        }));
    }

    fn arm_timer(&mut self, id: EntityId, delay: Duration) {
        debug!(action = %self.graph.label(id), ?delay, "arming delay timer");
        self.events.push(EngineEvent::Delayed {
            entity: id,
            label: self.graph.label(id),
            delay,
        });
        self.commands.push(CoreCommand::ArmTimer { action: id, delay });
    }

    fn track(&mut self, id: EntityId) {
        let action = self.graph.action(id);
        let fanout = action
            .resolved()
            .and_then(|r| r.fanout)
            .or(action.fanout);
        if self.manager.add_task(id, fanout) {
            self.commands
                .push(CoreCommand::SetConcurrencyLimit(self.manager.fanout()));
        }
    }

    fn untrack(&mut self, id: EntityId) {
        if self.manager.remove_task(id) {
            self.commands
                .push(CoreCommand::SetConcurrencyLimit(self.manager.fanout()));
        }
    }

    /// Service whose action reached a terminal status.
    fn complete_service(&mut self, id: EntityId) {
        let entity = self.graph.entity(id);
        let deps_status = entity.run.deps_status.unwrap_or(Status::Done);
        let Some(action_id) = entity
            .run
            .action
            .as_deref()
            .and_then(|name| self.graph.find_action(id, name))
        else {
            return;
        };

        let status = match self.graph.status(action_id) {
            Status::Error | Status::TooManyErrors | Status::TimedOut => Status::Error,
            Status::DepError => Status::DepError,
            Status::Skipped => Status::Skipped,
            Status::DoneWithWarnings => {
                if let Some(service) = self.graph.entity_mut(id).as_service_mut() {
                    service.warnings = true;
                }
                Status::DoneWithWarnings
            }
            Status::Done if deps_status == Status::DoneWithWarnings => Status::DoneWithWarnings,
            Status::Done => Status::Done,
            _ => return,
        };

        self.finish(id, status);
    }

    /// Group whose final boundary reached a terminal status.
    fn complete_group(&mut self, id: EntityId) {
        let Some(group) = self.graph.entity(id).as_group() else {
            return;
        };
        let inner = self.graph.status(group.final_boundary(self.reverse));
        let deps_status = self.graph.entity(id).run.deps_status.unwrap_or(Status::Done);

        let status = if inner.is_failure() {
            Status::Error
        } else if inner == Status::DoneWithWarnings || deps_status == Status::DoneWithWarnings {
            Status::DoneWithWarnings
        } else {
            Status::Done
        };

        self.finish(id, status);
    }

    /// Record a terminal status and wake up whatever waited on it.
    fn finish(&mut self, id: EntityId, status: Status) {
        self.set_status(id, status);

        let entity = self.graph.entity(id);
        let label = self.graph.label(id);
        if entity.is_boundary() {
            debug!(boundary = %label, %status, "boundary resolved");
        } else {
            if entity.is_action() {
                debug!(action = %label, %status, "action finished");
            } else {
                info!(service = %label, %status, "service finished");
            }
            self.events.push(EngineEvent::Completed {
                entity: id,
                label,
                status,
            });
        }

        let reverse = self.direction(id);
        for dependent in self.graph.dependents_of(id, reverse) {
            self.wake(dependent);
            if !self.graph.entity(dependent).is_action() {
                for held in self.held_actions(dependent) {
                    self.wake(held);
                }
            }
        }

        let entity = self.graph.entity(id);
        match &entity.kind {
            EntityKind::Boundary(boundary) => {
                let group = boundary.group;
                let is_final = self
                    .graph
                    .entity(group)
                    .as_group()
                    .is_some_and(|g| g.final_boundary(self.reverse) == id);
                if is_final && self.graph.status(group) == Status::InProgress {
                    self.complete_group(group);
                }
            }
            EntityKind::Action(_) => {
                let Some(service) = entity.scope else {
                    return;
                };
                let owner = self.graph.entity(service);
                let drives_owner = owner.status == Status::InProgress
                    && owner
                        .run
                        .action
                        .as_deref()
                        .and_then(|name| self.graph.find_action(service, name))
                        == Some(id);
                if drives_owner {
                    self.complete_service(service);
                }
            }
            EntityKind::Service(_) | EntityKind::Group(_) => {}
        }
    }

    fn wake(&mut self, id: EntityId) {
        let waiting = self.graph.entity(id);
        if waiting.status == Status::Waiting && !waiting.run.started {
            self.queue.push_back(id);
        }
    }

    /// Waiting actions of a service, or of any service inside a group.
    fn held_actions(&self, id: EntityId) -> Vec<EntityId> {
        let mut held = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            match &self.graph.entity(next).kind {
                EntityKind::Service(service) => held.extend(
                    service
                        .actions
                        .values()
                        .copied()
                        .filter(|action| self.graph.status(*action) == Status::Waiting),
                ),
                EntityKind::Group(group) => stack.extend(group.subservices.values().copied()),
                EntityKind::Boundary(_) | EntityKind::Action(_) => {}
            }
        }
        held
    }

    fn set_status(&mut self, id: EntityId, status: Status) {
        let entity = self.graph.entity_mut(id);
        let from = entity.status;
        if from == status {
            return;
        }
        entity.status = status;

        if !entity.is_boundary() {
            self.events.push(EngineEvent::StatusChanged {
                entity: id,
                label: self.graph.label(id),
                from,
                to: status,
            });
        }
    }

    fn take_step(&mut self) -> SchedulerStep {
        let run_just_finished = if self.current_run_id.is_some() && self.is_finished() {
            info!(
                run_id = self.current_run_id,
                status = %self.overall_status(),
                "all roots resolved; run finished"
            );
            self.current_run_id = None;
            true
        } else {
            false
        };

        SchedulerStep {
            commands: mem::take(&mut self.commands),
            events: mem::take(&mut self.events),
            run_just_finished,
        }
    }
}
