#![allow(dead_code)]

use std::time::Duration;

use svcgraph::dag::{Action, EntityId, Service};
use svcgraph::engine::{ManagerOptions, ServiceManager};
use svcgraph::nodeset::NodeSet;
use svcgraph::types::DepKind;

/// Builder for `ServiceManager` to simplify test setup.
///
/// Services are addressed by name; every call panics on a graph error, so
/// tests read as a plain list of facts.
pub struct ManagerBuilder {
    manager: ServiceManager,
}

impl ManagerBuilder {
    pub fn new() -> Self {
        Self {
            manager: ServiceManager::default(),
        }
    }

    pub fn with_options(options: ManagerOptions) -> Self {
        Self {
            manager: ServiceManager::new(options),
        }
    }

    /// Top-level service with the given actions.
    pub fn service(mut self, name: &str, actions: Vec<(&str, Action)>) -> Self {
        let id = self
            .manager
            .add_service(name, Service::new())
            .expect("service registers");
        for (action_name, action) in actions {
            self.manager
                .graph_mut()
                .add_action(id, action_name, action)
                .expect("action registers");
        }
        self
    }

    /// Top-level service running `start`, `stop` and `status` with `echo`.
    pub fn echo_service(self, name: &str) -> Self {
        self.service(
            name,
            vec![
                ("start", action(&format!("echo start {name}"))),
                ("stop", action(&format!("echo stop {name}"))),
                ("status", action(&format!("echo status {name}"))),
            ],
        )
    }

    pub fn simulated(mut self, name: &str) -> Self {
        self.manager
            .add_service(name, Service::simulated())
            .expect("service registers");
        self
    }

    /// Empty top-level group.
    pub fn group(mut self, name: &str) -> Self {
        self.manager.add_group(name).expect("group registers");
        self
    }

    /// Echo subservice hanging between the boundaries of `group`.
    pub fn subservice(mut self, group: &str, name: &str) -> Self {
        let group = self.id(group);
        let graph = self.manager.graph_mut();
        let id = graph.add_service(name, Service::new());
        for verb in ["start", "stop", "status"] {
            graph
                .add_action(id, verb, action(&format!("echo {verb} {name}")))
                .expect("action registers");
        }
        graph
            .add_inter_dep(group, id, None, DepKind::Require)
            .expect("subservice joins the group");
        self
    }

    /// Inside `group`, `parent` depends on `child`.
    pub fn inner_dep(mut self, group: &str, parent: &str, child: &str, kind: DepKind) -> Self {
        let group = self.id(group);
        let graph = self.manager.graph_mut();
        let (parent, child) = {
            let g = graph.entity(group).as_group().expect("a group");
            (
                g.subservice(parent).expect("parent is a member"),
                g.subservice(child).expect("child is a member"),
            )
        };
        graph
            .add_inter_dep(group, child, Some(parent), kind)
            .expect("internal dependency is legal");
        self
    }

    pub fn target(mut self, name: &str, pattern: &str) -> Self {
        let id = self.id(name);
        self.manager.graph_mut().entity_mut(id).target =
            NodeSet::parse(pattern).expect("valid node set");
        self
    }

    /// `parent` depends on `child`.
    pub fn dep(mut self, parent: &str, child: &str, kind: DepKind) -> Self {
        let (parent, child) = (self.id(parent), self.id(child));
        self.manager
            .graph_mut()
            .add_dep(parent, child, kind)
            .expect("dependency is legal");
        self
    }

    pub fn require(self, parent: &str, child: &str) -> Self {
        self.dep(parent, child, DepKind::Require)
    }

    pub fn variable(mut self, name: &str, value: &str) -> Self {
        self.manager.add_variable(name, value);
        self
    }

    pub fn id(&self, name: &str) -> EntityId {
        self.manager
            .service(name)
            .unwrap_or_else(|| panic!("no service named {name}"))
    }

    pub fn build(self) -> ServiceManager {
        self.manager
    }
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Action running `cmd` with no timeout, delay or retry.
pub fn action(cmd: &str) -> Action {
    Action::new(cmd)
}

/// Action with a retry budget and a delay between attempts.
pub fn retrying(cmd: &str, maxretry: u32, delay: Duration) -> Action {
    Action::new(cmd).with_retry(maxretry).with_delay(delay)
}
