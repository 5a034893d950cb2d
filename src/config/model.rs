// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::DEFAULT_FANOUT;
use crate::types::{ActionMode, DepKind};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// fanout = 16
///
/// [variables]
/// FS = "scratch"
///
/// [defaults]
/// timeout = 30
///
/// [service.lustre]
/// target = "oss[1-4]"
/// require = ["network"]
///
/// [service.lustre.actions.start]
/// cmd = "mount -t lustre %FS"
/// ```
///
/// All sections are optional and have reasonable defaults. This is the
/// unvalidated form; [`ConfigFile`] is only built through `TryFrom`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    /// Engine behaviour from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Global variables from `[variables]`.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    /// Tunables inherited by every service and action, from `[defaults]`.
    #[serde(default)]
    pub defaults: Tunables,

    /// Top-level services from `[service.<name>]`.
    #[serde(default)]
    pub service: BTreeMap<String, ServiceConfig>,

    /// Top-level groups from `[group.<name>]`.
    #[serde(default)]
    pub group: BTreeMap<String, GroupConfig>,
}

/// A validated configuration document.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub variables: BTreeMap<String, String>,
    pub defaults: Tunables,
    pub service: BTreeMap<String, ServiceConfig>,
    pub group: BTreeMap<String, GroupConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            config: raw.config,
            variables: raw.variables,
            defaults: raw.defaults,
            service: raw.service,
            group: raw.group,
        }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Fanout of actions that do not set one.
    #[serde(default = "default_fanout")]
    pub fanout: usize,

    /// Actions that run dependents before their dependencies.
    #[serde(default = "default_reverse_actions")]
    pub reverse_actions: Vec<String>,

    #[serde(default = "default_ssh_path")]
    pub ssh_path: String,

    /// Extra arguments for every `ssh` invocation.
    #[serde(default = "default_ssh_options")]
    pub ssh_options: Vec<String>,

    /// Nodes reached with a local shell rather than `ssh`.
    #[serde(default = "default_local_nodes")]
    pub local_nodes: Vec<String>,
}

fn default_fanout() -> usize {
    DEFAULT_FANOUT
}

fn default_reverse_actions() -> Vec<String> {
    vec!["stop".to_string()]
}

fn default_ssh_path() -> String {
    "ssh".to_string()
}

fn default_ssh_options() -> Vec<String> {
    vec!["-oBatchMode=yes".to_string()]
}

fn default_local_nodes() -> Vec<String> {
    vec!["localhost".to_string()]
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            fanout: default_fanout(),
            reverse_actions: default_reverse_actions(),
            ssh_path: default_ssh_path(),
            ssh_options: default_ssh_options(),
            local_nodes: default_local_nodes(),
        }
    }
}

/// Execution tunables. Every level (defaults, group, service, action) may
/// set any of them; the most specific level wins.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Tunables {
    /// Per-node timeout in seconds; `0` disables it.
    #[serde(default)]
    pub timeout: Option<f64>,
    /// Seconds to wait before the first attempt and between retries.
    #[serde(default)]
    pub delay: Option<f64>,
    #[serde(default)]
    pub retry: Option<u32>,
    /// Failing nodes tolerated.
    #[serde(default)]
    pub errors: Option<usize>,
    /// Failing nodes tolerated without a warning.
    #[serde(default)]
    pub warnings: Option<usize>,
    #[serde(default)]
    pub fanout: Option<usize>,
    #[serde(default)]
    pub mode: Option<ActionMode>,
}

impl Tunables {
    /// `self` overridden by whatever `over` sets.
    pub fn merge(&self, over: &Tunables) -> Tunables {
        Tunables {
            timeout: over.timeout.or(self.timeout),
            delay: over.delay.or(self.delay),
            retry: over.retry.or(self.retry),
            errors: over.errors.or(self.errors),
            warnings: over.warnings.or(self.warnings),
            fanout: over.fanout.or(self.fanout),
            mode: over.mode.or(self.mode),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64)
    }

    pub fn delay(&self) -> Duration {
        self.delay
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or_default()
    }
}

/// The three dependency lists shared by services, groups and actions.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DepLists {
    #[serde(default)]
    pub require: Vec<String>,
    #[serde(default)]
    pub require_weak: Vec<String>,
    #[serde(default)]
    pub check: Vec<String>,
}

impl DepLists {
    pub fn iter(&self) -> impl Iterator<Item = (DepKind, &str)> + '_ {
        self.require
            .iter()
            .map(|name| (DepKind::Require, name.as_str()))
            .chain(
                self.require_weak
                    .iter()
                    .map(|name| (DepKind::RequireWeak, name.as_str())),
            )
            .chain(self.check.iter().map(|name| (DepKind::Check, name.as_str())))
    }

    pub fn is_empty(&self) -> bool {
        self.require.is_empty() && self.require_weak.is_empty() && self.check.is_empty()
    }
}

/// `[service.<name>]` section, also used for group subservices.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub desc: Option<String>,

    /// Node set pattern, e.g. `"node[1-4],admin"`.
    #[serde(default)]
    pub target: Option<String>,

    /// Take part in the graph without ever running a command.
    #[serde(default)]
    pub simulate: bool,

    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    #[serde(flatten)]
    pub tunables: Tunables,

    #[serde(flatten)]
    pub deps: DepLists,

    #[serde(default)]
    pub actions: BTreeMap<String, ActionConfig>,
}

/// `[service.<name>.actions.<action>]` section.
///
/// Dependencies name another action of the same service (`"start"`) or an
/// action of a sibling service (`"db.start"`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionConfig {
    /// The command to execute; may use `%VAR` placeholders.
    pub cmd: String,

    /// Overrides the service target.
    #[serde(default)]
    pub target: Option<String>,

    #[serde(default)]
    pub desc: Option<String>,

    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    #[serde(flatten)]
    pub tunables: Tunables,

    #[serde(flatten)]
    pub deps: DepLists,
}

/// `[group.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupConfig {
    #[serde(default)]
    pub desc: Option<String>,

    /// Default target of the subservices that do not set one.
    #[serde(default)]
    pub target: Option<String>,

    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    #[serde(flatten)]
    pub tunables: Tunables,

    #[serde(flatten)]
    pub deps: DepLists,

    /// Subservices; their dependencies name siblings in this group.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,

    /// Nested groups.
    #[serde(default)]
    pub groups: BTreeMap<String, GroupConfig>,
}
